use std::collections::BTreeSet;

use galaxy_core::{
    registry,
    settings::EmptyUpstream,
    types::{CollectionRef, ContentUnitId, Policy, RepositoryName, SyncListName},
    Settings,
};
use galaxy_sync::{
    ingest::{create_repository, import_collection_version},
    pipeline::{self, CurateScope, PipelineReport},
    synclists::{create_synclist, update_synclist, SyncListSpec, SyncListUpdate},
    CurationOutcome, FileRepositoryStore, RepositoryStore, TaskOutput, WriteResult,
    CURATE_PROGRESS_CODE,
};
use rstest::rstest;
use tempfile::TempDir;

struct Upstream {
    home: TempDir,
    store: FileRepositoryStore,
    a1: ContentUnitId,
    a2: ContentUnitId,
    b1: ContentUnitId,
}

fn published() -> RepositoryName {
    RepositoryName::from("published")
}

/// `published` = {ns.a@1.0.0, ns.a@2.0.0, ns.b@1.0.0}
fn upstream() -> Upstream {
    let home = TempDir::new().expect("home");
    let store = FileRepositoryStore::at(home.path());
    create_repository(&store, &published()).expect("create published");
    let import = |ns: &str, name: &str, major: u64| {
        import_collection_version(
            &store,
            &published(),
            CollectionRef::new(ns, name),
            semver::Version::new(major, 0, 0),
        )
        .expect("import")
        .unit
    };
    let a1 = import("ns", "a", 1);
    let a2 = import("ns", "a", 2);
    let b1 = import("ns", "b", 1);
    Upstream {
        home,
        store,
        a1,
        a2,
        b1,
    }
}

fn synclist(up: &Upstream, account: &str, policy: Policy, collections: &[&str]) -> SyncListName {
    let (synclist, _) = create_synclist(
        up.home.path(),
        &up.store,
        &Settings::default(),
        account,
        SyncListSpec {
            policy,
            collections: collections.iter().map(|c| c.parse().expect("collection")).collect(),
            ..Default::default()
        },
    )
    .expect("create synclist");
    synclist.name
}

fn curate(up: &Upstream, name: &SyncListName) -> PipelineReport {
    pipeline::run(
        up.home.path(),
        &Settings::default(),
        CurateScope::SyncList(name.clone()),
    )
    .expect("pipeline")
}

fn target_content(up: &Upstream, name: &SyncListName) -> BTreeSet<ContentUnitId> {
    up.store
        .latest_version(&RepositoryName(name.0.clone()))
        .expect("load target")
        .map(|v| v.content)
        .unwrap_or_default()
}

fn version_count(up: &Upstream, name: &SyncListName) -> usize {
    up.store
        .load_repository(&RepositoryName(name.0.clone()))
        .expect("load target")
        .versions
        .len()
}

#[test]
fn exclude_removes_every_version_of_listed_collection() {
    let up = upstream();
    let name = synclist(&up, "acme", Policy::Exclude, &["ns.a"]);

    let report = curate(&up, &name);

    assert_eq!(report.tasks.len(), 2, "curate + write");
    assert!(report.failures().next().is_none());
    assert_eq!(target_content(&up, &name), [up.b1.clone()].into());
}

#[test]
fn include_replaces_previous_content_with_highest_of_listed() {
    let up = upstream();
    let name = synclist(&up, "acme", Policy::Include, &["ns.a"]);
    curate(&up, &name);
    assert_eq!(target_content(&up, &name), [up.a2.clone()].into());

    update_synclist(
        up.home.path(),
        &up.store,
        &name,
        SyncListUpdate {
            collections: Some(["ns.b".parse().expect("collection")].into()),
            ..Default::default()
        },
    )
    .expect("update");
    curate(&up, &name);

    assert_eq!(target_content(&up, &name), [up.b1.clone()].into());
    assert!(!target_content(&up, &name).contains(&up.a1));
}

#[rstest]
#[case::include(Policy::Include, &["ns.b"])]
#[case::exclude(Policy::Exclude, &["ns.a"])]
fn rerun_without_upstream_change_creates_no_version(#[case] policy: Policy, #[case] collections: &[&str]) {
    let up = upstream();
    let name = synclist(&up, "acme", policy, collections);

    curate(&up, &name);
    let first = target_content(&up, &name);
    let report = curate(&up, &name);

    assert_eq!(version_count(&up, &name), 1);
    assert_eq!(target_content(&up, &name), first);
    let write = report.tasks.last().expect("write task");
    assert!(matches!(
        write.output,
        Some(TaskOutput::WriteVersion(WriteResult::Unchanged { .. }))
    ));
}

#[rstest]
#[case::exclude_everything(Policy::Exclude, &["ns.a", "ns.b"], 0)]
#[case::empty_exclude_mirrors_upstream(Policy::Exclude, &[], 3)]
#[case::empty_include(Policy::Include, &[], 0)]
fn policy_edges(#[case] policy: Policy, #[case] collections: &[&str], #[case] expected: usize) {
    let up = upstream();
    let name = synclist(&up, "acme", policy, collections);
    curate(&up, &name);
    assert_eq!(target_content(&up, &name).len(), expected);
}

#[test]
fn fan_out_curates_every_synclist_of_the_upstream() {
    let up = upstream();
    let names: Vec<SyncListName> = ["acme", "globex", "initech"]
        .iter()
        .map(|account| synclist(&up, account, Policy::Exclude, &["ns.a"]))
        .collect();

    create_repository(&up.store, &RepositoryName::from("staging")).expect("staging");
    let other = create_synclist(
        up.home.path(),
        &up.store,
        &Settings::default(),
        "hooli",
        SyncListSpec {
            upstream: Some(RepositoryName::from("staging")),
            ..Default::default()
        },
    )
    .expect("other upstream")
    .0;

    let report = pipeline::run(
        up.home.path(),
        &Settings::default(),
        CurateScope::All {
            upstream: published(),
        },
    )
    .expect("pipeline");

    assert_eq!(report.groups.len(), 1);
    let group = &report.groups[0];
    assert!(group.group.finished);
    let progress = group
        .progress
        .iter()
        .find(|p| p.code == CURATE_PROGRESS_CODE)
        .expect("progress report");
    assert_eq!(progress.total, 3);
    assert_eq!(progress.done, 3);

    let curations: Vec<_> = report
        .tasks
        .iter()
        .filter(|t| t.name == "curate_synclist_repository")
        .collect();
    assert_eq!(curations.len(), 3);
    assert!(curations.iter().all(|t| t.group == Some(group.group.id)));
    assert_eq!(
        report.tasks.iter().filter(|t| t.name == "add_and_remove").count(),
        3
    );

    for name in &names {
        assert_eq!(target_content(&up, name), [up.b1.clone()].into());
    }
    assert_eq!(version_count(&up, &other.name), 0);
}

#[test]
fn fan_out_over_zero_synclists_finishes_an_empty_group() {
    let up = upstream();
    let report = pipeline::run(
        up.home.path(),
        &Settings::default(),
        CurateScope::All {
            upstream: published(),
        },
    )
    .expect("pipeline");

    assert_eq!(report.tasks.len(), 1);
    let group = &report.groups[0];
    assert!(group.group.finished);
    assert_eq!(group.progress[0].total, 0);
    assert_eq!(group.progress[0].done, 0);
}

#[test]
fn upstream_change_flows_into_exclude_synclist() {
    let up = upstream();
    let name = synclist(&up, "acme", Policy::Exclude, &["ns.a"]);
    curate(&up, &name);

    let c1 = import_collection_version(
        &up.store,
        &published(),
        CollectionRef::new("ns", "c"),
        semver::Version::new(1, 0, 0),
    )
    .expect("import c")
    .unit;
    pipeline::run(
        up.home.path(),
        &Settings::default(),
        CurateScope::All {
            upstream: published(),
        },
    )
    .expect("pipeline");

    assert_eq!(target_content(&up, &name), [up.b1.clone(), c1].into());
    assert_eq!(version_count(&up, &name), 2);
}

#[test]
fn empty_upstream_skips_by_default() {
    let home = TempDir::new().expect("home");
    let store = FileRepositoryStore::at(home.path());
    create_repository(&store, &published()).expect("published");
    let (synclist, _) = create_synclist(
        home.path(),
        &store,
        &Settings::default(),
        "acme",
        SyncListSpec::default(),
    )
    .expect("synclist");

    let report = pipeline::run(
        home.path(),
        &Settings::default(),
        CurateScope::SyncList(synclist.name.clone()),
    )
    .expect("pipeline");

    assert_eq!(report.tasks.len(), 1);
    assert!(matches!(
        report.tasks[0].output,
        Some(TaskOutput::CurateSynclist(CurationOutcome::Skipped { .. }))
    ));
    assert!(store
        .load_repository(&synclist.repository)
        .expect("target")
        .versions
        .is_empty());
}

#[test]
fn empty_upstream_fails_when_configured() {
    let home = TempDir::new().expect("home");
    let store = FileRepositoryStore::at(home.path());
    create_repository(&store, &published()).expect("published");
    let mut settings = Settings::default();
    settings.curation.empty_upstream = EmptyUpstream::Fail;
    let (synclist, _) =
        create_synclist(home.path(), &store, &settings, "acme", SyncListSpec::default()).expect("synclist");

    let err = pipeline::run(home.path(), &settings, CurateScope::SyncList(synclist.name))
        .expect_err("curation should fail");
    assert!(err.to_string().contains("has no version yet"));
}

#[test]
fn failed_child_curation_is_recorded_not_raised() {
    let up = upstream();
    let name = synclist(&up, "acme", Policy::Exclude, &[]);
    let doomed = synclist(&up, "globex", Policy::Exclude, &[]);
    std::fs::remove_file(up.store.repository_path(&RepositoryName(doomed.0.clone())))
        .expect("remove target");

    let report = pipeline::run(
        up.home.path(),
        &Settings::default(),
        CurateScope::All {
            upstream: published(),
        },
    )
    .expect("pipeline");

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("globex-synclist")));
    assert_eq!(target_content(&up, &name).len(), 3);
    assert!(registry::synclist_exists_at(up.home.path(), &doomed));
}
