//! Registry error-message, atomic-write-safety, and listing integration tests.
//! Storage: ~/.galaxy/synclists/<name>.yaml

use std::collections::BTreeSet;
use std::fs;

use assert_fs::prelude::*;
use chrono::Utc;
use galaxy_core::{
    registry,
    types::{CollectionRef, Policy, RepositoryName, SyncList, SyncListName},
    RegistryError,
};
use predicates::prelude::predicate;
use rstest::rstest;

fn name() -> SyncListName { SyncListName::from("acme-synclist") }

fn synclist(name: &str) -> SyncList {
    let now = Utc::now();
    SyncList {
        name: SyncListName::from(name),
        policy: Policy::Exclude,
        collections: [CollectionRef::new("community", "general")].into(),
        namespaces: BTreeSet::new(),
        upstream_repository: RepositoryName::from("published"),
        repository: RepositoryName::from(name),
        users: BTreeSet::new(),
        groups: BTreeSet::new(),
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_synclist_names_the_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = registry::load_synclist_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, RegistryError::SyncListNotFound { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains("acme-synclist"), "got: {msg}");
    assert!(msg.contains("acme-synclist.yaml"), "got: {msg}");
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".galaxy/synclists/acme-synclist.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = registry::load_synclist_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("acme-synclist.yaml"));
}

#[test]
fn load_record_missing_required_field_is_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".galaxy/synclists/acme-synclist.yaml")
        .write_str("name: acme-synclist\npolicy: include\n")
        .expect("write");

    let err = registry::load_synclist_at(home.path(), &name()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
}

#[test]
fn list_skips_foreign_files_and_fails_on_corrupt_records() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::save_synclist_at(home.path(), &synclist("a-synclist")).expect("save");
    home.child(".galaxy/synclists/notes.txt").write_str("not yaml").expect("write");

    let listed = registry::list_synclists_at(home.path()).expect("list");
    assert_eq!(listed.len(), 1);

    home.child(".galaxy/synclists/b-synclist.yaml").write_str("- a list\n").expect("write");
    let err = registry::list_synclists_at(home.path()).unwrap_err();
    assert!(err.to_string().contains("b-synclist.yaml"), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::save_synclist_at(home.path(), &synclist("acme-synclist")).expect("save");

    home.child(".galaxy/synclists/acme-synclist.yaml")
        .assert(predicate::path::exists());
    home.child(".galaxy/synclists/acme-synclist.yaml.tmp")
        .assert(predicate::path::missing());
}

#[test]
fn save_overwrites_previous_record() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut record = synclist("acme-synclist");
    registry::save_synclist_at(home.path(), &record).expect("save");

    record.policy = Policy::Include;
    record.namespaces.insert("ansible".to_string());
    registry::save_synclist_at(home.path(), &record).expect("save again");

    let loaded = registry::load_synclist_at(home.path(), &name()).expect("load");
    assert_eq!(loaded.policy, Policy::Include);
    assert!(loaded.namespaces.contains("ansible"));

    let yaml = fs::read_to_string(registry::synclist_path_at(home.path(), &name())).expect("read");
    assert!(yaml.contains("policy: include"), "got: {yaml}");
}

#[rstest]
#[case::parent_dir("../escape")]
#[case::nested("team/acme")]
#[case::backslash("team\\acme")]
#[case::hidden(".acme")]
#[case::empty("")]
fn invalid_name_is_rejected_before_touching_disk(#[case] name: &str) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = registry::save_synclist_at(home.path(), &synclist(name)).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidName(_)), "got: {err}");
    home.child(".galaxy").assert(predicate::path::missing());
}

#[rstest]
#[case("acme-synclist")]
#[case("acme.synclist")]
#[case("ACME_2")]
fn valid_names_pass_validation(#[case] name: &str) {
    assert!(registry::validate_name(name).is_ok());
    assert_eq!(
        registry::synclist_path_at(std::path::Path::new("/home/u"), &SyncListName::from(name)),
        std::path::Path::new("/home/u/.galaxy/synclists").join(format!("{name}.yaml"))
    );
}

// ---------------------------------------------------------------------------
// 3. Upstream lookup
// ---------------------------------------------------------------------------

#[test]
fn synclists_for_upstream_ignores_other_upstreams() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::save_synclist_at(home.path(), &synclist("b-synclist")).expect("save");
    registry::save_synclist_at(home.path(), &synclist("a-synclist")).expect("save");
    let mut other = synclist("c-synclist");
    other.upstream_repository = RepositoryName::from("staging");
    registry::save_synclist_at(home.path(), &other).expect("save");

    let published =
        registry::synclists_for_upstream_at(home.path(), &RepositoryName::from("published"))
            .expect("lookup");
    let names: Vec<_> = published.iter().map(|s| s.name.0.as_str()).collect();
    assert_eq!(names, ["a-synclist", "b-synclist"]);

    let none = registry::synclists_for_upstream_at(home.path(), &RepositoryName::from("missing"))
        .expect("lookup");
    assert!(none.is_empty());
}
