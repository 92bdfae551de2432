use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use galaxy_core::{
    types::{CollectionRef, Policy, RepositoryName, SyncListName},
    Settings,
};
use galaxy_daemon::{
    request_curate, request_curate_all, request_group, request_status, request_stop, request_task,
};
use galaxy_sync::{
    ingest::{create_repository, import_collection_version},
    synclists::{create_synclist, SyncListSpec},
    FileRepositoryStore, RepositoryStore, TaskGroupId, TaskId,
};

const WAIT: Duration = Duration::from_secs(10);

fn seed(home: &TempDir) -> SyncListName {
    let store = FileRepositoryStore::at(home.path());
    let published = RepositoryName::from("published");
    create_repository(&store, &published).expect("published");
    for (name, major) in [("a", 1), ("a", 2), ("b", 1)] {
        import_collection_version(
            &store,
            &published,
            CollectionRef::new("ns", name),
            semver::Version::new(major, 0, 0),
        )
        .expect("import");
    }
    create_synclist(
        home.path(),
        &store,
        &Settings::default(),
        "acme",
        SyncListSpec {
            policy: Policy::Exclude,
            collections: [CollectionRef::new("ns", "a")].into(),
            ..Default::default()
        },
    )
    .expect("synclist")
    .0
    .name
}

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.worker.debounce_ms = 50;
    settings
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("join")
}

async fn wait_for_final(home: PathBuf, id: TaskId) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            let home = home.clone();
            let record = blocking(move || request_task(&home, id)).await.expect("task");
            if matches!(record["state"].as_str(), Some("completed" | "failed" | "canceled")) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("task reaches a final state")
}

async fn wait_for_worker(home: PathBuf) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            let home = home.clone();
            if let Ok(status) = blocking(move || request_status(&home)).await {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("worker answers status")
}

fn task_id(value: &Value) -> TaskId {
    serde_json::from_value(value.clone()).expect("task id")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socket_curation_round_trip() {
    let home = TempDir::new().expect("home");
    let synclist = seed(&home);
    let home_path = home.path().to_path_buf();

    let worker = tokio::spawn(galaxy_daemon::run(home_path.clone(), fast_settings()));

    let status = wait_for_worker(home_path.clone()).await;
    assert_eq!(status["running"], Value::Bool(true));

    // sync → curate task → write task
    let accepted = {
        let home = home_path.clone();
        let synclist = synclist.clone();
        blocking(move || request_curate(&home, synclist)).await.expect("sync")
    };
    let curate = wait_for_final(home_path.clone(), task_id(&accepted["task"])).await;
    assert_eq!(curate["state"], "completed", "{curate}");
    assert_eq!(curate["output"]["outcome"], "submitted");
    let write = wait_for_final(home_path.clone(), task_id(&curate["output"]["write_task"])).await;
    assert_eq!(write["state"], "completed", "{write}");

    let store = FileRepositoryStore::at(&home_path);
    let target = store
        .latest_version(&RepositoryName(synclist.0.clone()))
        .expect("load")
        .expect("version");
    assert_eq!(target.content.len(), 1);

    // curate-all → group with progress done == total
    let accepted = {
        let home = home_path.clone();
        blocking(move || request_curate_all(&home, RepositoryName::from("published")))
            .await
            .expect("curate-all")
    };
    let fan_out = wait_for_final(home_path.clone(), task_id(&accepted["task"])).await;
    assert_eq!(fan_out["state"], "completed", "{fan_out}");
    let group: TaskGroupId =
        serde_json::from_value(fan_out["output"]["group"].clone()).expect("group id");
    let group = {
        let home = home_path.clone();
        blocking(move || request_group(&home, group)).await.expect("group")
    };
    assert_eq!(group["group"]["finished"], Value::Bool(true));
    assert_eq!(group["progress"][0]["code"], "synclist.curate");
    assert_eq!(group["progress"][0]["total"], 1);
    assert_eq!(group["progress"][0]["done"], 1);
    assert_eq!(group["tasks"].as_array().map(Vec::len), Some(1));

    {
        let home = home_path.clone();
        blocking(move || request_stop(&home)).await.expect("stop");
    }
    tokio::time::timeout(WAIT, worker)
        .await
        .expect("worker exits")
        .expect("join")
        .expect("worker result");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upstream_change_triggers_curation() {
    let home = TempDir::new().expect("home");
    let synclist = seed(&home);
    let home_path = home.path().to_path_buf();

    let worker = tokio::spawn(galaxy_daemon::run(home_path.clone(), fast_settings()));
    wait_for_worker(home_path.clone()).await;
    // The watcher registers independently of the socket bind.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let new_unit = {
        let home = home_path.clone();
        blocking(move || {
            import_collection_version(
                &FileRepositoryStore::at(&home),
                &RepositoryName::from("published"),
                CollectionRef::new("ns", "c"),
                semver::Version::new(1, 0, 0),
            )
        })
        .await
        .expect("import")
        .unit
    };

    let target = RepositoryName(synclist.0.clone());
    let store = FileRepositoryStore::at(&home_path);
    tokio::time::timeout(WAIT, async {
        loop {
            let curated = store
                .latest_version(&target)
                .ok()
                .flatten()
                .is_some_and(|v| v.content.contains(&new_unit));
            if curated {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("watcher-triggered curation lands the new unit");

    {
        let home = home_path.clone();
        blocking(move || request_stop(&home)).await.expect("stop");
    }
    tokio::time::timeout(WAIT, worker)
        .await
        .expect("worker exits")
        .expect("join")
        .expect("worker result");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn back_to_back_syncs_leave_latest_upstream_content() {
    let home = TempDir::new().expect("home");
    let synclist = seed(&home);
    let home_path = home.path().to_path_buf();

    // Keep the watcher quiet; only the two syncs curate.
    let mut settings = Settings::default();
    settings.worker.debounce_ms = 60_000;
    let worker = tokio::spawn(galaxy_daemon::run(home_path.clone(), settings));
    wait_for_worker(home_path.clone()).await;

    let sync = |home: PathBuf, synclist: SyncListName| async move {
        let accepted = blocking(move || request_curate(&home, synclist)).await.expect("sync");
        task_id(&accepted["task"])
    };

    let first = sync(home_path.clone(), synclist.clone()).await;
    {
        let home = home_path.clone();
        blocking(move || {
            import_collection_version(
                &FileRepositoryStore::at(&home),
                &RepositoryName::from("published"),
                CollectionRef::new("ns", "c"),
                semver::Version::new(1, 0, 0),
            )
        })
        .await
        .expect("import");
    }
    let second = sync(home_path.clone(), synclist.clone()).await;

    let first = wait_for_final(home_path.clone(), first).await;
    let second = wait_for_final(home_path.clone(), second).await;
    assert_eq!(first["state"], "completed", "{first}");
    assert_eq!(second["state"], "completed", "{second}");
    for curate in [&first, &second] {
        let write = wait_for_final(home_path.clone(), task_id(&curate["output"]["write_task"])).await;
        assert_eq!(write["state"], "completed", "{write}");
    }

    let base = |curate: &Value| curate["output"]["base_version"]["number"].as_u64().expect("base");
    assert!(base(&first) <= base(&second));

    let store = FileRepositoryStore::at(&home_path);
    let target = store
        .load_repository(&RepositoryName(synclist.0.clone()))
        .expect("target");
    let numbers: Vec<u64> = target.versions.iter().map(|v| v.number).collect();
    let expected_numbers: Vec<u64> = (1..=numbers.len() as u64).collect();
    assert_eq!(numbers, expected_numbers);

    let upstream = store
        .latest_version(&RepositoryName::from("published"))
        .expect("load")
        .expect("upstream version");
    assert_eq!(upstream.number, base(&second));
    let catalog = store.load_catalog().expect("catalog");
    let expected: std::collections::BTreeSet<_> = upstream
        .content
        .iter()
        .filter(|id| {
            catalog
                .unit(id)
                .is_some_and(|unit| unit.collection != CollectionRef::new("ns", "a"))
        })
        .cloned()
        .collect();
    assert_eq!(expected.len(), 2, "ns.b and ns.c remain");
    let latest = target.latest_version().expect("curated version");
    assert_eq!(latest.content, expected);

    {
        let home = home_path.clone();
        blocking(move || request_stop(&home)).await.expect("stop");
    }
    tokio::time::timeout(WAIT, worker)
        .await
        .expect("worker exits")
        .expect("join")
        .expect("worker result");
}
