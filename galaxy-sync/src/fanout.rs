//! Fan-out over every synclist of an upstream repository.

use serde::{Deserialize, Serialize};

use galaxy_core::registry;
use galaxy_core::types::{RepositoryName, SyncList, SyncListName};

use crate::error::SyncError;
use crate::handlers::CurationEnv;
use crate::tasks::{CancelFlag, CurateAllParams, GroupProgressReport, TaskGroupId, TaskId, TaskRequest};

/// Progress code of the per-group "synclists enqueued" counter.
pub const CURATE_PROGRESS_CODE: &str = "synclist.curate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutReport {
    pub upstream: RepositoryName,
    pub group: TaskGroupId,
    /// Enqueued curation tasks, in synclist name order.
    pub tasks: Vec<(SyncListName, TaskId)>,
}

/// Enqueue one `curate_synclist_repository` task per synclist of `upstream`,
/// all under a fresh task group.
///
/// The group is finished once every enqueue has returned, including when an
/// enqueue fails; tasks enqueued before the failure keep running.
pub fn curate_all_synclist_repository(
    env: &CurationEnv<'_>,
    params: &CurateAllParams,
    cancel: &CancelFlag,
) -> Result<FanOutReport, SyncError> {
    let upstream = &params.upstream;
    if !env.store.repository_exists(upstream)? {
        return Err(SyncError::RepositoryNotFound(upstream.clone()));
    }
    let synclists = registry::synclists_for_upstream_at(env.home, upstream)?;

    let group = env
        .groups
        .create_group(&format!("Curating all synclists for repository {upstream}"))?;
    let enqueued = enqueue_all(env, group, &synclists, cancel);
    let finished = env.groups.finish_group(group);
    let tasks = enqueued?;
    finished?;

    tracing::info!(upstream = %upstream, group = %group, total = tasks.len(), "synclist curation fanned out");
    Ok(FanOutReport {
        upstream: upstream.clone(),
        group,
        tasks,
    })
}

fn enqueue_all(
    env: &CurationEnv<'_>,
    group: TaskGroupId,
    synclists: &[SyncList],
    cancel: &CancelFlag,
) -> Result<Vec<(SyncListName, TaskId)>, SyncError> {
    env.groups.create_progress(GroupProgressReport::new(
        "Curating synclists",
        CURATE_PROGRESS_CODE,
        synclists.len() as u64,
        group,
    ))?;

    let mut tasks = Vec::with_capacity(synclists.len());
    for synclist in synclists {
        cancel.check()?;
        let handle = env
            .scheduler
            .enqueue(TaskRequest::curate_synclist(synclist.name.clone(), Some(group)))?;
        env.groups.increment_progress(group, CURATE_PROGRESS_CODE)?;
        tracing::debug!(synclist = %synclist.name, task = %handle.id, "curation enqueued");
        tasks.push((synclist.name.clone(), handle.id));
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use galaxy_core::types::Policy;
    use galaxy_core::Settings;
    use tempfile::TempDir;

    use super::*;
    use crate::ingest::create_repository;
    use crate::pipeline::InlineScheduler;
    use crate::store::FileRepositoryStore;
    use crate::tasks::{MemoryTaskGroups, TaskGroups, TaskHandle, TaskKind, TaskScheduler};

    /// Accepts `limit` enqueues, then refuses.
    struct FlakyScheduler {
        limit: usize,
        seen: AtomicUsize,
    }

    impl TaskScheduler for FlakyScheduler {
        fn enqueue(&self, _request: TaskRequest) -> Result<TaskHandle, SyncError> {
            if self.seen.fetch_add(1, Ordering::SeqCst) >= self.limit {
                return Err(SyncError::Enqueue("queue closed".to_string()));
            }
            Ok(TaskHandle { id: TaskId::new() })
        }
    }

    fn seed(tmp: &TempDir, names: &[&str]) -> FileRepositoryStore {
        let store = FileRepositoryStore::at(tmp.path());
        create_repository(&store, &RepositoryName::from("published")).unwrap();
        let now = Utc::now();
        for name in names {
            registry::save_synclist_at(
                tmp.path(),
                &SyncList {
                    name: SyncListName::from(*name),
                    policy: Policy::Exclude,
                    collections: BTreeSet::new(),
                    namespaces: BTreeSet::new(),
                    upstream_repository: RepositoryName::from("published"),
                    repository: RepositoryName::from(*name),
                    users: BTreeSet::new(),
                    groups: BTreeSet::new(),
                    created_at: now,
                    updated_at: now,
                },
            )
            .unwrap();
        }
        store
    }

    fn params() -> CurateAllParams {
        CurateAllParams {
            upstream: RepositoryName::from("published"),
        }
    }

    #[test]
    fn enqueues_in_name_order_under_one_group() {
        let tmp = TempDir::new().unwrap();
        let store = seed(&tmp, &["b-synclist", "a-synclist"]);
        let scheduler = InlineScheduler::new();
        let groups = MemoryTaskGroups::new();
        let settings = Settings::default();
        let env = CurationEnv {
            home: tmp.path(),
            store: &store,
            scheduler: &scheduler,
            groups: &groups,
            settings: &settings,
        };

        let report = curate_all_synclist_repository(&env, &params(), &CancelFlag::new()).unwrap();
        let names: Vec<_> = report.tasks.iter().map(|(n, _)| n.0.as_str()).collect();
        assert_eq!(names, ["a-synclist", "b-synclist"]);

        while let Some((_, request)) = scheduler.pop() {
            assert_eq!(request.group, Some(report.group));
            assert!(matches!(request.kind, TaskKind::CurateSynclist(_)));
        }

        let snapshot = groups.snapshot(report.group).unwrap();
        assert!(snapshot.group.finished);
        assert_eq!((snapshot.progress[0].done, snapshot.progress[0].total), (2, 2));
    }

    #[test]
    fn enqueue_failure_still_finishes_group() {
        let tmp = TempDir::new().unwrap();
        let store = seed(&tmp, &["a-synclist", "b-synclist", "c-synclist"]);
        let scheduler = FlakyScheduler {
            limit: 1,
            seen: AtomicUsize::new(0),
        };
        let groups = MemoryTaskGroups::new();
        let settings = Settings::default();
        let env = CurationEnv {
            home: tmp.path(),
            store: &store,
            scheduler: &scheduler,
            groups: &groups,
            settings: &settings,
        };

        let err = curate_all_synclist_repository(&env, &params(), &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, SyncError::Enqueue(_)));

        let all = groups.all();
        assert_eq!(all.len(), 1);
        assert!(all[0].group.finished);
        assert_eq!((all[0].progress[0].done, all[0].progress[0].total), (1, 3));
    }

    #[test]
    fn canceled_fan_out_enqueues_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = seed(&tmp, &["a-synclist"]);
        let scheduler = InlineScheduler::new();
        let groups = MemoryTaskGroups::new();
        let settings = Settings::default();
        let env = CurationEnv {
            home: tmp.path(),
            store: &store,
            scheduler: &scheduler,
            groups: &groups,
            settings: &settings,
        };
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = curate_all_synclist_repository(&env, &params(), &cancel).unwrap_err();
        assert!(matches!(err, SyncError::Canceled));
        assert!(scheduler.is_empty());
        assert!(groups.all()[0].group.finished);
    }
}
