//! Task dispatch: maps each [`TaskKind`] to its handler.
//!
//! Both the inline pipeline and the worker runtime execute tasks through
//! [`dispatch`], so a task behaves the same wherever it runs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use galaxy_core::Settings;

use crate::curator::{curate_synclist_repository, CurationOutcome};
use crate::error::SyncError;
use crate::fanout::{curate_all_synclist_repository, FanOutReport};
use crate::store::RepositoryStore;
use crate::tasks::{CancelFlag, TaskGroups, TaskKind, TaskScheduler};
use crate::writer::{add_and_remove, WriteResult};

/// Everything a task handler needs, borrowed from the runner.
#[derive(Clone, Copy)]
pub struct CurationEnv<'a> {
    pub home: &'a Path,
    pub store: &'a dyn RepositoryStore,
    pub scheduler: &'a dyn TaskScheduler,
    pub groups: &'a dyn TaskGroups,
    pub settings: &'a Settings,
}

/// Result of one executed task, stored as the task's JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "task")]
pub enum TaskOutput {
    CurateAll(FanOutReport),
    CurateSynclist(CurationOutcome),
    WriteVersion(WriteResult),
}

/// Run one task to completion on the calling thread.
pub fn dispatch(
    env: &CurationEnv<'_>,
    kind: &TaskKind,
    cancel: &CancelFlag,
) -> Result<TaskOutput, SyncError> {
    cancel.check()?;
    match kind {
        TaskKind::CurateAll(params) => {
            curate_all_synclist_repository(env, params, cancel).map(TaskOutput::CurateAll)
        }
        TaskKind::CurateSynclist(params) => {
            curate_synclist_repository(env, params, cancel).map(TaskOutput::CurateSynclist)
        }
        TaskKind::WriteVersion(write) => add_and_remove(env.store, write).map(TaskOutput::WriteVersion),
    }
}
