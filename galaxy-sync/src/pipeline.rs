//! Inline curation pipeline shared by the CLI and the tests.
//!
//! [`InlineScheduler`] queues tasks in memory; [`run`] drains the queue FIFO
//! on the calling thread. A single thread executes one task at a time, so
//! reservation keys are trivially honoured.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use galaxy_core::types::{RepositoryName, SyncListName};
use galaxy_core::Settings;

use crate::error::SyncError;
use crate::handlers::{dispatch, CurationEnv, TaskOutput};
use crate::store::FileRepositoryStore;
use crate::tasks::{
    CancelFlag, GroupSnapshot, MemoryTaskGroups, TaskGroupId, TaskHandle, TaskId, TaskKind,
    TaskRequest, TaskScheduler,
};

/// Scope for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurateScope {
    /// Every synclist of this upstream repository.
    All { upstream: RepositoryName },
    /// A single synclist.
    SyncList(SyncListName),
}

impl CurateScope {
    fn into_request(self) -> TaskRequest {
        match self {
            CurateScope::All { upstream } => TaskRequest::curate_all(upstream),
            CurateScope::SyncList(name) => TaskRequest::curate_synclist(name, None),
        }
    }
}

/// FIFO in-memory [`TaskScheduler`].
#[derive(Default)]
pub struct InlineScheduler {
    queue: Mutex<VecDeque<(TaskId, TaskRequest)>>,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<(TaskId, TaskRequest)> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskScheduler for InlineScheduler {
    fn enqueue(&self, request: TaskRequest) -> Result<TaskHandle, SyncError> {
        let id = TaskId::new();
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((id, request));
        Ok(TaskHandle { id })
    }
}

/// Outcome of one task executed by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: TaskId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<TaskGroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRun {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Every executed task, in execution order; the root task comes first.
    pub tasks: Vec<TaskRun>,
    pub groups: Vec<GroupSnapshot>,
}

impl PipelineReport {
    pub fn failures(&self) -> impl Iterator<Item = &TaskRun> {
        self.tasks.iter().filter(|t| !t.succeeded())
    }
}

/// Run the curation pipeline for `scope` to completion.
///
/// Fails only when the root task fails; failures of tasks it spawned are
/// recorded in the report.
pub fn run(home: &Path, settings: &Settings, scope: CurateScope) -> Result<PipelineReport, SyncError> {
    let store = FileRepositoryStore::at(home);
    let scheduler = InlineScheduler::new();
    let groups = MemoryTaskGroups::new();
    let env = CurationEnv {
        home,
        store: &store,
        scheduler: &scheduler,
        groups: &groups,
        settings,
    };
    let cancel = CancelFlag::new();

    let root = scheduler.enqueue(scope.into_request())?;
    let mut tasks = Vec::new();
    while let Some((id, request)) = scheduler.pop() {
        let result = match dispatch(&env, &request.kind, &cancel) {
            Err(err) if id == root.id => return Err(err),
            other => other,
        };
        tasks.push(record(id, &request.kind, request.group, result));
    }

    Ok(PipelineReport {
        tasks,
        groups: groups.all(),
    })
}

fn record(
    id: TaskId,
    kind: &TaskKind,
    group: Option<TaskGroupId>,
    result: Result<TaskOutput, SyncError>,
) -> TaskRun {
    let (output, error) = match result {
        Ok(output) => (Some(output), None),
        Err(err) => {
            tracing::warn!(task = %id, name = kind.name(), error = %err, "task failed");
            (None, Some(err.to_string()))
        }
    };
    TaskRun {
        id,
        name: kind.name().to_string(),
        group,
        output,
        error,
    }
}
