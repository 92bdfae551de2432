//! Task records kept by the worker: state, timing, output and the
//! cancellation flag shared with the running handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use galaxy_sync::{
    CancelFlag, ResourceKey, SyncError, TaskGroupId, TaskId, TaskKind, TaskOutput, TaskRequest,
};

use crate::error::DaemonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Waiting,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::Waiting,
        TaskState::Running,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Canceled,
    ];

    pub fn is_final(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub state: TaskState,
    pub locks: Vec<ResourceKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<TaskGroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

struct TaskEntry {
    /// Insertion order.
    seq: u64,
    record: TaskRecord,
    cancel: CancelFlag,
}

/// Finished records kept by [`TaskTable::new`].
pub const DEFAULT_RETAIN_FINISHED: usize = 1000;

pub struct TaskTable {
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    next_seq: AtomicU64,
    retain_finished: usize,
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAIN_FINISHED)
    }
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that keeps at most `retain_finished` final records, dropping
    /// the oldest first. Waiting and running tasks are never dropped.
    pub fn with_retention(retain_finished: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            retain_finished,
        }
    }

    /// Record a new `Waiting` task and return its id and cancel flag.
    pub fn insert(&self, request: &TaskRequest) -> (TaskId, CancelFlag) {
        let id = TaskId::new();
        let cancel = CancelFlag::new();
        let record = TaskRecord {
            id,
            name: request.kind.name().to_string(),
            kind: request.kind.clone(),
            state: TaskState::Waiting,
            locks: request.locks.clone(),
            group: request.group,
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                TaskEntry {
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    record,
                    cancel: cancel.clone(),
                },
            );
        (id, cancel)
    }

    pub fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|e| e.record.clone())
    }

    /// Move a waiting task to `Running`. Returns `false` if it was canceled
    /// while waiting; the record is then finalized as `Canceled`.
    pub fn start(&self, id: TaskId) -> bool {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = tasks.get_mut(&id) else {
            return false;
        };
        if entry.cancel.is_cancelled() || entry.record.state != TaskState::Waiting {
            finalize(&mut entry.record, TaskState::Canceled);
            self.prune(&mut tasks);
            return false;
        }
        entry.record.state = TaskState::Running;
        entry.record.started_at = Some(Utc::now());
        true
    }

    /// Record the handler's result.
    pub fn finish(&self, id: TaskId, result: Result<TaskOutput, SyncError>) -> TaskState {
        match result {
            Ok(output) => self.finalize_with(id, TaskState::Completed, Some(output), None),
            Err(SyncError::Canceled) => self.finalize_with(id, TaskState::Canceled, None, None),
            Err(err) => self.fail(id, err.to_string()),
        }
    }

    /// Mark a task `Failed` with `message`.
    pub fn fail(&self, id: TaskId, message: String) -> TaskState {
        self.finalize_with(id, TaskState::Failed, None, Some(message))
    }

    fn finalize_with(
        &self,
        id: TaskId,
        state: TaskState,
        output: Option<TaskOutput>,
        error: Option<String>,
    ) -> TaskState {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = tasks.get_mut(&id) else {
            return state;
        };
        entry.record.output = output;
        entry.record.error = error;
        finalize(&mut entry.record, state);
        self.prune(&mut tasks);
        state
    }

    fn prune(&self, tasks: &mut HashMap<TaskId, TaskEntry>) {
        let mut finished: Vec<(u64, TaskId)> = tasks
            .values()
            .filter(|e| e.record.state.is_final())
            .map(|e| (e.seq, e.record.id))
            .collect();
        if finished.len() <= self.retain_finished {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.retain_finished;
        for (_, id) in finished.into_iter().take(excess) {
            tasks.remove(&id);
        }
        tracing::debug!(dropped = excess, "pruned finished task records");
    }

    /// Request cancellation. Waiting tasks become `Canceled` immediately;
    /// running tasks stop at their next checkpoint. Final tasks are left
    /// alone.
    pub fn cancel(&self, id: TaskId) -> Result<TaskState, DaemonError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let entry = tasks.get_mut(&id).ok_or(DaemonError::TaskNotFound(id))?;
        if entry.record.state.is_final() {
            return Ok(entry.record.state);
        }
        entry.cancel.cancel();
        if entry.record.state == TaskState::Waiting {
            finalize(&mut entry.record, TaskState::Canceled);
        }
        let state = entry.record.state;
        tracing::info!(task = %id, state = ?state, "task cancel requested");
        self.prune(&mut tasks);
        Ok(state)
    }

    /// Number of tasks in each state.
    pub fn counts(&self) -> HashMap<TaskState, usize> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = HashMap::new();
        for entry in tasks.values() {
            *counts.entry(entry.record.state).or_insert(0) += 1;
        }
        counts
    }

    /// Every task of `group`, oldest first.
    pub fn in_group(&self, group: TaskGroupId) -> Vec<TaskRecord> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<TaskRecord> = tasks
            .values()
            .filter(|e| e.record.group == Some(group))
            .map(|e| e.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

fn finalize(record: &mut TaskRecord, state: TaskState) {
    record.state = state;
    if record.finished_at.is_none() {
        record.finished_at = Some(Utc::now());
    }
}
