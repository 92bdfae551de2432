//! Task scheduling seams: typed task kinds, reservation keys, the scheduler
//! and task-group interfaces, and cooperative cancellation.
//!
//! The curation code only ever talks to [`TaskScheduler`] and [`TaskGroups`];
//! the worker runtime and the inline pipeline provide the implementations.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use galaxy_core::types::{ContentUnitId, RepositoryName, SyncListName, VersionRef};

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskGroupId(pub Uuid);

impl TaskGroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskGroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskGroupId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Reservation keys
// ---------------------------------------------------------------------------

/// Identity of a resource a task reserves. Tasks holding any common key
/// never run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum ResourceKey {
    SyncList(SyncListName),
    Repository(RepositoryName),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::SyncList(name) => write!(f, "synclist:{name}"),
            ResourceKey::Repository(name) => write!(f, "repository:{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Task kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurateAllParams {
    pub upstream: RepositoryName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurateSynclistParams {
    pub synclist: SyncListName,
}

/// What to take away from the base content before adding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    /// Clear everything currently present.
    All,
    Units(BTreeSet<ContentUnitId>),
}

impl Removal {
    pub fn none() -> Self {
        Removal::Units(BTreeSet::new())
    }
}

/// One atomic add/remove against a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionWrite {
    pub repository: RepositoryName,
    /// Content to start from; `None` means the repository's own latest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<VersionRef>,
    #[serde(default)]
    pub add: BTreeSet<ContentUnitId>,
    pub remove: Removal,
}

/// Every schedulable unit of work, with its typed parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "task", content = "params")]
pub enum TaskKind {
    CurateAll(CurateAllParams),
    CurateSynclist(CurateSynclistParams),
    WriteVersion(VersionWrite),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::CurateAll(_) => "curate_all_synclist_repository",
            TaskKind::CurateSynclist(_) => "curate_synclist_repository",
            TaskKind::WriteVersion(_) => "add_and_remove",
        }
    }
}

/// A task submission: what to run, what to reserve, which group it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub kind: TaskKind,
    #[serde(default)]
    pub locks: Vec<ResourceKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<TaskGroupId>,
}

impl TaskRequest {
    /// Fan-out over every synclist of `upstream`. Reserves nothing.
    pub fn curate_all(upstream: RepositoryName) -> Self {
        Self {
            kind: TaskKind::CurateAll(CurateAllParams { upstream }),
            locks: vec![],
            group: None,
        }
    }

    /// Curation of one synclist, reserved on the synclist.
    pub fn curate_synclist(synclist: SyncListName, group: Option<TaskGroupId>) -> Self {
        Self {
            locks: vec![ResourceKey::SyncList(synclist.clone())],
            kind: TaskKind::CurateSynclist(CurateSynclistParams { synclist }),
            group,
        }
    }

    /// Version write, reserved on the target repository.
    pub fn write_version(write: VersionWrite) -> Self {
        Self {
            locks: vec![ResourceKey::Repository(write.repository.clone())],
            kind: TaskKind::WriteVersion(write),
            group: None,
        }
    }
}

/// Returned by a successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: TaskId,
}

/// Schedules tasks for asynchronous execution.
///
/// Implementations guarantee that no two tasks holding an overlapping
/// reservation key run concurrently.
pub trait TaskScheduler: Send + Sync {
    fn enqueue(&self, request: TaskRequest) -> Result<TaskHandle, SyncError>;
}

// ---------------------------------------------------------------------------
// Task groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: TaskGroupId,
    pub description: String,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counter record scoped to a group and a `code` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProgressReport {
    pub message: String,
    pub code: String,
    pub total: u64,
    pub done: u64,
    pub group: TaskGroupId,
}

impl GroupProgressReport {
    pub fn new(message: impl Into<String>, code: impl Into<String>, total: u64, group: TaskGroupId) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            total,
            done: 0,
            group,
        }
    }
}

/// Point-in-time view of a group and its progress reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub group: TaskGroup,
    pub progress: Vec<GroupProgressReport>,
}

pub trait TaskGroups: Send + Sync {
    fn create_group(&self, description: &str) -> Result<TaskGroupId, SyncError>;

    fn finish_group(&self, id: TaskGroupId) -> Result<(), SyncError>;

    fn create_progress(&self, report: GroupProgressReport) -> Result<(), SyncError>;

    /// Atomically add one to `done` of the report tagged `code`; returns the
    /// new value.
    fn increment_progress(&self, id: TaskGroupId, code: &str) -> Result<u64, SyncError>;

    fn snapshot(&self, id: TaskGroupId) -> Result<GroupSnapshot, SyncError>;
}

struct ProgressEntry {
    message: String,
    code: String,
    total: u64,
    done: AtomicU64,
}

struct GroupEntry {
    /// Creation order.
    seq: u64,
    group: TaskGroup,
    progress: Vec<ProgressEntry>,
}

/// In-process [`TaskGroups`]. Counters are atomics updated under a shared
/// read lock, so concurrent increments never lose updates.
pub struct MemoryTaskGroups {
    groups: RwLock<HashMap<TaskGroupId, GroupEntry>>,
    next_seq: AtomicU64,
    retain_finished: usize,
}

impl Default for MemoryTaskGroups {
    fn default() -> Self {
        Self::with_retention(usize::MAX)
    }
}

impl MemoryTaskGroups {
    /// Groups are kept until the value is dropped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retain_finished` finished groups, dropping the oldest
    /// first. Unfinished groups are never dropped.
    pub fn with_retention(retain_finished: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            retain_finished,
        }
    }

    /// Snapshots of every group, oldest first.
    pub fn all(&self) -> Vec<GroupSnapshot> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<GroupSnapshot> = groups.values().map(snapshot_entry).collect();
        all.sort_by_key(|s| s.group.created_at);
        all
    }
}

fn snapshot_entry(entry: &GroupEntry) -> GroupSnapshot {
    GroupSnapshot {
        group: entry.group.clone(),
        progress: entry
            .progress
            .iter()
            .map(|p| GroupProgressReport {
                message: p.message.clone(),
                code: p.code.clone(),
                total: p.total,
                done: p.done.load(Ordering::SeqCst),
                group: entry.group.id,
            })
            .collect(),
    }
}

impl TaskGroups for MemoryTaskGroups {
    fn create_group(&self, description: &str) -> Result<TaskGroupId, SyncError> {
        let id = TaskGroupId::new();
        let entry = GroupEntry {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            group: TaskGroup {
                id,
                description: description.to_string(),
                finished: false,
                created_at: Utc::now(),
                finished_at: None,
            },
            progress: vec![],
        };
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
        tracing::debug!(group = %id, description, "task group created");
        Ok(id)
    }

    fn finish_group(&self, id: TaskGroupId) -> Result<(), SyncError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let entry = groups.get_mut(&id).ok_or(SyncError::GroupNotFound(id))?;
        if !entry.group.finished {
            entry.group.finished = true;
            entry.group.finished_at = Some(Utc::now());
        }

        let mut finished: Vec<(u64, TaskGroupId)> = groups
            .values()
            .filter(|e| e.group.finished)
            .map(|e| (e.seq, e.group.id))
            .collect();
        if finished.len() > self.retain_finished {
            finished.sort();
            let excess = finished.len() - self.retain_finished;
            for (_, old) in finished.into_iter().take(excess) {
                groups.remove(&old);
            }
        }
        Ok(())
    }

    fn create_progress(&self, report: GroupProgressReport) -> Result<(), SyncError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let entry = groups
            .get_mut(&report.group)
            .ok_or(SyncError::GroupNotFound(report.group))?;
        entry.progress.push(ProgressEntry {
            message: report.message,
            code: report.code,
            total: report.total,
            done: AtomicU64::new(report.done),
        });
        Ok(())
    }

    fn increment_progress(&self, id: TaskGroupId, code: &str) -> Result<u64, SyncError> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let entry = groups.get(&id).ok_or(SyncError::GroupNotFound(id))?;
        let progress = entry
            .progress
            .iter()
            .find(|p| p.code == code)
            .ok_or_else(|| {
                SyncError::Validation(format!("group {id} has no progress report '{code}'"))
            })?;
        Ok(progress.done.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn snapshot(&self, id: TaskGroupId) -> Result<GroupSnapshot, SyncError> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups
            .get(&id)
            .map(snapshot_entry)
            .ok_or(SyncError::GroupNotFound(id))
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag checked by tasks between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(SyncError::Canceled)` once [`CancelFlag::cancel`] was called.
    pub fn check(&self) -> Result<(), SyncError> {
        if self.is_cancelled() {
            Err(SyncError::Canceled)
        } else {
            Ok(())
        }
    }
}
