//! Error types for galaxy-sync.

use std::path::PathBuf;

use thiserror::Error;

use galaxy_core::error::RegistryError;
use galaxy_core::types::{ContentUnitId, RepositoryName, SyncListName, VersionRef};

use crate::tasks::TaskGroupId;

/// All errors that can arise from curation, ingestion and version writes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the synclist registry (includes "synclist not found").
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (catalog, repositories).
    #[error("content store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("repository '{0}' not found")]
    RepositoryNotFound(RepositoryName),

    #[error("repository version {0} not found")]
    VersionNotFound(VersionRef),

    /// A write tried to add units the catalog has never seen.
    #[error("unknown content in write to '{repository}': {}", preview(.units))]
    UnknownContent {
        repository: RepositoryName,
        units: Vec<ContentUnitId>,
    },

    /// Input rejected before anything was written.
    #[error("validation error: {0}")]
    Validation(String),

    /// Upstream has no version and settings ask for a hard failure.
    #[error("upstream repository '{upstream}' of synclist '{synclist}' has no version yet")]
    EmptyUpstream {
        synclist: SyncListName,
        upstream: RepositoryName,
    },

    /// The task queue refused a task.
    #[error("failed to enqueue task: {0}")]
    Enqueue(String),

    #[error("task group {0} not found")]
    GroupNotFound(TaskGroupId),

    #[error("task canceled")]
    Canceled,
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

fn preview(units: &[ContentUnitId]) -> String {
    const MAX: usize = 3;
    let mut shown: Vec<&str> = units.iter().take(MAX).map(|u| u.0.as_str()).collect();
    if units.len() > MAX {
        shown.push("…");
    }
    shown.join(", ")
}
