use std::path::PathBuf;

use thiserror::Error;

use galaxy_sync::TaskId;

/// Error surface for the worker runtime and its socket protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("registry error: {0}")]
    Registry(#[from] galaxy_core::RegistryError),

    #[error("settings error: {0}")]
    Settings(#[from] galaxy_core::SettingsError),

    #[error("curation error: {0}")]
    Sync(#[from] galaxy_sync::SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("worker is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
