//! # galaxy-sync
//!
//! Synclist curation: content catalog, repository version store, delta
//! calculation, the atomic version writer and the curation tasks.
//!
//! Call [`pipeline::run`] to curate one synclist or every synclist of an
//! upstream repository in-process; the worker runtime executes the same tasks
//! through [`handlers::dispatch`].

pub mod catalog;
pub mod curator;
pub mod delta;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod ingest;
pub mod pipeline;
pub mod store;
pub mod synclists;
pub mod tasks;
pub mod writer;

pub use catalog::ContentCatalog;
pub use curator::{curate_synclist_repository, CurationOutcome, CurationStage};
pub use error::SyncError;
pub use fanout::{curate_all_synclist_repository, FanOutReport, CURATE_PROGRESS_CODE};
pub use handlers::{dispatch, CurationEnv, TaskOutput};
pub use store::{FileRepositoryStore, RepositoryStore};
pub use tasks::{
    CancelFlag, MemoryTaskGroups, ResourceKey, TaskGroupId, TaskGroups, TaskHandle, TaskId,
    TaskKind, TaskRequest, TaskScheduler,
};
pub use writer::{add_and_remove, WriteResult};
