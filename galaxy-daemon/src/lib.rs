//! Curation worker: reservation-locked task queue, task table, upstream
//! watcher and socket server.

mod error;
pub mod paths;
pub mod protocol;
pub mod reservations;
mod runtime;
pub mod scheduler;
pub mod table;

pub use error::DaemonError;
pub use protocol::{
    request_cancel, request_curate, request_curate_all, request_group, request_status,
    request_stop, request_task, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{handle_request, init_tracing, run, start_blocking, Worker};
pub use table::{TaskRecord, TaskState};
