//! `galaxy worker`: background curation worker lifecycle and task queries.

use anyhow::{Context, Result};
use clap::Subcommand;

use galaxy_core::{
    types::{RepositoryName, SyncListName},
    Settings,
};
use galaxy_daemon::paths::socket_path;
use galaxy_daemon::{
    request_cancel, request_curate, request_curate_all, request_group, request_status,
    request_stop, request_task, start_blocking, DaemonError,
};
use galaxy_sync::{TaskGroupId, TaskId};

use super::{home, print_json};

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Run the worker in the foreground (queue + watcher + socket server).
    Start,
    /// Request graceful worker shutdown over the Unix socket.
    Stop,
    /// Query worker runtime status over the Unix socket.
    Status,
    /// Dispatch curation of one synclist.
    Sync { synclist: String },
    /// Dispatch curation of every synclist of an upstream repository.
    CurateAll {
        /// Upstream repository; defaults to `default_upstream`.
        #[arg(long)]
        upstream: Option<String>,
    },
    /// Show one task record.
    Task { id: TaskId },
    /// Show a task group with its progress reports.
    Group { id: TaskGroupId },
    /// Cancel a waiting or running task.
    Cancel { id: TaskId },
}

pub fn run(command: WorkerCommand) -> Result<()> {
    let home = home()?;

    match command {
        WorkerCommand::Start => {
            start_blocking(&home).context("worker exited with error")?;
        }
        WorkerCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("worker stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("worker is not running");
            }
            Err(err) => return Err(err).context("failed to stop worker"),
        },
        WorkerCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query worker status"),
        },
        WorkerCommand::Sync { synclist } => {
            let synclist = SyncListName::from(synclist);
            let data = request_curate(&home, synclist.clone())
                .with_context(|| format!("failed to dispatch curation of '{synclist}'"))?;
            print_json(&data)?;
        }
        WorkerCommand::CurateAll { upstream } => {
            let upstream = match upstream {
                Some(name) => RepositoryName::from(name),
                None => Settings::load_at(&home)
                    .context("failed to load settings")?
                    .default_upstream(),
            };
            let data = request_curate_all(&home, upstream.clone())
                .with_context(|| format!("failed to dispatch curation of '{upstream}'"))?;
            print_json(&data)?;
        }
        WorkerCommand::Task { id } => {
            let data = request_task(&home, id).with_context(|| format!("failed to query task {id}"))?;
            print_json(&data)?;
        }
        WorkerCommand::Group { id } => {
            let data =
                request_group(&home, id).with_context(|| format!("failed to query group {id}"))?;
            print_json(&data)?;
        }
        WorkerCommand::Cancel { id } => {
            let data =
                request_cancel(&home, id).with_context(|| format!("failed to cancel task {id}"))?;
            print_json(&data)?;
        }
    }

    Ok(())
}
