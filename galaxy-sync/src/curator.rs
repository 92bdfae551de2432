//! Per-synclist curator.
//!
//! Reads the synclist, its target repository, the upstream's latest version
//! and the catalog, computes one delta and hands it to the writer as a
//! single `add_and_remove` task reserved on the target repository. The
//! curator never writes repository content itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use galaxy_core::registry;
use galaxy_core::settings::EmptyUpstream;
use galaxy_core::types::{Policy, SyncListName, VersionRef};

use crate::delta;
use crate::error::SyncError;
use crate::handlers::CurationEnv;
use crate::tasks::{CancelFlag, CurateSynclistParams, TaskId, TaskRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationStage {
    Pending,
    ResolvingSynclist,
    ComputingDelta,
    SubmittingWrite,
    Done,
    Failed,
    Skipped,
    Canceled,
}

impl fmt::Display for CurationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CurationStage::Pending => "pending",
            CurationStage::ResolvingSynclist => "resolving_synclist",
            CurationStage::ComputingDelta => "computing_delta",
            CurationStage::SubmittingWrite => "submitting_write",
            CurationStage::Done => "done",
            CurationStage::Failed => "failed",
            CurationStage::Skipped => "skipped",
            CurationStage::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CurationOutcome {
    /// A version write was enqueued for the target repository.
    Submitted {
        synclist: SyncListName,
        policy: Policy,
        write_task: TaskId,
        #[serde(skip_serializing_if = "Option::is_none")]
        base_version: Option<VersionRef>,
        add: usize,
        /// `None` when the write clears the target.
        #[serde(skip_serializing_if = "Option::is_none")]
        remove: Option<usize>,
    },
    /// Nothing to curate yet.
    Skipped { synclist: SyncListName, reason: String },
}

struct Curation<'a> {
    synclist: &'a SyncListName,
    stage: CurationStage,
}

impl<'a> Curation<'a> {
    fn new(synclist: &'a SyncListName) -> Self {
        Self {
            synclist,
            stage: CurationStage::Pending,
        }
    }

    fn advance(&mut self, next: CurationStage) {
        tracing::debug!(synclist = %self.synclist, from = %self.stage, to = %next, "curation stage");
        self.stage = next;
    }
}

/// Curate one synclist's repository against its upstream.
pub fn curate_synclist_repository(
    env: &CurationEnv<'_>,
    params: &CurateSynclistParams,
    cancel: &CancelFlag,
) -> Result<CurationOutcome, SyncError> {
    let mut run = Curation::new(&params.synclist);
    match curate(env, &mut run, cancel) {
        Ok(outcome) => {
            let stage = match outcome {
                CurationOutcome::Submitted { .. } => CurationStage::Done,
                CurationOutcome::Skipped { .. } => CurationStage::Skipped,
            };
            run.advance(stage);
            Ok(outcome)
        }
        Err(SyncError::Canceled) => {
            run.advance(CurationStage::Canceled);
            Err(SyncError::Canceled)
        }
        Err(err) => {
            tracing::warn!(synclist = %params.synclist, stage = %run.stage, error = %err, "curation failed");
            run.advance(CurationStage::Failed);
            Err(err)
        }
    }
}

fn curate(
    env: &CurationEnv<'_>,
    run: &mut Curation<'_>,
    cancel: &CancelFlag,
) -> Result<CurationOutcome, SyncError> {
    cancel.check()?;
    run.advance(CurationStage::ResolvingSynclist);
    let synclist = registry::load_synclist_at(env.home, run.synclist)?;
    if !env.store.repository_exists(&synclist.repository)? {
        return Err(SyncError::RepositoryNotFound(synclist.repository.clone()));
    }
    let upstream = env.store.load_repository(&synclist.upstream_repository)?;
    let Some(snapshot) = upstream.latest_version().cloned() else {
        return match env.settings.curation.empty_upstream {
            EmptyUpstream::Skip => {
                tracing::info!(
                    synclist = %synclist.name,
                    upstream = %synclist.upstream_repository,
                    "upstream has no version yet; skipping"
                );
                Ok(CurationOutcome::Skipped {
                    synclist: synclist.name,
                    reason: format!("upstream repository '{}' has no version", upstream.name),
                })
            }
            EmptyUpstream::Fail => Err(SyncError::EmptyUpstream {
                synclist: synclist.name,
                upstream: upstream.name,
            }),
        };
    };

    cancel.check()?;
    run.advance(CurationStage::ComputingDelta);
    let catalog = env.store.load_catalog()?;
    let upstream_ref = VersionRef {
        repository: upstream.name.clone(),
        number: snapshot.number,
    };
    let delta = delta::compute(&synclist, &upstream_ref, &snapshot, &catalog);
    let add = delta.add.len();
    let remove = delta.remove_count();
    let base_version = delta.base_version.clone();

    cancel.check()?;
    run.advance(CurationStage::SubmittingWrite);
    let handle = env
        .scheduler
        .enqueue(TaskRequest::write_version(delta.into_write(synclist.repository.clone())))?;
    tracing::info!(
        synclist = %synclist.name,
        policy = %synclist.policy,
        upstream = %upstream_ref,
        write_task = %handle.id,
        add,
        "curation write enqueued"
    );

    Ok(CurationOutcome::Submitted {
        synclist: synclist.name,
        policy: synclist.policy,
        write_task: handle.id,
        base_version,
        add,
        remove,
    })
}
