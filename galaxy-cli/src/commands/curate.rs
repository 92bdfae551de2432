//! `galaxy curate`: run curation in-process and wait for every write.

use anyhow::{Context, Result};
use clap::Args;

use galaxy_core::types::{RepositoryName, SyncListName};
use galaxy_sync::{
    pipeline::{self, CurateScope, PipelineReport, TaskRun},
    CurationOutcome, TaskOutput, WriteResult,
};

use super::{home, print_json, settings};

/// Arguments for `galaxy curate`.
#[derive(Args, Debug)]
pub struct CurateArgs {
    /// Synclist to curate (omit when using `--all`).
    pub synclist: Option<String>,

    /// Curate every synclist of the upstream repository.
    #[arg(long, conflicts_with = "synclist")]
    pub all: bool,

    /// Upstream repository for `--all`; defaults to `default_upstream`.
    #[arg(long, requires = "all")]
    pub upstream: Option<String>,

    /// Print the full task report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl CurateArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let settings = settings(&home)?;

        let scope = if self.all {
            let upstream = self
                .upstream
                .map(RepositoryName::from)
                .unwrap_or_else(|| settings.default_upstream());
            CurateScope::All { upstream }
        } else {
            let name = self
                .synclist
                .context("provide a synclist name or use --all")?;
            CurateScope::SyncList(SyncListName::from(name))
        };

        let label = match &scope {
            CurateScope::All { upstream } => format!("all synclists of '{upstream}'"),
            CurateScope::SyncList(name) => format!("'{name}'"),
        };
        tracing::debug!(?scope, "running curation inline");
        let report = pipeline::run(&home, &settings, scope)
            .with_context(|| format!("curation failed for {label}"))?;

        if self.json {
            print_json(&report)?;
        } else {
            print_report(&report);
        }

        let failed = report.failures().count();
        if failed > 0 {
            anyhow::bail!("{failed} curation task(s) failed");
        }
        Ok(())
    }
}

fn print_report(report: &PipelineReport) {
    for group in &report.groups {
        for progress in &group.progress {
            println!(
                "{} [{}]: {}/{}",
                group.group.description, progress.code, progress.done, progress.total
            );
        }
    }
    for task in &report.tasks {
        print_task(task);
    }
}

fn print_task(task: &TaskRun) {
    if let Some(error) = &task.error {
        println!("  ✗ {}: {error}", task.name);
        return;
    }
    match &task.output {
        Some(TaskOutput::CurateAll(fan_out)) => {
            println!("  ✓ {} synclist(s) of '{}' scheduled", fan_out.tasks.len(), fan_out.upstream)
        }
        Some(TaskOutput::CurateSynclist(CurationOutcome::Submitted {
            synclist, policy, add, remove, ..
        })) => {
            let remove = remove.map_or_else(|| "all".to_string(), |n| n.to_string());
            println!("  ✓ '{synclist}' ({policy}): +{add} / -{remove}")
        }
        Some(TaskOutput::CurateSynclist(CurationOutcome::Skipped { synclist, reason })) => {
            println!("  · '{synclist}' skipped: {reason}")
        }
        Some(TaskOutput::WriteVersion(WriteResult::Created {
            version, added, removed, total,
        })) => println!("  ✎ {version} created (+{added} / -{removed}, {total} units)"),
        Some(TaskOutput::WriteVersion(WriteResult::Unchanged { version, total })) => {
            println!("  · {version} unchanged ({total} units)")
        }
        None => println!("  ✓ {}", task.name),
    }
}
