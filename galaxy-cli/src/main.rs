//! Galaxy: synclist curation CLI.
//!
//! # Usage
//!
//! ```text
//! galaxy repo create <name>
//! galaxy repo import <repo> <namespace.name> <version>
//! galaxy repo list | show <name> [--json]
//! galaxy synclist create <account> [--policy include|exclude] [--collection ns.name]... [--namespace ns]... [--upstream repo]
//! galaxy synclist update <name> [--policy ...] [--collection ...]... [--namespace ...]...
//! galaxy synclist list | show <name> | delete <name>
//! galaxy curate <synclist> [--json]
//! galaxy curate --all [--upstream repo] [--json]
//! galaxy worker start|stop|status|sync|curate-all|task|group|cancel
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    curate::CurateArgs, repo::RepoCommand, synclist::SyncListCommand, worker::WorkerCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "galaxy",
    version,
    about = "Curate per-account synclist repositories from upstream collection repositories",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage content repositories and import collection versions.
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },

    /// Manage synclists.
    Synclist {
        #[command(subcommand)]
        command: SyncListCommand,
    },

    /// Curate synclist repositories in-process.
    Curate(CurateArgs),

    /// Run or drive the background curation worker.
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Repo { command } => commands::repo::run(command),
        Commands::Synclist { command } => commands::synclist::run(command),
        Commands::Curate(args) => args.run(),
        Commands::Worker { command } => commands::worker::run(command),
    }
}
