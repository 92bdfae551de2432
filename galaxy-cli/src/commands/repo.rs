//! `galaxy repo create|import|list|show`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use galaxy_core::types::{CollectionRef, RepositoryName};
use galaxy_sync::{
    ingest::{create_repository, import_collection_version},
    FileRepositoryStore, RepositoryStore, WriteResult,
};

use super::{home, print_json, settings};

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Create an empty repository.
    Create { name: String },

    /// Import a collection version into a repository as one new version.
    Import(ImportArgs),

    /// List repositories with their latest version number.
    List,

    /// Show the latest version of a repository.
    Show {
        name: String,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Target repository.
    pub repository: String,
    /// Collection as `namespace.name`.
    pub collection: CollectionRef,
    /// Semantic version, e.g. `1.2.0`.
    pub version: semver::Version,
}

pub fn run(cmd: RepoCommand) -> Result<()> {
    let home = home()?;
    settings(&home)?;
    let store = FileRepositoryStore::at(&home);

    match cmd {
        RepoCommand::Create { name } => {
            let name = RepositoryName::from(name);
            if create_repository(&store, &name).with_context(|| format!("failed to create '{name}'"))? {
                println!("✓ Created repository '{name}'");
            } else {
                println!("Repository '{name}' already exists");
            }
        }
        RepoCommand::Import(args) => {
            let repository = RepositoryName::from(args.repository);
            let collection = args.collection.clone();
            let result = import_collection_version(&store, &repository, args.collection, args.version.clone())
                .with_context(|| format!("failed to import {collection} {} into '{repository}'", args.version))?;
            match result.write {
                WriteResult::Created { version, .. } => {
                    println!("✓ Imported {collection} {} → {version}", args.version)
                }
                WriteResult::Unchanged { version, .. } => {
                    println!("{collection} {} already in {version}", args.version)
                }
            }
        }
        RepoCommand::List => {
            let names = store.list_repositories().context("failed to list repositories")?;
            if names.is_empty() {
                println!("No repositories. Run: galaxy repo create <name>");
            }
            for name in names {
                match store.latest_version(&name)? {
                    Some(v) => println!("  {name} (version {}, {} units)", v.number, v.content.len()),
                    None => println!("  {name} (no versions)"),
                }
            }
        }
        RepoCommand::Show { name, json } => {
            let name = RepositoryName::from(name);
            let repository = store
                .load_repository(&name)
                .with_context(|| format!("failed to load repository '{name}'"))?;
            let catalog = store.load_catalog().context("failed to load catalog")?;
            let latest = repository.latest_version();
            let mut units: Vec<(String, String)> = latest
                .map(|v| {
                    v.content
                        .iter()
                        .map(|id| match catalog.unit(id) {
                            Some(unit) => (unit.collection.to_string(), unit.version.to_string()),
                            None => (id.0.clone(), "?".to_string()),
                        })
                        .collect()
                })
                .unwrap_or_default();
            units.sort();

            if json {
                print_json(&json!({
                    "name": repository.name,
                    "latest_version": latest.map(|v| v.number),
                    "versions": repository.versions.len(),
                    "content": units
                        .iter()
                        .map(|(c, v)| json!({ "collection": c, "version": v }))
                        .collect::<Vec<_>>(),
                }))?;
            } else {
                match latest {
                    Some(v) => println!("{} @ version {} ({} units)", repository.name, v.number, units.len()),
                    None => println!("{} has no versions", repository.name),
                }
                for (collection, version) in units {
                    println!("  {collection} {version}");
                }
            }
        }
    }
    Ok(())
}
