//! `galaxy synclist create|update|list|show|delete`

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use galaxy_core::{
    registry,
    types::{CollectionRef, Policy, RepositoryName, SyncList, SyncListName},
};
use galaxy_sync::{
    synclists::{create_synclist, update_synclist, SyncListSpec, SyncListUpdate},
    FileRepositoryStore,
};

use super::{home, print_json, settings};

#[derive(Subcommand, Debug)]
pub enum SyncListCommand {
    /// Create the synclist (and its repository) for an account.
    Create(CreateArgs),

    /// Replace fields of an existing synclist.
    Update(UpdateArgs),

    /// List all synclists.
    List,

    /// Show one synclist.
    Show {
        name: String,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Delete a synclist record. Its repository is kept.
    Delete { name: String },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Account name; the synclist is named from `synclist_name_format`.
    pub account: String,

    #[arg(long, default_value_t = Policy::Exclude)]
    pub policy: Policy,

    /// Collection selector `namespace.name` (repeatable).
    #[arg(long = "collection", short = 'c', value_name = "NS.NAME")]
    pub collections: Vec<CollectionRef>,

    /// Namespace selector (repeatable).
    #[arg(long = "namespace", short = 'n', value_name = "NS")]
    pub namespaces: Vec<String>,

    /// Upstream repository; defaults to `default_upstream`.
    #[arg(long)]
    pub upstream: Option<String>,

    #[arg(long = "user", value_name = "USER")]
    pub users: Vec<String>,

    #[arg(long = "group", value_name = "GROUP")]
    pub groups: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub name: String,

    #[arg(long)]
    pub policy: Option<Policy>,

    /// Replaces the collection selectors (repeatable).
    #[arg(long = "collection", short = 'c', value_name = "NS.NAME")]
    pub collections: Option<Vec<CollectionRef>>,

    /// Replaces the namespace selectors (repeatable).
    #[arg(long = "namespace", short = 'n', value_name = "NS")]
    pub namespaces: Option<Vec<String>>,

    #[arg(long = "user", value_name = "USER")]
    pub users: Option<Vec<String>>,

    #[arg(long = "group", value_name = "GROUP")]
    pub groups: Option<Vec<String>>,

    /// Remove every collection selector.
    #[arg(long, conflicts_with = "collections")]
    pub clear_collections: bool,

    /// Remove every namespace selector.
    #[arg(long, conflicts_with = "namespaces")]
    pub clear_namespaces: bool,
}

pub fn run(cmd: SyncListCommand) -> Result<()> {
    let home = home()?;
    let settings = settings(&home)?;
    let store = FileRepositoryStore::at(&home);

    match cmd {
        SyncListCommand::Create(args) => {
            let spec = SyncListSpec {
                policy: args.policy,
                collections: args.collections.into_iter().collect(),
                namespaces: args.namespaces.into_iter().collect(),
                upstream: args.upstream.map(RepositoryName::from),
                users: args.users.into_iter().collect(),
                groups: args.groups.into_iter().collect(),
            };
            let (synclist, created) = create_synclist(&home, &store, &settings, &args.account, spec)
                .with_context(|| format!("failed to create synclist for account '{}'", args.account))?;
            if created {
                println!("✓ Created synclist '{}' ({})", synclist.name, synclist.policy);
            } else {
                println!("Synclist '{}' already exists", synclist.name);
            }
        }
        SyncListCommand::Update(args) => {
            let name = SyncListName::from(args.name);
            let collections = if args.clear_collections {
                Some(BTreeSet::new())
            } else {
                args.collections.map(|c| c.into_iter().collect())
            };
            let namespaces = if args.clear_namespaces {
                Some(BTreeSet::new())
            } else {
                args.namespaces.map(|n| n.into_iter().collect())
            };
            let update = SyncListUpdate {
                policy: args.policy,
                collections,
                namespaces,
                users: args.users.map(|u| u.into_iter().collect()),
                groups: args.groups.map(|g| g.into_iter().collect()),
            };
            let synclist = update_synclist(&home, &store, &name, update)
                .with_context(|| format!("failed to update synclist '{name}'"))?;
            println!("✓ Updated synclist '{}' ({})", synclist.name, synclist.policy);
        }
        SyncListCommand::List => {
            let synclists = registry::list_synclists_at(&home).context("failed to list synclists")?;
            if synclists.is_empty() {
                println!("No synclists. Run: galaxy synclist create <account>");
            }
            for s in &synclists {
                println!(
                    "  {} [{}] {} → {} ({} collections, {} namespaces)",
                    s.name,
                    s.policy,
                    s.upstream_repository,
                    s.repository,
                    s.collections.len(),
                    s.namespaces.len()
                );
            }
        }
        SyncListCommand::Show { name, json } => {
            let name = SyncListName::from(name);
            let synclist = registry::load_synclist_at(&home, &name)
                .with_context(|| format!("failed to load synclist '{name}'"))?;
            if json {
                print_json(&synclist)?;
            } else {
                print_synclist(&synclist);
            }
        }
        SyncListCommand::Delete { name } => {
            let name = SyncListName::from(name);
            registry::delete_synclist_at(&home, &name)
                .with_context(|| format!("failed to delete synclist '{name}'"))?;
            println!("✓ Deleted synclist '{name}'");
        }
    }
    Ok(())
}

fn print_synclist(s: &SyncList) {
    println!("{}", s.name);
    println!("  policy:     {}", s.policy);
    println!("  upstream:   {}", s.upstream_repository);
    println!("  repository: {}", s.repository);
    let join = |items: Vec<String>| if items.is_empty() { "-".to_string() } else { items.join(", ") };
    println!("  collections: {}", join(s.collections.iter().map(ToString::to_string).collect()));
    println!("  namespaces:  {}", join(s.namespaces.iter().cloned().collect()));
    println!("  users:       {}", join(s.users.iter().cloned().collect()));
    println!("  groups:      {}", join(s.groups.iter().cloned().collect()));
}
