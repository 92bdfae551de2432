//! Synclist creation and update with catalog validation.
//!
//! Every listed collection must be known to the catalog; otherwise nothing
//! is written. Creating a synclist also creates its target repository.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;

use galaxy_core::registry;
use galaxy_core::types::{CollectionRef, Policy, RepositoryName, SyncList, SyncListName};
use galaxy_core::Settings;

use crate::catalog::ContentCatalog;
use crate::error::SyncError;
use crate::ingest::create_repository;
use crate::store::RepositoryStore;

/// Fields supplied when creating a synclist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncListSpec {
    pub policy: Policy,
    pub collections: BTreeSet<CollectionRef>,
    pub namespaces: BTreeSet<String>,
    /// Defaults to `settings.default_upstream`.
    pub upstream: Option<RepositoryName>,
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

/// Replacement values; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncListUpdate {
    pub policy: Option<Policy>,
    pub collections: Option<BTreeSet<CollectionRef>>,
    pub namespaces: Option<BTreeSet<String>>,
    pub users: Option<BTreeSet<String>>,
    pub groups: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Creating,
    Updating,
}

fn check_collections<'a>(
    catalog: &ContentCatalog,
    collections: impl IntoIterator<Item = &'a CollectionRef>,
    synclist: &SyncListName,
    action: Action,
) -> Result<(), SyncError> {
    let verb = match action {
        Action::Creating => "creating",
        Action::Updating => "updating",
    };
    for collection in collections {
        if !catalog.knows_collection(collection) {
            return Err(SyncError::Validation(format!(
                "Collection \"{collection}\" not found while {verb} synclist {synclist}"
            )));
        }
    }
    Ok(())
}

/// Create the synclist for `account` and its target repository.
///
/// Returns the stored synclist and whether it was created; an existing
/// synclist is returned unchanged.
pub fn create_synclist(
    home: &Path,
    store: &dyn RepositoryStore,
    settings: &Settings,
    account: &str,
    spec: SyncListSpec,
) -> Result<(SyncList, bool), SyncError> {
    let name = settings.synclist_name(account);
    registry::validate_name(&name.0)?;
    if registry::synclist_exists_at(home, &name) {
        tracing::debug!(synclist = %name, "synclist already exists");
        return Ok((registry::load_synclist_at(home, &name)?, false));
    }

    let upstream = spec.upstream.unwrap_or_else(|| settings.default_upstream());
    if !store.repository_exists(&upstream)? {
        return Err(SyncError::RepositoryNotFound(upstream));
    }
    let catalog = store.load_catalog()?;
    check_collections(&catalog, &spec.collections, &name, Action::Creating)?;

    let repository = RepositoryName(name.0.clone());
    create_repository(store, &repository)?;

    let now = Utc::now();
    let synclist = SyncList {
        name,
        policy: spec.policy,
        collections: spec.collections,
        namespaces: spec.namespaces,
        upstream_repository: upstream,
        repository,
        users: spec.users,
        groups: spec.groups,
        created_at: now,
        updated_at: now,
    };
    registry::save_synclist_at(home, &synclist)?;
    tracing::info!(
        synclist = %synclist.name,
        policy = %synclist.policy,
        upstream = %synclist.upstream_repository,
        "synclist created"
    );
    Ok((synclist, true))
}

/// Apply `update` to an existing synclist.
pub fn update_synclist(
    home: &Path,
    store: &dyn RepositoryStore,
    name: &SyncListName,
    update: SyncListUpdate,
) -> Result<SyncList, SyncError> {
    let mut synclist = registry::load_synclist_at(home, name)?;

    if let Some(collections) = &update.collections {
        let catalog = store.load_catalog()?;
        check_collections(&catalog, collections, name, Action::Updating)?;
    }

    if let Some(policy) = update.policy {
        synclist.policy = policy;
    }
    if let Some(collections) = update.collections {
        synclist.collections = collections;
    }
    if let Some(namespaces) = update.namespaces {
        synclist.namespaces = namespaces;
    }
    if let Some(users) = update.users {
        synclist.users = users;
    }
    if let Some(groups) = update.groups {
        synclist.groups = groups;
    }
    synclist.updated_at = Utc::now();

    registry::save_synclist_at(home, &synclist)?;
    tracing::info!(synclist = %synclist.name, policy = %synclist.policy, "synclist updated");
    Ok(synclist)
}
