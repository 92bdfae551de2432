//! Repository creation and collection import.

use galaxy_core::types::{CollectionRef, ContentUnitId, Repository, RepositoryName};

use crate::error::SyncError;
use crate::store::RepositoryStore;
use crate::tasks::{Removal, VersionWrite};
use crate::writer::{add_and_remove, WriteResult};

/// Create an empty repository. Returns `false` if it already existed.
pub fn create_repository(store: &dyn RepositoryStore, name: &RepositoryName) -> Result<bool, SyncError> {
    if store.repository_exists(name)? {
        return Ok(false);
    }
    store.save_repository(&Repository::new(name.clone()))?;
    tracing::info!(repository = %name, "repository created");
    Ok(true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub unit: ContentUnitId,
    /// The unit was new to the catalog.
    pub registered: bool,
    pub write: WriteResult,
}

/// Register `collection` at `version` in the catalog and add it to
/// `repository` as one new version. Re-importing the same version changes
/// nothing.
pub fn import_collection_version(
    store: &dyn RepositoryStore,
    repository: &RepositoryName,
    collection: CollectionRef,
    version: semver::Version,
) -> Result<ImportResult, SyncError> {
    if !store.repository_exists(repository)? {
        return Err(SyncError::RepositoryNotFound(repository.clone()));
    }

    let mut catalog = store.load_catalog()?;
    let (unit, registered) = catalog.register(collection.clone(), version.clone());
    if registered {
        store.save_catalog(&catalog)?;
        tracing::debug!(collection = %collection, version = %version, unit = %unit, "content unit registered");
    }

    let write = add_and_remove(
        store,
        &VersionWrite {
            repository: repository.clone(),
            base_version: None,
            add: [unit.clone()].into(),
            remove: Removal::none(),
        },
    )?;
    Ok(ImportResult {
        unit,
        registered,
        write,
    })
}
