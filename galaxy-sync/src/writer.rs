//! Atomic repository version writer.
//!
//! ## `add_and_remove`: protocol
//!
//! 1. Load the target repository and the catalog.
//! 2. Reject additions the catalog does not know.
//! 3. Start from the base version's content (explicit base, else the
//!    target's latest, else empty).
//! 4. Apply the removal (`All` clears), then the additions.
//! 5. Compare with the target's latest content → `Unchanged` if identical.
//! 6. Append the new version and save the repository (tmp + rename).
//!
//! Callers hold the `repository:<name>` reservation; the writer itself does
//! not serialize concurrent writers.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use galaxy_core::types::{ContentUnitId, RepositoryVersion, VersionRef};

use crate::error::SyncError;
use crate::store::RepositoryStore;
use crate::tasks::{Removal, VersionWrite};

/// Outcome of a version write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum WriteResult {
    /// A new version was created.
    Created {
        version: VersionRef,
        added: usize,
        removed: usize,
        total: usize,
    },
    /// The resulting content equals the current latest version; nothing was
    /// written.
    Unchanged { version: VersionRef, total: usize },
}

impl WriteResult {
    pub fn version(&self) -> &VersionRef {
        match self {
            WriteResult::Created { version, .. } | WriteResult::Unchanged { version, .. } => {
                version
            }
        }
    }
}

/// Pure content computation for steps 3–4.
pub fn apply_delta(
    base: &BTreeSet<ContentUnitId>,
    add: &BTreeSet<ContentUnitId>,
    remove: &Removal,
) -> BTreeSet<ContentUnitId> {
    let mut content = match remove {
        Removal::All => BTreeSet::new(),
        Removal::Units(units) => base.difference(units).cloned().collect(),
    };
    content.extend(add.iter().cloned());
    content
}

/// Apply `write` as one new immutable version of its repository.
pub fn add_and_remove(
    store: &dyn RepositoryStore,
    write: &VersionWrite,
) -> Result<WriteResult, SyncError> {
    let mut repository = store.load_repository(&write.repository)?;

    let catalog = store.load_catalog()?;
    let unknown: Vec<ContentUnitId> = write
        .add
        .iter()
        .filter(|id| !catalog.contains(id))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(SyncError::UnknownContent {
            repository: write.repository.clone(),
            units: unknown,
        });
    }

    let current = repository.latest_version().cloned();
    let base = match &write.base_version {
        Some(reference) if reference.repository == repository.name => repository
            .version(reference.number)
            .map(|v| v.content.clone())
            .ok_or_else(|| SyncError::VersionNotFound(reference.clone()))?,
        Some(reference) => store.version(reference)?.content,
        None => current
            .as_ref()
            .map(|v| v.content.clone())
            .unwrap_or_default(),
    };

    let content = apply_delta(&base, &write.add, &write.remove);

    if let Some(current) = &current {
        if current.content == content {
            let version = VersionRef {
                repository: repository.name.clone(),
                number: current.number,
            };
            tracing::debug!(version = %version, "unchanged: content identical to latest version");
            return Ok(WriteResult::Unchanged {
                version,
                total: content.len(),
            });
        }
    }

    let previous = current.map(|v| v.content).unwrap_or_default();
    let added = content.difference(&previous).count();
    let removed = previous.difference(&content).count();
    let total = content.len();

    let number = repository.next_version_number();
    repository.versions.push(RepositoryVersion {
        number,
        content,
        created_at: Utc::now(),
    });
    store.save_repository(&repository)?;

    let version = VersionRef {
        repository: repository.name.clone(),
        number,
    };
    tracing::info!(version = %version, added, removed, total, "created repository version");
    Ok(WriteResult::Created {
        version,
        added,
        removed,
        total,
    })
}
