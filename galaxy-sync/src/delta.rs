//! Delta calculator: synclist selectors + upstream snapshot → one version write.
//!
//! - `exclude`: start from the upstream snapshot (as base version), add
//!   nothing, remove every unit of a selected collection.
//! - `include`: clear the target, add the highest unit of each selected
//!   collection that the upstream snapshot actually contains.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use galaxy_core::types::{ContentUnitId, Policy, RepositoryName, RepositoryVersion, SyncList, VersionRef};

use crate::catalog::ContentCatalog;
use crate::tasks::{Removal, VersionWrite};

/// The add/remove set for one curation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub base_version: Option<VersionRef>,
    pub add: BTreeSet<ContentUnitId>,
    pub remove: Removal,
}

impl Delta {
    pub fn into_write(self, repository: RepositoryName) -> VersionWrite {
        VersionWrite {
            repository,
            base_version: self.base_version,
            add: self.add,
            remove: self.remove,
        }
    }

    pub fn remove_count(&self) -> Option<usize> {
        match &self.remove {
            Removal::All => None,
            Removal::Units(units) => Some(units.len()),
        }
    }
}

/// Compute the delta for `synclist` against `snapshot` (the upstream's
/// latest version, referenced by `upstream`).
pub fn compute(
    synclist: &SyncList,
    upstream: &VersionRef,
    snapshot: &RepositoryVersion,
    catalog: &ContentCatalog,
) -> Delta {
    match synclist.policy {
        Policy::Exclude => exclude(synclist, upstream, snapshot, catalog),
        Policy::Include => include(synclist, snapshot, catalog),
    }
}

fn exclude(
    synclist: &SyncList,
    upstream: &VersionRef,
    snapshot: &RepositoryVersion,
    catalog: &ContentCatalog,
) -> Delta {
    let remove: BTreeSet<ContentUnitId> = snapshot
        .content
        .iter()
        .filter(|id| match catalog.collection_of(id) {
            Some(collection) => synclist.selects(collection),
            None => {
                tracing::warn!(unit = %id, "upstream unit missing from catalog; keeping it");
                false
            }
        })
        .cloned()
        .collect();

    Delta {
        base_version: Some(upstream.clone()),
        add: BTreeSet::new(),
        remove: Removal::Units(remove),
    }
}

fn include(synclist: &SyncList, snapshot: &RepositoryVersion, catalog: &ContentCatalog) -> Delta {
    let add: BTreeSet<ContentUnitId> = catalog
        .highest
        .iter()
        .filter(|(collection, _)| synclist.selects(collection))
        .map(|(_, id)| id)
        .filter(|id| snapshot.content.contains(*id))
        .cloned()
        .collect();

    Delta {
        base_version: None,
        add,
        remove: Removal::All,
    }
}
