//! Content catalog and the per-collection "highest version" index.
//!
//! The catalog is the only place that decides which unit of a collection is
//! authoritative. Ingestion writes it; curation only reads it and never
//! compares versions itself.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use galaxy_core::types::{CollectionRef, ContentUnit, ContentUnitId};

/// Content-addressed id for one collection version: hex SHA-256 of
/// `namespace/name/version`.
pub fn content_unit_id(collection: &CollectionRef, version: &semver::Version) -> ContentUnitId {
    let mut h = Sha256::new();
    h.update(collection.namespace.as_bytes());
    h.update(b"/");
    h.update(collection.name.as_bytes());
    h.update(b"/");
    h.update(version.to_string().as_bytes());
    ContentUnitId(hex::encode(h.finalize()))
}

/// Every known content unit plus the current-version index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCatalog {
    #[serde(default)]
    pub units: BTreeMap<ContentUnitId, ContentUnit>,
    /// Exactly one entry per known collection.
    #[serde(default)]
    pub highest: BTreeMap<CollectionRef, ContentUnitId>,
}

impl ContentCatalog {
    /// Register a collection version. Returns the unit id and whether the
    /// unit was new. The highest-version index is refreshed for the
    /// collection either way.
    pub fn register(
        &mut self,
        collection: CollectionRef,
        version: semver::Version,
    ) -> (ContentUnitId, bool) {
        let id = content_unit_id(&collection, &version);
        let inserted = !self.units.contains_key(&id);
        if inserted {
            self.units.insert(
                id.clone(),
                ContentUnit {
                    id: id.clone(),
                    collection: collection.clone(),
                    version,
                    created_at: Utc::now(),
                },
            );
        }
        self.refresh_highest(&collection);
        (id, inserted)
    }

    /// Stable releases win over pre-releases; among the same kind the
    /// greatest semver wins.
    fn refresh_highest(&mut self, collection: &CollectionRef) {
        let best = self
            .units
            .values()
            .filter(|u| &u.collection == collection)
            .max_by(|a, b| {
                let a_key = (a.version.pre.is_empty(), &a.version);
                let b_key = (b.version.pre.is_empty(), &b.version);
                a_key.cmp(&b_key)
            })
            .map(|u| u.id.clone());
        match best {
            Some(id) => {
                self.highest.insert(collection.clone(), id);
            }
            None => {
                self.highest.remove(collection);
            }
        }
    }

    pub fn unit(&self, id: &ContentUnitId) -> Option<&ContentUnit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &ContentUnitId) -> bool {
        self.units.contains_key(id)
    }

    pub fn collection_of(&self, id: &ContentUnitId) -> Option<&CollectionRef> {
        self.units.get(id).map(|u| &u.collection)
    }

    /// The single unit currently designated authoritative for `collection`.
    pub fn highest_for(&self, collection: &CollectionRef) -> Option<&ContentUnitId> {
        self.highest.get(collection)
    }

    pub fn is_highest(&self, id: &ContentUnitId) -> bool {
        self.collection_of(id)
            .and_then(|c| self.highest_for(c))
            .is_some_and(|h| h == id)
    }

    pub fn knows_collection(&self, collection: &CollectionRef) -> bool {
        self.highest.contains_key(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> semver::Version {
        semver::Version::parse(s).expect("semver")
    }

    #[test]
    fn ids_are_content_addressed() {
        let c = CollectionRef::new("community", "general");
        assert_eq!(content_unit_id(&c, &v("1.0.0")), content_unit_id(&c, &v("1.0.0")));
        assert_ne!(content_unit_id(&c, &v("1.0.0")), content_unit_id(&c, &v("1.0.1")));
        assert_eq!(content_unit_id(&c, &v("1.0.0")).0.len(), 64);
    }

    #[test]
    fn register_is_idempotent() {
        let mut catalog = ContentCatalog::default();
        let c = CollectionRef::new("community", "general");
        let (id1, new1) = catalog.register(c.clone(), v("1.0.0"));
        let (id2, new2) = catalog.register(c, v("1.0.0"));
        assert!(new1);
        assert!(!new2);
        assert_eq!(id1, id2);
        assert_eq!(catalog.units.len(), 1);
    }

    #[test]
    fn highest_tracks_greatest_version_regardless_of_import_order() {
        let mut catalog = ContentCatalog::default();
        let c = CollectionRef::new("community", "general");
        let (v2, _) = catalog.register(c.clone(), v("2.0.0"));
        let (v1, _) = catalog.register(c.clone(), v("1.5.0"));
        assert_eq!(catalog.highest_for(&c), Some(&v2));
        assert!(catalog.is_highest(&v2));
        assert!(!catalog.is_highest(&v1));
    }

    #[test]
    fn prerelease_only_wins_when_nothing_stable_exists() {
        let mut catalog = ContentCatalog::default();
        let c = CollectionRef::new("ansible", "posix");
        let (beta, _) = catalog.register(c.clone(), v("3.0.0-beta.1"));
        assert_eq!(catalog.highest_for(&c), Some(&beta));
        let (stable, _) = catalog.register(c.clone(), v("2.9.0"));
        assert_eq!(catalog.highest_for(&c), Some(&stable));
    }

    #[test]
    fn catalog_json_roundtrip_with_collection_keys() {
        let mut catalog = ContentCatalog::default();
        catalog.register(CollectionRef::new("community", "general"), v("1.0.0"));
        let json = serde_json::to_string(&catalog).expect("serialize");
        assert!(json.contains("\"community.general\""));
        let back: ContentCatalog = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, catalog);
    }
}
