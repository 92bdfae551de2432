//! Domain types for the synclist registry.
//!
//! All types are serializable/deserializable via serde; synclists persist as
//! YAML, repositories and the content catalog as JSON.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a synclist (unique; doubles as its identity).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncListName(pub String);

impl fmt::Display for SyncListName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SyncListName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SyncListName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name for a content repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepositoryName(pub String);

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepositoryName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepositoryName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Content-addressed identifier of an immutable content unit (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentUnitId(pub String);

impl fmt::Display for ContentUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ContentUnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContentUnitId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A collection identifier: `namespace.name`.
///
/// Serialized as the dotted string so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionRef {
    pub namespace: String,
    pub name: String,
}

impl CollectionRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl FromStr for CollectionRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('.') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(format!(
                "invalid collection '{s}'; expected <namespace>.<name>"
            )),
        }
    }
}

impl TryFrom<String> for CollectionRef {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CollectionRef> for String {
    fn from(c: CollectionRef) -> Self {
        c.to_string()
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Curation policy of a synclist.
///
/// `Include` keeps only the selected collections; `Exclude` keeps everything
/// upstream except the selected collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Include,
    #[default]
    Exclude,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Include => write!(f, "include"),
            Policy::Exclude => write!(f, "exclude"),
        }
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "include" => Ok(Policy::Include),
            "exclude" => Ok(Policy::Exclude),
            other => Err(format!(
                "unknown policy '{other}'; expected: include, exclude"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// One immutable collection version known to the content catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: ContentUnitId,
    pub collection: CollectionRef,
    pub version: semver::Version,
    pub created_at: DateTime<Utc>,
}

/// Immutable snapshot of a repository's content set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryVersion {
    pub number: u64,
    pub content: BTreeSet<ContentUnitId>,
    pub created_at: DateTime<Utc>,
}

/// Reference to a specific version of a specific repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionRef {
    pub repository: RepositoryName,
    pub number: u64,
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.number)
    }
}

/// A content repository: an append-only, monotonically numbered sequence of
/// immutable versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: RepositoryName,
    #[serde(default)]
    pub versions: Vec<RepositoryVersion>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(name: RepositoryName) -> Self {
        Self {
            name,
            versions: vec![],
            created_at: Utc::now(),
        }
    }

    /// The most recently created version, if any.
    pub fn latest_version(&self) -> Option<&RepositoryVersion> {
        self.versions.iter().max_by_key(|v| v.number)
    }

    pub fn version(&self, number: u64) -> Option<&RepositoryVersion> {
        self.versions.iter().find(|v| v.number == number)
    }

    pub fn next_version_number(&self) -> u64 {
        self.latest_version().map(|v| v.number + 1).unwrap_or(1)
    }
}

// ---------------------------------------------------------------------------
// Synclist
// ---------------------------------------------------------------------------

/// A per-account curated mirror definition paired with its own target
/// repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncList {
    pub name: SyncListName,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub collections: BTreeSet<CollectionRef>,
    #[serde(default)]
    pub namespaces: BTreeSet<String>,
    pub upstream_repository: RepositoryName,
    /// Target repository; one per synclist, created with it.
    pub repository: RepositoryName,
    #[serde(default)]
    pub users: BTreeSet<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncList {
    /// Whether `collection` is named by this synclist, either directly or via
    /// its namespace.
    pub fn selects(&self, collection: &CollectionRef) -> bool {
        self.collections.contains(collection) || self.namespaces.contains(&collection.namespace)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn synclist() -> SyncList {
        let now = Utc::now();
        SyncList {
            name: SyncListName::from("acme-synclist"),
            policy: Policy::Exclude,
            collections: [CollectionRef::new("community", "general")].into(),
            namespaces: ["ansible".to_string()].into(),
            upstream_repository: RepositoryName::from("published"),
            repository: RepositoryName::from("acme-synclist"),
            users: BTreeSet::new(),
            groups: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn newtype_display() {
        assert_eq!(SyncListName::from("a-synclist").to_string(), "a-synclist");
        assert_eq!(RepositoryName::from("published").to_string(), "published");
        assert_eq!(ContentUnitId::from("abc").to_string(), "abc");
    }

    #[test]
    fn collection_ref_parses_and_displays() {
        let c: CollectionRef = "community.general".parse().expect("parse");
        assert_eq!(c, CollectionRef::new("community", "general"));
        assert_eq!(c.to_string(), "community.general");
    }

    #[test]
    fn collection_ref_rejects_malformed() {
        assert!("community".parse::<CollectionRef>().is_err());
        assert!(".general".parse::<CollectionRef>().is_err());
        assert!("a.b.c".parse::<CollectionRef>().is_err());
    }

    #[test]
    fn policy_defaults_to_exclude_and_parses() {
        assert_eq!(Policy::default(), Policy::Exclude);
        assert_eq!("INCLUDE".parse::<Policy>(), Ok(Policy::Include));
        assert!("everything".parse::<Policy>().is_err());
    }

    #[test]
    fn selects_by_collection_or_namespace() {
        let s = synclist();
        assert!(s.selects(&CollectionRef::new("community", "general")));
        assert!(s.selects(&CollectionRef::new("ansible", "posix")));
        assert!(!s.selects(&CollectionRef::new("community", "crypto")));
    }

    #[test]
    fn repository_latest_and_next_number() {
        let mut repo = Repository::new(RepositoryName::from("published"));
        assert!(repo.latest_version().is_none());
        assert_eq!(repo.next_version_number(), 1);
        repo.versions.push(RepositoryVersion {
            number: 1,
            content: BTreeSet::new(),
            created_at: Utc::now(),
        });
        repo.versions.push(RepositoryVersion {
            number: 2,
            content: [ContentUnitId::from("x")].into(),
            created_at: Utc::now(),
        });
        assert_eq!(repo.latest_version().map(|v| v.number), Some(2));
        assert_eq!(repo.next_version_number(), 3);
        assert!(repo.version(1).is_some());
    }

    #[test]
    fn synclist_yaml_roundtrip() {
        let s = synclist();
        let yaml = serde_yaml::to_string(&s).expect("serialize");
        assert!(yaml.contains("policy: exclude"));
        assert!(yaml.contains("- community.general"));
        let back: SyncList = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, s);
    }
}
