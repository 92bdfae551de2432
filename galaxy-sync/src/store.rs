//! Repository and catalog persistence.
//!
//! [`FileRepositoryStore`] keeps one JSON document per repository at
//! `<home>/.galaxy/repositories/<name>.json` and the catalog at
//! `<home>/.galaxy/content/catalog.json`. Writes use the `.tmp` + rename
//! pattern, so readers never observe a half-written version.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use galaxy_core::types::{Repository, RepositoryName, RepositoryVersion, VersionRef};

use crate::catalog::ContentCatalog;
use crate::error::{io_err, SyncError};

/// Read/write access to repositories and the content catalog.
///
/// Implementations need not serialize writers; callers hold a reservation on
/// the repository they write.
pub trait RepositoryStore: Send + Sync {
    /// Load a repository; `SyncError::RepositoryNotFound` if absent.
    fn load_repository(&self, name: &RepositoryName) -> Result<Repository, SyncError>;

    /// Persist a repository atomically.
    fn save_repository(&self, repository: &Repository) -> Result<(), SyncError>;

    fn repository_exists(&self, name: &RepositoryName) -> Result<bool, SyncError>;

    /// All repository names, sorted.
    fn list_repositories(&self) -> Result<Vec<RepositoryName>, SyncError>;

    /// The catalog; empty if nothing was ever ingested.
    fn load_catalog(&self) -> Result<ContentCatalog, SyncError>;

    fn save_catalog(&self, catalog: &ContentCatalog) -> Result<(), SyncError>;

    fn latest_version(&self, name: &RepositoryName) -> Result<Option<RepositoryVersion>, SyncError> {
        Ok(self.load_repository(name)?.latest_version().cloned())
    }

    fn version(&self, reference: &VersionRef) -> Result<RepositoryVersion, SyncError> {
        self.load_repository(&reference.repository)?
            .version(reference.number)
            .cloned()
            .ok_or_else(|| SyncError::VersionNotFound(reference.clone()))
    }
}

/// `<home>/.galaxy/repositories/`
pub fn repositories_dir_at(home: &Path) -> PathBuf {
    home.join(".galaxy").join("repositories")
}

/// `<home>/.galaxy/content/catalog.json`
pub fn catalog_path_at(home: &Path) -> PathBuf {
    home.join(".galaxy").join("content").join("catalog.json")
}

/// JSON-file backed [`RepositoryStore`].
#[derive(Debug, Clone)]
pub struct FileRepositoryStore {
    home: PathBuf,
}

impl FileRepositoryStore {
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// `<home>/.galaxy/repositories/<name>.json`: pure, no I/O.
    pub fn repository_path(&self, name: &RepositoryName) -> PathBuf {
        repositories_dir_at(&self.home).join(format!("{}.json", name.0))
    }
}

impl RepositoryStore for FileRepositoryStore {
    fn load_repository(&self, name: &RepositoryName) -> Result<Repository, SyncError> {
        let path = self.repository_path(name);
        read_json(&path)?.ok_or_else(|| SyncError::RepositoryNotFound(name.clone()))
    }

    fn save_repository(&self, repository: &Repository) -> Result<(), SyncError> {
        galaxy_core::registry::validate_name(&repository.name.0)?;
        write_json_atomic(&self.repository_path(&repository.name), repository)
    }

    fn repository_exists(&self, name: &RepositoryName) -> Result<bool, SyncError> {
        Ok(self.repository_path(name).exists())
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryName>, SyncError> {
        let dir = repositories_dir_at(&self.home);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&dir, err)),
        };
        let mut names: Vec<RepositoryName> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().and_then(|x| x.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(RepositoryName::from)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn load_catalog(&self) -> Result<ContentCatalog, SyncError> {
        Ok(read_json(&catalog_path_at(&self.home))?.unwrap_or_default())
    }

    fn save_catalog(&self, catalog: &ContentCatalog) -> Result<(), SyncError> {
        write_json_atomic(&catalog_path_at(&self.home), catalog)
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SyncError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Writes to `<path>.tmp` then renames to `<path>`.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), SyncError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid store path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
