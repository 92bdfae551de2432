//! Synclist registry: one YAML record per synclist.
//!
//! # Storage layout
//!
//! ```text
//! ~/.galaxy/
//!   synclists/
//!     <synclist_name>.yaml   (one file per synclist, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Validation that needs the content catalog (collections must exist,
//! upstream must exist) lives in `galaxy-sync`; this module only persists.

use std::path::{Path, PathBuf};

use crate::error::RegistryError;
use crate::types::{RepositoryName, SyncList, SyncListName};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.galaxy/`
pub fn galaxy_root(home: &Path) -> PathBuf {
    home.join(".galaxy")
}

/// `<home>/.galaxy/synclists/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn synclists_dir_at(home: &Path) -> Result<PathBuf, RegistryError> {
    let dir = galaxy_root(home).join("synclists");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.galaxy/synclists/<name>.yaml`: pure, no I/O.
pub fn synclist_path_at(home: &Path, name: &SyncListName) -> PathBuf {
    galaxy_root(home)
        .join("synclists")
        .join(format!("{}.yaml", name.0))
}

/// Reject names that cannot safely become a file name.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single synclist from `<home>/.galaxy/synclists/<name>.yaml`.
///
/// Returns `RegistryError::SyncListNotFound` if absent,
/// `RegistryError::Parse` (with path + line context) if malformed YAML.
pub fn load_synclist_at(home: &Path, name: &SyncListName) -> Result<SyncList, RegistryError> {
    let path = synclist_path_at(home, name);
    if !path.exists() {
        return Err(RegistryError::SyncListNotFound {
            name: name.0.clone(),
            path,
        });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })
}

/// `load_synclist_at` convenience wrapper.
pub fn load_synclist(name: &SyncListName) -> Result<SyncList, RegistryError> {
    load_synclist_at(&home()?, name)
}

/// Whether a record exists for `name`.
pub fn synclist_exists_at(home: &Path, name: &SyncListName) -> bool {
    synclist_path_at(home, name).exists()
}

/// Read every `<home>/.galaxy/synclists/*.yaml`, sorted by synclist name.
pub fn list_synclists_at(home: &Path) -> Result<Vec<SyncList>, RegistryError> {
    let dir = galaxy_root(home).join("synclists");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut result = Vec::new();
    for entry in entries {
        let fname = entry.file_name();
        let name = fname.to_string_lossy();
        if !name.ends_with(".yaml") {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path())?;
        let synclist: SyncList = serde_yaml::from_str(&contents)
            .map_err(|e| RegistryError::Parse { path: entry.path(), source: e })?;
        result.push(synclist);
    }
    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

/// `list_synclists_at` convenience wrapper.
pub fn list_synclists() -> Result<Vec<SyncList>, RegistryError> {
    list_synclists_at(&home()?)
}

/// Every synclist whose upstream is `upstream`, sorted by name.
pub fn synclists_for_upstream_at(
    home: &Path,
    upstream: &RepositoryName,
) -> Result<Vec<SyncList>, RegistryError> {
    Ok(list_synclists_at(home)?
        .into_iter()
        .filter(|s| &s.upstream_repository == upstream)
        .collect())
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a synclist to `<home>/.galaxy/synclists/<name>.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_synclist_at(home: &Path, synclist: &SyncList) -> Result<(), RegistryError> {
    validate_name(&synclist.name.0)?;
    synclists_dir_at(home)?;
    let path = synclist_path_at(home, &synclist.name);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", synclist.name.0));

    let yaml = serde_yaml::to_string(synclist)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    tracing::debug!(synclist = %synclist.name, path = %path.display(), "saved synclist");
    Ok(())
}

/// `save_synclist_at` convenience wrapper.
pub fn save_synclist(synclist: &SyncList) -> Result<(), RegistryError> {
    save_synclist_at(&home()?, synclist)
}

/// Remove the record for `name`. The target repository is left alone.
pub fn delete_synclist_at(home: &Path, name: &SyncListName) -> Result<(), RegistryError> {
    let path = synclist_path_at(home, name);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(RegistryError::SyncListNotFound {
                name: name.0.clone(),
                path,
            })
        }
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
