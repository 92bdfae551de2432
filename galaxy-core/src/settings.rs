//! Layered settings.
//!
//! Sources, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. `<home>/.galaxy/settings.yaml`
//! 3. Environment variables, `GALAXY_` prefix, `__` separating sections
//!    (`GALAXY_WORKER__CONCURRENCY=8` sets `worker.concurrency`).

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::types::{RepositoryName, SyncListName};

/// Placeholder substituted by [`Settings::synclist_name`].
pub const ACCOUNT_NAME_PLACEHOLDER: &str = "{account_name}";

/// What a curation does when its upstream repository has no version yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyUpstream {
    /// Log and submit nothing.
    #[default]
    Skip,
    /// Fail the curation task.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CurationSettings {
    pub empty_upstream: EmptyUpstream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Maximum number of tasks executing at once.
    pub concurrency: usize,
    /// Window for coalescing repeated upstream-change events.
    pub debounce_ms: u64,
    /// Finished task records and task groups kept for queries; older ones
    /// are dropped.
    pub retain_finished: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            debounce_ms: 500,
            retain_finished: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name template for per-account synclists and their repositories.
    pub synclist_name_format: String,
    /// Upstream repository used when a synclist is created without one.
    pub default_upstream: String,
    pub curation: CurationSettings,
    pub worker: WorkerSettings,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            synclist_name_format: format!("{ACCOUNT_NAME_PLACEHOLDER}-synclist"),
            default_upstream: "published".to_string(),
            curation: CurationSettings::default(),
            worker: WorkerSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    /// `<home>/.galaxy/settings.yaml`: pure, no I/O.
    pub fn path_at(home: &Path) -> PathBuf {
        home.join(".galaxy").join("settings.yaml")
    }

    /// The provider stack used by [`Settings::load_at`].
    pub fn figment_at(home: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Yaml::file(Self::path_at(home)))
            .merge(Env::prefixed("GALAXY_").split("__"))
    }

    /// Load and validate settings rooted at `home`. A missing file is not an
    /// error.
    pub fn load_at(home: &Path) -> Result<Self, SettingsError> {
        let settings: Settings = Self::figment_at(home).extract()?;
        settings.validate()?;
        tracing::debug!(
            path = %Self::path_at(home).display(),
            concurrency = settings.worker.concurrency,
            "settings loaded",
        );
        Ok(settings)
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, SettingsError> {
        let home = dirs::home_dir().ok_or(SettingsError::HomeNotFound)?;
        Self::load_at(&home)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.synclist_name_format.contains(ACCOUNT_NAME_PLACEHOLDER) {
            return Err(SettingsError::Invalid {
                key: "synclist_name_format",
                reason: format!("must contain {ACCOUNT_NAME_PLACEHOLDER}"),
            });
        }
        if self.default_upstream.trim().is_empty() {
            return Err(SettingsError::Invalid {
                key: "default_upstream",
                reason: "must not be empty".to_string(),
            });
        }
        if self.worker.concurrency == 0 {
            return Err(SettingsError::Invalid {
                key: "worker.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker.retain_finished == 0 {
            return Err(SettingsError::Invalid {
                key: "worker.retain_finished",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Synclist name for `account_name`, e.g. `acme-synclist`.
    pub fn synclist_name(&self, account_name: &str) -> SyncListName {
        SyncListName::from(
            self.synclist_name_format
                .replace(ACCOUNT_NAME_PLACEHOLDER, account_name),
        )
    }

    pub fn default_upstream(&self) -> RepositoryName {
        RepositoryName::from(self.default_upstream.as_str())
    }
}
