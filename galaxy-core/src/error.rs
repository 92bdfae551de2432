//! Error types for galaxy-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from synclist registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with file path and line context from serde_yaml.
    #[error("failed to parse synclist at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`, cannot locate `~/.galaxy/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No synclist record exists under the given name.
    #[error("synclist '{name}' not found at {path}")]
    SyncListNotFound { name: String, path: PathBuf },

    /// Names end up as file names; reject anything that would escape the
    /// registry directory.
    #[error("invalid name '{0}': must be non-empty and must not contain '/', '\\' or start with '.'")]
    InvalidName(String),
}

/// Errors raised while loading [`crate::settings::Settings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl From<figment::Error> for SettingsError {
    fn from(err: figment::Error) -> Self {
        SettingsError::Figment(Box::new(err))
    }
}
