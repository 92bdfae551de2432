//! Galaxy core library: domain types, synclist registry persistence,
//! settings, errors.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`RegistryError`], [`SettingsError`]
//! - [`registry`]: synclist load / save / list
//! - [`settings`]: layered configuration

pub mod error;
pub mod registry;
pub mod settings;
pub mod types;

pub use error::{RegistryError, SettingsError};
pub use settings::{EmptyUpstream, Settings};
pub use types::{
    CollectionRef, ContentUnit, ContentUnitId, Policy, Repository, RepositoryName,
    RepositoryVersion, SyncList, SyncListName, VersionRef,
};
