use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use trellis_cascade::CascadePolicies;
use trellis_store::{FileStoreConfig, SyncMode};
use trellis_types::FieldPolicy;

use crate::error::{ContainerError, ContainerResult};

/// Container settings, usually loaded from TOML.
///
/// ```toml
/// activation_depth = 3
/// unique_fields = ["email"]
///
/// [cascade]
/// lines = "force_cascade"
/// customer = "force_no_cascade"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Depth used by [`ObjectContainer::activate`](crate::ObjectContainer::activate).
    pub activation_depth: u32,
    /// Per-field cascade policy for deletes.
    pub cascade: BTreeMap<String, FieldPolicy>,
    /// Policy for fields not listed in `cascade`.
    pub default_policy: FieldPolicy,
    pub read_only: bool,
    /// Fields whose values must be unique across committed objects.
    pub unique_fields: Vec<String>,
    /// Sync strategy of the file store.
    pub sync_mode: SyncMode,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            activation_depth: 5,
            cascade: BTreeMap::new(),
            default_policy: FieldPolicy::Inherit,
            read_only: false,
            unique_fields: Vec::new(),
            sync_mode: SyncMode::OsDefault,
        }
    }
}

impl ContainerConfig {
    pub fn from_toml_str(s: &str) -> ContainerResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ContainerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ContainerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn policies(&self) -> CascadePolicies {
        CascadePolicies::from_map(self.cascade.clone(), self.default_policy)
    }

    pub fn file_store(&self) -> FileStoreConfig {
        FileStoreConfig {
            sync_mode: self.sync_mode,
            read_only: self.read_only,
        }
    }
}
