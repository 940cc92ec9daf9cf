//! Store adapter configuration.
//!
//! Selects the backend of each of the two stores the engine drives:
//! - rule metadata (durable slot records)
//! - firewall rule set (live deny entries)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Storage backend of a store adapter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local state, lost on exit.
    Memory,
    /// JSON document on disk.
    #[default]
    File,
}

/// Rule metadata store configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct MetadataConfig {
    /// Name of the metadata table/collection holding rule records.
    #[validate(custom(function = validation::validate_table_name))]
    #[serde(default)]
    pub table: String,

    #[serde(default)]
    pub backend: Backend,

    /// Directory of the file backend; the table name becomes the file name.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl MetadataConfig {
    /// Location of the file backend's document.
    pub fn document_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.json", self.table))
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            backend: Backend::default(),
            state_dir: default_state_dir(),
        }
    }
}

/// Firewall rule store configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct FirewallConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Document of the file backend.
    #[serde(default = "default_firewall_path")]
    pub path: PathBuf,
}

fn default_firewall_path() -> PathBuf {
    PathBuf::from("state/firewall.json")
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: default_firewall_path(),
        }
    }
}
