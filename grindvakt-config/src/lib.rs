//! # Grindvakt Configuration System
//!
//! Hierarchical configuration for the rule rotation service.
//!
//! ## Features
//! - **Unified Configuration**: one document for stores, rotation window,
//!   lease and retry discipline, and segment associations
//! - **Validation**: every numeric knob is range-checked before use
//! - **Environment Awareness**: per-environment overlay files and
//!   `GRINDVAKT_*` environment overrides

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod rotation;
mod segments;
mod stores;
mod telemetry;
mod validation;

pub use error::ConfigError;
pub use rotation::{LeaseConfig, RetryConfig, RotationConfig};
pub use segments::SegmentConfig;
pub use stores::{Backend, FirewallConfig, MetadataConfig};
pub use telemetry::TelemetryConfig;

/// Base configuration file, relative to the working directory.
pub const BASE_CONFIG_FILE: &str = "config/grindvakt.yaml";

/// Top‑level configuration container for all Grindvakt components.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct GrindvaktConfig {
    /// Rule metadata store (the one externally required setting lives here).
    #[validate(nested)]
    pub metadata: MetadataConfig,

    /// Firewall rule store adapter.
    #[validate(nested)]
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// Managed slot window.
    #[validate(nested)]
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Per-rule-set lease timing.
    #[validate(nested)]
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Store call timeouts and retry limits.
    #[validate(nested)]
    #[serde(default)]
    pub retry: RetryConfig,

    /// Subnet to rule-set associations.
    #[validate(nested)]
    #[serde(default)]
    pub segments: SegmentConfig,

    /// Logging setup.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl GrindvaktConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/grindvakt.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<environment>.yaml` - Environment‑specific overrides
    ///    (`GRINDVAKT_ENV`, default `production`).
    /// 4. `GRINDVAKT_*` environment variables, nested keys split on `__`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(GrindvaktConfig::default()));

        if Path::new(BASE_CONFIG_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_CONFIG_FILE));
        }

        let env = std::env::var("GRINDVAKT_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::finish(figment.merge(Env::prefixed("GRINDVAKT_").split("__")))
    }

    /// Load configuration from a specific path, still honouring environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Self::finish(
            Figment::from(Serialized::defaults(GrindvaktConfig::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed("GRINDVAKT_").split("__")),
        )
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        // Cross-field check the derive cannot express.
        config.rotation.slot_range()?;
        Ok(config)
    }
}
