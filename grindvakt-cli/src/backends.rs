//! Store adapters selected by configuration.

use std::sync::Arc;

use tracing::info;

use grindvakt_config::{Backend, FirewallConfig, MetadataConfig};
use grindvakt_core::{FirewallRuleStore, MetadataStore};
use grindvakt_metadata::{FileMetadataStore, MemoryMetadataStore};
use grindvakt_prevention::file::FileFirewall;
use grindvakt_prevention::firewall::MemoryFirewall;

pub fn metadata_store(config: &MetadataConfig) -> Arc<dyn MetadataStore> {
    match config.backend {
        Backend::Memory => {
            info!(table = %config.table, "Using in-memory metadata table");
            Arc::new(MemoryMetadataStore::new())
        }
        Backend::File => Arc::new(FileMetadataStore::open(config.document_path())),
    }
}

pub fn firewall_store(config: &FirewallConfig) -> Arc<dyn FirewallRuleStore> {
    match config.backend {
        Backend::Memory => {
            info!("Using in-memory firewall");
            Arc::new(MemoryFirewall::new())
        }
        Backend::File => {
            info!(path = %config.path.display(), "Using file-backed firewall");
            Arc::new(FileFirewall::open(&config.path))
        }
    }
}
