//! # Grindvakt Rule Metadata
//!
//! Metadata store adapters. A table holds one partition per rule set; each
//! partition keeps its records keyed by creation time together with the
//! revision counter that conditional writes are checked against.

mod partition;

pub mod file;
pub mod memory;

pub use file::FileMetadataStore;
pub use memory::MemoryMetadataStore;
