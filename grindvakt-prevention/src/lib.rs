//! # Grindvakt Prevention
//!
//! Firewall rule store adapters. Each adapter owns the inbound deny entries of
//! the rule sets it manages and replaces entries in place when a slot is
//! reused.

pub mod file;
pub mod firewall;

pub use file::FileFirewall;
pub use firewall::MemoryFirewall;
