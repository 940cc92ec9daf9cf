//! # Grindvakt Engine
//!
//! Turns threat signals into deny entries inside a fixed window of rule
//! numbers. A full window rotates: the oldest blocked host gives up its slot.
//!
//! The engine drives two stores (the live firewall rule set and the metadata
//! table describing it) and keeps them in agreement under a per-rule-set
//! lease, held in the metadata store, with conditional metadata writes.

pub mod audit;
pub mod error;
pub mod handler;
pub mod lease;
pub mod retry;
pub mod rotation;

pub use audit::{AuditReport, Drift};
pub use error::HandlerError;
pub use handler::{HandleOutcome, SignalHandler};
pub use lease::{LeaseGuard, LeaseSettings};
pub use retry::RetryPolicy;
pub use rotation::RuleRotationEngine;
