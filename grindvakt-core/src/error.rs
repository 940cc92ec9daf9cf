use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::rule::{RuleSetId, SubnetId};

/// Which of the two stores an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Metadata,
    Firewall,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Metadata => f.write_str("metadata"),
            StoreKind::Firewall => f.write_str("firewall"),
        }
    }
}

/// Errors reported by store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Conditional write conflict: expected revision {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Store rejected request: {0}")]
    Rejected(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Failures worth another attempt with the same arguments.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Timeout(_))
    }
}

/// Errors surfaced by rule rotation and signal handling.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("No rule set associated with subnet {subnet_id}")]
    SegmentResolutionFailed { subnet_id: SubnetId },

    #[error("{store} {operation} failed for rule set {rule_set_id}: {source}")]
    StoreWriteFailed {
        store: StoreKind,
        operation: &'static str,
        rule_set_id: RuleSetId,
        #[source]
        source: StoreError,
    },

    #[error("{store} read failed for rule set {rule_set_id}: {source}")]
    StoreReadFailed {
        store: StoreKind,
        rule_set_id: RuleSetId,
        #[source]
        source: StoreError,
    },

    #[error("Capacity invariant violated for rule set {rule_set_id}: {detail}")]
    CapacityInvariantViolated {
        rule_set_id: RuleSetId,
        detail: String,
    },

    #[error("Concurrency conflict on rule set {rule_set_id}: {reason}")]
    ConcurrencyConflict {
        rule_set_id: RuleSetId,
        reason: String,
    },

    #[error("Invalid slot range: base {base}, capacity {capacity}")]
    InvalidSlotRange { base: u16, capacity: u16 },
}

impl RotationError {
    /// A lost race; the whole allocation may be re-run from a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RotationError::ConcurrencyConflict { .. })
    }

    /// Short machine-friendly label used for metrics and security events.
    pub fn kind(&self) -> &'static str {
        match self {
            RotationError::SegmentResolutionFailed { .. } => "segment_resolution_failed",
            RotationError::StoreWriteFailed { .. } => "store_write_failed",
            RotationError::StoreReadFailed { .. } => "store_read_failed",
            RotationError::CapacityInvariantViolated { .. } => "capacity_invariant_violated",
            RotationError::ConcurrencyConflict { .. } => "concurrency_conflict",
            RotationError::InvalidSlotRange { .. } => "invalid_slot_range",
        }
    }
}
