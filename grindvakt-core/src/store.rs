//! Store seams driven by the rotation engine.
//!
//! Both stores are injected into the engine as trait objects so that cloud
//! adapters, file-backed adapters and in-memory fakes are interchangeable.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::rule::{DenyEntry, RuleRecord, RuleSetId};

/// Operation names used in error reports and fault plans.
pub mod ops {
    pub const LIST_BY_RULE_SET: &str = "list_by_rule_set";
    pub const PUT: &str = "put";
    pub const DELETE_BY_KEY: &str = "delete_by_key";
    pub const CREATE_DENY_ENTRY: &str = "create_deny_entry";
    pub const DELETE_ENTRY: &str = "delete_entry";
    pub const LIST_ENTRIES: &str = "list_entries";
    pub const ACQUIRE_LEASE: &str = "acquire_lease";
    pub const CHECK_LEASE: &str = "check_lease";
    pub const RELEASE_LEASE: &str = "release_lease";
}

/// Per-rule-set write counter used for conditional metadata writes.
pub type Revision = u64;

/// Fencing token of a rule-set lease. Tokens of one rule set only grow.
pub type LeaseToken = u64;

/// Every record of one rule set, oldest first, with the revision it was read at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSetSnapshot {
    pub records: Vec<RuleRecord>,
    pub revision: Revision,
}

impl RuleSetSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find_host(&self, host: Ipv4Addr) -> Option<&RuleRecord> {
        self.records.iter().find(|r| r.remote_host == host)
    }

    pub fn highest_slot(&self) -> Option<u16> {
        self.records.iter().map(|r| r.slot_number).max()
    }

    /// The eviction candidate: smallest `created_at`.
    pub fn oldest(&self) -> Option<&RuleRecord> {
        self.records.iter().min_by_key(|r| r.created_at)
    }

    pub fn newest_created_at(&self) -> Option<i64> {
        self.records.iter().map(|r| r.created_at).max()
    }
}

/// Durable record of which host occupies which slot.
///
/// Reads must observe every write previously acknowledged by the same store.
/// Writes are conditional: they succeed only while the rule set is still at
/// `expected` and return the revision the rule set moved to.
///
/// The store also holds the rule-set leases, so every worker sharing the
/// store contends for the same lease. Lease operations never move the
/// revision.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// All records of a rule set ordered by `created_at` ascending.
    async fn list_by_rule_set(&self, rule_set_id: &RuleSetId)
        -> Result<RuleSetSnapshot, StoreError>;

    async fn put(&self, record: &RuleRecord, expected: Revision) -> Result<Revision, StoreError>;

    /// Removes the record keyed by `(rule_set_id, created_at)`. Absent keys
    /// are not an error.
    async fn delete_by_key(
        &self,
        rule_set_id: &RuleSetId,
        created_at: i64,
        expected: Revision,
    ) -> Result<Revision, StoreError>;

    /// Grants the rule set's lease for `ttl` unless a live lease exists.
    /// `None` means someone else holds it.
    async fn acquire_lease(
        &self,
        rule_set_id: &RuleSetId,
        ttl: Duration,
    ) -> Result<Option<LeaseToken>, StoreError>;

    /// Whether `token` is still the rule set's unexpired lease.
    async fn lease_is_live(
        &self,
        rule_set_id: &RuleSetId,
        token: LeaseToken,
    ) -> Result<bool, StoreError>;

    /// Drops the lease if `token` still holds it.
    async fn release_lease(&self, rule_set_id: &RuleSetId, token: LeaseToken)
        -> Result<(), StoreError>;
}

/// The live deny-rule list of a rule set.
#[async_trait]
pub trait FirewallRuleStore: Send + Sync {
    /// Installs `DenyEntry::block_host(slot, host)`, replacing whatever held the slot.
    async fn create_deny_entry(
        &self,
        rule_set_id: &RuleSetId,
        slot: u16,
        host: Ipv4Addr,
    ) -> Result<(), StoreError>;

    /// Removes the inbound entry at `slot`. Empty slots are not an error.
    async fn delete_entry(&self, rule_set_id: &RuleSetId, slot: u16) -> Result<(), StoreError>;

    /// Inbound entries of the rule set ordered by rule number.
    async fn list_entries(&self, rule_set_id: &RuleSetId) -> Result<Vec<DenyEntry>, StoreError>;
}
