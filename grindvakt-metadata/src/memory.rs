//! In-process metadata table.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use grindvakt_core::fault::FaultPlan;
use grindvakt_core::store::ops;
use grindvakt_core::{
    LeaseToken, MetadataStore, Revision, RuleRecord, RuleSetId, RuleSetSnapshot, StoreError,
    SystemClock,
};

use crate::partition::Table;

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    table: Mutex<Table>,
    faults: FaultPlan,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Writes a record as a foreign writer would: no lease, no revision check.
    pub fn seed(&self, record: RuleRecord) {
        self.table
            .lock()
            .entry(record.rule_set_id.clone())
            .or_default()
            .put_unchecked(&record);
    }

    pub fn snapshot(&self, rule_set_id: &RuleSetId) -> RuleSetSnapshot {
        self.table
            .lock()
            .get(rule_set_id)
            .map(|p| p.snapshot())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn list_by_rule_set(
        &self,
        rule_set_id: &RuleSetId,
    ) -> Result<RuleSetSnapshot, StoreError> {
        let late = self.faults.before(ops::LIST_BY_RULE_SET).await?;
        FaultPlan::reply(late, Ok(self.snapshot(rule_set_id))).await
    }

    async fn put(&self, record: &RuleRecord, expected: Revision) -> Result<Revision, StoreError> {
        let late = self.faults.before(ops::PUT).await?;
        let result = self
            .table
            .lock()
            .entry(record.rule_set_id.clone())
            .or_default()
            .put(record, expected);
        FaultPlan::reply(late, result).await
    }

    async fn delete_by_key(
        &self,
        rule_set_id: &RuleSetId,
        created_at: i64,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let late = self.faults.before(ops::DELETE_BY_KEY).await?;
        let result = self
            .table
            .lock()
            .entry(rule_set_id.clone())
            .or_default()
            .delete(created_at, expected);
        FaultPlan::reply(late, result).await
    }

    async fn acquire_lease(
        &self,
        rule_set_id: &RuleSetId,
        ttl: Duration,
    ) -> Result<Option<LeaseToken>, StoreError> {
        let late = self.faults.before(ops::ACQUIRE_LEASE).await?;
        let token = self
            .table
            .lock()
            .entry(rule_set_id.clone())
            .or_default()
            .acquire_lease(SystemClock::now_millis(), ttl);
        FaultPlan::reply(late, Ok(token)).await
    }

    async fn lease_is_live(
        &self,
        rule_set_id: &RuleSetId,
        token: LeaseToken,
    ) -> Result<bool, StoreError> {
        let late = self.faults.before(ops::CHECK_LEASE).await?;
        let live = self
            .table
            .lock()
            .get(rule_set_id)
            .is_some_and(|p| p.lease_is_live(token, SystemClock::now_millis()));
        FaultPlan::reply(late, Ok(live)).await
    }

    async fn release_lease(
        &self,
        rule_set_id: &RuleSetId,
        token: LeaseToken,
    ) -> Result<(), StoreError> {
        self.faults.before(ops::RELEASE_LEASE).await?;
        if let Some(partition) = self.table.lock().get_mut(rule_set_id) {
            partition.release_lease(token);
        }
        Ok(())
    }
}
