//! ## grindvakt-prevention::firewall
//! **In-process firewall rule sets**
//!
//! Holds deny entries per rule set keyed by rule number. Used by tests and by
//! single-process deployments; faults can be scripted per operation.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use grindvakt_core::fault::FaultPlan;
use grindvakt_core::store::ops;
use grindvakt_core::{DenyEntry, FirewallRuleStore, RuleSetId, StoreError};

#[derive(Debug, Default)]
pub struct MemoryFirewall {
    rule_sets: Mutex<HashMap<RuleSetId, BTreeMap<u16, DenyEntry>>>,
    faults: FaultPlan,
}

impl MemoryFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripted failures consumed by subsequent calls.
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Installs an entry without going through the store interface, e.g. a
    /// rule outside the managed window or a deliberately drifted slot.
    pub fn seed_entry(&self, rule_set_id: &RuleSetId, entry: DenyEntry) {
        self.rule_sets
            .lock()
            .entry(rule_set_id.clone())
            .or_default()
            .insert(entry.rule_number, entry);
    }

    pub fn entry(&self, rule_set_id: &RuleSetId, slot: u16) -> Option<DenyEntry> {
        self.rule_sets
            .lock()
            .get(rule_set_id)
            .and_then(|entries| entries.get(&slot).cloned())
    }

    pub fn len(&self, rule_set_id: &RuleSetId) -> usize {
        self.rule_sets
            .lock()
            .get(rule_set_id)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, rule_set_id: &RuleSetId) -> bool {
        self.len(rule_set_id) == 0
    }
}

#[async_trait]
impl FirewallRuleStore for MemoryFirewall {
    async fn create_deny_entry(
        &self,
        rule_set_id: &RuleSetId,
        slot: u16,
        host: Ipv4Addr,
    ) -> Result<(), StoreError> {
        let late = self.faults.before(ops::CREATE_DENY_ENTRY).await?;
        let replaced = self
            .rule_sets
            .lock()
            .entry(rule_set_id.clone())
            .or_default()
            .insert(slot, DenyEntry::block_host(slot, host));
        if let Some(old) = replaced {
            debug!(%rule_set_id, slot, old = %old.cidr_block, "Replaced deny entry");
        }
        FaultPlan::reply(late, Ok(())).await
    }

    async fn delete_entry(&self, rule_set_id: &RuleSetId, slot: u16) -> Result<(), StoreError> {
        let late = self.faults.before(ops::DELETE_ENTRY).await?;
        if let Some(entries) = self.rule_sets.lock().get_mut(rule_set_id) {
            entries.remove(&slot);
        }
        FaultPlan::reply(late, Ok(())).await
    }

    async fn list_entries(&self, rule_set_id: &RuleSetId) -> Result<Vec<DenyEntry>, StoreError> {
        let late = self.faults.before(ops::LIST_ENTRIES).await?;
        let entries: Vec<DenyEntry> = self
            .rule_sets
            .lock()
            .get(rule_set_id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default();
        FaultPlan::reply(late, Ok(entries)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grindvakt_core::fault::Fault;

    fn acl() -> RuleSetId {
        RuleSetId::from("acl-1")
    }

    #[tokio::test]
    async fn create_replaces_occupied_slot() {
        let fw = MemoryFirewall::new();
        fw.create_deny_entry(&acl(), 71, Ipv4Addr::new(1, 1, 1, 1))
            .await
            .unwrap();
        fw.create_deny_entry(&acl(), 71, Ipv4Addr::new(9, 9, 9, 9))
            .await
            .unwrap();

        assert_eq!(fw.len(&acl()), 1);
        assert_eq!(
            fw.entry(&acl(), 71).map(|e| e.host()),
            Some(Ipv4Addr::new(9, 9, 9, 9))
        );
    }

    #[tokio::test]
    async fn delete_of_empty_slot_succeeds() {
        let fw = MemoryFirewall::new();
        fw.delete_entry(&acl(), 75).await.unwrap();
        assert!(fw.is_empty(&acl()));
    }

    #[tokio::test]
    async fn rule_sets_are_isolated() {
        let fw = MemoryFirewall::new();
        let other = RuleSetId::from("acl-2");
        fw.create_deny_entry(&acl(), 71, Ipv4Addr::new(1, 1, 1, 1))
            .await
            .unwrap();
        fw.create_deny_entry(&other, 71, Ipv4Addr::new(2, 2, 2, 2))
            .await
            .unwrap();
        fw.delete_entry(&other, 71).await.unwrap();

        assert_eq!(fw.list_entries(&acl()).await.unwrap().len(), 1);
        assert!(fw.list_entries(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scripted_faults() {
        let fw = MemoryFirewall::new();
        fw.faults()
            .fail_next(ops::CREATE_DENY_ENTRY, 1, Fault::Rejected);

        let err = fw
            .create_deny_entry(&acl(), 71, Ipv4Addr::new(1, 1, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(fw.is_empty(&acl()));

        fw.create_deny_entry(&acl(), 71, Ipv4Addr::new(1, 1, 1, 1))
            .await
            .unwrap();
        assert_eq!(fw.len(&acl()), 1);
    }
}
