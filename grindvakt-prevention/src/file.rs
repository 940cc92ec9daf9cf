//! ## grindvakt-prevention::file
//! Firewall rule sets persisted as one JSON document, so state carries over
//! between CLI invocations.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use async_trait::async_trait;

use grindvakt_core::persist::JsonDocument;
use grindvakt_core::{DenyEntry, FirewallRuleStore, RuleSetId, StoreError};

type Document = BTreeMap<RuleSetId, Vec<DenyEntry>>;

pub struct FileFirewall {
    document: JsonDocument<Document>,
}

impl FileFirewall {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            document: JsonDocument::new(path),
        }
    }
}

#[async_trait]
impl FirewallRuleStore for FileFirewall {
    async fn create_deny_entry(
        &self,
        rule_set_id: &RuleSetId,
        slot: u16,
        host: Ipv4Addr,
    ) -> Result<(), StoreError> {
        self.document
            .update(|doc| {
                let entries = doc.entry(rule_set_id.clone()).or_default();
                entries.retain(|e| e.rule_number != slot);
                entries.push(DenyEntry::block_host(slot, host));
                entries.sort_by_key(|e| e.rule_number);
                Ok(())
            })
            .await
    }

    async fn delete_entry(&self, rule_set_id: &RuleSetId, slot: u16) -> Result<(), StoreError> {
        self.document
            .update(|doc| {
                if let Some(entries) = doc.get_mut(rule_set_id) {
                    entries.retain(|e| e.rule_number != slot);
                }
                Ok(())
            })
            .await
    }

    async fn list_entries(&self, rule_set_id: &RuleSetId) -> Result<Vec<DenyEntry>, StoreError> {
        self.document
            .read(|doc| doc.get(rule_set_id).cloned().unwrap_or_default())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firewall.json");
        let acl = RuleSetId::from("acl-1");

        let fw = FileFirewall::open(&path);
        fw.create_deny_entry(&acl, 72, Ipv4Addr::new(2, 2, 2, 2))
            .await
            .unwrap();
        fw.create_deny_entry(&acl, 71, Ipv4Addr::new(1, 1, 1, 1))
            .await
            .unwrap();
        fw.create_deny_entry(&acl, 72, Ipv4Addr::new(3, 3, 3, 3))
            .await
            .unwrap();

        let reopened = FileFirewall::open(&path);
        let entries = reopened.list_entries(&acl).await.unwrap();
        let view: Vec<_> = entries.iter().map(|e| (e.rule_number, e.host())).collect();
        assert_eq!(
            view,
            vec![
                (71, Ipv4Addr::new(1, 1, 1, 1)),
                (72, Ipv4Addr::new(3, 3, 3, 3))
            ]
        );

        reopened.delete_entry(&acl, 71).await.unwrap();
        reopened.delete_entry(&acl, 71).await.unwrap();
        assert_eq!(reopened.list_entries(&acl).await.unwrap().len(), 1);
    }
}
