//! Metadata table persisted as a JSON document.
//!
//! Several processes may open the same file; conditional writes and leases
//! are checked against the document as it is on disk.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use grindvakt_core::persist::JsonDocument;
use grindvakt_core::{
    LeaseToken, MetadataStore, Revision, RuleRecord, RuleSetId, RuleSetSnapshot, StoreError,
    SystemClock,
};

use crate::partition::Table;

pub struct FileMetadataStore {
    document: JsonDocument<Table>,
}

impl FileMetadataStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let document = JsonDocument::new(path);
        debug!(path = %document.path().display(), "Opened metadata table");
        Self { document }
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn list_by_rule_set(
        &self,
        rule_set_id: &RuleSetId,
    ) -> Result<RuleSetSnapshot, StoreError> {
        self.document
            .read(|table| {
                table
                    .get(rule_set_id)
                    .map(|p| p.snapshot())
                    .unwrap_or_default()
            })
            .await
    }

    async fn put(&self, record: &RuleRecord, expected: Revision) -> Result<Revision, StoreError> {
        self.document
            .update(|table| {
                table
                    .entry(record.rule_set_id.clone())
                    .or_default()
                    .put(record, expected)
            })
            .await
    }

    async fn delete_by_key(
        &self,
        rule_set_id: &RuleSetId,
        created_at: i64,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        self.document
            .update(|table| {
                table
                    .entry(rule_set_id.clone())
                    .or_default()
                    .delete(created_at, expected)
            })
            .await
    }

    async fn acquire_lease(
        &self,
        rule_set_id: &RuleSetId,
        ttl: Duration,
    ) -> Result<Option<LeaseToken>, StoreError> {
        self.document
            .update(|table| {
                Ok(table
                    .entry(rule_set_id.clone())
                    .or_default()
                    .acquire_lease(SystemClock::now_millis(), ttl))
            })
            .await
    }

    async fn lease_is_live(
        &self,
        rule_set_id: &RuleSetId,
        token: LeaseToken,
    ) -> Result<bool, StoreError> {
        self.document
            .read(|table| {
                table
                    .get(rule_set_id)
                    .is_some_and(|p| p.lease_is_live(token, SystemClock::now_millis()))
            })
            .await
    }

    async fn release_lease(
        &self,
        rule_set_id: &RuleSetId,
        token: LeaseToken,
    ) -> Result<(), StoreError> {
        self.document
            .update(|table| {
                if let Some(partition) = table.get_mut(rule_set_id) {
                    partition.release_lease(token);
                }
                Ok(())
            })
            .await
    }
}
