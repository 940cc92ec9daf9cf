use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use grindvakt_core::{LeaseToken, Revision, RuleRecord, RuleSetId, RuleSetSnapshot, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Lease {
    token: LeaseToken,
    expires_at_ms: i64,
}

/// Records of one rule set, keyed by `created_at`, and the rule set's lease.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Partition {
    #[serde(default)]
    revision: Revision,
    #[serde(default)]
    records: Vec<RuleRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease: Option<Lease>,
    #[serde(default)]
    last_token: LeaseToken,
}

impl Partition {
    pub(crate) fn snapshot(&self) -> RuleSetSnapshot {
        let mut records = self.records.clone();
        records.sort_by_key(|r| r.created_at);
        RuleSetSnapshot {
            records,
            revision: self.revision,
        }
    }

    fn check(&self, expected: Revision) -> Result<(), StoreError> {
        if self.revision == expected {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                expected,
                actual: self.revision,
            })
        }
    }

    /// Inserts or replaces the record with the same `created_at`.
    pub(crate) fn put(
        &mut self,
        record: &RuleRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        self.check(expected)?;
        Ok(self.put_unchecked(record))
    }

    /// Inserts or replaces the record regardless of the revision.
    pub(crate) fn put_unchecked(&mut self, record: &RuleRecord) -> Revision {
        self.records.retain(|r| r.created_at != record.created_at);
        self.records.push(record.clone());
        self.revision += 1;
        self.revision
    }

    pub(crate) fn delete(
        &mut self,
        created_at: i64,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        self.check(expected)?;
        let before = self.records.len();
        self.records.retain(|r| r.created_at != created_at);
        if self.records.len() != before {
            self.revision += 1;
        }
        Ok(self.revision)
    }
}

impl Partition {
    /// Grants a fresh token unless a lease is live at `now_ms`.
    pub(crate) fn acquire_lease(&mut self, now_ms: i64, ttl: Duration) -> Option<LeaseToken> {
        if self.lease.is_some_and(|l| l.expires_at_ms > now_ms) {
            return None;
        }
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.last_token += 1;
        self.lease = Some(Lease {
            token: self.last_token,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        });
        Some(self.last_token)
    }

    pub(crate) fn lease_is_live(&self, token: LeaseToken, now_ms: i64) -> bool {
        self.lease
            .is_some_and(|l| l.token == token && l.expires_at_ms > now_ms)
    }

    pub(crate) fn release_lease(&mut self, token: LeaseToken) {
        if self.lease.is_some_and(|l| l.token == token) {
            self.lease = None;
        }
    }
}

/// Partitions of one table.
pub(crate) type Table = BTreeMap<RuleSetId, Partition>;
