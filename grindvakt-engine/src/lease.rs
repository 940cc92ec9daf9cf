//! Per-rule-set leases kept in the metadata store.
//!
//! Every worker sharing the metadata store contends for the same lease,
//! whichever process it runs in. A lease expires on its own after its TTL so
//! an abandoned holder cannot wedge the rule set; each grant carries a fencing
//! token so a holder whose lease lapsed can tell before it writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use grindvakt_config::LeaseConfig;
use grindvakt_core::store::ops;
use grindvakt_core::{LeaseToken, MetadataStore, RotationError, RuleSetId, StoreKind};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    pub ttl: Duration,
    pub acquire_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl From<&LeaseConfig> for LeaseSettings {
    fn from(config: &LeaseConfig) -> Self {
        Self {
            ttl: config.ttl(),
            acquire_timeout: config.acquire_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// A held lease.
///
/// Give it back with [`LeaseGuard::release`]; a guard dropped without that
/// (a cancelled allocation) is released from a background task.
pub struct LeaseGuard {
    metadata: Arc<dyn MetadataStore>,
    retry: RetryPolicy,
    rule_set_id: RuleSetId,
    token: LeaseToken,
    released: bool,
}

impl LeaseGuard {
    /// Polls the store until the rule set is free or `settings.acquire_timeout`
    /// passes.
    pub async fn acquire(
        metadata: &Arc<dyn MetadataStore>,
        rule_set_id: &RuleSetId,
        settings: &LeaseSettings,
        retry: &RetryPolicy,
    ) -> Result<Self, RotationError> {
        let deadline = Instant::now() + settings.acquire_timeout;
        loop {
            let granted = retry
                .run(ops::ACQUIRE_LEASE, || {
                    metadata.acquire_lease(rule_set_id, settings.ttl)
                })
                .await
                .map_err(|source| RotationError::StoreWriteFailed {
                    store: StoreKind::Metadata,
                    operation: ops::ACQUIRE_LEASE,
                    rule_set_id: rule_set_id.clone(),
                    source,
                })?;
            if let Some(token) = granted {
                trace!(%rule_set_id, token, "Lease acquired");
                return Ok(Self {
                    metadata: Arc::clone(metadata),
                    retry: retry.clone(),
                    rule_set_id: rule_set_id.clone(),
                    token,
                    released: false,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(%rule_set_id, "Timed out waiting for lease");
                return Err(RotationError::ConcurrencyConflict {
                    rule_set_id: rule_set_id.clone(),
                    reason: format!("lease still held after {:?}", settings.acquire_timeout),
                });
            }
            tokio::time::sleep(settings.poll_interval.min(deadline - now)).await;
        }
    }

    pub fn token(&self) -> LeaseToken {
        self.token
    }

    /// Fails if the lease expired or was granted to someone else since.
    pub async fn ensure_live(&self) -> Result<(), RotationError> {
        let live = self
            .retry
            .run(ops::CHECK_LEASE, || {
                self.metadata.lease_is_live(&self.rule_set_id, self.token)
            })
            .await
            .map_err(|source| RotationError::StoreReadFailed {
                store: StoreKind::Metadata,
                rule_set_id: self.rule_set_id.clone(),
                source,
            })?;
        if live {
            Ok(())
        } else {
            Err(RotationError::ConcurrencyConflict {
                rule_set_id: self.rule_set_id.clone(),
                reason: format!("lease {} lapsed before write", self.token),
            })
        }
    }

    pub async fn release(mut self) {
        self.released = true;
        let result = self
            .retry
            .run(ops::RELEASE_LEASE, || {
                self.metadata.release_lease(&self.rule_set_id, self.token)
            })
            .await;
        if let Err(err) = result {
            warn!(rule_set_id = %self.rule_set_id, token = self.token, error = %err, "Lease not released, waiting out its TTL");
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let metadata = Arc::clone(&self.metadata);
        let rule_set_id = self.rule_set_id.clone();
        let token = self.token;
        runtime.spawn(async move {
            if let Err(err) = metadata.release_lease(&rule_set_id, token).await {
                warn!(%rule_set_id, token, error = %err, "Lease not released, waiting out its TTL");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grindvakt_core::fault::Fault;
    use grindvakt_core::StoreError;
    use grindvakt_metadata::MemoryMetadataStore;

    fn settings(ttl_ms: u64, timeout_ms: u64) -> LeaseSettings {
        LeaseSettings {
            ttl: Duration::from_millis(ttl_ms),
            acquire_timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn store() -> (Arc<MemoryMetadataStore>, Arc<dyn MetadataStore>) {
        let memory = Arc::new(MemoryMetadataStore::new());
        let shared: Arc<dyn MetadataStore> = memory.clone();
        (memory, shared)
    }

    async fn acquire(
        metadata: &Arc<dyn MetadataStore>,
        rule_set_id: &RuleSetId,
        settings: LeaseSettings,
    ) -> Result<LeaseGuard, RotationError> {
        LeaseGuard::acquire(metadata, rule_set_id, &settings, &RetryPolicy::default()).await
    }

    #[tokio::test]
    async fn exclusive_per_rule_set() {
        let (_, metadata) = store();
        let acl1 = RuleSetId::from("acl-1");
        let acl2 = RuleSetId::from("acl-2");

        let held = acquire(&metadata, &acl1, settings(10_000, 20)).await.unwrap();
        assert!(acquire(&metadata, &acl2, settings(10_000, 20)).await.is_ok());

        let blocked = acquire(&metadata, &acl1, settings(10_000, 20)).await;
        assert!(matches!(
            blocked,
            Err(RotationError::ConcurrencyConflict { .. })
        ));

        held.release().await;
        assert!(acquire(&metadata, &acl1, settings(10_000, 20)).await.is_ok());
    }

    #[tokio::test]
    async fn waiter_gets_lease_after_release() {
        let (_, metadata) = store();
        let acl = RuleSetId::from("acl-1");
        let held = acquire(&metadata, &acl, settings(10_000, 0)).await.unwrap();

        let waiter = {
            let metadata = Arc::clone(&metadata);
            let acl = acl.clone();
            tokio::spawn(async move {
                acquire(&metadata, &acl, settings(10_000, 1_000))
                    .await
                    .map(|g| g.token())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let first = held.token();
        held.release().await;

        let second = waiter.await.unwrap().unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn expired_lease_is_fenced() {
        let (_, metadata) = store();
        let acl = RuleSetId::from("acl-1");

        let stale = acquire(&metadata, &acl, settings(10, 0)).await.unwrap();
        assert!(stale.ensure_live().await.is_ok());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(stale.ensure_live().await.is_err());

        let fresh = acquire(&metadata, &acl, settings(10_000, 0)).await.unwrap();
        assert!(stale.ensure_live().await.is_err());

        // A stale guard must not release the new holder's lease.
        stale.release().await;
        assert!(fresh.ensure_live().await.is_ok());
    }

    #[tokio::test]
    async fn dropped_guard_is_released_in_background() {
        let (_, metadata) = store();
        let acl = RuleSetId::from("acl-1");

        let held = acquire(&metadata, &acl, settings(10_000, 0)).await.unwrap();
        drop(held);
        assert!(acquire(&metadata, &acl, settings(10_000, 500)).await.is_ok());
    }

    #[tokio::test]
    async fn store_failure_while_acquiring() {
        let (memory, metadata) = store();
        let acl = RuleSetId::from("acl-1");
        memory
            .faults()
            .fail_next(ops::ACQUIRE_LEASE, 1, Fault::Rejected);

        let err = acquire(&metadata, &acl, settings(10_000, 20))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RotationError::StoreWriteFailed {
                operation: ops::ACQUIRE_LEASE,
                source: StoreError::Rejected(_),
                ..
            }
        ));
    }
}
