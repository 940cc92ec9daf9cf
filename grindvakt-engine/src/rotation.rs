//! ## grindvakt-engine::rotation
//! **Capacity-bounded, deduplicated deny slots with FIFO eviction**
//!
//! One allocation, under the rule set's lease:
//! 1. read every record of the rule set
//! 2. return `AlreadyBlocked` if the host already holds a slot
//! 3. pick a slot: the base slot, the slot above the highest one, the lowest
//!    vacant slot once the ceiling is reached, or the slot of the oldest record
//! 4. evict the slot's holder (firewall entry first, then its record)
//! 5. install the deny entry, then write its record
//!
//! Metadata writes are conditional on the revision read in step 1, so a lost
//! race surfaces as `ConcurrencyConflict` and the allocation is re-run from a
//! fresh read. The re-run first brings the slot the failed attempt touched
//! back in line with the records, unless the failed attempt's record landed
//! after all.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{debug, error, info, instrument, warn};

use grindvakt_config::{ConfigError, GrindvaktConfig};
use grindvakt_core::store::ops;
use grindvakt_core::{
    Clock, DenyEntry, FirewallRuleStore, MetadataStore, Outcome, Revision, RotationError,
    RuleRecord, RuleSetId, RuleSetSnapshot, SlotRange, StoreError, StoreKind, SystemClock,
};
use grindvakt_telemetry::logging::events;
use grindvakt_telemetry::{EventLogger, MetricsRecorder};

use crate::audit::AuditReport;
use crate::lease::{LeaseGuard, LeaseSettings};
use crate::retry::RetryPolicy;

/// Where the next host goes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    slot: u16,
    evict: Option<RuleRecord>,
}

/// What an attempt that lost a race had started to write.
#[derive(Debug, Clone)]
struct Pending {
    slot: u16,
    created_at: i64,
    evicted: Option<RuleRecord>,
}

pub struct RuleRotationEngine {
    metadata: Arc<dyn MetadataStore>,
    firewall: Arc<dyn FirewallRuleStore>,
    clock: Arc<dyn Clock>,
    slots: SlotRange,
    lease_settings: LeaseSettings,
    retry: RetryPolicy,
    metrics: MetricsRecorder,
}

impl RuleRotationEngine {
    pub fn new(metadata: Arc<dyn MetadataStore>, firewall: Arc<dyn FirewallRuleStore>) -> Self {
        Self {
            metadata,
            firewall,
            clock: Arc::new(SystemClock),
            slots: SlotRange::default(),
            lease_settings: LeaseSettings::default(),
            retry: RetryPolicy::default(),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn from_config(
        config: &GrindvaktConfig,
        metadata: Arc<dyn MetadataStore>,
        firewall: Arc<dyn FirewallRuleStore>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(metadata, firewall)
            .with_slots(config.rotation.slot_range()?)
            .with_lease_settings(LeaseSettings::from(&config.lease))
            .with_retry(RetryPolicy::from(&config.retry)))
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_slots(mut self, slots: SlotRange) -> Self {
        self.slots = slots;
        self
    }

    #[must_use]
    pub fn with_lease_settings(mut self, settings: LeaseSettings) -> Self {
        self.lease_settings = settings;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn slots(&self) -> SlotRange {
        self.slots
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Gives `host` a deny slot in `rule_set_id`, evicting the oldest host
    /// when the slot window is full.
    #[instrument(level = "info", skip_all, fields(rule_set_id = %rule_set_id, host = %host))]
    pub async fn allocate(
        &self,
        rule_set_id: &RuleSetId,
        host: Ipv4Addr,
    ) -> Result<Outcome, RotationError> {
        let timer = self.metrics.allocation_latency.start_timer();
        let mut attempt = 1;
        let mut pending = None;
        let result = loop {
            match self.allocate_once(rule_set_id, host, &mut pending).await {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts() => {
                    self.metrics.conflicts.inc();
                    let pause = self.retry.backoff(attempt);
                    warn!(attempt, error = %err, ?pause, "Allocation lost a race, starting over");
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                result => break result,
            }
        };
        timer.observe_duration();

        match &result {
            Ok(outcome) => self.report(rule_set_id, host, outcome).await,
            Err(err) => {
                if err.is_retryable() {
                    self.metrics.conflicts.inc();
                }
                self.metrics.failures.inc();
                error!(attempts = attempt, kind = err.kind(), error = %err, "Allocation failed");
                EventLogger::log_event(
                    events::ROTATION_FAILED,
                    vec![
                        KeyValue::new("rule_set_id", rule_set_id.to_string()),
                        KeyValue::new("host", host.to_string()),
                        KeyValue::new("error", err.kind()),
                    ],
                )
                .await;
            }
        }
        result
    }

    async fn allocate_once(
        &self,
        rule_set_id: &RuleSetId,
        host: Ipv4Addr,
        pending: &mut Option<Pending>,
    ) -> Result<Outcome, RotationError> {
        let lease = self.acquire_lease(rule_set_id).await?;
        let result = self.allocate_leased(&lease, rule_set_id, host, pending).await;
        lease.release().await;
        result
    }

    async fn allocate_leased(
        &self,
        lease: &LeaseGuard,
        rule_set_id: &RuleSetId,
        host: Ipv4Addr,
        pending: &mut Option<Pending>,
    ) -> Result<Outcome, RotationError> {
        let snapshot = self.read_records(rule_set_id).await?;
        self.check_invariants(rule_set_id, &snapshot)?;

        if let Some(earlier) = pending.as_ref() {
            if snapshot.records.iter().any(|r| {
                r.created_at == earlier.created_at
                    && r.slot_number == earlier.slot
                    && r.remote_host == host
            }) {
                debug!(slot = earlier.slot, "Record of the earlier attempt landed");
                return Ok(Outcome::Blocked {
                    slot: earlier.slot,
                    evicted: earlier.evicted.clone(),
                });
            }
            self.reconcile_slot(lease, rule_set_id, &snapshot, earlier.slot)
                .await?;
            *pending = None;
        }

        if let Some(existing) = snapshot.find_host(host) {
            debug!(slot = existing.slot_number, "Host already holds a slot");
            return Ok(Outcome::AlreadyBlocked);
        }

        let placement = self.place(&snapshot);
        let created_at = snapshot
            .newest_created_at()
            .map_or(self.clock.now_secs(), |newest| {
                self.clock.now_secs().max(newest + 1)
            });
        *pending = Some(Pending {
            slot: placement.slot,
            created_at,
            evicted: placement.evict.clone(),
        });
        let mut revision = snapshot.revision;

        if let Some(victim) = &placement.evict {
            debug!(slot = victim.slot_number, evicted = %victim.remote_host, "Evicting oldest host");
            self.delete_entry(lease, rule_set_id, victim.slot_number)
                .await?;
            revision = self
                .delete_record(lease, rule_set_id, victim.created_at, revision)
                .await?;
        }

        self.create_entry(lease, rule_set_id, placement.slot, host)
            .await?;

        let record = RuleRecord::new(rule_set_id.clone(), created_at, host, placement.slot);
        self.put_record(lease, &record, revision).await?;

        Ok(Outcome::Blocked {
            slot: placement.slot,
            evicted: placement.evict,
        })
    }

    /// Makes the firewall entry at `slot` match the record holding it, or
    /// removes the entry when no record holds the slot.
    async fn reconcile_slot(
        &self,
        lease: &LeaseGuard,
        rule_set_id: &RuleSetId,
        snapshot: &RuleSetSnapshot,
        slot: u16,
    ) -> Result<(), RotationError> {
        match snapshot.records.iter().find(|r| r.slot_number == slot) {
            Some(holder) => {
                debug!(slot, host = %holder.remote_host, "Restoring entry of recorded host");
                self.create_entry(lease, rule_set_id, slot, holder.remote_host)
                    .await
            }
            None => {
                debug!(slot, "Clearing entry left by an earlier attempt");
                self.delete_entry(lease, rule_set_id, slot).await
            }
        }
    }

    /// Current records of a rule set, oldest first.
    pub async fn records(&self, rule_set_id: &RuleSetId) -> Result<Vec<RuleRecord>, RotationError> {
        Ok(self.read_records(rule_set_id).await?.records)
    }

    /// Compares the metadata table with the live firewall rule set.
    ///
    /// # Errors
    ///
    /// `CapacityInvariantViolated` when the records break the slot invariants
    /// or the two stores disagree inside the managed slot range.
    #[instrument(level = "info", skip_all, fields(rule_set_id = %rule_set_id))]
    pub async fn audit(&self, rule_set_id: &RuleSetId) -> Result<AuditReport, RotationError> {
        let lease = self.acquire_lease(rule_set_id).await?;
        let read = self.read_both(rule_set_id).await;
        lease.release().await;
        let (snapshot, entries) = read?;
        self.check_invariants(rule_set_id, &snapshot)?;

        let report = AuditReport::compare(rule_set_id, self.slots, &snapshot.records, &entries);
        if !report.is_consistent() {
            error!(drift = %report.describe_drift(), "Stores disagree");
            return Err(RotationError::CapacityInvariantViolated {
                rule_set_id: rule_set_id.clone(),
                detail: report.describe_drift(),
            });
        }
        info!(records = report.records, "Stores agree");
        Ok(report)
    }

    fn place(&self, snapshot: &RuleSetSnapshot) -> Placement {
        let fresh = |slot| Placement { slot, evict: None };

        let Some(highest) = snapshot.highest_slot() else {
            return fresh(self.slots.base());
        };
        if highest < self.slots.ceiling() {
            return fresh(highest + 1);
        }

        if snapshot.len() < self.slots.capacity() {
            let taken: HashSet<u16> = snapshot.records.iter().map(|r| r.slot_number).collect();
            if let Some(vacant) = self.slots.iter().find(|slot| !taken.contains(slot)) {
                return fresh(vacant);
            }
        }

        match snapshot.oldest() {
            Some(oldest) => Placement {
                slot: oldest.slot_number,
                evict: Some(oldest.clone()),
            },
            None => fresh(self.slots.base()),
        }
    }

    fn check_invariants(
        &self,
        rule_set_id: &RuleSetId,
        snapshot: &RuleSetSnapshot,
    ) -> Result<(), RotationError> {
        let violation = |detail: String| {
            error!(%rule_set_id, %detail, "Capacity invariant violated");
            Err(RotationError::CapacityInvariantViolated {
                rule_set_id: rule_set_id.clone(),
                detail,
            })
        };

        if snapshot.len() > self.slots.capacity() {
            return violation(format!(
                "{} records exceed capacity {}",
                snapshot.len(),
                self.slots.capacity()
            ));
        }

        let mut slots = HashSet::new();
        let mut hosts = HashSet::new();
        for record in &snapshot.records {
            if !self.slots.contains(record.slot_number) {
                return violation(format!(
                    "slot {} is outside {}..={}",
                    record.slot_number,
                    self.slots.base(),
                    self.slots.ceiling()
                ));
            }
            if !slots.insert(record.slot_number) {
                return violation(format!("slot {} is recorded twice", record.slot_number));
            }
            if !hosts.insert(record.remote_host) {
                return violation(format!("host {} is recorded twice", record.remote_host));
            }
        }
        Ok(())
    }

    async fn report(&self, rule_set_id: &RuleSetId, host: Ipv4Addr, outcome: &Outcome) {
        match outcome {
            Outcome::AlreadyBlocked => {
                self.metrics.already_blocked.inc();
                info!("Host already blocked");
                EventLogger::log_event(
                    events::HOST_ALREADY_BLOCKED,
                    vec![
                        KeyValue::new("rule_set_id", rule_set_id.to_string()),
                        KeyValue::new("host", host.to_string()),
                    ],
                )
                .await;
            }
            Outcome::Blocked { slot, evicted } => {
                self.metrics.blocks.inc();
                if let Some(evicted) = evicted {
                    self.metrics.evictions.inc();
                    info!(slot, evicted = %evicted.remote_host, "Host evicted");
                    EventLogger::log_event(
                        events::HOST_EVICTED,
                        vec![
                            KeyValue::new("rule_set_id", rule_set_id.to_string()),
                            KeyValue::new("host", evicted.remote_host.to_string()),
                            KeyValue::new("slot", i64::from(*slot)),
                            KeyValue::new("created_at", evicted.created_at),
                        ],
                    )
                    .await;
                }
                info!(slot, "Host blocked");
                EventLogger::log_event(
                    events::HOST_BLOCKED,
                    vec![
                        KeyValue::new("rule_set_id", rule_set_id.to_string()),
                        KeyValue::new("host", host.to_string()),
                        KeyValue::new("slot", i64::from(*slot)),
                    ],
                )
                .await;
            }
        }
    }

    async fn acquire_lease(&self, rule_set_id: &RuleSetId) -> Result<LeaseGuard, RotationError> {
        LeaseGuard::acquire(&self.metadata, rule_set_id, &self.lease_settings, &self.retry).await
    }

    async fn read_both(
        &self,
        rule_set_id: &RuleSetId,
    ) -> Result<(RuleSetSnapshot, Vec<DenyEntry>), RotationError> {
        let snapshot = self.read_records(rule_set_id).await?;
        let entries = self
            .retry
            .run(ops::LIST_ENTRIES, || self.firewall.list_entries(rule_set_id))
            .await
            .map_err(|source| RotationError::StoreReadFailed {
                store: StoreKind::Firewall,
                rule_set_id: rule_set_id.clone(),
                source,
            })?;
        Ok((snapshot, entries))
    }

    async fn read_records(&self, rule_set_id: &RuleSetId) -> Result<RuleSetSnapshot, RotationError> {
        self.retry
            .run(ops::LIST_BY_RULE_SET, || {
                self.metadata.list_by_rule_set(rule_set_id)
            })
            .await
            .map_err(|source| RotationError::StoreReadFailed {
                store: StoreKind::Metadata,
                rule_set_id: rule_set_id.clone(),
                source,
            })
    }

    async fn delete_entry(
        &self,
        lease: &LeaseGuard,
        rule_set_id: &RuleSetId,
        slot: u16,
    ) -> Result<(), RotationError> {
        lease.ensure_live().await?;
        self.retry
            .run(ops::DELETE_ENTRY, || self.firewall.delete_entry(rule_set_id, slot))
            .await
            .map_err(|source| firewall_write_failed(ops::DELETE_ENTRY, rule_set_id, source))
    }

    async fn create_entry(
        &self,
        lease: &LeaseGuard,
        rule_set_id: &RuleSetId,
        slot: u16,
        host: Ipv4Addr,
    ) -> Result<(), RotationError> {
        lease.ensure_live().await?;
        self.retry
            .run(ops::CREATE_DENY_ENTRY, || {
                self.firewall.create_deny_entry(rule_set_id, slot, host)
            })
            .await
            .map_err(|source| firewall_write_failed(ops::CREATE_DENY_ENTRY, rule_set_id, source))
    }

    async fn delete_record(
        &self,
        lease: &LeaseGuard,
        rule_set_id: &RuleSetId,
        created_at: i64,
        expected: Revision,
    ) -> Result<Revision, RotationError> {
        lease.ensure_live().await?;
        self.retry
            .run(ops::DELETE_BY_KEY, || {
                self.metadata.delete_by_key(rule_set_id, created_at, expected)
            })
            .await
            .map_err(|source| metadata_write_failed(ops::DELETE_BY_KEY, rule_set_id, source))
    }

    async fn put_record(
        &self,
        lease: &LeaseGuard,
        record: &RuleRecord,
        expected: Revision,
    ) -> Result<Revision, RotationError> {
        lease.ensure_live().await?;
        self.retry
            .run(ops::PUT, || self.metadata.put(record, expected))
            .await
            .map_err(|source| metadata_write_failed(ops::PUT, &record.rule_set_id, source))
    }
}

fn firewall_write_failed(
    operation: &'static str,
    rule_set_id: &RuleSetId,
    source: StoreError,
) -> RotationError {
    RotationError::StoreWriteFailed {
        store: StoreKind::Firewall,
        operation,
        rule_set_id: rule_set_id.clone(),
        source,
    }
}

fn metadata_write_failed(
    operation: &'static str,
    rule_set_id: &RuleSetId,
    source: StoreError,
) -> RotationError {
    match source {
        StoreError::Conflict { .. } => RotationError::ConcurrencyConflict {
            rule_set_id: rule_set_id.clone(),
            reason: format!("{operation}: {source}"),
        },
        source => RotationError::StoreWriteFailed {
            store: StoreKind::Metadata,
            operation,
            rule_set_id: rule_set_id.clone(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grindvakt_core::ManualClock;
    use grindvakt_metadata::MemoryMetadataStore;
    use grindvakt_prevention::firewall::MemoryFirewall;
    use tracing_test::traced_test;

    fn engine(records: &[(i64, [u8; 4], u16)]) -> RuleRotationEngine {
        let metadata = MemoryMetadataStore::new();
        for &(created_at, host, slot) in records {
            metadata.seed(RuleRecord::new(
                RuleSetId::from("acl-1"),
                created_at,
                Ipv4Addr::from(host),
                slot,
            ));
        }
        RuleRotationEngine::new(Arc::new(metadata), Arc::new(MemoryFirewall::new()))
            .with_clock(Arc::new(ManualClock::new(1_000)))
    }

    fn snapshot(records: &[(i64, u16)]) -> RuleSetSnapshot {
        RuleSetSnapshot {
            records: records
                .iter()
                .map(|&(created_at, slot)| {
                    RuleRecord::new(
                        RuleSetId::from("acl-1"),
                        created_at,
                        Ipv4Addr::new(10, 0, 0, slot as u8),
                        slot,
                    )
                })
                .collect(),
            revision: 1,
        }
    }

    #[test]
    fn placement_rules() {
        let engine = engine(&[]);

        assert_eq!(engine.place(&snapshot(&[])).slot, 71);
        assert_eq!(engine.place(&snapshot(&[(1, 71), (2, 74)])).slot, 75);

        let full: Vec<_> = (71..=80).map(|slot| (i64::from(100 - slot), slot)).collect();
        let placement = engine.place(&snapshot(&full));
        assert_eq!(placement.slot, 80);
        assert_eq!(placement.evict.map(|r| r.created_at), Some(20));

        let gap: Vec<_> = (71..=80)
            .filter(|&slot| slot != 73)
            .map(|slot| (i64::from(slot), slot))
            .collect();
        assert_eq!(
            engine.place(&snapshot(&gap)),
            Placement {
                slot: 73,
                evict: None
            }
        );
    }

    #[tokio::test]
    async fn rejects_corrupt_record_sets() {
        let acl = RuleSetId::from("acl-1");
        let outside = engine(&[(1, [1, 1, 1, 1], 90)]);
        assert!(matches!(
            outside.allocate(&acl, Ipv4Addr::new(9, 9, 9, 9)).await,
            Err(RotationError::CapacityInvariantViolated { .. })
        ));

        let twice = engine(&[(1, [1, 1, 1, 1], 71), (2, [2, 2, 2, 2], 71)]);
        assert!(matches!(
            twice.allocate(&acl, Ipv4Addr::new(9, 9, 9, 9)).await,
            Err(RotationError::CapacityInvariantViolated { .. })
        ));
        assert_eq!(twice.metrics().failures.get() as u64, 1);
    }

    #[tokio::test]
    async fn created_at_stays_unique_within_a_second() {
        let engine = engine(&[]);
        let acl = RuleSetId::from("acl-1");
        for last in 1..=3u8 {
            engine
                .allocate(&acl, Ipv4Addr::new(10, 0, 0, last))
                .await
                .unwrap();
        }
        let stamps: Vec<_> = engine
            .records(&acl)
            .await
            .unwrap()
            .iter()
            .map(|r| r.created_at)
            .collect();
        assert_eq!(stamps, vec![1_000, 1_001, 1_002]);
    }

    #[tokio::test]
    #[traced_test]
    async fn logs_blocks_and_evictions() {
        let records: Vec<_> = (71..=80u16)
            .map(|slot| (i64::from(slot), [10, 0, 0, slot as u8], slot))
            .collect();
        let engine = engine(&records);
        let acl = RuleSetId::from("acl-1");

        engine
            .allocate(&acl, Ipv4Addr::new(9, 9, 9, 9))
            .await
            .unwrap();
        assert!(logs_contain("Host evicted"));
        assert!(logs_contain("10.0.0.71"));
        assert!(logs_contain("Host blocked"));

        engine
            .allocate(&acl, Ipv4Addr::new(9, 9, 9, 9))
            .await
            .unwrap();
        assert!(logs_contain("Host already blocked"));
        assert_eq!(engine.metrics().evictions.get() as u64, 1);
        assert_eq!(engine.metrics().already_blocked.get() as u64, 1);
    }
}
