#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use grindvakt_core::{ManualClock, RuleRecord, RuleSetId};
use grindvakt_engine::{LeaseSettings, RetryPolicy, RuleRotationEngine};
use grindvakt_metadata::MemoryMetadataStore;
use grindvakt_prevention::firewall::MemoryFirewall;

pub const START: i64 = 1_700_000_000;

pub struct Harness {
    pub metadata: Arc<MemoryMetadataStore>,
    pub firewall: Arc<MemoryFirewall>,
    pub clock: ManualClock,
    pub engine: Arc<RuleRotationEngine>,
}

pub fn acl() -> RuleSetId {
    RuleSetId::from("acl-0f1e")
}

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(5),
        Duration::from_millis(200),
    )
}

pub fn quick_lease() -> LeaseSettings {
    LeaseSettings {
        ttl: Duration::from_secs(5),
        acquire_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(2),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|engine| engine)
    }

    pub fn with(configure: impl FnOnce(RuleRotationEngine) -> RuleRotationEngine) -> Self {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let firewall = Arc::new(MemoryFirewall::new());
        let clock = ManualClock::new(START);
        let engine = RuleRotationEngine::new(metadata.clone(), firewall.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_retry(quick_retry())
            .with_lease_settings(quick_lease());
        Self {
            metadata,
            firewall,
            clock,
            engine: Arc::new(configure(engine)),
        }
    }

    /// Fills slots 71..=80 with hosts 10.0.0.1..=10.0.0.10, oldest at 71.
    pub async fn fill(&self) {
        for i in 1..=10u8 {
            self.engine
                .allocate(&acl(), Ipv4Addr::new(10, 0, 0, i))
                .await
                .unwrap();
            self.clock.advance(1);
        }
    }

    pub fn records(&self) -> Vec<RuleRecord> {
        self.metadata.snapshot(&acl()).records
    }

    pub fn slot_of(&self, host: Ipv4Addr) -> Option<u16> {
        self.records()
            .iter()
            .find(|r| r.remote_host == host)
            .map(|r| r.slot_number)
    }
}
