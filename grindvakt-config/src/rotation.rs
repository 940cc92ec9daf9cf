//! Rule rotation parameters.
//!
//! Governs the managed slot window and the concurrency discipline around it:
//! - slot window (base rule number and capacity)
//! - per-rule-set lease timing
//! - store call timeouts and retry limits

use std::time::Duration;

use grindvakt_core::SlotRange;
use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::error::ConfigError;

/// Managed slot window inside each rule set.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct RotationConfig {
    /// First rule number handed out.
    #[validate(range(min = 1, max = 32766))]
    #[serde(default = "default_base_slot")]
    pub base_slot: u16,

    /// Number of deny entries kept per rule set.
    #[validate(range(min = 1, max = 1000))]
    #[serde(default = "default_capacity")]
    pub capacity: u16,
}

fn default_base_slot() -> u16 {
    SlotRange::DEFAULT_BASE
}

fn default_capacity() -> u16 {
    SlotRange::DEFAULT_CAPACITY
}

impl RotationConfig {
    pub fn slot_range(&self) -> Result<SlotRange, ConfigError> {
        Ok(SlotRange::new(self.base_slot, self.capacity)?)
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            base_slot: default_base_slot(),
            capacity: default_capacity(),
        }
    }
}

/// Per-rule-set lease timing.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct LeaseConfig {
    /// Lease lifetime; an unreleased lease expires after this long.
    #[validate(range(min = 100, max = 600_000))]
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// How long an invocation waits for a busy rule set.
    #[validate(range(min = 1, max = 600_000))]
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Delay between acquisition attempts.
    #[validate(range(min = 1, max = 10_000))]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_ttl_ms() -> u64 {
    30_000
}
fn default_acquire_timeout_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    50
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Store call timeouts and retry limits.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct RetryConfig {
    /// Attempts per store call, and per allocation after a lost race.
    #[validate(range(min = 1, max = 10))]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[validate(range(min = 1, max = 60_000))]
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[validate(range(min = 1, max = 300_000))]
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound of a single store call.
    #[validate(range(min = 10, max = 120_000))]
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    2_000
}
fn default_call_timeout_ms() -> u64 {
    5_000
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}
