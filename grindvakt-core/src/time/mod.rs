//! ## grindvakt-core::time
//! Wall-clock access for rule records.
//!
//! Record timestamps are whole seconds since the Unix epoch. Tests drive a
//! `ManualClock` so eviction order does not depend on real time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Milliseconds since the Unix epoch; lease expiry is kept at this precision.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    secs: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            secs: Arc::new(AtomicI64::new(start)),
        }
    }

    #[inline]
    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::Release);
    }

    #[inline]
    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::Release);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_secs(&self) -> i64 {
        self.secs.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_secs(), 100);
        clock.advance(5);
        assert_eq!(clock.now_secs(), 105);
        clock.set(7);
        assert_eq!(clock.now_secs(), 7);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_secs() > 1_577_836_800);
        assert!(SystemClock::now_millis() / 1_000 >= SystemClock.now_secs() - 1);
    }
}
