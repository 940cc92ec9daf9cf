//! Scripted store failures for in-memory adapters.
//!
//! Tests queue faults per store operation; the adapter consumes one queued
//! fault on each call to that operation and behaves normally once the queue
//! is empty.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail with `StoreError::Transient`.
    Transient,
    /// Fail with `StoreError::Rejected`.
    Rejected,
    /// Stall for the given time, then serve the call.
    Delay(Duration),
    /// Serve the call, then hold the reply back for the given time.
    LateReply(Duration),
}

impl Fault {
    /// The error this fault produces, if it produces one.
    pub fn into_error(self, operation: &str) -> Option<StoreError> {
        match self {
            Fault::Transient => Some(StoreError::Transient(format!("injected fault in {operation}"))),
            Fault::Rejected => Some(StoreError::Rejected(format!("injected fault in {operation}"))),
            Fault::Delay(_) | Fault::LateReply(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FaultPlan {
    queued: Mutex<HashMap<&'static str, VecDeque<Fault>>>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `fault` for the next `times` calls of `operation`.
    pub fn fail_next(&self, operation: &'static str, times: usize, fault: Fault) {
        let mut queued = self.queued.lock();
        let queue = queued.entry(operation).or_default();
        queue.extend(std::iter::repeat(fault).take(times));
    }

    pub fn take(&self, operation: &str) -> Option<Fault> {
        self.queued.lock().get_mut(operation)?.pop_front()
    }

    pub fn clear(&self) {
        self.queued.lock().clear();
    }

    /// Applies the fault queued for `operation` ahead of serving it.
    ///
    /// Returns how long the reply must be held back once the call is served;
    /// pass it to [`FaultPlan::reply`].
    pub async fn before(&self, operation: &'static str) -> Result<Option<Duration>, StoreError> {
        match self.take(operation) {
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(None)
            }
            Some(Fault::LateReply(delay)) => Ok(Some(delay)),
            Some(fault) => Err(fault
                .into_error(operation)
                .unwrap_or_else(|| StoreError::Transient(operation.into()))),
            None => Ok(None),
        }
    }

    pub async fn reply<T>(late: Option<Duration>, value: T) -> T {
        if let Some(delay) = late {
            tokio::time::sleep(delay).await;
        }
        value
    }
}
