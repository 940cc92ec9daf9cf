//! Bounded retries for store calls.
//!
//! Every call runs under `call_timeout`. Transient failures and timeouts are
//! retried with exponential backoff and jitter until `max_attempts` calls have
//! been made; any other failure is returned at once.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use grindvakt_config::RetryConfig;
use grindvakt_core::StoreError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: bool,
    call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Duration::from_millis(100),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.initial_backoff(),
            config.max_backoff(),
            config.call_timeout(),
        )
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            multiplier: 2.0,
            jitter: true,
            call_timeout,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Pause before attempt `attempt + 1`; `attempt` counts from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let scaled = if self.jitter {
            capped * rand::rng().random_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(scaled)
    }

    /// Runs `call` until it succeeds, fails permanently or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.call_timeout)),
            };
            match result {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let pause = self.backoff(attempt);
                    warn!(operation, attempt, error = %err, ?pause, "Store call failed, retrying");
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
