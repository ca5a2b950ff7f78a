//! Bounded exponential backoff.

use crate::error::Result;
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry ceiling and backoff curve for one kind of operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Randomize each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: initial_backoff.as_millis() as u64,
            max_backoff_ms: max_backoff.as_millis() as u64,
            ..Self::default()
        }
    }

    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64) as u64;
        if self.jitter && capped > 1 {
            Duration::from_millis(rand::thread_rng().gen_range(capped / 2..=capped))
        } else {
            Duration::from_millis(capped)
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempt ceiling is reached. The last error is returned.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts() => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
