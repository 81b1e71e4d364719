//! Retry policy for operations that must eventually succeed
//!
//! The connection handshake and the startup channel lookup both loop until
//! they succeed. The loop waits a fixed delay (plus optional jitter) between
//! attempts, aborts promptly on shutdown, and optionally gives up after a
//! configured number of attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TelemetryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub delay_secs: u64,
    pub jitter_ms: u64,
    /// Unset means retry forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_secs: 10,
            jitter_ms: 0,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub jitter: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            delay: Duration::from_secs(config.delay_secs),
            jitter: Duration::from_millis(config.jitter_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Wait before the next attempt
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(extra)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Runs `op` until it succeeds, the attempt bound is hit, or `cancel`
    /// fires. Cancellation also interrupts an attempt that is in flight.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, TelemetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TelemetryError>>,
    {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(TelemetryError::Cancelled);
            }
            attempts += 1;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(TelemetryError::Cancelled),
                outcome = op(attempts) => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        debug!("{} succeeded after {} attempts", operation, attempts);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };

            if self.exhausted(attempts) {
                return Err(TelemetryError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts,
                    last: Box::new(err),
                });
            }

            let delay = self.next_delay();
            warn!(
                "{} failed (attempt {}): {}. Retrying in {:?}",
                operation, attempts, err, delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(TelemetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
