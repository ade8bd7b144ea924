// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential backoff.
//!
//! Two callers use it: opening the SQLite store and pushing outbox chunks.
//! Neither retries forever; the sync loop's next tick is the outer retry.
//!
//! ```
//! use mirror_sync::RetryConfig;
//!
//! let push = RetryConfig::push(4);
//! assert_eq!(push.max_attempts, 4);
//! // Waits between attempts 1-2, 2-3, 3-4
//! assert_eq!(push.schedule().len(), 3);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::metrics;

/// Backoff policy. `max_attempts` includes the first try.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::push(3)
    }
}

impl RetryConfig {
    /// Store open and schema creation: 5 attempts, about 3s worst case.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// One outbox chunk, resent whole on every attempt.
    #[must_use]
    pub fn push(attempts: usize) -> Self {
        Self {
            max_attempts: attempts.max(1),
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }

    /// Every wait this policy can make, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.max_attempts.saturating_sub(1));
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..self.max_attempts {
            delays.push(delay);
            delay = self.next_delay(delay);
        }
        delays
    }
}

/// Retry `operation` on any error until it succeeds or attempts run out.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, |_| true, operation).await
}

/// Retry `operation` while `is_retryable` accepts the error.
///
/// The first refused error, or the error of the last attempt, is returned
/// as is.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut waits = config.schedule().into_iter();
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(err);
        }
        let Some(wait) = waits.next() else {
            warn!(operation = operation_name, attempts = attempt, error = %err, "Giving up");
            return Err(err);
        };

        warn!(
            operation = operation_name,
            attempt,
            max_attempts = config.max_attempts,
            error = %err,
            next_delay = ?wait,
            "Attempt failed, retrying"
        );
        metrics::record_retry(operation_name);
        sleep(wait).await;
        attempt += 1;
    }
}
