// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker around remote calls, using the recloser crate.
//!
//! When the remote API keeps failing, the breaker opens and calls fail
//! fast with [`CircuitError::Rejected`]. The cache service treats a
//! rejection exactly like a network failure and falls back to the mirror.
//!
//! ```text
//! Closed ──(failure rate over window)──► Open ──(open_wait)──► HalfOpen
//!   ▲                                                            │
//!   └──────────────(half_open_len successes)─────────────────────┘
//! ```

use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The breaker is open and the call was not attempted
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> From<RecloserError<E>> for CircuitError<E> {
    fn from(err: RecloserError<E>) -> Self {
        match err {
            RecloserError::Rejected => CircuitError::Rejected,
            RecloserError::Inner(e) => CircuitError::Inner(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Failure rate (0.0 - 1.0) over a full window that trips the breaker
    pub failure_rate: f32,
    /// Number of calls in the closed-state window
    pub window: usize,
    /// Trial calls allowed while half-open
    pub half_open_calls: usize,
    /// How long to stay open before trying again
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.5,
            window: 10,
            half_open_calls: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Trips quickly and recovers quickly
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_rate: 0.5,
            window: 2,
            half_open_calls: 1,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

/// A named circuit breaker with call counters.
pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(config.failure_rate)
            .closed_len(config.window.max(1))
            .half_open_len(config.half_open_calls.max(1))
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the future produced by `f` through the breaker. Every error
    /// counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_if(|_: &E| true, f).await
    }

    /// Like [`call`](Self::call), but only errors accepted by `trips` count
    /// toward opening the breaker. The rest are returned without moving
    /// the failure rate, so a 401 or a malformed body never opens it.
    pub async fn call_if<P, F, Fut, T, E>(&self, trips: P, f: F) -> Result<T, CircuitError<E>>
    where
        P: Fn(&E) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        match self.inner.call_with(|e: &E| trips(e), f()).await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_circuit_breaker_call(&self.name, "success");
                Ok(result)
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit open, remote call rejected");
                crate::metrics::record_circuit_breaker_call(&self.name, "rejected");
                Err(CircuitError::Rejected)
            }
            Err(RecloserError::Inner(e)) if trips(&e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Remote call failed");
                crate::metrics::record_circuit_breaker_call(&self.name, "failure");
                Err(CircuitError::Inner(e))
            }
            Err(RecloserError::Inner(e)) => {
                crate::metrics::record_circuit_breaker_call(&self.name, "ignored");
                Err(CircuitError::Inner(e))
            }
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Counted failures over all calls (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_passes_successful_calls() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());

        let result: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.successes(), 1);
        assert_eq!(cb.failures(), 0);
    }

    #[tokio::test]
    async fn test_circuit_tracks_failures() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());

        let result: Result<i32, CircuitError<&str>> = cb.call(|| async { Err("boom") }).await;

        assert!(matches!(result, Err(CircuitError::Inner("boom"))));
        assert_eq!(cb.failures(), 1);
    }

    #[tokio::test]
    async fn test_circuit_rejects_once_open() {
        let config = CircuitConfig {
            failure_rate: 0.5,
            window: 2,
            half_open_calls: 1,
            recovery_timeout: Duration::from_secs(60),
        };
        let cb = CircuitBreaker::new("test", config);

        for _ in 0..3 {
            let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Err("fail") }).await;
        }
        let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(42) }).await;

        // Exact trip point is up to recloser's ring buffer
        assert!(cb.rejections() >= 1);
    }

    #[tokio::test]
    async fn test_failure_rate_calculation() {
        let config = CircuitConfig {
            failure_rate: 1.0,
            window: 100,
            half_open_calls: 1,
            recovery_timeout: Duration::from_secs(60),
        };
        let cb = CircuitBreaker::new("test", config);

        let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(1) }).await;
        let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Err("x") }).await;
        let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(2) }).await;
        let _: Result<i32, CircuitError<&str>> = cb.call(|| async { Err("y") }).await;

        assert_eq!(cb.calls_total(), 4);
        assert!((cb.failure_rate() - 0.5).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_non_tripping_errors_keep_the_circuit_closed() {
        let config = CircuitConfig {
            failure_rate: 0.5,
            window: 2,
            half_open_calls: 1,
            recovery_timeout: Duration::from_secs(60),
        };
        let cb = CircuitBreaker::new("remote_api", config);
        let is_transient = |e: &&str| *e == "timeout";

        for _ in 0..5 {
            let result: Result<i32, CircuitError<&str>> =
                cb.call_if(is_transient, || async { Err("unauthorized") }).await;
            assert!(matches!(result, Err(CircuitError::Inner("unauthorized"))));
        }
        assert_eq!(cb.rejections(), 0);
        assert_eq!(cb.failures(), 0);

        let result: Result<i32, CircuitError<&str>> = cb.call_if(is_transient, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
