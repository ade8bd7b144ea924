// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backoff and circuit breaking for remote calls and store startup.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
pub use retry::{retry, retry_if, RetryConfig};
