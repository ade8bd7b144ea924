// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Crate-level error type.
//!
//! Each layer has its own error ([`StoreError`], [`QueryError`],
//! [`RemoteError`], [`CircuitError`]) and converts into [`MirrorError`]
//! with `?`. Recovery is decided by variant:
//!
//! | Variant        | Recovery                                              |
//! |----------------|-------------------------------------------------------|
//! | `Network`      | cache fallback, cache re-check, push retry            |
//! | `Conflict`     | surfaced to the caller, never auto-merged             |
//! | `PartialPush`  | whole chunk retried, then surfaced                    |
//! | `StoreClosed`  | degraded empty result, debug log only                 |
//! | `Validation`   | fatal for the call                                    |

use thiserror::Error;

use crate::query::QueryError;
use crate::remote::{MutationResult, RemoteError};
use crate::resilience::circuit_breaker::CircuitError;
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("{} mutation(s) rejected with conflicts", .conflicts.len())]
    Conflict { conflicts: Vec<MutationResult> },

    /// Push response did not acknowledge every mutation of the chunk
    #[error("Push acknowledged {acknowledged} of {sent} mutations")]
    PartialPush { acknowledged: usize, sent: usize },

    #[error("Local store is closed")]
    StoreClosed,

    #[error("Invalid query: {0}")]
    Validation(#[from] QueryError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl MirrorError {
    /// Transport failures and open circuits.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_store_closed(&self) -> bool {
        matches!(self, Self::StoreClosed)
    }

    /// Worth retrying a push chunk: transport failures, server-side 5xx and
    /// responses that left mutations unacknowledged.
    pub fn is_retryable_push(&self) -> bool {
        match self {
            Self::Network(_) | Self::PartialPush { .. } => true,
            Self::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Errors the sync loop cannot recover from by waiting.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Protocol(_))
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Conflict { .. } => "conflict",
            Self::PartialPush { .. } => "partial_push",
            Self::StoreClosed => "store_closed",
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::Protocol(_) => "protocol",
            Self::Remote { .. } => "remote",
            Self::Store(_) => "store",
        }
    }
}

impl From<StoreError> for MirrorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Closed => MirrorError::StoreClosed,
            other => MirrorError::Store(other),
        }
    }
}

impl From<RemoteError> for MirrorError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(msg) => MirrorError::Network(msg),
            RemoteError::Unauthorized(status) => {
                MirrorError::Unauthorized(format!("remote answered HTTP {}", status))
            }
            RemoteError::Status { status, body } => MirrorError::Remote {
                status,
                message: body,
            },
            RemoteError::Decode(msg) => MirrorError::Protocol(msg),
        }
    }
}

impl<E: Into<MirrorError>> From<CircuitError<E>> for MirrorError {
    fn from(err: CircuitError<E>) -> Self {
        match err {
            CircuitError::Rejected => {
                MirrorError::Network("circuit breaker open, remote call rejected".to_string())
            }
            CircuitError::Inner(e) => e.into(),
        }
    }
}
