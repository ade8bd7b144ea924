// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine.

use serde::Serialize;

/// Connection state of the sync engine.
///
/// ```text
/// Disconnected ──► Connecting ──► Connected
///      ▲               │  │           │  │
///      │               │  └──► Error ◄┘  │
///      │               ▼        │        │
///      └───────────────┴────────┴────────┘
/// ```
///
/// Use [`super::SyncEngine::state()`] for the current value or
/// [`super::SyncEngine::state_receiver()`] to watch transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    /// No round in progress and the last one (if any) did not reach the server
    #[default]
    Disconnected,
    /// First round after a disconnect is in flight
    Connecting,
    /// The last round reached the server
    Connected,
    /// Unrecoverable protocol error (unauthorized, malformed response)
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// Gauge level: 0 disconnected, 1 connecting, 2 connected, 3 error.
    pub fn level(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Error => 3,
        }
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Error)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Error, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// What one [`super::SyncEngine::sync_once`] round did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Mutations the server accepted
    pub pushed: usize,
    /// Mutations the server rejected with a conflict
    pub conflicts: usize,
    /// Change-log entries received
    pub pulled: usize,
    /// Entries that changed a local row
    pub applied: usize,
    /// Entries at or below the cursor, or with nothing to change
    pub skipped: usize,
    /// Pull requests made this round
    pub pull_rounds: usize,
    /// Tables cleared and reloaded from the list endpoint
    pub resynced: Vec<String>,
}

impl SyncReport {
    /// Nothing was exchanged in either direction.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pushed == 0 && self.conflicts == 0 && self.pulled == 0 && self.resynced.is_empty()
    }
}
