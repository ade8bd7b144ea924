// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-log sync between the local mirror and the remote database.
//!
//! One round ([`SyncEngine::sync_once`]) pushes the outbox, then pulls the
//! change log from each table's cursor:
//!
//! ```text
//!   outbox ──chunks──► POST /sync/push ──► accepted / conflict ──► outbox trimmed
//!
//!   cursors ─────────► POST /sync/pull ──► changes (ascending sequence)
//!                                 │            │
//!                                 │            ├─ seq <= cursor : skipped
//!                                 │            ├─ create/update : row-version upsert
//!                                 │            └─ delete        : row retired
//!                                 │
//!                                 └─ resyncRequired ──► clear + reload table,
//!                                                       cursor = head sequence
//! ```
//!
//! Cursors advance only after a whole batch is applied and never move
//! backwards. [`SyncEngine::run`] repeats rounds on an interval and on
//! [`SyncEngine::trigger`] until shutdown.
//!
//! # Example
//!
//! ```rust,no_run
//! use mirror_sync::lifecycle::StoreProvider;
//! use mirror_sync::remote::HttpRemote;
//! use mirror_sync::storage::{StoreSchema, TableSchema};
//! use mirror_sync::sync::SyncEngine;
//! use mirror_sync::MirrorConfig;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MirrorConfig::default();
//! let schema = StoreSchema::new().table(TableSchema::new("orders"));
//! let provider = Arc::new(StoreProvider::from_config(&config, schema));
//! let remote = Arc::new(HttpRemote::from_config(&config)?);
//!
//! let (_config_tx, config_rx) = watch::channel(config);
//! let engine = SyncEngine::new(provider, remote, config_rx);
//! engine.attach();
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let runner = engine.clone();
//! let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });
//!
//! engine.trigger();
//! let _ = shutdown_tx.send(true);
//! handle.await?;
//! # Ok(())
//! # }
//! ```

mod maintenance;
mod pull;
mod push;
mod run;
mod types;

pub use types::{ConnectionState, SyncReport};

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::error::MirrorError;
use crate::lifecycle::{StoreEvent, StoreProvider};
use crate::metrics;
use crate::remote::RemoteApi;
use crate::storage::LocalStore;

/// Background sync between the local store and the remote change log.
pub struct SyncEngine {
    pub(super) provider: Arc<StoreProvider>,
    pub(super) remote: Arc<dyn RemoteApi>,

    /// Current configuration, replaced when `config_rx` changes
    pub(super) config: RwLock<MirrorConfig>,
    pub(super) config_rx: Mutex<watch::Receiver<MirrorConfig>>,

    pub(super) state: watch::Sender<ConnectionState>,
    pub(super) state_rx: watch::Receiver<ConnectionState>,

    /// Wakes the run loop outside the interval
    pub(super) wake: Notify,
    /// Serializes rounds between the run loop and direct callers
    pub(super) round: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        provider: Arc<StoreProvider>,
        remote: Arc<dyn RemoteApi>,
        config_rx: watch::Receiver<MirrorConfig>,
    ) -> Arc<Self> {
        let config = config_rx.borrow().clone();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            provider,
            remote,
            config: RwLock::new(config),
            config_rx: Mutex::new(config_rx),
            state: state_tx,
            state_rx,
            wake: Notify::new(),
            round: Mutex::new(()),
        })
    }

    /// Register with the store provider so every newly opened store
    /// triggers a round.
    pub fn attach(self: &Arc<Self>) {
        let engine = Arc::downgrade(self);
        self.provider.on_event(move |event| {
            if let (StoreEvent::Opened { generation }, Some(engine)) = (event, engine.upgrade()) {
                debug!(generation, "Store opened, scheduling sync");
                engine.trigger();
            }
        });
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Snapshot of the active configuration.
    #[must_use]
    pub fn config(&self) -> MirrorConfig {
        self.config.read().clone()
    }

    /// Ask the run loop for a round as soon as possible.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Push the outbox, then pull the change log.
    ///
    /// A push conflict does not stop the pull; the conflicts are returned
    /// as [`MirrorError::Conflict`] once the pull is done, even when the
    /// pull itself fails. The connection state then follows the pull error.
    #[tracing::instrument(skip(self), fields(state))]
    pub async fn sync_once(&self) -> Result<SyncReport, MirrorError> {
        let _round = self.round.lock().await;
        let started = Instant::now();
        let config = self.config();

        self.begin_round();
        let mut report = SyncReport::default();
        let mut pull_failure = None;
        let result = self.exchange(&config, &mut report, &mut pull_failure).await;

        // A pull that failed behind a conflict still decides the connection
        let next = match pull_failure.as_ref().or(result.as_ref().err()) {
            None | Some(MirrorError::Conflict { .. }) => ConnectionState::Connected,
            Some(e) if e.is_unrecoverable() => ConnectionState::Error,
            Some(_) => ConnectionState::Disconnected,
        };
        if let Some(e) = &pull_failure {
            metrics::record_error("sync_pull", e.kind());
        }
        self.transition(next);
        tracing::Span::current().record("state", next.as_str());

        let status = match &result {
            Ok(()) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_sync_round(status, started.elapsed());

        match result {
            Ok(()) => {
                debug!(
                    pushed = report.pushed,
                    applied = report.applied,
                    skipped = report.skipped,
                    "Sync round complete"
                );
                Ok(report)
            }
            Err(e) => {
                metrics::record_error("sync_round", e.kind());
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        config: &MirrorConfig,
        report: &mut SyncReport,
        pull_failure: &mut Option<MirrorError>,
    ) -> Result<(), MirrorError> {
        let store = self.provider.get().await?;
        let tables = self.tables(store.as_ref(), config);

        match self.push(store.as_ref(), config, report).await {
            Ok(()) => {}
            Err(MirrorError::Conflict { conflicts }) => {
                // Conflicted mutations already left the outbox; they must reach the caller
                if let Err(e) = self.pull(store.as_ref(), config, &tables, report).await {
                    warn!(error = %e, conflicts = conflicts.len(), "Pull failed after push conflicts");
                    *pull_failure = Some(e);
                }
                return Err(MirrorError::Conflict { conflicts });
            }
            Err(e) => return Err(e),
        }
        self.pull(store.as_ref(), config, &tables, report).await
    }

    /// Subscribed tables that the store declares. An empty subscription
    /// means every declared table.
    pub(super) fn tables(&self, store: &dyn LocalStore, config: &MirrorConfig) -> Vec<String> {
        let declared: Vec<String> = store.schema().tables().map(|t| t.name.clone()).collect();
        if config.subscribed_tables.is_empty() {
            return declared;
        }
        config
            .subscribed_tables
            .iter()
            .filter(|table| {
                let known = declared.contains(table);
                if !known {
                    warn!(table = %table, "Subscribed table is not declared in the store schema");
                }
                known
            })
            .cloned()
            .collect()
    }

    /// Error leads back through Disconnected; Disconnected leads to Connecting.
    fn begin_round(&self) {
        if self.state() == ConnectionState::Error {
            self.transition(ConnectionState::Disconnected);
        }
        if self.state() == ConnectionState::Disconnected {
            self.transition(ConnectionState::Connecting);
        }
    }

    /// Move to `next` if the state machine allows it. Returns whether the
    /// state changed.
    pub(super) fn transition(&self, next: ConnectionState) -> bool {
        let mut previous = None;
        let changed = self.state.send_if_modified(|current| {
            if *current == next || !current.can_transition_to(next) {
                return false;
            }
            previous = Some(*current);
            *current = next;
            true
        });

        if let Some(previous) = previous {
            metrics::set_connection_state(next.as_str(), next.level());
            match next {
                ConnectionState::Error => warn!(from = %previous, "Sync connection entered error state"),
                ConnectionState::Connected if previous == ConnectionState::Connecting => {
                    info!("Sync connected")
                }
                _ => debug!(from = %previous, to = %next, "Sync connection state changed"),
            }
        } else if self.state() != next {
            debug!(from = %self.state(), to = %next, "Ignoring invalid connection state transition");
        }
        changed
    }
}
