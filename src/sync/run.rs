// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background loop: interval ticks, explicit triggers, config updates.

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ConnectionState, SyncEngine};
use crate::error::MirrorError;

fn ticker(period: std::time::Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl SyncEngine {
    /// Run sync rounds until `shutdown` turns true or its sender is dropped.
    ///
    /// Rounds start on every `sync_interval` tick and on every
    /// [`trigger`](Self::trigger). Round failures are logged, never returned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut config_rx = self.config_rx.lock().await;
        let mut period = self.config().sync_interval();
        let mut interval = ticker(period);

        info!(interval = ?period, "Sync loop started");
        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                Ok(()) = config_rx.changed() => {
                    let new_config = config_rx.borrow_and_update().clone();
                    if new_config.sync_interval() != period {
                        period = new_config.sync_interval();
                        interval = ticker(period);
                    }
                    info!(interval = ?period, tables = new_config.subscribed_tables.len(), "Sync config updated");
                    *self.config.write() = new_config;
                }

                _ = self.wake.notified() => {
                    self.background_round("trigger").await;
                }

                _ = interval.tick() => {
                    self.background_round("interval").await;
                }
            }
        }

        self.transition(ConnectionState::Disconnected);
        info!("Sync loop stopped");
    }

    async fn background_round(&self, reason: &'static str) {
        match self.sync_once().await {
            Ok(report) if report.is_idle() => debug!(reason, "Sync round idle"),
            Ok(report) => info!(
                reason,
                pushed = report.pushed,
                applied = report.applied,
                resynced = report.resynced.len(),
                "Sync round complete"
            ),
            Err(MirrorError::StoreClosed) => debug!(reason, "Store closed during sync round"),
            Err(e) if e.is_network() => debug!(reason, error = %e, "Sync round offline"),
            Err(e) => warn!(reason, error = %e, "Sync round failed"),
        }
    }
}
