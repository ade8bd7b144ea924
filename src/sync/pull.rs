// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-log pull, idempotent apply and full resync.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::{SyncEngine, SyncReport};
use crate::cache::repopulate;
use crate::config::MirrorConfig;
use crate::error::MirrorError;
use crate::metrics;
use crate::query::RemoteParams;
use crate::record::{now_millis, ChangeLogEntry, ChangeOp, ClientSyncState};
use crate::remote::{PullRequest, TableCursor};
use crate::storage::{LocalStore, ReadMode};

/// Per-table tallies for one pull request.
#[derive(Default)]
struct TableBatch {
    applied: usize,
    skipped: usize,
    highest: u64,
}

impl SyncEngine {
    /// Pull from every table cursor until the server has nothing more, or
    /// `max_pull_rounds` requests were made.
    pub(super) async fn pull(
        &self,
        store: &dyn LocalStore,
        config: &MirrorConfig,
        tables: &[String],
        report: &mut SyncReport,
    ) -> Result<(), MirrorError> {
        if tables.is_empty() {
            return Ok(());
        }

        let mut states = BTreeMap::new();
        for table in tables {
            let mut state = store
                .sync_state(&config.client_id, table)
                .await?
                .unwrap_or_else(|| ClientSyncState::new(&config.client_id, table));
            state.pending_changes = store.staged_count(Some(table)).await?;
            states.insert(table.clone(), state);
        }

        let max_rounds = config.max_pull_rounds.max(1);
        for round in 1..=max_rounds {
            let request = PullRequest {
                client_id: config.client_id.clone(),
                tables: states
                    .values()
                    .map(|s| TableCursor {
                        table: s.table.clone(),
                        last_sequence: s.last_sequence,
                    })
                    .collect(),
                limit: config.pull_limit.max(1),
            };
            let response = self.remote.pull_changes(&request).await?;
            report.pull_rounds += 1;
            report.pulled += response.changes.len();

            for table in &response.resync_required {
                let Some(state) = states.get_mut(table) else {
                    warn!(table = %table, "Server asked to resync a table this client does not hold");
                    continue;
                };
                // Without a head the cursor could not move and every pull would resync again
                let Some(head) = response.head_sequences.get(table).copied() else {
                    return Err(MirrorError::Protocol(format!(
                        "resync of '{}' requested without a head sequence",
                        table
                    )));
                };
                self.resync_table(store, config, state, head).await?;
                report.resynced.push(table.clone());
            }

            let mut changes = response.changes;
            changes.sort_by_key(|entry| entry.sequence);

            let mut batches: BTreeMap<String, TableBatch> = BTreeMap::new();
            for entry in &changes {
                let Some(state) = states.get(&entry.table) else {
                    debug!(table = %entry.table, sequence = entry.sequence, "Change for unsubscribed table ignored");
                    report.skipped += 1;
                    continue;
                };
                let batch = batches.entry(entry.table.clone()).or_default();

                // Duplicates and replays at or below the cursor are no-ops
                if entry.sequence <= state.last_sequence.max(batch.highest) {
                    batch.skipped += 1;
                    continue;
                }

                if Self::apply_entry(store, entry).await? {
                    batch.applied += 1;
                } else {
                    batch.skipped += 1;
                }
                batch.highest = entry.sequence;
            }

            // Cursors move only once the whole batch is in
            let now = now_millis();
            for state in states.values_mut() {
                if let Some(batch) = batches.get(&state.table) {
                    state.advance_to(batch.highest);
                    report.applied += batch.applied;
                    report.skipped += batch.skipped;
                    metrics::record_sync_pull(&state.table, batch.applied, batch.skipped);
                }
                state.last_synced_at = Some(now);
                store.put_sync_state(state).await?;
            }

            if !response.has_more {
                break;
            }
            if round == max_rounds {
                info!(rounds = max_rounds, "Pull round limit reached, remaining changes wait for the next sync");
            }
        }
        Ok(())
    }

    /// Apply one change-log entry. Returns whether a local row changed.
    async fn apply_entry(store: &dyn LocalStore, entry: &ChangeLogEntry) -> Result<bool, MirrorError> {
        match entry.op {
            ChangeOp::Create | ChangeOp::Update => {
                let Some(payload) = &entry.payload else {
                    return Err(MirrorError::Protocol(format!(
                        "{} entry {} for {}/{} has no payload",
                        entry.op, entry.sequence, entry.table, entry.record_id
                    )));
                };
                let mut record = payload.clone();
                if record.id.is_empty() {
                    record.id = entry.record_id.clone();
                }
                record.row_version = record.row_version.max(entry.row_version);
                Ok(store.apply_change(&entry.table, &record).await?)
            }
            ChangeOp::Delete => {
                let Some(mut record) = store
                    .get(&entry.table, &entry.record_id, ReadMode::IncludeInactive)
                    .await?
                else {
                    return Ok(false);
                };
                if !record.is_active && record.row_version >= entry.row_version {
                    return Ok(false);
                }
                record.is_active = false;
                record.row_version = entry.row_version.max(record.row_version + 1);
                record.modified_at = entry.created_at.max(record.modified_at);
                Ok(store.apply_change(&entry.table, &record).await?)
            }
        }
    }

    /// Clear a table, reload it from the list endpoint and jump its cursor
    /// to the server head.
    async fn resync_table(
        &self,
        store: &dyn LocalStore,
        config: &MirrorConfig,
        state: &mut ClientSyncState,
        head: u64,
    ) -> Result<(), MirrorError> {
        let table = state.table.clone();
        warn!(table = %table, cursor = state.last_sequence, "Cursor older than server retention, resyncing table");

        let remote = &self.remote;
        let fetch = |params: RemoteParams| {
            let table = table.clone();
            async move { remote.list(&table, &params).await.map_err(MirrorError::from) }
        };
        let (rows, pages) = repopulate(store, &table, config.refresh_page_size, fetch).await?;

        state.advance_to(head);
        state.last_synced_at = Some(now_millis());
        store.put_sync_state(state).await?;

        metrics::record_resync(&table, rows);
        info!(table = %table, rows, pages, cursor = state.last_sequence, "Table resynced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::StoreProvider;
    use crate::record::Record;
    use crate::storage::{MemoryStore, StoreSchema, TableSchema};
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(StoreSchema::new().table(TableSchema::new("orders"))).unwrap()
    }

    fn upsert(sequence: u64, id: &str, version: u64, status: &str) -> ChangeLogEntry {
        let mut record = Record::from_json(id.into(), json!({"status": status}));
        record.row_version = version;
        ChangeLogEntry {
            sequence,
            table: "orders".into(),
            record_id: id.into(),
            op: ChangeOp::Update,
            payload: Some(record),
            row_version: version,
            created_at: 1,
        }
    }

    fn delete(sequence: u64, id: &str, version: u64) -> ChangeLogEntry {
        ChangeLogEntry {
            sequence,
            table: "orders".into(),
            record_id: id.into(),
            op: ChangeOp::Delete,
            payload: None,
            row_version: version,
            created_at: 2,
        }
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let store = store();
        let entry = upsert(1, "a", 1, "open");

        assert!(SyncEngine::apply_entry(&store, &entry).await.unwrap());
        assert!(!SyncEngine::apply_entry(&store, &entry).await.unwrap());

        let row = store.get("orders", "a", ReadMode::ActiveOnly).await.unwrap().unwrap();
        assert_eq!(row.field("status"), Some(&json!("open")));
        assert_eq!(store.count("orders", ReadMode::IncludeInactive).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_older_version_never_overwrites() {
        let store = store();
        SyncEngine::apply_entry(&store, &upsert(2, "a", 5, "shipped")).await.unwrap();
        assert!(!SyncEngine::apply_entry(&store, &upsert(1, "a", 3, "open")).await.unwrap());

        let row = store.get("orders", "a", ReadMode::ActiveOnly).await.unwrap().unwrap();
        assert_eq!(row.field("status"), Some(&json!("shipped")));
    }

    #[tokio::test]
    async fn test_delete_retires_and_advances_version() {
        let store = store();
        SyncEngine::apply_entry(&store, &upsert(1, "a", 4, "open")).await.unwrap();

        assert!(SyncEngine::apply_entry(&store, &delete(2, "a", 4)).await.unwrap());
        let row = store.get("orders", "a", ReadMode::IncludeInactive).await.unwrap().unwrap();
        assert!(!row.is_active);
        assert_eq!(row.row_version, 5);

        // Replayed delete and delete of an unknown row are no-ops
        assert!(!SyncEngine::apply_entry(&store, &delete(2, "a", 4)).await.unwrap());
        assert!(!SyncEngine::apply_entry(&store, &delete(3, "zzz", 1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_without_payload_is_a_protocol_error() {
        let store = store();
        let mut entry = upsert(1, "a", 1, "open");
        entry.payload = None;

        let err = SyncEngine::apply_entry(&store, &entry).await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[tokio::test]
    async fn test_closed_store_fails_apply() {
        let provider = StoreProvider::memory(StoreSchema::new().table(TableSchema::new("orders")));
        let store = provider.get().await.unwrap();
        store.close().await.unwrap();

        let err = SyncEngine::apply_entry(store.as_ref(), &upsert(1, "a", 1, "open"))
            .await
            .unwrap_err();
        assert!(err.is_store_closed());
    }
}
