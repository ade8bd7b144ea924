// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Explicit maintenance: retention cleanup, status, client reset.
//!
//! Nothing here runs from the background loop. Cleanup in particular only
//! happens when a caller asks for it.

use tracing::info;

use super::SyncEngine;
use crate::error::MirrorError;
use crate::metrics;
use crate::record::ClientSyncState;
use crate::remote::TableSyncStatus;

impl SyncEngine {
    /// Ask the server to prune change-log entries older than
    /// `retention_days`. Returns how many entries were deleted.
    ///
    /// Clients whose cursor falls behind the new retention boundary will be
    /// told to resync on their next pull.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self, retention_days: u32) -> Result<u64, MirrorError> {
        let deleted = self
            .remote
            .cleanup_changes(retention_days)
            .await
            .map_err(|e| {
                let err = MirrorError::from(e);
                metrics::record_error("cleanup", err.kind());
                err
            })?;
        info!(retention_days, deleted, "Change log cleaned up");
        Ok(deleted)
    }

    /// [`cleanup`](Self::cleanup) with the configured `retention_days`.
    pub async fn cleanup_with_configured_retention(&self) -> Result<u64, MirrorError> {
        let days = self.config().retention_days;
        self.cleanup(days).await
    }

    /// Local sync state of every synced table. Tables never synced report a
    /// zero cursor.
    pub async fn sync_status(&self) -> Result<Vec<ClientSyncState>, MirrorError> {
        let config = self.config();
        let store = self.provider.get().await?;

        let mut states = Vec::new();
        for table in self.tables(store.as_ref(), &config) {
            let mut state = store
                .sync_state(&config.client_id, &table)
                .await?
                .unwrap_or_else(|| ClientSyncState::new(&config.client_id, &table));
            state.pending_changes = store.staged_count(Some(&table)).await?;
            states.push(state);
        }
        Ok(states)
    }

    /// The server's view of this client's sync state.
    pub async fn remote_sync_status(&self) -> Result<Vec<TableSyncStatus>, MirrorError> {
        let client_id = self.config().client_id;
        Ok(self.remote.sync_status(&client_id).await?)
    }

    /// Forget every cursor of this client. The next pull starts from zero.
    ///
    /// Local rows and the outbox are left alone.
    #[tracing::instrument(skip(self))]
    pub async fn reset_client(&self) -> Result<usize, MirrorError> {
        let _round = self.round.lock().await;
        let client_id = self.config().client_id;
        let store = self.provider.get().await?;
        let removed = store.clear_sync_state(&client_id).await?;
        info!(client_id = %client_id, removed, "Client sync state reset");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorConfig;
    use crate::lifecycle::StoreProvider;
    use crate::query::RemoteParams;
    use crate::record::{ChangeLogEntry, ChangeOp, Record};
    use crate::remote::{
        ListResponse, PullRequest, PullResponse, PushRequest, PushResponse, RemoteApi,
        RemoteError,
    };
    use crate::storage::{StoreSchema, TableSchema};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::watch;

    /// One change per table, then silence. Records every cleanup request.
    #[derive(Default)]
    struct LogRemote {
        cleanups: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl RemoteApi for LogRemote {
        async fn list(&self, _table: &str, _params: &RemoteParams) -> Result<ListResponse, RemoteError> {
            Err(RemoteError::Network("unused".into()))
        }

        async fn get_by_id(&self, _table: &str, _id: &str) -> Result<Option<Record>, RemoteError> {
            Ok(None)
        }

        async fn pull_changes(&self, request: &PullRequest) -> Result<PullResponse, RemoteError> {
            let changes = request
                .tables
                .iter()
                .filter(|cursor| cursor.last_sequence < 3)
                .map(|cursor| ChangeLogEntry {
                    sequence: 3,
                    table: cursor.table.clone(),
                    record_id: "r1".into(),
                    op: ChangeOp::Create,
                    payload: Some(Record::from_json("r1".into(), serde_json::json!({}))),
                    row_version: 1,
                    created_at: 0,
                })
                .collect();
            Ok(PullResponse {
                changes,
                ..PullResponse::default()
            })
        }

        async fn push_changes(&self, _request: &PushRequest) -> Result<PushResponse, RemoteError> {
            Ok(PushResponse::default())
        }

        async fn cleanup_changes(&self, retention_days: u32) -> Result<u64, RemoteError> {
            self.cleanups.lock().push(retention_days);
            Ok(42)
        }

        async fn sync_status(&self, client_id: &str) -> Result<Vec<TableSyncStatus>, RemoteError> {
            Ok(vec![TableSyncStatus {
                table: format!("{}-orders", client_id),
                last_sequence: 3,
                last_synced_at: None,
                pending_changes: 0,
            }])
        }
    }

    fn engine() -> (Arc<SyncEngine>, Arc<LogRemote>) {
        let config = MirrorConfig {
            client_id: "client-a".into(),
            retention_days: 14,
            ..MirrorConfig::default()
        };
        let schema = StoreSchema::new()
            .table(TableSchema::new("orders"))
            .table(TableSchema::new("customers"));
        let remote = Arc::new(LogRemote::default());
        let (_tx, rx) = watch::channel(config);
        let engine = SyncEngine::new(Arc::new(StoreProvider::memory(schema)), remote.clone(), rx);
        (engine, remote)
    }

    #[tokio::test]
    async fn test_cleanup_is_explicit() {
        let (engine, remote) = engine();
        engine.sync_once().await.unwrap();
        assert!(remote.cleanups.lock().is_empty());

        assert_eq!(engine.cleanup(7).await.unwrap(), 42);
        assert_eq!(engine.cleanup_with_configured_retention().await.unwrap(), 42);
        assert_eq!(*remote.cleanups.lock(), vec![7, 14]);
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let (engine, _remote) = engine();

        let before = engine.sync_status().await.unwrap();
        assert_eq!(before.len(), 2);
        assert!(before.iter().all(|s| s.last_sequence == 0));

        engine.sync_once().await.unwrap();
        let after = engine.sync_status().await.unwrap();
        assert!(after.iter().all(|s| s.last_sequence == 3 && s.last_synced_at.is_some()));

        assert_eq!(engine.reset_client().await.unwrap(), 2);
        let reset = engine.sync_status().await.unwrap();
        assert!(reset.iter().all(|s| s.last_sequence == 0));
    }

    #[tokio::test]
    async fn test_remote_status_uses_client_id() {
        let (engine, _remote) = engine();
        let status = engine.remote_sync_status().await.unwrap();
        assert_eq!(status[0].table, "client-a-orders");
    }
}
