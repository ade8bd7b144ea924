// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared fixtures for integration tests: a scripted in-process remote,
//! schema and config builders, tracing setup.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;

use mirror_sync::query::RemoteParams;
use mirror_sync::remote::{
    ListResponse, MutationResult, PageMeta, PullRequest, PullResponse, PushRequest, PushResponse,
    RemoteApi, RemoteError, TableSyncStatus,
};
use mirror_sync::storage::{StoreSchema, TableSchema};
use mirror_sync::{ChangeLogEntry, ChangeOp, MirrorConfig, Record, StoreProvider, SyncEngine};

/// Install a test subscriber once. `RUST_LOG=mirror_sync=debug` shows engine logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One scripted push outcome, consumed in order.
#[derive(Debug, Clone)]
pub enum PushScript {
    /// Fail the whole request
    Fail(RemoteError),
    /// Acknowledge only the first `n` mutations
    AckFirst(usize),
}

/// In-process remote API.
///
/// Serves `list`/`get_by_id` from in-memory tables, pops scripted pull
/// responses (empty response when the script runs out), and accepts pushes
/// unless scripted otherwise or the record id was marked conflicting.
#[derive(Default)]
pub struct MockRemote {
    offline: AtomicBool,
    tables: Mutex<HashMap<String, Vec<Record>>>,
    pull_script: Mutex<VecDeque<Result<PullResponse, RemoteError>>>,
    push_script: Mutex<VecDeque<PushScript>>,
    conflicting: Mutex<HashSet<String>>,

    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub pull_requests: Mutex<Vec<PullRequest>>,
    pub push_requests: Mutex<Vec<PushRequest>>,
    pub cleanups: Mutex<Vec<u32>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_rows(&self, table: &str, rows: Vec<Record>) {
        self.tables.lock().insert(table.to_string(), rows);
    }

    pub fn script_pull(&self, response: PullResponse) {
        self.pull_script.lock().push_back(Ok(response));
    }

    pub fn script_pull_error(&self, error: RemoteError) {
        self.pull_script.lock().push_back(Err(error));
    }

    pub fn script_push(&self, script: PushScript) {
        self.push_script.lock().push_back(script);
    }

    pub fn conflict_on(&self, record_id: &str) {
        self.conflicting.lock().insert(record_id.to_string());
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Network("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn list(&self, table: &str, params: &RemoteParams) -> Result<ListResponse, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let tables = self.tables.lock();
        let rows = tables.get(table).cloned().unwrap_or_default();
        let start = params.page.saturating_sub(1) * params.page_size;
        Ok(ListResponse {
            data: rows.iter().skip(start).take(params.page_size).cloned().collect(),
            meta: PageMeta {
                item_count: rows.len() as u64,
                page: params.page,
                take: params.page_size,
            },
        })
    }

    async fn get_by_id(&self, table: &str, id: &str) -> Result<Option<Record>, RemoteError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        Ok(self
            .tables
            .lock()
            .get(table)
            .and_then(|rows| rows.iter().find(|r| r.id == id).cloned()))
    }

    async fn pull_changes(&self, request: &PullRequest) -> Result<PullResponse, RemoteError> {
        self.check_online()?;
        self.pull_requests.lock().push(request.clone());
        self.pull_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullResponse::default()))
    }

    async fn push_changes(&self, request: &PushRequest) -> Result<PushResponse, RemoteError> {
        self.check_online()?;
        self.push_requests.lock().push(request.clone());

        let acknowledge = match self.push_script.lock().pop_front() {
            Some(PushScript::Fail(error)) => return Err(error),
            Some(PushScript::AckFirst(n)) => n,
            None => request.mutations.len(),
        };

        let conflicting = self.conflicting.lock();
        let results = request
            .mutations
            .iter()
            .take(acknowledge)
            .map(|m| {
                if conflicting.contains(&m.record_id) {
                    MutationResult::conflict(&m.mutation_id, m.base_version + 1, "row changed on server")
                } else {
                    MutationResult::accepted(&m.mutation_id)
                }
            })
            .collect();
        Ok(PushResponse { results })
    }

    async fn cleanup_changes(&self, retention_days: u32) -> Result<u64, RemoteError> {
        self.check_online()?;
        self.cleanups.lock().push(retention_days);
        Ok(0)
    }

    async fn sync_status(&self, _client_id: &str) -> Result<Vec<TableSyncStatus>, RemoteError> {
        self.check_online()?;
        Ok(Vec::new())
    }
}

pub fn schema() -> StoreSchema {
    StoreSchema::new()
        .table(TableSchema::new("orders").index("status"))
        .table(TableSchema::new("order_lines").compound(&["orderId", "lineNo"]))
}

pub fn config() -> MirrorConfig {
    MirrorConfig {
        client_id: "test-client".into(),
        subscribed_tables: vec!["orders".into()],
        push_chunk_size: 10,
        push_max_retries: 3,
        refresh_page_size: 10,
        ..MirrorConfig::default()
    }
}

pub fn memory_provider() -> Arc<StoreProvider> {
    Arc::new(StoreProvider::memory(schema()))
}

pub fn engine_with(
    provider: Arc<StoreProvider>,
    remote: Arc<MockRemote>,
    config: MirrorConfig,
) -> Arc<SyncEngine> {
    let (_tx, rx) = watch::channel(config);
    SyncEngine::new(provider, remote, rx)
}

pub fn order(id: &str, status: &str, amount: Value) -> Record {
    Record::from_json(id.into(), json!({"status": status, "amount": amount}))
}

/// `count` orders `o000..`, alternating open/closed, amounts 0..count.
pub fn orders(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            let status = if i % 2 == 0 { "open" } else { "closed" };
            order(&format!("o{:03}", i), status, json!(i))
        })
        .collect()
}

pub fn upsert(sequence: u64, record: &Record) -> ChangeLogEntry {
    ChangeLogEntry {
        sequence,
        table: "orders".into(),
        record_id: record.id.clone(),
        op: ChangeOp::Update,
        payload: Some(record.clone()),
        row_version: record.row_version,
        created_at: 0,
    }
}

pub fn delete(sequence: u64, id: &str, row_version: u64) -> ChangeLogEntry {
    ChangeLogEntry {
        sequence,
        table: "orders".into(),
        record_id: id.into(),
        op: ChangeOp::Delete,
        payload: None,
        row_version,
        created_at: 0,
    }
}

pub fn versioned(mut record: Record, row_version: u64) -> Record {
    record.row_version = row_version;
    record
}

pub fn changes(entries: Vec<ChangeLogEntry>) -> PullResponse {
    PullResponse {
        changes: entries,
        ..PullResponse::default()
    }
}
