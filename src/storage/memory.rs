// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{
    should_apply, LocalStore, ReadMode, StoreDiagnostics, StoreError, StoreSchema, TableStats,
};
use crate::record::{ClientSyncState, Record, StagedMutation};

/// Volatile store: one `DashMap` per declared table.
pub struct MemoryStore {
    schema: StoreSchema,
    tables: HashMap<String, DashMap<String, Record>>,
    /// Staging order is push order
    outbox: Mutex<Vec<StagedMutation>>,
    sync_states: DashMap<(String, String), ClientSyncState>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new(schema: StoreSchema) -> Result<Self, StoreError> {
        schema.validate()?;
        let tables = schema
            .tables()
            .map(|t| (t.name.clone(), DashMap::new()))
            .collect();
        Ok(Self {
            schema,
            tables,
            outbox: Mutex::new(Vec::new()),
            sync_states: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn table(&self, name: &str) -> Result<&DashMap<String, Record>, StoreError> {
        self.ensure_open()?;
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn schema(&self) -> &StoreSchema {
        &self.schema
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn get(&self, table: &str, id: &str, mode: ReadMode) -> Result<Option<Record>, StoreError> {
        Ok(self
            .table(table)?
            .get(id)
            .map(|r| r.value().clone())
            .filter(|r| mode.admits(r)))
    }

    async fn put(&self, table: &str, record: &Record) -> Result<(), StoreError> {
        self.table(table)?.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn apply_change(&self, table: &str, record: &Record) -> Result<bool, StoreError> {
        let rows = self.table(table)?;
        // Entry holds the shard lock, so check-and-write is atomic per key
        match rows.entry(record.id.clone()) {
            Entry::Occupied(mut current) => {
                if !should_apply(Some(current.get()), record) {
                    return Ok(false);
                }
                current.insert(record.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }
        Ok(true)
    }

    async fn scan(&self, table: &str, mode: ReadMode) -> Result<Vec<Record>, StoreError> {
        let mut rows: Vec<Record> = self
            .table(table)?
            .iter()
            .filter(|r| mode.admits(r.value()))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn count(&self, table: &str, mode: ReadMode) -> Result<u64, StoreError> {
        let rows = self.table(table)?;
        let count = match mode {
            ReadMode::IncludeInactive => rows.len(),
            ReadMode::ActiveOnly => rows.iter().filter(|r| r.is_active).count(),
        };
        Ok(count as u64)
    }

    async fn clear(&self, table: &str) -> Result<(), StoreError> {
        self.table(table)?.clear();
        Ok(())
    }

    async fn stage(&self, mutation: &StagedMutation) -> Result<(), StoreError> {
        self.schema.require(&mutation.table)?;
        self.ensure_open()?;
        self.outbox.lock().push(mutation.clone());
        Ok(())
    }

    async fn staged(&self, limit: usize) -> Result<Vec<StagedMutation>, StoreError> {
        self.ensure_open()?;
        Ok(self.outbox.lock().iter().take(limit).cloned().collect())
    }

    async fn remove_staged(&self, mutation_ids: &[String]) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let mut outbox = self.outbox.lock();
        let before = outbox.len();
        outbox.retain(|m| !mutation_ids.contains(&m.mutation_id));
        Ok(before - outbox.len())
    }

    async fn staged_count(&self, table: Option<&str>) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let outbox = self.outbox.lock();
        let count = match table {
            Some(t) => outbox.iter().filter(|m| m.table == t).count(),
            None => outbox.len(),
        };
        Ok(count as u64)
    }

    async fn sync_state(
        &self,
        client_id: &str,
        table: &str,
    ) -> Result<Option<ClientSyncState>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .sync_states
            .get(&(client_id.to_string(), table.to_string()))
            .map(|s| s.value().clone()))
    }

    async fn put_sync_state(&self, state: &ClientSyncState) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.sync_states
            .insert((state.client_id.clone(), state.table.clone()), state.clone());
        Ok(())
    }

    async fn clear_sync_state(&self, client_id: &str) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let before = self.sync_states.len();
        self.sync_states.retain(|(client, _), _| client != client_id);
        Ok(before - self.sync_states.len())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn diagnostics(&self) -> Result<StoreDiagnostics, StoreError> {
        if self.is_closed() {
            return Ok(StoreDiagnostics {
                backend: self.backend(),
                closed: true,
                tables: Vec::new(),
                staged: 0,
            });
        }
        let tables = self
            .schema
            .tables()
            .filter_map(|t| {
                self.tables.get(&t.name).map(|rows| TableStats {
                    name: t.name.clone(),
                    total: rows.len() as u64,
                    active: rows.iter().filter(|r| r.is_active).count() as u64,
                })
            })
            .collect();
        Ok(StoreDiagnostics {
            backend: self.backend(),
            closed: false,
            tables,
            staged: self.outbox.lock().len() as u64,
        })
    }
}
