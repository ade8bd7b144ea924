// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-entity CRUD over the local store.
//!
//! A [`Repository`] is bound to one table and resolves the store through the
//! [`StoreProvider`] on every call, so it keeps working across a reset.
//! It never touches the network and never stages mutations; that is the
//! cache service's job.
//!
//! # Example
//!
//! ```rust,no_run
//! use mirror_sync::lifecycle::StoreProvider;
//! use mirror_sync::repository::Repository;
//! use mirror_sync::storage::{IndexQuery, StoreSchema, TableSchema};
//! use mirror_sync::Record;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), mirror_sync::MirrorError> {
//! let schema = StoreSchema::new()
//!     .table(TableSchema::new("order_lines").compound(&["orderId", "lineNo"]));
//! let provider = Arc::new(StoreProvider::memory(schema));
//! let lines = Repository::new(provider, "order_lines");
//!
//! lines.put(&Record::from_json("l1".into(), json!({"orderId": "o1", "lineNo": 1}))).await?;
//! let for_order = lines
//!     .find_by_index(&IndexQuery::on(&["orderId", "lineNo"]).eq(json!("o1")))
//!     .await?;
//! assert_eq!(for_order.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::error::MirrorError;
use crate::lifecycle::StoreProvider;
use crate::record::{now_millis, Record};
use crate::storage::{IndexQuery, LocalStore, ReadMode};

#[derive(Clone)]
pub struct Repository {
    provider: Arc<StoreProvider>,
    table: String,
}

impl Repository {
    pub fn new(provider: Arc<StoreProvider>, table: impl Into<String>) -> Self {
        Self {
            provider,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn store(&self) -> Result<Arc<dyn LocalStore>, MirrorError> {
        Ok(self.provider.get().await?)
    }

    /// Active row by id.
    pub async fn get(&self, id: &str) -> Result<Option<Record>, MirrorError> {
        let store = self.store().await?;
        Ok(store.get(&self.table, id, ReadMode::ActiveOnly).await?)
    }

    /// Row by id, retired or not.
    pub async fn get_including_inactive(&self, id: &str) -> Result<Option<Record>, MirrorError> {
        let store = self.store().await?;
        Ok(store.get(&self.table, id, ReadMode::IncludeInactive).await?)
    }

    pub async fn put(&self, record: &Record) -> Result<(), MirrorError> {
        let store = self.store().await?;
        Ok(store.put(&self.table, record).await?)
    }

    pub async fn put_many(&self, records: &[Record]) -> Result<usize, MirrorError> {
        let store = self.store().await?;
        Ok(store.put_batch(&self.table, records).await?)
    }

    /// Soft-delete: mark the row inactive and keep it for audit and sync.
    ///
    /// Returns the retired row, or `None` if no active row had that id.
    pub async fn retire(&self, id: &str) -> Result<Option<Record>, MirrorError> {
        let store = self.store().await?;
        let Some(mut record) = store.get(&self.table, id, ReadMode::ActiveOnly).await? else {
            return Ok(None);
        };
        record.is_active = false;
        record.modified_at = now_millis();
        store.put(&self.table, &record).await?;
        debug!(table = %self.table, id, "Row retired");
        Ok(Some(record))
    }

    /// Every active row, ordered by id.
    pub async fn list_active(&self) -> Result<Vec<Record>, MirrorError> {
        let store = self.store().await?;
        Ok(store.scan(&self.table, ReadMode::ActiveOnly).await?)
    }

    /// Active rows matching an in-memory predicate.
    pub async fn find<P>(&self, predicate: P) -> Result<Vec<Record>, MirrorError>
    where
        P: Fn(&Record) -> bool + Send + Sync,
    {
        let store = self.store().await?;
        Ok(store
            .filter(&self.table, ReadMode::ActiveOnly, &predicate)
            .await?)
    }

    /// Active rows through a declared index, in index order.
    pub async fn find_by_index(&self, query: &IndexQuery) -> Result<Vec<Record>, MirrorError> {
        let store = self.store().await?;
        Ok(store
            .query_index(&self.table, query, ReadMode::ActiveOnly)
            .await?)
    }

    pub async fn count(&self) -> Result<u64, MirrorError> {
        let store = self.store().await?;
        Ok(store.count(&self.table, ReadMode::ActiveOnly).await?)
    }
}
