// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::cmp::Ordering;
use std::ops::Bound;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::query::value::{compare_defined, compare_nulls_last, is_missing, values_equal};
use crate::query::SortDirection;
use crate::record::{ClientSyncState, Record, StagedMutation};

#[derive(Error, Debug)]
pub enum StoreError {
    /// Expected while the provider cycles the store. Not worth an error log.
    #[error("Local store is closed")]
    Closed,
    #[error("Unknown table '{0}'")]
    UnknownTable(String),
    #[error("No index declared on '{table}' for fields {fields:?}")]
    UndeclaredIndex { table: String, fields: Vec<String> },
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Whether reads see soft-deleted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    ActiveOnly,
    /// Audit and sync-apply paths
    IncludeInactive,
}

impl ReadMode {
    pub fn admits(&self, record: &Record) -> bool {
        match self {
            Self::ActiveOnly => record.is_active,
            Self::IncludeInactive => true,
        }
    }
}

/// One entity table and its declared indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    /// Each index is an ordered field list; compound indexes have several.
    pub indexes: Vec<Vec<String>>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    #[must_use]
    pub fn index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(vec![field.into()]);
        self
    }

    /// Compound index such as `[parentKey, secondaryKey]`.
    #[must_use]
    pub fn compound(mut self, fields: &[&str]) -> Self {
        self.indexes
            .push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn has_index(&self, fields: &[String]) -> bool {
        self.indexes.iter().any(|idx| idx.as_slice() == fields)
    }
}

/// The full set of tables a store holds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreSchema {
    tables: Vec<TableSchema>,
}

impl StoreSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.retain(|t| t.name != table.name);
        self.tables.push(table);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&TableSchema, StoreError> {
        self.get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter()
    }

    /// Table and field names end up in SQL identifiers and JSON paths, so
    /// only `[A-Za-z0-9_]` is accepted.
    pub fn validate(&self) -> Result<(), StoreError> {
        let valid = |name: &str| {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        for table in &self.tables {
            if !valid(&table.name) {
                return Err(StoreError::InvalidSchema(format!("table name '{}'", table.name)));
            }
            for index in &table.indexes {
                if index.is_empty() {
                    return Err(StoreError::InvalidSchema(format!(
                        "empty index on '{}'",
                        table.name
                    )));
                }
                if let Some(bad) = index.iter().find(|f| !valid(f)) {
                    return Err(StoreError::InvalidSchema(format!(
                        "index field '{}' on '{}'",
                        bad, table.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Equality on a prefix of an index's fields, plus an optional range on
/// the next field.
///
/// ```
/// use mirror_sync::storage::IndexQuery;
/// use serde_json::json;
/// use std::ops::Bound;
///
/// // parentKey = "p1" AND 10 <= secondaryKey < 20
/// let query = IndexQuery::on(&["parentKey", "secondaryKey"])
///     .eq(json!("p1"))
///     .range(Bound::Included(json!(10)), Bound::Excluded(json!(20)));
/// assert_eq!(query.index.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub index: Vec<String>,
    pub equals: Vec<Value>,
    pub range: Option<(Bound<Value>, Bound<Value>)>,
}

impl IndexQuery {
    pub fn on(fields: &[&str]) -> Self {
        Self {
            index: fields.iter().map(|f| f.to_string()).collect(),
            equals: Vec::new(),
            range: None,
        }
    }

    #[must_use]
    pub fn eq(mut self, value: Value) -> Self {
        self.equals.push(value);
        self
    }

    #[must_use]
    pub fn range(mut self, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        self.range = Some((lower, upper));
        self
    }

    /// Field the range applies to, if any.
    pub fn range_field(&self) -> Option<&str> {
        self.range
            .as_ref()
            .and_then(|_| self.index.get(self.equals.len()))
            .map(String::as_str)
    }

    /// Check the query against the table's declared indexes.
    pub fn validate(&self, table: &TableSchema) -> Result<(), StoreError> {
        let undeclared = || StoreError::UndeclaredIndex {
            table: table.name.clone(),
            fields: self.index.clone(),
        };
        if !table.has_index(&self.index) {
            return Err(undeclared());
        }
        let bound_fields = self.equals.len() + usize::from(self.range.is_some());
        if bound_fields > self.index.len() {
            return Err(undeclared());
        }
        Ok(())
    }

    pub fn matches(&self, record: &Record) -> bool {
        let prefix_ok = self
            .index
            .iter()
            .zip(&self.equals)
            .all(|(field, expected)| match record.value_of(field) {
                Some(actual) => values_equal(&actual, expected),
                None => expected.is_null(),
            });
        if !prefix_ok {
            return false;
        }

        match (&self.range, self.range_field()) {
            (Some((lower, upper)), Some(field)) => {
                let actual = record.value_of(field);
                if is_missing(actual.as_ref()) {
                    return false;
                }
                let actual = actual.unwrap_or(Value::Null);
                within_lower(&actual, lower) && within_upper(&actual, upper)
            }
            _ => true,
        }
    }

    /// Index field order, ascending, nulls last, then by id.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.index
            .iter()
            .map(|field| {
                compare_nulls_last(
                    a.value_of(field).as_ref(),
                    b.value_of(field).as_ref(),
                    SortDirection::Asc,
                )
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or_else(|| a.id.cmp(&b.id))
    }
}

fn within_lower(actual: &Value, bound: &Bound<Value>) -> bool {
    match bound {
        Bound::Included(v) => compare_defined(actual, v) != Ordering::Less,
        Bound::Excluded(v) => compare_defined(actual, v) == Ordering::Greater,
        Bound::Unbounded => true,
    }
}

fn within_upper(actual: &Value, bound: &Bound<Value>) -> bool {
    match bound {
        Bound::Included(v) => compare_defined(actual, v) != Ordering::Greater,
        Bound::Excluded(v) => compare_defined(actual, v) == Ordering::Less,
        Bound::Unbounded => true,
    }
}

/// Last-writer-wins by row version.
///
/// An incoming row older than the stored one is refused. A row at the same
/// version is only written if its content actually differs.
pub fn should_apply(existing: Option<&Record>, incoming: &Record) -> bool {
    match existing {
        None => true,
        Some(current) if incoming.row_version < current.row_version => false,
        Some(current) if incoming.row_version == current.row_version => {
            !current.same_content(incoming)
        }
        Some(_) => true,
    }
}

/// Row counts for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub name: String,
    pub total: u64,
    pub active: u64,
}

/// Typed snapshot of a store's internals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreDiagnostics {
    pub backend: &'static str,
    pub closed: bool,
    pub tables: Vec<TableStats>,
    /// Outbox depth
    pub staged: u64,
}

/// Embedded, table-oriented store mirroring a subset of the remote database.
///
/// Every operation on a closed store fails with [`StoreError::Closed`],
/// except [`diagnostics`](LocalStore::diagnostics) which reports the closed
/// state instead.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Short backend name for logs and diagnostics
    fn backend(&self) -> &'static str;

    fn schema(&self) -> &StoreSchema;

    fn is_closed(&self) -> bool;

    async fn get(&self, table: &str, id: &str, mode: ReadMode) -> Result<Option<Record>, StoreError>;

    /// Insert or replace by key.
    async fn put(&self, table: &str, record: &Record) -> Result<(), StoreError>;

    /// Default implementation falls back to sequential puts.
    async fn put_batch(&self, table: &str, records: &[Record]) -> Result<usize, StoreError> {
        for record in records {
            self.put(table, record).await?;
        }
        Ok(records.len())
    }

    /// Sync-apply upsert honouring row versions (see [`should_apply`]).
    ///
    /// Returns whether the stored row changed.
    async fn apply_change(&self, table: &str, record: &Record) -> Result<bool, StoreError>;

    /// [`apply_change`](LocalStore::apply_change) for many rows. Returns how
    /// many stored rows changed.
    async fn apply_batch(&self, table: &str, records: &[Record]) -> Result<usize, StoreError> {
        let mut changed = 0;
        for record in records {
            if self.apply_change(table, record).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// All rows of a table, ordered by id.
    async fn scan(&self, table: &str, mode: ReadMode) -> Result<Vec<Record>, StoreError>;

    /// Full scan with an in-memory predicate.
    async fn filter(
        &self,
        table: &str,
        mode: ReadMode,
        predicate: &(dyn for<'r> Fn(&'r Record) -> bool + Send + Sync),
    ) -> Result<Vec<Record>, StoreError> {
        let rows = self.scan(table, mode).await?;
        Ok(rows.into_iter().filter(|r| predicate(r)).collect())
    }

    /// Query a declared index. Results are ordered by the index fields.
    async fn query_index(
        &self,
        table: &str,
        query: &IndexQuery,
        mode: ReadMode,
    ) -> Result<Vec<Record>, StoreError> {
        query.validate(self.schema().require(table)?)?;
        let mut rows = self.filter(table, mode, &|r: &Record| query.matches(r)).await?;
        rows.sort_by(|a, b| query.compare(a, b));
        Ok(rows)
    }

    async fn count(&self, table: &str, mode: ReadMode) -> Result<u64, StoreError>;

    /// Remove every row of a table (active or not).
    async fn clear(&self, table: &str) -> Result<(), StoreError>;

    /// Append a mutation to the outbox.
    async fn stage(&self, mutation: &StagedMutation) -> Result<(), StoreError>;

    /// Oldest `limit` staged mutations, in staging order.
    async fn staged(&self, limit: usize) -> Result<Vec<StagedMutation>, StoreError>;

    /// Remove mutations by id. Returns how many were removed.
    async fn remove_staged(&self, mutation_ids: &[String]) -> Result<usize, StoreError>;

    /// Outbox depth, optionally for one table.
    async fn staged_count(&self, table: Option<&str>) -> Result<u64, StoreError>;

    async fn sync_state(
        &self,
        client_id: &str,
        table: &str,
    ) -> Result<Option<ClientSyncState>, StoreError>;

    async fn put_sync_state(&self, state: &ClientSyncState) -> Result<(), StoreError>;

    /// Delete every sync state row of a client. Returns how many were removed.
    async fn clear_sync_state(&self, client_id: &str) -> Result<usize, StoreError>;

    /// Release the backing resources. Closing twice is not an error.
    async fn close(&self) -> Result<(), StoreError>;

    async fn diagnostics(&self) -> Result<StoreDiagnostics, StoreError>;
}
