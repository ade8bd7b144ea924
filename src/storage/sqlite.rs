// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite backend for the Local Store.
//!
//! Every entity table shares one physical table; domain fields live in a
//! JSON `data` column and declared indexes become SQLite expression
//! indexes over `json_extract`:
//!
//! ```sql
//! CREATE TABLE records (
//!   tbl TEXT NOT NULL,
//!   id TEXT NOT NULL,
//!   row_version INTEGER NOT NULL,
//!   is_active INTEGER NOT NULL,
//!   created_at INTEGER NOT NULL,
//!   modified_at INTEGER NOT NULL,
//!   data TEXT NOT NULL,       -- full record as JSON
//!   PRIMARY KEY (tbl, id)
//! );
//!
//! -- TableSchema::new("lines").compound(&["orderId", "lineNo"])
//! CREATE INDEX idx_lines_orderId_lineNo ON records (
//!   json_extract(data, '$.orderId'), json_extract(data, '$.lineNo')
//! ) WHERE tbl = 'lines';
//! ```
//!
//! The outbox (`staged_mutations`) and `client_sync_state` live in the same
//! file, so a store reset never loses pending local edits.

use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Arguments, Row, SqlitePool};
use tracing::{debug, info};

use super::traits::{
    IndexQuery, LocalStore, ReadMode, StoreDiagnostics, StoreError, StoreSchema,
    TableStats,
};
use crate::record::{ClientSyncState, Record, StagedMutation};
use crate::resilience::retry::{retry, RetryConfig};

const SCHEMA_SQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS records (
        tbl TEXT NOT NULL,
        id TEXT NOT NULL,
        row_version INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (tbl, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staged_mutations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        mutation_id TEXT NOT NULL UNIQUE,
        tbl TEXT NOT NULL,
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS client_sync_state (
        client_id TEXT NOT NULL,
        tbl TEXT NOT NULL,
        last_sequence INTEGER NOT NULL DEFAULT 0,
        last_synced_at INTEGER,
        pending_changes INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (client_id, tbl)
    )
    "#,
];

/// Upsert that only lands when the incoming row wins under last-writer-wins.
/// Mirrors `should_apply`: a newer version always wins, an equal version
/// only when the client-controlled content differs.
const GUARDED_UPSERT: &str = r#"
    INSERT INTO records (tbl, id, row_version, is_active, created_at, modified_at, data)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (tbl, id) DO UPDATE SET
        row_version = excluded.row_version,
        is_active = excluded.is_active,
        created_at = excluded.created_at,
        modified_at = excluded.modified_at,
        data = excluded.data
    WHERE excluded.row_version > records.row_version
       OR (excluded.row_version = records.row_version
           AND json_remove(excluded.data, '$.rowVersion', '$.createdAt', '$.modifiedAt')
            <> json_remove(records.data, '$.rowVersion', '$.createdAt', '$.modifiedAt'))
"#;

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed => StoreError::Closed,
        other => StoreError::Backend(other.to_string()),
    }
}

fn json_path(field: &str) -> String {
    format!("json_extract(data, '$.{}')", field)
}

fn index_name(table: &str, fields: &[String]) -> String {
    format!("idx_{}_{}", table, fields.join("_"))
}

/// Bind a JSON value the way `json_extract` reports it.
fn bind_value(args: &mut SqliteArguments<'_>, value: &Value) -> Result<(), StoreError> {
    let result = match value {
        Value::Bool(b) => args.add(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => args.add(i),
            None => args.add(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => args.add(s.clone()),
        Value::Null => args.add(Option::<String>::None),
        other => args.add(other.to_string()),
    };
    result.map_err(|e| StoreError::Backend(e.to_string()))
}

fn guarded_upsert<'q>(
    table: &'q str,
    record: &'q Record,
) -> Result<sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>, StoreError> {
    let data = serde_json::to_string(record)?;
    Ok(sqlx::query(GUARDED_UPSERT)
        .bind(table)
        .bind(&record.id)
        .bind(record.row_version as i64)
        .bind(record.is_active)
        .bind(record.created_at)
        .bind(record.modified_at)
        .bind(data))
}

fn decode_record(row: &sqlx::sqlite::SqliteRow) -> Result<Record, StoreError> {
    let data: String = row.try_get("data").map_err(map_sqlx)?;
    Ok(serde_json::from_str(&data)?)
}

pub struct SqliteStore {
    pool: SqlitePool,
    schema: StoreSchema,
    closed: AtomicBool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    ///
    /// Uses the startup retry policy, so a bad path fails within seconds.
    pub async fn open(path: impl AsRef<Path>, schema: StoreSchema) -> Result<Self, StoreError> {
        schema.validate()?;

        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = retry("sqlite_connect", &RetryConfig::startup(), || async {
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options.clone())
                .await
                .map_err(map_sqlx)
        })
        .await?;

        let store = Self {
            pool,
            schema,
            closed: AtomicBool::new(false),
        };
        store.init_schema().await?;
        info!(path = %path.as_ref().display(), "SQLite store opened");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let mut statements: Vec<String> = SCHEMA_SQL.iter().map(|s| s.to_string()).collect();
        statements.push(
            "CREATE INDEX IF NOT EXISTS idx_staged_tbl ON staged_mutations (tbl)".to_string(),
        );
        for table in self.schema.tables() {
            for index in &table.indexes {
                let columns: Vec<String> = index.iter().map(|f| json_path(f)).collect();
                statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS {} ON records ({}) WHERE tbl = '{}'",
                    index_name(&table.name, index),
                    columns.join(", "),
                    table.name
                ));
            }
        }

        for sql in &statements {
            retry("sqlite_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(map_sqlx)
            })
            .await?;
        }
        debug!(statements = statements.len(), "SQLite schema ready");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn check_table(&self, table: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.schema.require(table).map(|_| ())
    }

    fn active_clause(mode: ReadMode) -> &'static str {
        match mode {
            ReadMode::ActiveOnly => " AND is_active = 1",
            ReadMode::IncludeInactive => "",
        }
    }

    async fn write(&self, table: &str, record: &Record) -> Result<(), StoreError> {
        let data = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO records (tbl, id, row_version, is_active, created_at, modified_at, data)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tbl, id) DO UPDATE SET
                row_version = excluded.row_version,
                is_active = excluded.is_active,
                created_at = excluded.created_at,
                modified_at = excluded.modified_at,
                data = excluded.data
            "#,
        )
        .bind(table)
        .bind(&record.id)
        .bind(record.row_version as i64)
        .bind(record.is_active)
        .bind(record.created_at)
        .bind(record.modified_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn table_counts(&self, table: &str) -> Result<TableStats, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(is_active), 0) AS active FROM records WHERE tbl = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        let total: i64 = row.try_get("total").map_err(map_sqlx)?;
        let active: i64 = row.try_get("active").map_err(map_sqlx)?;
        Ok(TableStats {
            name: table.to_string(),
            total: total as u64,
            active: active as u64,
        })
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn schema(&self) -> &StoreSchema {
        &self.schema
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.pool.is_closed()
    }

    async fn get(&self, table: &str, id: &str, mode: ReadMode) -> Result<Option<Record>, StoreError> {
        self.check_table(table)?;
        let sql = format!(
            "SELECT data FROM records WHERE tbl = ? AND id = ?{}",
            Self::active_clause(mode)
        );
        let row = sqlx::query(&sql)
            .bind(table)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(decode_record).transpose()
    }

    async fn put(&self, table: &str, record: &Record) -> Result<(), StoreError> {
        self.check_table(table)?;
        self.write(table, record).await
    }

    async fn put_batch(&self, table: &str, records: &[Record]) -> Result<usize, StoreError> {
        self.check_table(table)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for record in records {
            let data = serde_json::to_string(record)?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO records
                    (tbl, id, row_version, is_active, created_at, modified_at, data)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(table)
            .bind(&record.id)
            .bind(record.row_version as i64)
            .bind(record.is_active)
            .bind(record.created_at)
            .bind(record.modified_at)
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(records.len())
    }

    async fn apply_change(&self, table: &str, record: &Record) -> Result<bool, StoreError> {
        self.check_table(table)?;
        let result = guarded_upsert(table, record)?
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn apply_batch(&self, table: &str, records: &[Record]) -> Result<usize, StoreError> {
        self.check_table(table)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut changed = 0;
        for record in records {
            let result = guarded_upsert(table, record)?
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            changed += result.rows_affected() as usize;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(changed)
    }

    async fn scan(&self, table: &str, mode: ReadMode) -> Result<Vec<Record>, StoreError> {
        self.check_table(table)?;
        let sql = format!(
            "SELECT data FROM records WHERE tbl = ?{} ORDER BY id",
            Self::active_clause(mode)
        );
        let rows = sqlx::query(&sql)
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(decode_record).collect()
    }

    async fn query_index(
        &self,
        table: &str,
        query: &IndexQuery,
        mode: ReadMode,
    ) -> Result<Vec<Record>, StoreError> {
        self.check_table(table)?;
        query.validate(self.schema.require(table)?)?;

        let mut sql = format!(
            "SELECT data FROM records WHERE tbl = ?{}",
            Self::active_clause(mode)
        );
        let mut args = SqliteArguments::default();
        args.add(table.to_string())
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        for (field, value) in query.index.iter().zip(&query.equals) {
            if value.is_null() {
                sql.push_str(&format!(" AND {} IS NULL", json_path(field)));
            } else {
                sql.push_str(&format!(" AND {} = ?", json_path(field)));
                bind_value(&mut args, value)?;
            }
        }

        if let (Some((lower, upper)), Some(field)) = (&query.range, query.range_field()) {
            let column = json_path(field);
            sql.push_str(&format!(" AND {} IS NOT NULL", column));
            for (bound, inclusive, exclusive) in [(lower, ">=", ">"), (upper, "<=", "<")] {
                match bound {
                    Bound::Included(v) => {
                        sql.push_str(&format!(" AND {} {} ?", column, inclusive));
                        bind_value(&mut args, v)?;
                    }
                    Bound::Excluded(v) => {
                        sql.push_str(&format!(" AND {} {} ?", column, exclusive));
                        bind_value(&mut args, v)?;
                    }
                    Bound::Unbounded => {}
                }
            }
        }

        let order: Vec<String> = query
            .index
            .iter()
            .map(|f| {
                let column = json_path(f);
                format!("{} IS NULL, {}", column, column)
            })
            .collect();
        sql.push_str(&format!(" ORDER BY {}, id", order.join(", ")));

        let rows = sqlx::query_with(&sql, args)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(decode_record).collect()
    }

    async fn count(&self, table: &str, mode: ReadMode) -> Result<u64, StoreError> {
        self.check_table(table)?;
        let sql = format!(
            "SELECT COUNT(*) AS cnt FROM records WHERE tbl = ?{}",
            Self::active_clause(mode)
        );
        let row = sqlx::query(&sql)
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let count: i64 = row.try_get("cnt").map_err(map_sqlx)?;
        Ok(count as u64)
    }

    async fn clear(&self, table: &str) -> Result<(), StoreError> {
        self.check_table(table)?;
        sqlx::query("DELETE FROM records WHERE tbl = ?")
            .bind(table)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn stage(&self, mutation: &StagedMutation) -> Result<(), StoreError> {
        self.check_table(&mutation.table)?;
        sqlx::query("INSERT INTO staged_mutations (mutation_id, tbl, data) VALUES (?, ?, ?)")
            .bind(&mutation.mutation_id)
            .bind(&mutation.table)
            .bind(serde_json::to_string(mutation)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn staged(&self, limit: usize) -> Result<Vec<StagedMutation>, StoreError> {
        self.ensure_open()?;
        let rows = sqlx::query("SELECT data FROM staged_mutations ORDER BY seq LIMIT ?")
            .bind(limit.min(i64::MAX as usize) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter()
            .map(|row| -> Result<StagedMutation, StoreError> {
                let data: String = row.try_get("data").map_err(map_sqlx)?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }

    async fn remove_staged(&self, mutation_ids: &[String]) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut removed = 0;
        for id in mutation_ids {
            let result = sqlx::query("DELETE FROM staged_mutations WHERE mutation_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(removed)
    }

    async fn staged_count(&self, table: Option<&str>) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let row = match table {
            Some(t) => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM staged_mutations WHERE tbl = ?")
                    .bind(t)
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM staged_mutations")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx)?;
        let count: i64 = row.try_get("cnt").map_err(map_sqlx)?;
        Ok(count as u64)
    }

    async fn sync_state(
        &self,
        client_id: &str,
        table: &str,
    ) -> Result<Option<ClientSyncState>, StoreError> {
        self.ensure_open()?;
        let row = sqlx::query(
            r#"
            SELECT last_sequence, last_synced_at, pending_changes
            FROM client_sync_state WHERE client_id = ? AND tbl = ?
            "#,
        )
        .bind(client_id)
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let last_sequence: i64 = row.try_get("last_sequence").map_err(map_sqlx)?;
        let last_synced_at: Option<i64> = row.try_get("last_synced_at").map_err(map_sqlx)?;
        let pending_changes: i64 = row.try_get("pending_changes").map_err(map_sqlx)?;
        Ok(Some(ClientSyncState {
            client_id: client_id.to_string(),
            table: table.to_string(),
            last_sequence: last_sequence as u64,
            last_synced_at,
            pending_changes: pending_changes as u64,
        }))
    }

    async fn put_sync_state(&self, state: &ClientSyncState) -> Result<(), StoreError> {
        self.ensure_open()?;
        sqlx::query(
            r#"
            INSERT INTO client_sync_state (client_id, tbl, last_sequence, last_synced_at, pending_changes)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (client_id, tbl) DO UPDATE SET
                last_sequence = excluded.last_sequence,
                last_synced_at = excluded.last_synced_at,
                pending_changes = excluded.pending_changes
            "#,
        )
        .bind(&state.client_id)
        .bind(&state.table)
        .bind(state.last_sequence as i64)
        .bind(state.last_synced_at)
        .bind(state.pending_changes as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn clear_sync_state(&self, client_id: &str) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let result = sqlx::query("DELETE FROM client_sync_state WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() as usize)
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pool.close().await;
        info!("SQLite store closed");
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
        let mut tables = Vec::new();
        for table in self.schema.tables() {
            tables.push(self.table_counts(&table.name).await?);
        }
        Ok(StoreDiagnostics {
            backend: self.backend(),
            closed: false,
            tables,
            staged: self.staged_count(None).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChangeOp;
    use crate::storage::TableSchema;
    use serde_json::json;
    use tempfile::TempDir;

    fn schema() -> StoreSchema {
        StoreSchema::new()
            .table(TableSchema::new("orders").index("status"))
            .table(TableSchema::new("lines").compound(&["orderId", "lineNo"]))
    }

    async fn open(dir: &TempDir) -> SqliteStore {
        SqliteStore::open(dir.path().join("mirror.db"), schema())
            .await
            .unwrap()
    }

    fn order(id: &str, status: &str) -> Record {
        Record::from_json(id.to_string(), json!({"status": status, "total": 12.5}))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let row = order("o1", "open");
        store.put("orders", &row).await.unwrap();

        let loaded = store.get("orders", "o1", ReadMode::ActiveOnly).await.unwrap().unwrap();
        assert_eq!(loaded, row);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.put("orders", &order("o1", "open")).await.unwrap();
            store
                .stage(&StagedMutation::new("orders", ChangeOp::Create, &order("o1", "open")))
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let store = open(&dir).await;
        assert_eq!(store.count("orders", ReadMode::ActiveOnly).await.unwrap(), 1);
        assert_eq!(store.staged_count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_active_filter_and_counts() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut retired = order("o2", "open");
        retired.is_active = false;
        store
            .put_batch("orders", &[order("o1", "open"), retired])
            .await
            .unwrap();

        assert_eq!(store.count("orders", ReadMode::ActiveOnly).await.unwrap(), 1);
        assert_eq!(store.count("orders", ReadMode::IncludeInactive).await.unwrap(), 2);
        assert!(store.get("orders", "o2", ReadMode::ActiveOnly).await.unwrap().is_none());

        let diag = store.diagnostics().await.unwrap();
        let orders = diag.tables.iter().find(|t| t.name == "orders").unwrap();
        assert_eq!((orders.total, orders.active), (2, 1));
    }

    #[tokio::test]
    async fn test_apply_change_row_version_guard() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut v3 = order("o1", "shipped");
        v3.row_version = 3;
        let mut v2 = order("o1", "open");
        v2.row_version = 2;

        assert!(store.apply_change("orders", &v3).await.unwrap());
        assert!(!store.apply_change("orders", &v2).await.unwrap());
        let row = store.get("orders", "o1", ReadMode::ActiveOnly).await.unwrap().unwrap();
        assert_eq!(row.field("status"), Some(&json!("shipped")));
    }

    #[tokio::test]
    async fn test_apply_change_same_version_needs_new_content() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut stored = order("o1", "open");
        stored.row_version = 4;
        assert!(store.apply_change("orders", &stored).await.unwrap());

        let mut touched = stored.clone();
        touched.modified_at += 1_000;
        assert!(!store.apply_change("orders", &touched).await.unwrap());

        let mut retired = stored.clone();
        retired.is_active = false;
        assert!(store.apply_change("orders", &retired).await.unwrap());
        assert!(store.get("orders", "o1", ReadMode::ActiveOnly).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_batch_skips_stale_rows() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut current = order("o1", "shipped");
        current.row_version = 2;
        store.apply_change("orders", &current).await.unwrap();

        let mut stale = order("o1", "open");
        stale.row_version = 1;
        let changed = store
            .apply_batch("orders", &[stale, order("o2", "open")])
            .await
            .unwrap();

        assert_eq!(changed, 1);
        let row = store.get("orders", "o1", ReadMode::ActiveOnly).await.unwrap().unwrap();
        assert_eq!(row.row_version, 2);
        assert_eq!(row.field("status"), Some(&json!("shipped")));
    }

    #[tokio::test]
    async fn test_compound_index_query_orders_by_index() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let rows = [
            ("a", json!("o1"), json!(3)),
            ("b", json!("o1"), json!(1)),
            ("c", json!("o2"), json!(1)),
            ("d", json!("o1"), json!(2)),
            ("e", json!("o1"), Value::Null),
        ];
        for (id, order_id, line_no) in rows {
            let row = Record::from_json(id.into(), json!({"orderId": order_id, "lineNo": line_no}));
            store.put("lines", &row).await.unwrap();
        }

        let all_o1 = IndexQuery::on(&["orderId", "lineNo"]).eq(json!("o1"));
        let found = store.query_index("lines", &all_o1, ReadMode::ActiveOnly).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "e"]);

        let ranged = all_o1.range(Bound::Excluded(json!(1)), Bound::Included(json!(3)));
        let found = store.query_index("lines", &ranged, ReadMode::ActiveOnly).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a"]);
    }

    #[tokio::test]
    async fn test_undeclared_index_is_error() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let query = IndexQuery::on(&["total"]).eq(json!(1));
        assert!(matches!(
            store.query_index("orders", &query, ReadMode::ActiveOnly).await,
            Err(StoreError::UndeclaredIndex { .. })
        ));
    }

    #[tokio::test]
    async fn test_outbox_and_sync_state() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let m1 = StagedMutation::new("orders", ChangeOp::Create, &order("o1", "open"));
        let m2 = StagedMutation::new("orders", ChangeOp::Delete, &order("o1", "open"));
        store.stage(&m1).await.unwrap();
        store.stage(&m2).await.unwrap();

        let staged = store.staged(1).await.unwrap();
        assert_eq!(staged, vec![m1.clone()]);
        assert_eq!(store.remove_staged(&[m1.mutation_id.clone()]).await.unwrap(), 1);
        assert_eq!(store.staged_count(Some("orders")).await.unwrap(), 1);

        let mut state = ClientSyncState::new("c1", "orders");
        state.advance_to(17);
        state.last_synced_at = Some(1_700_000_000_000);
        store.put_sync_state(&state).await.unwrap();
        assert_eq!(store.sync_state("c1", "orders").await.unwrap(), Some(state));
        assert_eq!(store.clear_sync_state("c1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_store() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(store.is_closed());
        assert!(matches!(
            store.scan("orders", ReadMode::ActiveOnly).await,
            Err(StoreError::Closed)
        ));
        assert!(store.diagnostics().await.unwrap().closed);
    }
}
