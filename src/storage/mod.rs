// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local Store backends.
//!
//! - [`MemoryStore`]: `DashMap` per table, volatile. Tests and ephemeral sessions.
//! - [`SqliteStore`]: sqlx/SQLite, persistent across restarts.
//!
//! Both implement [`LocalStore`] and share the row-version rule in
//! [`should_apply`], the index semantics of [`IndexQuery`] and the
//! nulls-last ordering used by the query layer.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    should_apply, IndexQuery, LocalStore, ReadMode, StoreDiagnostics, StoreError, StoreSchema,
    TableSchema, TableStats,
};
