// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Mirror Sync
//!
//! An offline-first, cache-aside mirror of a remote relational API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CacheAsideService                         │
//! │  • fetch_page / fetch_by_id: mirror first, remote on miss   │
//! │  • offline fallback to every cached row                     │
//! │  • save / delete: write-through + outbox                    │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │     QueryTranslator      │      │   RemoteApi (reqwest)    │
//! │  descriptor → LocalPlan  │      │  list / by id / sync/*   │
//! │  descriptor → params     │      │  behind a circuit breaker│
//! └──────────────────────────┘      └──────────────────────────┘
//!            │                                   ▲
//!            ▼                                   │
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │ StoreProvider            │◄─────│       SyncEngine         │
//! │  └─ LocalStore           │      │  push outbox, pull log,  │
//! │     (memory / SQLite)    │      │  resync, cursors         │
//! └──────────────────────────┘      └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mirror_sync::{
//!     CacheAsideService, HttpRemote, MirrorConfig, QueryDescriptor, Record, StoreProvider,
//!     SyncEngine,
//! };
//! use mirror_sync::query::SortDirection;
//! use mirror_sync::storage::{StoreSchema, TableSchema};
//! use serde_json::json;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MirrorConfig {
//!         store_path: Some("mirror.db".into()),
//!         remote_base_url: "https://api.example.com/v1".into(),
//!         subscribed_tables: vec!["orders".into()],
//!         ..Default::default()
//!     };
//!     let schema = StoreSchema::new().table(TableSchema::new("orders").index("status"));
//!
//!     let provider = Arc::new(StoreProvider::from_config(&config, schema));
//!     let remote = Arc::new(HttpRemote::from_config(&config)?);
//!     let cache = CacheAsideService::new(provider.clone(), remote.clone(), &config);
//!
//!     // Background sync
//!     let (_config_tx, config_rx) = watch::channel(config);
//!     let engine = SyncEngine::new(provider, remote, config_rx);
//!     engine.attach();
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let runner = engine.clone();
//!     tokio::spawn(async move { runner.run(shutdown_rx).await });
//!
//!     // Reads: mirror first
//!     let page = cache
//!         .fetch_page("orders", &QueryDescriptor::rows(0, 50).sort_by("createdAt", SortDirection::Desc))
//!         .await?;
//!     println!("{} of {} rows from {}", page.len(), page.total, page.source);
//!
//!     // Writes: local first, pushed by the engine
//!     cache.save("orders", Record::from_json("o-1".into(), json!({"status": "open"}))).await?;
//!     engine.trigger();
//!
//!     let _ = shutdown_tx.send(true);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Cache-aside reads**: [`CacheAsideService`] answers from the mirror
//!   when it holds rows and populates it from the remote API otherwise
//! - **Offline fallback**: remote failures degrade to cached data, flagged
//!   with [`cache::PageSource`]
//! - **Change-log sync**: [`SyncEngine`] pushes the outbox in retried chunks
//!   and pulls idempotently from per-table cursors
//! - **Pluggable storage**: [`storage::MemoryStore`] and
//!   [`storage::SqliteStore`] behind [`storage::LocalStore`]
//! - **Observability**: `tracing` spans and `metrics` counters throughout

pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod query;
pub mod record;
pub mod remote;
pub mod repository;
pub mod resilience;
pub mod storage;
pub mod sync;

pub use cache::{CacheAsideService, FetchOptions, PageResult, PageSource};
pub use config::MirrorConfig;
pub use error::MirrorError;
pub use lifecycle::{StoreEvent, StoreProvider};
pub use metrics::LatencyTimer;
pub use query::{QueryDescriptor, QueryError, QueryTranslator};
pub use record::{ChangeLogEntry, ChangeOp, ClientSyncState, Record, StagedMutation};
pub use remote::{HttpRemote, RemoteApi, RemoteError};
pub use repository::Repository;
pub use resilience::{CircuitBreaker, CircuitConfig, CircuitError, RetryConfig};
pub use storage::{LocalStore, ReadMode, StoreError};
pub use sync::{ConnectionState, SyncEngine, SyncReport};
