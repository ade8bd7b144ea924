// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store lifecycle: lazy construction, reset, diagnostics.
//!
//! The [`StoreProvider`] is built once at start-up from a factory and handed
//! to every consumer (cache service, repositories, sync engine). The store
//! itself is opened on the first real [`get`](StoreProvider::get).
//!
//! ```text
//!   get() ──► initialized? ──yes──► same Arc
//!                 │no
//!                 ▼
//!         lock init mutex ──► factory().await ──► Opened{generation}
//!
//!   reset() ──► take Arc ──► close().await ──► Closed{generation}
//!                                │
//!                       error returned, Arc dropped anyway
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use mirror_sync::lifecycle::StoreProvider;
//! use mirror_sync::storage::{StoreSchema, TableSchema};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), mirror_sync::storage::StoreError> {
//! let schema = StoreSchema::new().table(TableSchema::new("orders").index("status"));
//! let provider = StoreProvider::sqlite("mirror.db", schema);
//!
//! assert!(provider.get_if_initialized().is_none());
//! let a = provider.get().await?;
//! let b = provider.get().await?;
//! assert!(Arc::ptr_eq(&a, &b));
//!
//! provider.reset().await?;
//! assert!(provider.get_if_initialized().is_none());
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::metrics;
use crate::storage::{
    LocalStore, MemoryStore, SqliteStore, StoreDiagnostics, StoreError, StoreSchema,
};

type StoreFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn LocalStore>, StoreError>> + Send + Sync>;

type StoreObserver = Arc<dyn Fn(StoreEvent) + Send + Sync>;

/// Lifecycle notifications delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Opened { generation: u64 },
    Closed { generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDiagnostics {
    /// Number of stores constructed so far
    pub generation: u64,
    pub initialized: bool,
    pub store: Option<StoreDiagnostics>,
}

/// Owns the single live Local Store instance.
pub struct StoreProvider {
    factory: StoreFactory,
    /// Held across construction and close
    init: Mutex<()>,
    current: RwLock<Option<Arc<dyn LocalStore>>>,
    generation: AtomicU64,
    observers: RwLock<Vec<StoreObserver>>,
}

impl StoreProvider {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn LocalStore>, StoreError>> + Send + 'static,
    {
        Self {
            factory: Arc::new(move || factory().boxed()),
            init: Mutex::new(()),
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Volatile store, rebuilt empty after every reset.
    pub fn memory(schema: StoreSchema) -> Self {
        Self::new(move || {
            let schema = schema.clone();
            async move {
                let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new(schema)?);
                Ok::<_, StoreError>(store)
            }
        })
    }

    pub fn sqlite(path: impl Into<PathBuf>, schema: StoreSchema) -> Self {
        let path = path.into();
        Self::new(move || {
            let (path, schema) = (path.clone(), schema.clone());
            async move {
                let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::open(path, schema).await?);
                Ok::<_, StoreError>(store)
            }
        })
    }

    /// SQLite when `store_path` is set, memory otherwise.
    pub fn from_config(config: &MirrorConfig, schema: StoreSchema) -> Self {
        match &config.store_path {
            Some(path) => Self::sqlite(path, schema),
            None => Self::memory(schema),
        }
    }

    /// Register a lifecycle observer. Called outside the provider's locks.
    pub fn on_event(&self, observer: impl Fn(StoreEvent) + Send + Sync + 'static) {
        self.observers.write().push(Arc::new(observer));
    }

    /// The live store, opening it on first use.
    ///
    /// Concurrent callers during construction wait for the one in flight
    /// and receive the same instance.
    pub async fn get(&self) -> Result<Arc<dyn LocalStore>, StoreError> {
        if let Some(store) = self.get_if_initialized() {
            return Ok(store);
        }

        let guard = self.init.lock().await;
        if let Some(store) = self.get_if_initialized() {
            return Ok(store);
        }

        let store = (self.factory)().await?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.current.write() = Some(store.clone());
        drop(guard);

        info!(backend = store.backend(), generation, "Local store opened");
        metrics::record_store_event("opened");
        self.notify(StoreEvent::Opened { generation });
        Ok(store)
    }

    /// The live store without triggering construction.
    pub fn get_if_initialized(&self) -> Option<Arc<dyn LocalStore>> {
        self.current.read().clone()
    }

    /// Close the live store and forget it; the next `get()` opens a new one.
    ///
    /// A close failure is returned, but the instance is dropped regardless.
    pub async fn reset(&self) -> Result<(), StoreError> {
        let _guard = self.init.lock().await;
        let Some(store) = self.current.write().take() else {
            debug!("Reset with no live store");
            return Ok(());
        };

        let generation = self.generation.load(Ordering::Acquire);
        let result = store.close().await;
        match &result {
            Ok(()) => info!(generation, "Local store closed"),
            Err(e) => warn!(generation, error = %e, "Local store close failed, instance dropped"),
        }
        metrics::record_store_event("closed");
        self.notify(StoreEvent::Closed { generation });
        result
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn diagnostics(&self) -> Result<ProviderDiagnostics, StoreError> {
        let store = match self.get_if_initialized() {
            Some(store) => Some(store.diagnostics().await?),
            None => None,
        };
        Ok(ProviderDiagnostics {
            generation: self.generation(),
            initialized: store.is_some(),
            store,
        })
    }

    fn notify(&self, event: StoreEvent) {
        let observers: Vec<StoreObserver> = self.observers.read().clone();
        for observer in observers {
            observer(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ClientSyncState, Record, StagedMutation};
    use crate::storage::{ReadMode, TableSchema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn schema() -> StoreSchema {
        StoreSchema::new().table(TableSchema::new("orders"))
    }

    #[tokio::test]
    async fn test_get_returns_same_instance() {
        let provider = StoreProvider::memory(schema());
        assert!(provider.get_if_initialized().is_none());

        let a = provider.get().await.unwrap();
        let b = provider.get().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(provider.generation(), 1);
    }

    #[tokio::test]
    async fn test_reset_builds_fresh_instance() {
        let provider = StoreProvider::memory(schema());
        let first = provider.get().await.unwrap();
        first
            .put("orders", &Record::from_json("o1".into(), json!({})))
            .await
            .unwrap();

        provider.reset().await.unwrap();
        assert!(first.is_closed());
        assert!(provider.get_if_initialized().is_none());

        let second = provider.get().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.count("orders", ReadMode::ActiveOnly).await.unwrap(), 0);
        assert_eq!(provider.generation(), 2);
    }

    #[tokio::test]
    async fn test_reset_without_store_is_noop() {
        let provider = StoreProvider::memory(schema());
        provider.reset().await.unwrap();
        assert_eq!(provider.generation(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_get_constructs_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let provider = Arc::new(StoreProvider::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, StoreError>(Arc::new(MemoryStore::new(schema())?) as Arc<dyn LocalStore>)
            }
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.get().await.unwrap() })
            })
            .collect();

        let mut stores = Vec::new();
        for handle in handles {
            stores.push(handle.await.unwrap());
        }

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(stores.iter().all(|s| Arc::ptr_eq(s, &stores[0])));
    }

    #[tokio::test]
    async fn test_failed_construction_leaves_provider_empty() {
        let provider = StoreProvider::new(|| async {
            Err::<Arc<dyn LocalStore>, _>(StoreError::Backend("disk full".into()))
        });

        assert!(provider.get().await.is_err());
        assert!(provider.get_if_initialized().is_none());
        assert_eq!(provider.generation(), 0);
    }

    #[tokio::test]
    async fn test_observers_see_open_and_close() {
        let provider = StoreProvider::memory(schema());
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = events.clone();
        provider.on_event(move |event| sink.lock().push(event));

        provider.get().await.unwrap();
        provider.get().await.unwrap();
        provider.reset().await.unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                StoreEvent::Opened { generation: 1 },
                StoreEvent::Closed { generation: 1 }
            ]
        );
    }

    #[tokio::test]
    async fn test_diagnostics() {
        let provider = StoreProvider::memory(schema());
        let before = provider.diagnostics().await.unwrap();
        assert!(!before.initialized);
        assert!(before.store.is_none());

        provider.get().await.unwrap();
        let after = provider.diagnostics().await.unwrap();
        assert!(after.initialized);
        assert_eq!(after.generation, 1);
        assert_eq!(after.store.map(|s| s.backend), Some("memory"));
    }

    #[tokio::test]
    async fn test_from_config_picks_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = MirrorConfig {
            store_path: Some(dir.path().join("m.db").to_string_lossy().into_owned()),
            ..Default::default()
        };
        let store = StoreProvider::from_config(&config, schema()).get().await.unwrap();
        assert_eq!(store.backend(), "sqlite");

        let store = StoreProvider::from_config(&MirrorConfig::default(), schema())
            .get()
            .await
            .unwrap();
        assert_eq!(store.backend(), "memory");
    }

    /// Delegates to a memory store but refuses to close.
    struct StuckStore(MemoryStore);

    #[async_trait]
    impl LocalStore for StuckStore {
        fn backend(&self) -> &'static str {
            "stuck"
        }
        fn schema(&self) -> &StoreSchema {
            self.0.schema()
        }
        fn is_closed(&self) -> bool {
            self.0.is_closed()
        }
        async fn get(&self, t: &str, id: &str, m: ReadMode) -> Result<Option<Record>, StoreError> {
            self.0.get(t, id, m).await
        }
        async fn put(&self, t: &str, r: &Record) -> Result<(), StoreError> {
            self.0.put(t, r).await
        }
        async fn apply_change(&self, t: &str, r: &Record) -> Result<bool, StoreError> {
            self.0.apply_change(t, r).await
        }
        async fn scan(&self, t: &str, m: ReadMode) -> Result<Vec<Record>, StoreError> {
            self.0.scan(t, m).await
        }
        async fn count(&self, t: &str, m: ReadMode) -> Result<u64, StoreError> {
            self.0.count(t, m).await
        }
        async fn clear(&self, t: &str) -> Result<(), StoreError> {
            self.0.clear(t).await
        }
        async fn stage(&self, m: &StagedMutation) -> Result<(), StoreError> {
            self.0.stage(m).await
        }
        async fn staged(&self, limit: usize) -> Result<Vec<StagedMutation>, StoreError> {
            self.0.staged(limit).await
        }
        async fn remove_staged(&self, ids: &[String]) -> Result<usize, StoreError> {
            self.0.remove_staged(ids).await
        }
        async fn staged_count(&self, t: Option<&str>) -> Result<u64, StoreError> {
            self.0.staged_count(t).await
        }
        async fn sync_state(&self, c: &str, t: &str) -> Result<Option<ClientSyncState>, StoreError> {
            self.0.sync_state(c, t).await
        }
        async fn put_sync_state(&self, s: &ClientSyncState) -> Result<(), StoreError> {
            self.0.put_sync_state(s).await
        }
        async fn clear_sync_state(&self, c: &str) -> Result<usize, StoreError> {
            self.0.clear_sync_state(c).await
        }
        async fn close(&self) -> Result<(), StoreError> {
            Err(StoreError::Backend("file handle busy".into()))
        }
        async fn diagnostics(&self) -> Result<StoreDiagnostics, StoreError> {
            self.0.diagnostics().await
        }
    }

    #[tokio::test]
    async fn test_failed_close_still_drops_instance() {
        let provider = StoreProvider::new(|| async {
            Ok::<_, StoreError>(Arc::new(StuckStore(MemoryStore::new(schema())?)) as Arc<dyn LocalStore>)
        });
        let first = provider.get().await.unwrap();

        assert!(matches!(provider.reset().await, Err(StoreError::Backend(_))));
        assert!(provider.get_if_initialized().is_none());

        let second = provider.get().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
