// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{repopulate, FetchOptions, PageResult, PageSource};
use crate::config::MirrorConfig;
use crate::error::MirrorError;
use crate::lifecycle::StoreProvider;
use crate::metrics;
use crate::query::{LocalPlan, QueryDescriptor, QueryTranslator, RemoteParams};
use crate::record::{now_millis, ChangeOp, Record, StagedMutation};
use crate::repository::Repository;
use crate::remote::{ListResponse, RemoteApi, RemoteError};
use crate::resilience::{CircuitBreaker, CircuitConfig};
use crate::storage::{LocalStore, ReadMode, StoreError};

/// Decides per request whether to answer from the mirror or the remote API.
pub struct CacheAsideService {
    provider: Arc<StoreProvider>,
    remote: Arc<dyn RemoteApi>,
    circuit: CircuitBreaker,
    refresh_page_size: usize,
}

impl CacheAsideService {
    pub fn new(
        provider: Arc<StoreProvider>,
        remote: Arc<dyn RemoteApi>,
        config: &MirrorConfig,
    ) -> Self {
        Self::with_circuit(provider, remote, config, CircuitConfig::default())
    }

    pub fn with_circuit(
        provider: Arc<StoreProvider>,
        remote: Arc<dyn RemoteApi>,
        config: &MirrorConfig,
        circuit: CircuitConfig,
    ) -> Self {
        Self {
            provider,
            remote,
            circuit: CircuitBreaker::new("remote_api", circuit),
            refresh_page_size: config.refresh_page_size.max(1),
        }
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// One page of `table` using the default cache-first routing.
    pub async fn fetch_page(
        &self,
        table: &str,
        descriptor: &QueryDescriptor,
    ) -> Result<PageResult, MirrorError> {
        self.fetch_page_with(table, descriptor, FetchOptions::default())
            .await
    }

    /// One page of `table` with caller-chosen routing.
    ///
    /// An invalid descriptor fails before any I/O. A closed store yields an
    /// empty [`PageSource::Degraded`] page rather than an error.
    #[tracing::instrument(skip(self, descriptor, options), fields(table = %table, source))]
    pub async fn fetch_page_with(
        &self,
        table: &str,
        descriptor: &QueryDescriptor,
        options: FetchOptions,
    ) -> Result<PageResult, MirrorError> {
        let plan = QueryTranslator::to_local_plan(descriptor)?;
        let params = QueryTranslator::to_remote_params(descriptor)?;

        let result = match self.route_page(table, &plan, &params, options).await {
            Err(MirrorError::StoreClosed) => {
                debug!(table = %table, "Local store closed, returning degraded page");
                Ok(PageResult::degraded())
            }
            other => other,
        };

        match &result {
            Ok(page) => {
                tracing::Span::current().record("source", page.source.as_str());
                metrics::record_cache_lookup(table, page.source.as_str());
            }
            Err(e) => metrics::record_error("fetch_page", e.kind()),
        }
        result
    }

    async fn route_page(
        &self,
        table: &str,
        plan: &LocalPlan,
        params: &RemoteParams,
        options: FetchOptions,
    ) -> Result<PageResult, MirrorError> {
        let store = self.provider.get().await?;

        if !options.prefer_remote && store.count(table, ReadMode::ActiveOnly).await? > 0 {
            let rows = store.scan(table, ReadMode::ActiveOnly).await?;
            let (rows, total) = plan.apply(rows);
            return Ok(PageResult {
                rows,
                total,
                source: PageSource::Cache,
            });
        }

        match self.remote_list(table, params).await {
            Ok(response) => {
                let pending = pending_ids(store.as_ref(), table).await?;
                if options.write_back {
                    let written =
                        write_back_rows(store.as_ref(), table, &response.data, &pending).await?;
                    metrics::record_write_back(table, written);
                }
                let mut total = response.meta.item_count;
                let mut rows = Vec::with_capacity(response.data.len());
                for row in response.data {
                    if !pending.contains(&row.id) {
                        rows.push(row);
                        continue;
                    }
                    // Unpushed local edit wins over the remote copy
                    match store.get(table, &row.id, ReadMode::ActiveOnly).await? {
                        Some(local) => rows.push(local),
                        None => total = total.saturating_sub(1),
                    }
                }
                Ok(PageResult {
                    total,
                    rows,
                    source: PageSource::Remote,
                })
            }
            Err(e) if options.offline_fallback && !e.is_unrecoverable() => {
                warn!(table = %table, error = %e, "Remote list failed, serving every cached row");
                let rows = store.scan(table, ReadMode::ActiveOnly).await?;
                Ok(PageResult {
                    total: rows.len() as u64,
                    rows,
                    source: PageSource::OfflineFallback,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// A single row: mirror first, then the remote API.
    ///
    /// Remote not-found is `Ok(None)`. When the remote call fails the mirror
    /// is checked once more before the error is returned.
    #[tracing::instrument(skip(self), fields(table = %table, hit))]
    pub async fn fetch_by_id(&self, table: &str, id: &str) -> Result<Option<Record>, MirrorError> {
        match self.local_get(table, id).await? {
            Some(record) if record.is_active => {
                tracing::Span::current().record("hit", true);
                metrics::record_cache_lookup(table, "hit");
                return Ok(Some(record));
            }
            Some(_) if self.has_pending(table, id).await? => {
                debug!(table = %table, id, "Row retired locally with delete pending");
                metrics::record_cache_lookup(table, "retired");
                return Ok(None);
            }
            _ => {}
        }
        tracing::Span::current().record("hit", false);

        let remote = self.remote.clone();
        let fetched = self
            .circuit
            .call_if(RemoteError::is_transient, || async move {
                remote.get_by_id(table, id).await
            })
            .await;

        match fetched {
            Ok(Some(record)) => {
                self.write_back(table, std::slice::from_ref(&record)).await?;
                metrics::record_cache_lookup(table, "remote");
                Ok(Some(record))
            }
            Ok(None) => {
                metrics::record_cache_lookup(table, "not_found");
                Ok(None)
            }
            Err(e) => {
                let err = MirrorError::from(e);
                if let Some(record) = self.local_get(table, id).await?.filter(|r| r.is_active) {
                    debug!(table = %table, id, error = %err, "Remote lookup failed, row appeared locally");
                    metrics::record_cache_lookup(table, "recheck");
                    return Ok(Some(record));
                }
                metrics::record_error("fetch_by_id", err.kind());
                Err(err)
            }
        }
    }

    /// Write-through save: upsert locally and stage the mutation for push.
    ///
    /// Returns the row as stored. No remote call is made.
    #[tracing::instrument(skip(self, record), fields(table = %table, id = %record.id, op))]
    pub async fn save(&self, table: &str, mut record: Record) -> Result<Record, MirrorError> {
        let store = self.provider.get().await?;
        let existing = store.get(table, &record.id, ReadMode::IncludeInactive).await?;

        let now = now_millis();
        let op = match &existing {
            Some(previous) => {
                record.created_at = previous.created_at;
                ChangeOp::Update
            }
            None => {
                if record.created_at == 0 {
                    record.created_at = now;
                }
                ChangeOp::Create
            }
        };
        record.modified_at = now;
        tracing::Span::current().record("op", op.as_str());

        store.put(table, &record).await?;
        store.stage(&StagedMutation::new(table, op, &record)).await?;
        self.publish_pending(store.as_ref()).await;

        debug!(table = %table, id = %record.id, %op, "Row saved and staged");
        Ok(record)
    }

    /// Soft-delete locally and stage a delete mutation.
    ///
    /// Returns `false` when no active row had that id.
    #[tracing::instrument(skip(self), fields(table = %table))]
    pub async fn delete(&self, table: &str, id: &str) -> Result<bool, MirrorError> {
        let Some(record) = self.repository(table).retire(id).await? else {
            return Ok(false);
        };

        let store = self.provider.get().await?;
        store
            .stage(&StagedMutation::new(table, ChangeOp::Delete, &record))
            .await?;
        self.publish_pending(store.as_ref()).await;

        debug!(table = %table, id, "Row retired and staged");
        Ok(true)
    }

    /// Local-only CRUD on one table, sharing this service's store.
    pub fn repository(&self, table: &str) -> Repository {
        Repository::new(self.provider.clone(), table)
    }

    /// Clear `table` and repopulate it from the remote list, page by page.
    ///
    /// Stops at the first short page or once the reported total is loaded.
    /// Returns the number of rows loaded. Errors propagate; there is no
    /// offline fallback here.
    #[tracing::instrument(skip(self), fields(table = %table, rows))]
    pub async fn refresh_all(&self, table: &str) -> Result<usize, MirrorError> {
        let store = self.provider.get().await?;
        store.schema().require(table)?;

        let fetch = |params: RemoteParams| async move { self.remote_list(table, &params).await };
        let (loaded, pages) =
            repopulate(store.as_ref(), table, self.refresh_page_size, fetch).await?;

        tracing::Span::current().record("rows", loaded);
        metrics::record_write_back(table, loaded);
        info!(table = %table, rows = loaded, pages, "Table refreshed from remote");
        Ok(loaded)
    }

    async fn remote_list(
        &self,
        table: &str,
        params: &RemoteParams,
    ) -> Result<ListResponse, MirrorError> {
        let remote = self.remote.clone();
        Ok(self
            .circuit
            .call_if(RemoteError::is_transient, || async move {
                remote.list(table, params).await
            })
            .await?)
    }

    /// Row from the mirror, retired or not. A closed store counts as a miss.
    async fn local_get(&self, table: &str, id: &str) -> Result<Option<Record>, MirrorError> {
        let lookup = async {
            let store = self.provider.get().await?;
            store.get(table, id, ReadMode::IncludeInactive).await
        };
        match lookup.await {
            Ok(found) => Ok(found),
            Err(e) => match MirrorError::from(e) {
                MirrorError::StoreClosed => {
                    debug!(table = %table, id, "Local store closed, treating lookup as a miss");
                    Ok(None)
                }
                other => Err(other),
            },
        }
    }

    async fn has_pending(&self, table: &str, id: &str) -> Result<bool, MirrorError> {
        let store = self.provider.get().await?;
        Ok(pending_ids(store.as_ref(), table).await?.contains(id))
    }

    async fn write_back(&self, table: &str, records: &[Record]) -> Result<(), MirrorError> {
        let written = async {
            let store = self.provider.get().await?;
            let pending = pending_ids(store.as_ref(), table).await?;
            write_back_rows(store.as_ref(), table, records, &pending).await
        };
        match written.await {
            Ok(rows) => {
                metrics::record_write_back(table, rows);
                Ok(())
            }
            Err(e) => match MirrorError::from(e) {
                MirrorError::StoreClosed => {
                    debug!(table = %table, "Local store closed, skipping write-back");
                    Ok(())
                }
                other => Err(other),
            },
        }
    }

    async fn publish_pending(&self, store: &dyn LocalStore) {
        if let Ok(pending) = store.staged_count(None).await {
            metrics::set_pending_changes(pending);
        }
    }
}

/// Ids in `table` with a mutation still waiting in the outbox.
async fn pending_ids(store: &dyn LocalStore, table: &str) -> Result<HashSet<String>, StoreError> {
    Ok(store
        .staged(usize::MAX)
        .await?
        .into_iter()
        .filter(|m| m.table == table)
        .map(|m| m.record_id)
        .collect())
}

/// Version-guarded write of remote rows. Rows with a pending local
/// mutation are left alone until the push settles them.
async fn write_back_rows(
    store: &dyn LocalStore,
    table: &str,
    records: &[Record],
    pending: &HashSet<String>,
) -> Result<usize, StoreError> {
    let settled: Vec<Record> = records
        .iter()
        .filter(|r| !pending.contains(&r.id))
        .cloned()
        .collect();
    store.apply_batch(table, &settled).await
}
