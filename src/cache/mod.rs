// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache-aside reads and write-through saves.
//!
//! ```text
//!                 fetch_page(table, descriptor)
//!                            │
//!                  validate descriptor ──err──► Validation
//!                            │
//!              active rows > 0 ? ──yes──► local plan ──► Cache
//!                            │no
//!                  remote list (breaker)
//!                   │ok                 │err
//!              write back          all active rows
//!                   ▼                    ▼
//!                 Remote           OfflineFallback
//!
//!        store closed anywhere ──► empty Degraded page
//! ```
//!
//! Saves and deletes only touch the local store and the outbox; the sync
//! engine pushes them later.

mod options;
mod service;

pub use options::FetchOptions;
pub use service::CacheAsideService;

use std::future::Future;

use serde::Serialize;

use crate::error::MirrorError;
use crate::query::RemoteParams;
use crate::record::Record;
use crate::remote::ListResponse;
use crate::storage::LocalStore;

/// Where the rows of a [`PageResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PageSource {
    /// Answered from the local mirror
    Cache,
    /// Fetched from the remote API and written back
    Remote,
    /// Remote failed: every active cached row, ignoring filter, sort and window
    OfflineFallback,
    /// Local store closed: empty result
    Degraded,
}

impl PageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Remote => "remote",
            Self::OfflineFallback => "offline_fallback",
            Self::Degraded => "degraded",
        }
    }

    /// Whether the rows honour the requested filter, sort and window.
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Cache | Self::Remote)
    }
}

impl std::fmt::Display for PageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of rows plus the total the caller should paginate against.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub rows: Vec<Record>,
    /// Size of the filtered set (cache), remote item count (remote), or
    /// the number of rows returned (fallback)
    pub total: u64,
    pub source: PageSource,
}

impl PageResult {
    pub(crate) fn degraded() -> Self {
        Self {
            rows: Vec::new(),
            total: 0,
            source: PageSource::Degraded,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Clear `table` and reload it page by page through `fetch_page`.
///
/// Stops at the first short page or once the reported item count is
/// loaded. Returns `(rows, pages)`.
pub(crate) async fn repopulate<F, Fut>(
    store: &dyn LocalStore,
    table: &str,
    page_size: usize,
    mut fetch_page: F,
) -> Result<(usize, usize), MirrorError>
where
    F: FnMut(RemoteParams) -> Fut,
    Fut: Future<Output = Result<ListResponse, MirrorError>>,
{
    let page_size = page_size.max(1);
    store.clear(table).await?;

    let mut page = 1;
    let mut loaded = 0usize;
    loop {
        let response = fetch_page(RemoteParams::page(page, page_size)).await?;
        let received = response.data.len();
        store.apply_batch(table, &response.data).await?;
        loaded += received;

        if received < page_size || loaded as u64 >= response.meta.item_count {
            return Ok((loaded, page));
        }
        page += 1;
    }
}
