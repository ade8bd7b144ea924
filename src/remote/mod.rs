// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The network seam.
//!
//! [`RemoteApi`] is everything the mirror needs from the server: the paged
//! list and by-id endpoints of each entity, plus the sync endpoints.
//! [`HttpRemote`] implements it over reqwest; tests script their own.
//!
//! ```text
//! GET  {base}/{entity}?page&take&order&search&filters&sorts
//! GET  {base}/{entity}/{id}
//! POST {base}/sync/pull
//! POST {base}/sync/push
//! POST {base}/sync/cleanup
//! GET  {base}/sync/status/{clientId}
//! ```

mod http;
mod types;

pub use http::HttpRemote;
pub use types::{
    CleanupRequest, CleanupResponse, ListResponse, MutationResult, MutationStatus, PageMeta,
    PullRequest, PullResponse, PushRequest, PushResponse, TableCursor, TableSyncStatus,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::query::RemoteParams;
use crate::record::Record;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Transport failure or timeout
    #[error("Network failure: {0}")]
    Network(String),
    /// HTTP 401 or 403
    #[error("Unauthorized (HTTP {0})")]
    Unauthorized(u16),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// Response body did not match the expected shape
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Worth retrying: transport failures and server-side 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Unauthorized(_) | Self::Decode(_) => false,
        }
    }
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// One page of an entity table.
    async fn list(&self, table: &str, params: &RemoteParams) -> Result<ListResponse, RemoteError>;

    /// A single row. Not-found is `Ok(None)`.
    async fn get_by_id(&self, table: &str, id: &str) -> Result<Option<Record>, RemoteError>;

    async fn pull_changes(&self, request: &PullRequest) -> Result<PullResponse, RemoteError>;

    /// One atomic chunk of staged mutations.
    async fn push_changes(&self, request: &PushRequest) -> Result<PushResponse, RemoteError>;

    /// Prune change-log entries older than `retention_days`. Returns the deleted count.
    async fn cleanup_changes(&self, retention_days: u32) -> Result<u64, RemoteError>;

    /// Server-side view of a client's sync state.
    async fn sync_status(&self, client_id: &str) -> Result<Vec<TableSyncStatus>, RemoteError>;
}
