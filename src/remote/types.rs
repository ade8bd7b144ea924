// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire types of the remote REST and sync endpoints. All camelCase.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{ChangeLogEntry, Record, StagedMutation};

/// `GET {base}/{entity}` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    pub data: Vec<Record>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    /// Total rows matching the request, across all pages
    pub item_count: u64,
    pub page: usize,
    pub take: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCursor {
    pub table: String,
    pub last_sequence: u64,
}

/// `POST {base}/sync/pull` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub client_id: String,
    pub tables: Vec<TableCursor>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub changes: Vec<ChangeLogEntry>,
    #[serde(default)]
    pub has_more: bool,
    /// Tables whose cursor is older than the server's retention boundary
    #[serde(default)]
    pub resync_required: Vec<String>,
    /// Current head sequence per table
    #[serde(default)]
    pub head_sequences: BTreeMap<String, u64>,
}

/// `POST {base}/sync/push` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub client_id: String,
    pub mutations: Vec<StagedMutation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Accepted,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResult {
    pub mutation_id: String,
    pub status: MutationStatus,
    /// Row version on the server when a conflict was detected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MutationResult {
    pub fn accepted(mutation_id: impl Into<String>) -> Self {
        Self {
            mutation_id: mutation_id.into(),
            status: MutationStatus::Accepted,
            server_version: None,
            message: None,
        }
    }

    pub fn conflict(mutation_id: impl Into<String>, server_version: u64, message: &str) -> Self {
        Self {
            mutation_id: mutation_id.into(),
            status: MutationStatus::Conflict,
            server_version: Some(server_version),
            message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub results: Vec<MutationResult>,
}

/// `POST {base}/sync/cleanup` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}

/// One row of `GET {base}/sync/status/{clientId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSyncStatus {
    pub table: String,
    pub last_sequence: u64,
    #[serde(default)]
    pub last_synced_at: Option<i64>,
    #[serde(default)]
    pub pending_changes: u64,
}
