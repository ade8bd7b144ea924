// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the mirror.
//!
//! # Example
//!
//! ```
//! use mirror_sync::MirrorConfig;
//!
//! // Minimal config (uses defaults)
//! let config = MirrorConfig::default();
//! assert_eq!(config.push_chunk_size, 100);
//! assert!(config.store_path.is_none()); // in-memory store
//!
//! // Full config
//! let config = MirrorConfig {
//!     store_path: Some("mirror.db".into()),
//!     remote_base_url: "https://api.example.com/v1".into(),
//!     auth_token: Some("secret".into()),
//!     subscribed_tables: vec!["orders".into(), "customers".into()],
//!     sync_interval_ms: 15_000,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the store, the remote API client and the sync engine.
///
/// All fields have defaults. Production use needs at least
/// `remote_base_url` and `subscribed_tables`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MirrorConfig {
    /// SQLite file for the Local Store. `None` keeps the mirror in memory.
    #[serde(default)]
    pub store_path: Option<String>,

    /// Base URL of the remote REST API (e.g., "https://api.example.com/v1")
    #[serde(default = "default_remote_base_url")]
    pub remote_base_url: String,

    /// Bearer token sent with every remote call
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Identifies this client to the sync endpoints
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Background sync period
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Push settings
    #[serde(default = "default_push_chunk_size")]
    pub push_chunk_size: usize,
    #[serde(default = "default_push_max_retries")]
    pub push_max_retries: usize,

    /// Pull settings
    #[serde(default = "default_pull_limit")]
    pub pull_limit: usize,
    #[serde(default = "default_max_pull_rounds")]
    pub max_pull_rounds: usize,

    /// Page size used by full refreshes and resyncs
    #[serde(default = "default_refresh_page_size")]
    pub refresh_page_size: usize,

    /// Change-log retention passed to explicit cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Tables pulled by the sync engine
    #[serde(default)]
    pub subscribed_tables: Vec<String>,
}

fn default_remote_base_url() -> String { "http://localhost:3000".to_string() }
fn default_client_id() -> String { uuid::Uuid::new_v4().to_string() }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_sync_interval_ms() -> u64 { 30_000 }
fn default_push_chunk_size() -> usize { 100 }
fn default_push_max_retries() -> usize { 3 }
fn default_pull_limit() -> usize { 500 }
fn default_max_pull_rounds() -> usize { 20 }
fn default_refresh_page_size() -> usize { 200 }
fn default_retention_days() -> u32 { 30 }

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            remote_base_url: default_remote_base_url(),
            auth_token: None,
            client_id: default_client_id(),
            request_timeout_ms: default_request_timeout_ms(),
            sync_interval_ms: default_sync_interval_ms(),
            push_chunk_size: default_push_chunk_size(),
            push_max_retries: default_push_max_retries(),
            pull_limit: default_pull_limit(),
            max_pull_rounds: default_max_pull_rounds(),
            refresh_page_size: default_refresh_page_size(),
            retention_days: default_retention_days(),
            subscribed_tables: Vec::new(),
        }
    }
}

impl MirrorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Never zero, so `tokio::time::interval` cannot panic.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: MirrorConfig = serde_json::from_str(r#"{
            "remote_base_url": "https://api.example.com",
            "subscribed_tables": ["orders"]
        }"#)
        .unwrap();

        assert_eq!(config.remote_base_url, "https://api.example.com");
        assert_eq!(config.subscribed_tables, vec!["orders".to_string()]);
        assert_eq!(config.push_chunk_size, 100);
        assert_eq!(config.pull_limit, 500);
        assert!(!config.client_id.is_empty());
    }

    #[test]
    fn test_durations() {
        let config = MirrorConfig {
            request_timeout_ms: 1500,
            sync_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_millis(1500));
        assert_eq!(config.sync_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_each_default_gets_a_distinct_client_id() {
        assert_ne!(MirrorConfig::default().client_id, MirrorConfig::default().client_id);
    }
}
