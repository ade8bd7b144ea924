// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{
    CleanupRequest, CleanupResponse, ListResponse, PullRequest, PullResponse, PushRequest,
    PushResponse, TableSyncStatus,
};
use super::{RemoteApi, RemoteError};
use crate::config::MirrorConfig;
use crate::metrics::{self, LatencyTimer};
use crate::query::RemoteParams;
use crate::record::Record;

/// reqwest client for the remote REST API.
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpRemote {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| RemoteError::Network(format!("invalid base url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Network(format!("'{}' cannot be a base url", base_url)));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    pub fn from_config(config: &MirrorConfig) -> Result<Self, RemoteError> {
        Self::new(
            &config.remote_base_url,
            config.auth_token.clone(),
            config.request_timeout(),
        )
    }

    /// `{base}/{segments...}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send, map status codes, decode JSON. `Ok(None)` on 404 when `allow_missing`.
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
        allow_missing: bool,
    ) -> Result<Option<T>, RemoteError> {
        let _timer = LatencyTimer::new(operation);
        let result = self.execute_inner(builder, allow_missing).await;
        let status = match &result {
            Ok(_) => "success",
            Err(RemoteError::Network(_)) => "network_error",
            Err(RemoteError::Unauthorized(_)) => "unauthorized",
            Err(RemoteError::Status { .. }) => "http_error",
            Err(RemoteError::Decode(_)) => "decode_error",
        };
        metrics::record_remote_call(operation, status);
        if let Err(e) = &result {
            debug!(operation, error = %e, "Remote call failed");
        }
        result
    }

    async fn execute_inner<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        allow_missing: bool,
    ) -> Result<Option<T>, RemoteError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if allow_missing && status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn execute_required<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<T, RemoteError> {
        self.execute(operation, builder, false)
            .await?
            .ok_or_else(|| RemoteError::Decode("empty response".to_string()))
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn list(&self, table: &str, params: &RemoteParams) -> Result<ListResponse, RemoteError> {
        let request = self
            .client
            .get(self.url(&[table]))
            .query(&params.to_query_pairs());
        self.execute_required("list", request).await
    }

    async fn get_by_id(&self, table: &str, id: &str) -> Result<Option<Record>, RemoteError> {
        let request = self.client.get(self.url(&[table, id]));
        self.execute("get_by_id", request, true).await
    }

    async fn pull_changes(&self, request: &PullRequest) -> Result<PullResponse, RemoteError> {
        let builder = self.client.post(self.url(&["sync", "pull"])).json(request);
        self.execute_required("pull", builder).await
    }

    async fn push_changes(&self, request: &PushRequest) -> Result<PushResponse, RemoteError> {
        let builder = self.client.post(self.url(&["sync", "push"])).json(request);
        self.execute_required("push", builder).await
    }

    async fn cleanup_changes(&self, retention_days: u32) -> Result<u64, RemoteError> {
        let builder = self
            .client
            .post(self.url(&["sync", "cleanup"]))
            .json(&CleanupRequest { retention_days });
        let response: CleanupResponse = self.execute_required("cleanup", builder).await?;
        Ok(response.deleted)
    }

    async fn sync_status(&self, client_id: &str) -> Result<Vec<TableSyncStatus>, RemoteError> {
        let builder = self.client.get(self.url(&["sync", "status", client_id]));
        self.execute_required("sync_status", builder).await
    }
}
