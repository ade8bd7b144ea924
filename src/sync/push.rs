// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Outbox push: chunked, each chunk one atomic request retried as a whole.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::{SyncEngine, SyncReport};
use crate::config::MirrorConfig;
use crate::error::MirrorError;
use crate::metrics;
use crate::remote::{MutationStatus, PushRequest, PushResponse};
use crate::resilience::{retry_if, RetryConfig};
use crate::storage::LocalStore;

impl SyncEngine {
    /// Drain the outbox in chunks of `push_chunk_size`.
    ///
    /// Accepted and conflicted mutations both leave the outbox. Conflicts
    /// are collected across chunks and returned together.
    pub(super) async fn push(
        &self,
        store: &dyn LocalStore,
        config: &MirrorConfig,
        report: &mut SyncReport,
    ) -> Result<(), MirrorError> {
        let chunk_size = config.push_chunk_size.max(1);
        let retry_config = RetryConfig::push(config.push_max_retries);
        let mut conflicts = Vec::new();

        let result = loop {
            let mutations = store.staged(chunk_size).await?;
            if mutations.is_empty() {
                break Ok(());
            }

            let request = PushRequest {
                client_id: config.client_id.clone(),
                mutations,
            };
            let response = match retry_if(
                "sync_push",
                &retry_config,
                MirrorError::is_retryable_push,
                || self.push_chunk(&request),
            )
            .await
            {
                Ok(response) => response,
                Err(e) => break Err(e),
            };

            let mut accepted = 0;
            let mut rejected = 0;
            for result in response.results {
                match result.status {
                    MutationStatus::Accepted => accepted += 1,
                    MutationStatus::Conflict => {
                        warn!(
                            mutation_id = %result.mutation_id,
                            server_version = ?result.server_version,
                            "Push conflict"
                        );
                        rejected += 1;
                        conflicts.push(result);
                    }
                }
            }

            let done: Vec<String> = request
                .mutations
                .iter()
                .map(|m| m.mutation_id.clone())
                .collect();
            let removed = store.remove_staged(&done).await?;
            if removed == 0 {
                break Err(MirrorError::Protocol(
                    "push acknowledged mutations that could not be removed from the outbox"
                        .to_string(),
                ));
            }

            report.pushed += accepted;
            report.conflicts += rejected;
            metrics::record_push(accepted, rejected);
            debug!(chunk = done.len(), accepted, conflicts = rejected, "Push chunk acknowledged");
        };

        if let Ok(pending) = store.staged_count(None).await {
            metrics::set_pending_changes(pending);
        }
        result?;

        if report.pushed > 0 {
            info!(pushed = report.pushed, conflicts = report.conflicts, "Outbox pushed");
        }
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(MirrorError::Conflict { conflicts })
        }
    }

    /// One push attempt. A response that leaves any mutation of the chunk
    /// unacknowledged fails the attempt.
    async fn push_chunk(&self, request: &PushRequest) -> Result<PushResponse, MirrorError> {
        let response = self.remote.push_changes(request).await?;

        let acknowledged: HashSet<&str> = response
            .results
            .iter()
            .map(|r| r.mutation_id.as_str())
            .collect();
        let covered = request
            .mutations
            .iter()
            .filter(|m| acknowledged.contains(m.mutation_id.as_str()))
            .count();
        if covered < request.mutations.len() {
            return Err(MirrorError::PartialPush {
                acknowledged: covered,
                sent: request.mutations.len(),
            });
        }
        Ok(response)
    }
}
