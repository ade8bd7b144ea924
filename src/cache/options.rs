// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-call routing for page fetches.
//!
//! # Example
//!
//! ```rust
//! use mirror_sync::cache::FetchOptions;
//!
//! // Default: answer from the mirror whenever the table has rows
//! let opts = FetchOptions::default();
//! assert!(!opts.prefer_remote);
//!
//! // Ask the remote first, still falling back to the mirror when offline
//! let opts = FetchOptions::remote_first();
//! assert!(opts.prefer_remote && opts.write_back);
//! ```

/// How [`fetch_page_with`](super::CacheAsideService::fetch_page_with) routes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip the cache-hit check and call the remote first.
    ///
    /// Default: `false`
    pub prefer_remote: bool,

    /// Upsert remote rows into the local store.
    ///
    /// Default: `true`
    pub write_back: bool,

    /// Serve every cached row when the remote call fails.
    ///
    /// Default: `true`
    pub offline_fallback: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            prefer_remote: false,
            write_back: true,
            offline_fallback: true,
        }
    }
}

impl FetchOptions {
    /// Cache-aside: local when populated, remote otherwise.
    #[must_use]
    pub fn cache_first() -> Self {
        Self::default()
    }

    /// Remote first, mirror as the offline fallback.
    #[must_use]
    pub fn remote_first() -> Self {
        Self {
            prefer_remote: true,
            ..Self::default()
        }
    }

    /// Remote only: no write-back, errors propagate.
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            prefer_remote: true,
            write_back: false,
            offline_fallback: false,
        }
    }

    #[must_use]
    pub fn with_write_back(mut self, write_back: bool) -> Self {
        self.write_back = write_back;
        self
    }

    #[must_use]
    pub fn with_offline_fallback(mut self, offline_fallback: bool) -> Self {
        self.offline_fallback = offline_fallback;
        self
    }
}
