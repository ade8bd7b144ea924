// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use super::descriptor::QueryDescriptor;
use super::local::LocalPlan;
use super::remote::RemoteParams;
use super::QueryError;

/// Translates a [`QueryDescriptor`] for either side of the cache.
///
/// Both translations validate first, so a malformed descriptor fails the
/// same way whichever path the cache service takes.
pub struct QueryTranslator;

impl QueryTranslator {
    /// Predicate, comparator and window for the Local Store.
    pub fn to_local_plan(descriptor: &QueryDescriptor) -> Result<LocalPlan, QueryError> {
        LocalPlan::from_descriptor(descriptor)
    }

    /// Page, take, order, filters, sorts and search for the list endpoint.
    pub fn to_remote_params(descriptor: &QueryDescriptor) -> Result<RemoteParams, QueryError> {
        RemoteParams::from_descriptor(descriptor)
    }
}
