// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote list-endpoint parameters.
//!
//! ```text
//! GET {base}/{entity}?page=2&take=50&order=DESC
//!     &search=acme
//!     &filters={"filters":[{"field":"status","op":"eq","value":"open"}]}
//!     &sorts=[{"field":"createdAt","direction":"DESC"}]
//! ```

use serde_json::json;

use super::descriptor::{QueryDescriptor, SortDirection};
use super::QueryError;

/// Query-string parameters for the paged list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParams {
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    /// Direction of the first sort key
    pub order: SortDirection,
    /// `{"filters":[...]}` when any filter is present
    pub filters_json: Option<String>,
    /// `[{"field","direction"}, ...]` when any sort key is present
    pub sort_json: Option<String>,
    pub search: Option<String>,
}

impl RemoteParams {
    pub(super) fn from_descriptor(descriptor: &QueryDescriptor) -> Result<Self, QueryError> {
        descriptor.validate()?;

        let filters_json = (!descriptor.filters.is_empty())
            .then(|| json!({ "filters": descriptor.filters }).to_string());
        let sort_json = (!descriptor.sort.is_empty())
            .then(|| serde_json::Value::from(serialize_sorts(descriptor)).to_string());

        Ok(Self {
            page: descriptor.window.page()?,
            page_size: descriptor.window.page_size(),
            order: descriptor
                .sort
                .first()
                .map(|key| key.direction)
                .unwrap_or_default(),
            filters_json,
            sort_json,
            search: descriptor.search_text().map(str::to_string),
        })
    }

    /// Plain page request with no filters, used by full refreshes.
    pub fn page(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            order: SortDirection::Asc,
            filters_json: None,
            sort_json: None,
            search: None,
        }
    }

    /// `(name, value)` pairs in the order the endpoint documents them.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("take", self.page_size.to_string()),
            ("order", self.order.as_str().to_string()),
        ];
        if let Some(search) = &self.search {
            pairs.push(("search", search.clone()));
        }
        if let Some(filters) = &self.filters_json {
            pairs.push(("filters", filters.clone()));
        }
        if let Some(sorts) = &self.sort_json {
            pairs.push(("sorts", sorts.clone()));
        }
        pairs
    }
}

fn serialize_sorts(descriptor: &QueryDescriptor) -> Vec<serde_json::Value> {
    descriptor
        .sort
        .iter()
        .map(|key| json!({ "field": key.field, "direction": key.direction.as_str() }))
        .collect()
}
