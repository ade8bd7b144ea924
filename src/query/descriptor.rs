// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query descriptor - a backend-agnostic paged, filtered, sorted request.
//!
//! # Example
//!
//! ```rust
//! use mirror_sync::query::{FilterOperator, QueryDescriptor, SortDirection};
//! use serde_json::json;
//!
//! let query = QueryDescriptor::rows(100, 150)
//!     .filter("status", FilterOperator::Equals, json!("open"))
//!     .filter("total", FilterOperator::Between, json!([10, 500]))
//!     .sort_by("createdAt", SortDirection::Desc)
//!     .search("acme");
//!
//! assert_eq!(query.window.page_size(), 50);
//! assert!(query.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::operator::FilterOperator;
use super::QueryError;

/// The requested slice of the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowWindow {
    /// Grid-style `[start_row, end_row)` indices
    Rows {
        #[serde(rename = "startRow")]
        start_row: usize,
        #[serde(rename = "endRow")]
        end_row: usize,
    },
    /// `offset` + `count`
    OffsetCount { offset: usize, count: usize },
}

impl RowWindow {
    /// `(start, end)` as row indices, end exclusive.
    pub fn bounds(&self) -> (usize, usize) {
        match *self {
            Self::Rows { start_row, end_row } => (start_row, end_row),
            Self::OffsetCount { offset, count } => (offset, offset.saturating_add(count)),
        }
    }

    pub fn offset(&self) -> usize {
        self.bounds().0
    }

    /// `end_row - start_row` (0 for inverted windows, which fail validation).
    pub fn page_size(&self) -> usize {
        let (start, end) = self.bounds();
        end.saturating_sub(start)
    }

    /// 1-based page number: `floor(start / page_size) + 1`.
    pub fn page(&self) -> Result<usize, QueryError> {
        self.validate()?;
        Ok(self.offset() / self.page_size() + 1)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        let (start, end) = self.bounds();
        if end <= start {
            return Err(QueryError::InvalidWindow { start, end });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC", alias = "asc")]
    Asc,
    #[serde(rename = "DESC", alias = "desc")]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// `field <op> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub field: String,
    pub op: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl FilterPredicate {
    pub fn new(field: impl Into<String>, op: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Check the operand's shape against the operator.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.field.is_empty() {
            return Err(QueryError::EmptyField("filter"));
        }
        let invalid = |reason: &str| QueryError::InvalidValue {
            field: self.field.clone(),
            op: self.op.as_str(),
            reason: reason.to_string(),
        };
        match self.op {
            FilterOperator::In => {
                if !self.value.is_array() {
                    return Err(invalid("expected an array of candidates"));
                }
            }
            FilterOperator::Between => match self.value.as_array() {
                Some(bounds) if bounds.len() == 2 && bounds.iter().all(|b| !b.is_null()) => {}
                _ => return Err(invalid("expected [low, high]")),
            },
            op if op.is_text() => {
                if !matches!(self.value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                    return Err(invalid("expected a scalar"));
                }
            }
            op if op.is_ordering() => {
                if !matches!(self.value, Value::String(_) | Value::Number(_)) {
                    return Err(invalid("expected a number or string"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Paged, filtered, sorted request produced by a UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    #[serde(flatten)]
    pub window: RowWindow,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl QueryDescriptor {
    /// Window by `[start_row, end_row)`.
    pub fn rows(start_row: usize, end_row: usize) -> Self {
        Self::with_window(RowWindow::Rows { start_row, end_row })
    }

    /// Window by `offset` + `count`.
    pub fn offset(offset: usize, count: usize) -> Self {
        Self::with_window(RowWindow::OffsetCount { offset, count })
    }

    fn with_window(window: RowWindow) -> Self {
        Self {
            window,
            sort: Vec::new(),
            filters: Vec::new(),
            search: None,
        }
    }

    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: FilterOperator, value: Value) -> Self {
        self.filters.push(FilterPredicate::new(field, op, value));
        self
    }

    #[must_use]
    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    /// Search text, if non-blank.
    pub fn search_text(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        self.window.validate()?;
        if self.sort.iter().any(|key| key.field.is_empty()) {
            return Err(QueryError::EmptyField("sort"));
        }
        for filter in &self.filters {
            filter.validate()?;
        }
        Ok(())
    }
}
