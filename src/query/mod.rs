// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query translation.
//!
//! A [`QueryDescriptor`] is the paged, filtered, sorted request a grid or
//! list component sends. The [`QueryTranslator`] turns it into either a
//! [`LocalPlan`] evaluated against cached records or [`RemoteParams`] for
//! the remote list endpoint.
//!
//! ```text
//!                    ┌─────────────────┐
//!                    │ QueryDescriptor │
//!                    └────────┬────────┘
//!                             │ validate
//!              ┌──────────────┴──────────────┐
//!              ▼                             ▼
//!     ┌────────────────┐            ┌────────────────┐
//!     │   LocalPlan    │            │  RemoteParams  │
//!     │ filter → count │            │ page, take,    │
//!     │ → sort → slice │            │ filters, sorts │
//!     └────────────────┘            └────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use mirror_sync::query::{FilterOperator, QueryDescriptor, QueryTranslator};
//! use serde_json::json;
//!
//! let query = QueryDescriptor::rows(0, 20)
//!     .filter("name", FilterOperator::Contains, json!("acme"));
//!
//! let plan = QueryTranslator::to_local_plan(&query).unwrap();
//! assert_eq!(plan.limit, 20);
//!
//! let params = QueryTranslator::to_remote_params(&query).unwrap();
//! assert_eq!(params.page, 1);
//! ```

mod descriptor;
mod local;
mod operator;
mod remote;
mod translator;
pub mod value;

pub use descriptor::{FilterPredicate, QueryDescriptor, RowWindow, SortDirection, SortKey};
pub use local::LocalPlan;
pub use operator::FilterOperator;
pub use remote::RemoteParams;
pub use translator::QueryTranslator;

use thiserror::Error;

/// A malformed query descriptor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Unknown filter operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid row window: start {start}, end {end}")]
    InvalidWindow { start: usize, end: usize },

    #[error("Invalid value for {field} {op}: {reason}")]
    InvalidValue {
        field: String,
        op: &'static str,
        reason: String,
    },

    #[error("Empty field name in {0}")]
    EmptyField(&'static str),
}
