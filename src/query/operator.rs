// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter operator vocabulary.
//!
//! The wire names are shared with the remote list endpoint and must match
//! exactly. Parsing an unknown name is an error, never a default.
//!
//! ```text
//! eq           field == value
//! neq          field != value
//! contains     substring, case-insensitive
//! notContains  no substring, case-insensitive
//! startsWith   prefix, case-insensitive
//! endsWith     suffix, case-insensitive
//! lt lte gt gte
//! in           field is one of [v1, v2, ...]
//! between      low <= field <= high, value is [low, high]
//! ```

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    In,
    Between,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 12] = [
        Self::Equals,
        Self::NotEquals,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::LessThan,
        Self::LessThanOrEqual,
        Self::GreaterThan,
        Self::GreaterThanOrEqual,
        Self::In,
        Self::Between,
    ];

    /// Wire name used in the remote `filters` JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "eq",
            Self::NotEquals => "neq",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::LessThan => "lt",
            Self::LessThanOrEqual => "lte",
            Self::GreaterThan => "gt",
            Self::GreaterThanOrEqual => "gte",
            Self::In => "in",
            Self::Between => "between",
        }
    }

    /// Operators that match on the text form of the field.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            Self::Contains | Self::NotContains | Self::StartsWith | Self::EndsWith
        )
    }

    /// Operators that order-compare the field with a single operand.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Self::LessThan | Self::LessThanOrEqual | Self::GreaterThan | Self::GreaterThanOrEqual
        )
    }
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| QueryError::UnknownOperator(s.to_string()))
    }
}

impl Serialize for FilterOperator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FilterOperator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
