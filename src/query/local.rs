// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local query plan - evaluates a descriptor against cached records.
//!
//! Only the first sort key is honoured here. The remote backend is
//! authoritative for multi-key ordering; the local mirror deliberately
//! keeps the single-key sort.

use std::cmp::Ordering;

use serde_json::Value;

use crate::record::Record;

use super::descriptor::{FilterPredicate, QueryDescriptor, SortKey};
use super::operator::FilterOperator;
use super::value::{compare_defined, compare_nulls_last, is_missing, text_of, values_equal};
use super::QueryError;

/// Filter predicate, sort comparator and window for the Local Store.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlan {
    filters: Vec<FilterPredicate>,
    /// Lower-cased search text
    search: Option<String>,
    pub sort: Option<SortKey>,
    pub offset: usize,
    pub limit: usize,
}

impl LocalPlan {
    pub(super) fn from_descriptor(descriptor: &QueryDescriptor) -> Result<Self, QueryError> {
        descriptor.validate()?;
        Ok(Self {
            filters: descriptor.filters.clone(),
            search: descriptor.search_text().map(str::to_lowercase),
            sort: descriptor.sort.first().cloned(),
            offset: descriptor.window.offset(),
            limit: descriptor.window.page_size(),
        })
    }

    /// Whether `record` passes every filter and the search text.
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| filter_matches(f, record))
            && self
                .search
                .as_deref()
                .map_or(true, |needle| search_matches(needle, record))
    }

    /// Order two records by the first sort key. Without a sort key every
    /// pair is equal, so a stable sort keeps store order.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        match &self.sort {
            Some(key) => compare_nulls_last(
                a.value_of(&key.field).as_ref(),
                b.value_of(&key.field).as_ref(),
                key.direction,
            ),
            None => Ordering::Equal,
        }
    }

    pub fn predicate(&self) -> impl Fn(&Record) -> bool + '_ {
        move |record| self.matches(record)
    }

    pub fn comparator(&self) -> impl Fn(&Record, &Record) -> Ordering + '_ {
        move |a, b| self.compare(a, b)
    }

    /// Filter, count, sort the full filtered set, then slice the window.
    ///
    /// Returns the page and the total number of matching rows.
    pub fn apply(&self, rows: Vec<Record>) -> (Vec<Record>, u64) {
        let mut matching: Vec<Record> = rows.into_iter().filter(self.predicate()).collect();
        let total = matching.len() as u64;

        if self.sort.is_some() {
            matching.sort_by(self.comparator());
        }

        let page = matching
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect();
        (page, total)
    }
}

fn filter_matches(filter: &FilterPredicate, record: &Record) -> bool {
    let actual = record.value_of(&filter.field);
    let actual = actual.as_ref();
    let operand = &filter.value;

    match filter.op {
        FilterOperator::Equals => actual.map_or(operand.is_null(), |v| values_equal(v, operand)),
        FilterOperator::NotEquals => !actual.map_or(operand.is_null(), |v| values_equal(v, operand)),
        FilterOperator::Contains => text_match(actual, operand, |hay, needle| hay.contains(needle)),
        FilterOperator::NotContains => {
            !text_match(actual, operand, |hay, needle| hay.contains(needle))
        }
        FilterOperator::StartsWith => {
            text_match(actual, operand, |hay, needle| hay.starts_with(needle))
        }
        FilterOperator::EndsWith => text_match(actual, operand, |hay, needle| hay.ends_with(needle)),
        FilterOperator::LessThan => ordering_match(actual, operand, |o| o == Ordering::Less),
        FilterOperator::LessThanOrEqual => ordering_match(actual, operand, |o| o != Ordering::Greater),
        FilterOperator::GreaterThan => ordering_match(actual, operand, |o| o == Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => ordering_match(actual, operand, |o| o != Ordering::Less),
        FilterOperator::In => match (actual, operand.as_array()) {
            (Some(v), Some(candidates)) => candidates.iter().any(|c| values_equal(v, c)),
            _ => false,
        },
        FilterOperator::Between => match operand.as_array().map(Vec::as_slice) {
            Some([low, high]) => {
                ordering_match(actual, low, |o| o != Ordering::Less)
                    && ordering_match(actual, high, |o| o != Ordering::Greater)
            }
            _ => false,
        },
    }
}

fn text_match(actual: Option<&Value>, operand: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match (actual.and_then(text_of), text_of(operand)) {
        (Some(hay), Some(needle)) => test(&hay.to_lowercase(), &needle.to_lowercase()),
        _ => false,
    }
}

/// Missing values never satisfy an ordering comparison.
fn ordering_match(actual: Option<&Value>, operand: &Value, test: impl Fn(Ordering) -> bool) -> bool {
    if is_missing(actual) {
        return false;
    }
    actual.map_or(false, |v| test(compare_defined(v, operand)))
}

fn search_matches(needle: &str, record: &Record) -> bool {
    record.id.to_lowercase().contains(needle)
        || record
            .fields
            .values()
            .filter_map(text_of)
            .any(|text| text.to_lowercase().contains(needle))
}
