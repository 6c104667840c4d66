//! Filters, sort orders and index definitions for document stores
//!
//! The vocabulary is deliberately small: equality, strictly-less-than and
//! conjunction cover job resolution, the TTL sweep and operational listings.
//! Backends translate it natively (SQL for SQLite) or evaluate it directly
//! with [`Filter::matches`].

use crate::error::{Result, StoreError};
use crate::traits::Document;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::LazyLock;

static FIELD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Predicate over top-level document fields
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value
    Eq(String, Value),
    /// Field is strictly less than value
    Lt(String, Value),
    /// Every inner filter holds
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Evaluate against a document; missing fields never match
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::Eq(field, expected) => document
                .get(field)
                .is_some_and(|actual| compare_values(actual, expected) == Some(Ordering::Equal)),
            Filter::Lt(field, bound) => document
                .get(field)
                .is_some_and(|actual| compare_values(actual, bound) == Some(Ordering::Less)),
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(document)),
        }
    }

    /// Every field name this filter references, checked against the identifier rules
    pub fn validate_fields(&self) -> Result<()> {
        match self {
            Filter::Eq(field, _) | Filter::Lt(field, _) => validate_field(field),
            Filter::And(filters) => filters.iter().try_for_each(Filter::validate_fields),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Sorting and paging for `find`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Direction in which documents equal on every sort key fall back to
    /// insertion order: that of the last sort key, ascending without one
    pub fn tie_break(&self) -> SortOrder {
        self.sort.last().map_or(SortOrder::Asc, |(_, order)| *order)
    }

    /// Order documents by the configured sort keys
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, order) in &self.sort {
            let ordering = match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let ordering = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Secondary index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<(String, SortOrder)>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.fields.push((field.into(), order));
        self
    }
}

/// What a `replace_one` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// An existing document was replaced
    Replaced,
    /// Nothing matched and a new document was inserted
    Upserted,
    /// Nothing matched and upsert was off
    NotFound,
}

/// Reject field names a backend could not safely embed in a query
pub fn validate_field(field: &str) -> Result<()> {
    if FIELD_REGEX.is_match(field) {
        Ok(())
    } else {
        Err(StoreError::InvalidQuery(format!("invalid field name '{}'", field)))
    }
}

/// Total order over comparable JSON scalars; mixed types do not compare
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_tie_break_follows_last_sort_key() {
        assert_eq!(FindOptions::new().tie_break(), SortOrder::Asc);
        let options = FindOptions::new()
            .sort_by("job_id", SortOrder::Asc)
            .sort_by("created_at", SortOrder::Desc);
        assert_eq!(options.tie_break(), SortOrder::Desc);
    }

    #[test]
    fn test_filter_matching() {
        let d = doc(json!({"job_id": "job-1", "step": 2, "expires_at": "2026-01-01T00:00:00.000Z"}));

        assert!(Filter::eq("job_id", "job-1").matches(&d));
        assert!(!Filter::eq("job_id", "job-2").matches(&d));
        assert!(Filter::eq("step", 2.0).matches(&d));
        assert!(Filter::lt("expires_at", "2026-06-01T00:00:00.000Z").matches(&d));
        assert!(!Filter::lt("expires_at", "2025-06-01T00:00:00.000Z").matches(&d));
        assert!(!Filter::eq("missing", "x").matches(&d));
        assert!(Filter::and(vec![Filter::eq("job_id", "job-1"), Filter::lt("step", 3)]).matches(&d));
    }

    #[test]
    fn test_sort_compare_desc() {
        let options = FindOptions::new().sort_by("created_at", SortOrder::Desc);
        let older = doc(json!({"created_at": "2026-01-01T00:00:00.000Z"}));
        let newer = doc(json!({"created_at": "2026-02-01T00:00:00.000Z"}));

        let mut docs = vec![older.clone(), newer.clone()];
        docs.sort_by(|a, b| options.compare(a, b));
        assert_eq!(docs, vec![newer, older]);
    }

    #[test]
    fn test_field_validation() {
        assert!(validate_field("job_id").is_ok());
        assert!(validate_field("job_id'); DROP TABLE x;--").is_err());
        assert!(Filter::and(vec![Filter::eq("ok", 1), Filter::eq("not ok", 1)])
            .validate_fields()
            .is_err());
    }
}
