//! Store-neutral search filters.
//!
//! A [`Filter`] is evaluated directly over JSON by [`crate::MemoryStore`] and
//! compiled to a `WHERE` clause by [`crate::SurrealStore`].

use std::cmp::Ordering;

use serde_json::Value;

/// Predicate over a document body. Field names are dotted paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
    Lt { field: String, value: Value },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Evaluate against a document body. Missing fields never match.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq { field, value } => lookup(doc, field).is_some_and(|v| v == value),
            Filter::Lt { field, value } => lookup(doc, field)
                .and_then(|v| compare(v, value))
                .is_some_and(|o| o == Ordering::Less),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

/// Ascending sort on one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
}

/// Filter plus optional ordering. The default matches every document of the
/// type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub filter: Option<Filter>,
    pub sort: Option<Sort>,
}

impl SearchQuery {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            sort: None,
        }
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
        });
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(doc))
    }
}

pub(crate) fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, key| value.get(key))
}

/// Numbers compare numerically and strings lexically; anything else is
/// incomparable.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*` segments joined by dots.
pub(crate) fn is_field_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_identifier)
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
