//! Structured predicates over documents.

use serde_json::Value;

use fund_store_shared::Document;

use super::value::{compare_values, get_path, same_type};
use std::cmp::Ordering;

/// A predicate evaluated against stored documents.
///
/// Field names are dotted paths. When the addressed value is an array,
/// equality and membership match if any element matches.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Matches every document.
    #[default]
    All,
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Field presence (`true`) or absence (`false`).
    Exists(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::NotIn(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Self::Exists(field.into(), present)
    }

    /// Conjunction with another filter, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, other) => Filter::And(vec![f, other]),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Filter::All)
    }

    /// Evaluate the predicate against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => equals(get_path(doc, field), value),
            Filter::Ne(field, value) => !equals(get_path(doc, field), value),
            Filter::In(field, values) => {
                let found = get_path(doc, field);
                values.iter().any(|v| equals(found, v))
            }
            Filter::NotIn(field, values) => {
                let found = get_path(doc, field);
                !values.iter().any(|v| equals(found, v))
            }
            Filter::Gt(field, value) => {
                compares(get_path(doc, field), value, |o| o == Ordering::Greater)
            }
            Filter::Gte(field, value) => {
                compares(get_path(doc, field), value, |o| o != Ordering::Less)
            }
            Filter::Lt(field, value) => {
                compares(get_path(doc, field), value, |o| o == Ordering::Less)
            }
            Filter::Lte(field, value) => {
                compares(get_path(doc, field), value, |o| o != Ordering::Greater)
            }
            Filter::Exists(field, present) => get_path(doc, field).is_some() == *present,
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

fn equals(found: Option<&Value>, expected: &Value) -> bool {
    match found {
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|i| scalar_eq(i, expected))
        }
        Some(value) => scalar_eq(value, expected),
        None => expected.is_null(),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// Range comparisons only match within the same type bracket.
fn compares(found: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match found {
        Some(value) if same_type(Some(value), Some(bound)) && !value.is_null() => {
            accept(compare_values(Some(value), Some(bound)))
        }
        _ => false,
    }
}
