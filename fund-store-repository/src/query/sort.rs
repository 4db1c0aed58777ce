//! Sort specifications.

use std::cmp::Ordering;

use fund_store_shared::{Document, SCORE_FIELD};

use super::value::{compare_values, get_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

/// Ordered list of sort keys; earlier keys take precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    fields: Vec<SortField>,
}

impl Sort {
    pub fn by(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            fields: vec![SortField {
                field: field.into(),
                direction,
            }],
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::by(field, SortDirection::Ascending)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::by(field, SortDirection::Descending)
    }

    /// Sort by full-text relevance, best match first.
    pub fn relevance() -> Self {
        Self::desc(SCORE_FIELD)
    }

    pub fn then(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.fields.push(SortField {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn is_relevance(&self) -> bool {
        self.fields.first().is_some_and(|f| f.field == SCORE_FIELD)
    }

    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.fields {
            let ordering = compare_values(get_path(a, &key.field), get_path(b, &key.field));
            let ordering = match key.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_multi_key_sort() {
        let sort = Sort::desc("returns.1Y").then("name", SortDirection::Ascending);
        let mut docs = vec![
            doc(json!({"name": "b", "returns": {"1Y": 0.1}})),
            doc(json!({"name": "a", "returns": {"1Y": 0.1}})),
            doc(json!({"name": "c", "returns": {"1Y": 0.3}})),
            doc(json!({"name": "d"})),
        ];
        docs.sort_by(|a, b| sort.compare(a, b));
        let names: Vec<&str> = docs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_relevance_sort() {
        assert!(Sort::relevance().is_relevance());
        assert!(!Sort::asc("name").is_relevance());
    }
}
