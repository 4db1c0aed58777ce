//! Field projections.

use fund_store_shared::{Document, ID_FIELD};

use super::value::{get_path, insert_path, remove_path};

/// Which fields to return from a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Return only these fields (plus `_id`).
    Include(Vec<String>),
    /// Return everything except these fields.
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self::Include(fields.into_iter().map(Into::into).collect())
    }

    pub fn exclude<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self::Exclude(fields.into_iter().map(Into::into).collect())
    }

    /// Make sure `field` survives this projection.
    pub fn including(&self, field: &str) -> Self {
        match self {
            Self::Include(fields) if fields.iter().any(|f| f == field) => self.clone(),
            Self::Include(fields) => {
                let mut fields = fields.clone();
                fields.push(field.to_string());
                Self::Include(fields)
            }
            Self::Exclude(fields) => {
                Self::Exclude(fields.iter().filter(|f| *f != field).cloned().collect())
            }
        }
    }

    pub fn apply(&self, doc: &Document) -> Document {
        match self {
            Self::Include(fields) => {
                let mut out = Document::new();
                if let Some(id) = doc.get(ID_FIELD) {
                    out.insert(ID_FIELD.to_string(), id.clone());
                }
                for field in fields {
                    if let Some(value) = get_path(doc, field) {
                        insert_path(&mut out, field, value.clone());
                    }
                }
                out
            }
            Self::Exclude(fields) => {
                let mut out = doc.clone();
                for field in fields {
                    remove_path(&mut out, field);
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn doc() -> Document {
        match json!({"_id": "A", "isin": "A", "name": "Fund", "returns": {"1Y": 1, "3Y": 2}}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_include_keeps_id_and_nested_fields() {
        let out = Projection::include(["name", "returns.3Y"]).apply(&doc());
        assert_eq!(Value::Object(out), json!({"_id": "A", "name": "Fund", "returns": {"3Y": 2}}));
    }

    #[test]
    fn test_exclude_removes_fields() {
        let out = Projection::exclude(["returns", "isin"]).apply(&doc());
        assert_eq!(Value::Object(out), json!({"_id": "A", "name": "Fund"}));
    }

    #[test]
    fn test_including_extends_or_unexcludes() {
        assert_eq!(
            Projection::include(["name"]).including("score"),
            Projection::include(["name", "score"])
        );
        assert_eq!(
            Projection::exclude(["score", "returns"]).including("score"),
            Projection::exclude(["returns"])
        );
    }
}
