//! OpenSearch index configuration and mappings.

use serde_json::{json, Map, Value};

use fund_store_shared::Record;

/// Where a shard's documents live and how they are mapped.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    /// Index name.
    pub index: String,
    /// Field holding the identity key; used as the `search_after` tiebreaker.
    pub key_field: String,
    /// Fields analysed for full-text search.
    pub text_fields: Vec<String>,
}

impl IndexConfig {
    pub fn new(index: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            key_field: key_field.into(),
            text_fields: Vec::new(),
        }
    }

    /// Config for a record type, searching its `name` field.
    pub fn for_record<R: Record>(index: impl Into<String>) -> Self {
        Self::new(index, R::KEY_FIELD).with_text_fields(["name"])
    }

    pub fn with_text_fields<S: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.text_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_text_field(&self, field: &str) -> bool {
        self.text_fields.iter().any(|f| f == field)
    }

    /// Field name to use for exact matching and sorting.
    pub fn exact_field(&self, field: &str) -> String {
        if self.is_text_field(field) {
            format!("{field}.raw")
        } else {
            field.to_string()
        }
    }

    /// Index settings and mappings.
    ///
    /// - **Strings** default to `keyword`, so filters are exact.
    /// - **Text fields** are `text` with a `raw` keyword subfield.
    /// - **Key field** is a `keyword`.
    pub fn index_settings(&self) -> Value {
        let mut properties = Map::new();
        properties.insert(self.key_field.clone(), json!({ "type": "keyword" }));
        for field in &self.text_fields {
            properties.insert(
                field.clone(),
                json!({
                    "type": "text",
                    "fields": {
                        "raw": {
                            "type": "keyword"
                        }
                    }
                }),
            );
        }

        json!({
            "settings": {
                "number_of_shards": 1,
                "number_of_replicas": 1
            },
            "mappings": {
                "dynamic_templates": [
                    {
                        "strings_as_keywords": {
                            "match_mapping_type": "string",
                            "mapping": { "type": "keyword" }
                        }
                    }
                ],
                "properties": properties
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fund_store_shared::Fund;

    #[test]
    fn test_index_settings_structure() {
        let settings = IndexConfig::for_record::<Fund>("funds").index_settings();

        assert!(settings["settings"]["number_of_shards"].is_number());
        assert_eq!(settings["mappings"]["properties"]["isin"]["type"], "keyword");
        assert_eq!(settings["mappings"]["properties"]["name"]["type"], "text");
        assert_eq!(
            settings["mappings"]["properties"]["name"]["fields"]["raw"]["type"],
            "keyword"
        );
        assert_eq!(
            settings["mappings"]["dynamic_templates"][0]["strings_as_keywords"]["mapping"]["type"],
            "keyword"
        );
    }

    #[test]
    fn test_exact_field() {
        let config = IndexConfig::new("funds", "isin").with_text_fields(["name"]);
        assert_eq!(config.exact_field("name"), "name.raw");
        assert_eq!(config.exact_field("isin"), "isin");
    }
}
