//! Term-frequency relevance scoring for the in-memory backend.

use fund_store_shared::Document;
use serde_json::Value;

use crate::query::get_path;

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Number of query-term occurrences across the text fields of `doc`.
pub fn score(doc: &Document, query: &str, fields: &[String]) -> f64 {
    let terms: Vec<String> = tokens(query).collect();
    if terms.is_empty() {
        return 0.0;
    }
    fields
        .iter()
        .filter_map(|field| match get_path(doc, field) {
            Some(Value::String(text)) => Some(text.as_str()),
            _ => None,
        })
        .flat_map(tokens)
        .filter(|token| terms.contains(token))
        .count() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_score_counts_case_insensitive_terms() {
        let doc = match json!({"name": "Global Equity Income", "description": "equity fund"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let fields = vec!["name".to_string(), "description".to_string()];

        assert_eq!(score(&doc, "EQUITY", &fields), 2.0);
        assert_eq!(score(&doc, "global income", &fields), 2.0);
        assert_eq!(score(&doc, "bond", &fields), 0.0);
        assert_eq!(score(&doc, "  ", &fields), 0.0);
    }
}
