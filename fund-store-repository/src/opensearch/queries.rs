//! OpenSearch query builders.
//!
//! Translates [`Filter`], [`Sort`] and [`Projection`] into the query DSL.
//! Full-text fields are mapped as `text` with a `raw` keyword subfield, so
//! exact matches and sorts on them go through `<field>.raw`.

use serde_json::{json, Map, Value};

use crate::opensearch::index_config::IndexConfig;
use crate::query::{Filter, Projection, Sort, SortDirection};
use fund_store_shared::SCORE_FIELD;

/// Build the `query` clause for a filter.
pub fn build_filter_query(filter: &Filter, config: &IndexConfig) -> Value {
    match filter {
        Filter::All => json!({ "match_all": {} }),
        Filter::Eq(field, Value::Null) => must_not(exists(field)),
        Filter::Eq(field, value) => term(config.exact_field(field), value),
        Filter::Ne(field, Value::Null) => exists(field),
        Filter::Ne(field, value) => must_not(term(config.exact_field(field), value)),
        Filter::In(field, values) => terms(config.exact_field(field), values),
        Filter::NotIn(field, values) => must_not(terms(config.exact_field(field), values)),
        Filter::Gt(field, value) => range(config.exact_field(field), "gt", value),
        Filter::Gte(field, value) => range(config.exact_field(field), "gte", value),
        Filter::Lt(field, value) => range(config.exact_field(field), "lt", value),
        Filter::Lte(field, value) => range(config.exact_field(field), "lte", value),
        Filter::Exists(field, true) => exists(field),
        Filter::Exists(field, false) => must_not(exists(field)),
        Filter::And(filters) => json!({
            "bool": {
                "filter": filters.iter().map(|f| build_filter_query(f, config)).collect::<Vec<_>>()
            }
        }),
        Filter::Or(filters) => json!({
            "bool": {
                "should": filters.iter().map(|f| build_filter_query(f, config)).collect::<Vec<_>>(),
                "minimum_should_match": 1
            }
        }),
    }
}

/// Build the full-text query, restricted by `filter`.
///
/// Matches the configured text fields with fuzzy `multi_match`, boosting
/// documents whose first text field starts with the query.
pub fn build_text_query(text: &str, filter: &Filter, config: &IndexConfig) -> Value {
    let mut should = vec![json!({
        "multi_match": {
            "query": text,
            "fields": config.text_fields,
            "fuzziness": "AUTO"
        }
    })];
    if let Some(primary) = config.text_fields.first() {
        should.push(json!({
            "match_phrase_prefix": {
                primary.as_str(): {
                    "query": text,
                    "boost": 2.0
                }
            }
        }));
    }

    let mut bool_query = Map::new();
    bool_query.insert("should".to_string(), Value::Array(should));
    bool_query.insert("minimum_should_match".to_string(), json!(1));
    if !filter.is_all() {
        bool_query.insert("filter".to_string(), build_filter_query(filter, config));
    }
    json!({ "bool": bool_query })
}

/// Build the `sort` clause.
///
/// The identity key is always appended as a tiebreaker so that paging with
/// `search_after` is deterministic. Missing values sort first when
/// ascending and last when descending, the same as an in-memory sort.
pub fn build_sort(sort: Option<&Sort>, config: &IndexConfig) -> Value {
    let mut clauses = Vec::new();
    let mut has_key = false;

    for key in sort.map(Sort::fields).unwrap_or_default() {
        let (order, missing) = match key.direction {
            SortDirection::Ascending => ("asc", "_first"),
            SortDirection::Descending => ("desc", "_last"),
        };
        if key.field == SCORE_FIELD {
            clauses.push(json!({ "_score": { "order": order } }));
            continue;
        }
        has_key |= key.field == config.key_field;
        clauses.push(json!({
            config.exact_field(&key.field): {
                "order": order,
                "missing": missing,
                "unmapped_type": "keyword"
            }
        }));
    }

    if !has_key {
        clauses.push(json!({ config.key_field.as_str(): { "order": "asc" } }));
    }
    Value::Array(clauses)
}

/// Build the `_source` clause for a projection.
pub fn build_source(projection: Option<&Projection>) -> Value {
    match projection {
        None => Value::Bool(true),
        Some(Projection::Include(fields)) => json!({ "includes": fields }),
        Some(Projection::Exclude(fields)) => json!({ "excludes": fields }),
    }
}

/// Build an `ids` lookup returning only identities.
pub fn build_ids_query(keys: &[String]) -> Value {
    json!({
        "query": { "ids": { "values": keys } },
        "_source": false,
        "size": keys.len()
    })
}

fn term(field: String, value: &Value) -> Value {
    json!({ "term": { field: value } })
}

fn terms(field: String, values: &[Value]) -> Value {
    json!({ "terms": { field: values } })
}

fn range(field: String, op: &str, value: &Value) -> Value {
    json!({ "range": { field: { op: value } } })
}

fn exists(field: &str) -> Value {
    json!({ "exists": { "field": field } })
}

fn must_not(query: Value) -> Value {
    json!({ "bool": { "must_not": [query] } })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IndexConfig {
        IndexConfig::new("funds", "isin").with_text_fields(["name"])
    }

    #[test]
    fn test_exact_match_on_text_field_uses_raw() {
        let query = build_filter_query(&Filter::eq("name", "Alpha"), &config());
        assert_eq!(query, json!({ "term": { "name.raw": "Alpha" } }));

        let query = build_filter_query(&Filter::eq("type", "OEIC"), &config());
        assert_eq!(query, json!({ "term": { "type": "OEIC" } }));
    }

    #[test]
    fn test_compound_filters() {
        let filter = Filter::is_in("isin", ["A", "B"]).and(Filter::gte("returns.1Y", 0.1));
        let query = build_filter_query(&filter, &config());

        assert_eq!(
            query,
            json!({
                "bool": {
                    "filter": [
                        { "terms": { "isin": ["A", "B"] } },
                        { "range": { "returns.1Y": { "gte": 0.1 } } }
                    ]
                }
            })
        );
    }

    #[test]
    fn test_null_and_negated_filters() {
        assert_eq!(
            build_filter_query(&Filter::eq("name", Value::Null), &config()),
            json!({ "bool": { "must_not": [{ "exists": { "field": "name" } }] } })
        );
        assert_eq!(
            build_filter_query(&Filter::ne("type", "UNIT"), &config()),
            json!({ "bool": { "must_not": [{ "term": { "type": "UNIT" } }] } })
        );
    }

    #[test]
    fn test_sort_appends_key_tiebreaker() {
        let sort = Sort::desc("returns.1Y");
        let clause = build_sort(Some(&sort), &config());

        assert_eq!(
            clause,
            json!([
                {
                    "returns.1Y": {
                        "order": "desc",
                        "missing": "_last",
                        "unmapped_type": "keyword"
                    }
                },
                { "isin": { "order": "asc" } }
            ])
        );
    }

    #[test]
    fn test_relevance_sort_uses_score() {
        let clause = build_sort(Some(&Sort::relevance()), &config());
        assert_eq!(clause[0], json!({ "_score": { "order": "desc" } }));
    }

    #[test]
    fn test_text_query_with_filter() {
        let query = build_text_query("equity", &Filter::eq("type", "OEIC"), &config());

        assert_eq!(query["bool"]["should"][0]["multi_match"]["query"], json!("equity"));
        assert_eq!(query["bool"]["filter"], json!({ "term": { "type": "OEIC" } }));

        let unfiltered = build_text_query("equity", &Filter::All, &config());
        assert!(unfiltered["bool"].get("filter").is_none());
    }

    #[test]
    fn test_source_projection() {
        assert_eq!(build_source(None), json!(true));
        assert_eq!(
            build_source(Some(&Projection::include(["name"]))),
            json!({ "includes": ["name"] })
        );
    }
}
