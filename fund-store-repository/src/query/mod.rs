//! Query model shared by every shard backend.
//!
//! A [`QueryOptions`] is applied per shard and then re-applied to the
//! merged result, so every piece of it must be evaluable both inside a
//! backend and in memory.

mod filter;
mod projection;
mod sort;
mod value;

pub use filter::Filter;
pub use projection::Projection;
pub use sort::{Sort, SortDirection, SortField};
pub use value::{compare_values, get_path};

use fund_store_shared::Document;

/// Filter, projection, sort and paging for a listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub filter: Filter,
    pub projection: Option<Projection>,
    pub sort: Option<Sort>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate the full query over an in-memory collection.
    ///
    /// Order of application: filter, sort, skip, limit, projection.
    pub fn apply(&self, documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = documents
            .into_iter()
            .filter(|d| self.filter.matches(d))
            .collect();
        if let Some(sort) = &self.sort {
            docs.sort_by(|a, b| sort.compare(a, b));
        }
        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        let docs = docs.into_iter().skip(skip).take(limit);
        match &self.projection {
            Some(projection) => docs.map(|d| projection.apply(&d)).collect(),
            None => docs.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn docs() -> Vec<Document> {
        (1..=5)
            .map(|i| match json!({"_id": format!("F{i}"), "rank": i, "name": format!("Fund {i}")}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_apply_filter_sort_page_project() {
        let options = QueryOptions::new()
            .with_filter(Filter::gt("rank", 1))
            .with_sort(Sort::desc("rank"))
            .with_skip(1)
            .with_limit(2)
            .with_projection(Projection::include(["rank"]));

        let out = options.apply(docs());
        assert_eq!(
            out.into_iter().map(Value::Object).collect::<Vec<_>>(),
            vec![json!({"_id": "F4", "rank": 4}), json!({"_id": "F3", "rank": 3})]
        );
    }

    #[test]
    fn test_apply_defaults_return_everything() {
        assert_eq!(QueryOptions::new().apply(docs()).len(), 5);
    }
}
