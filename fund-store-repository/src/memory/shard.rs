//! In-memory shard.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::ShardError;
use crate::interfaces::{DocumentStream, Shard};
use crate::query::{Filter, QueryOptions, Sort};
use crate::types::{BulkWriteResult, DeleteResult, ReplaceOne};
use fund_store_shared::{Document, ID_FIELD, SCORE_FIELD};

use super::text;

/// A shard that keeps its documents in a `BTreeMap` keyed by `_id`.
pub struct InMemoryShard {
    name: String,
    documents: RwLock<BTreeMap<String, Document>>,
    text_fields: Vec<String>,
}

impl InMemoryShard {
    /// Create an empty shard that full-text searches the `name` field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(BTreeMap::new()),
            text_fields: vec!["name".to_string()],
        }
    }

    /// Set the fields covered by `text_search`.
    pub fn with_text_fields<S: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.text_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Insert documents directly, bypassing the write path. Documents
    /// without an `_id` are ignored.
    pub async fn seed(&self, docs: impl IntoIterator<Item = Document>) {
        let mut documents = self.documents.write().await;
        for doc in docs {
            if let Some(Value::String(id)) = doc.get(ID_FIELD) {
                documents.insert(id.clone(), doc);
            }
        }
    }

    /// Identity keys currently stored, in key order.
    pub async fn keys(&self) -> Vec<String> {
        self.documents.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl Shard for InMemoryShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<u64, ShardError> {
        Ok(self.documents.read().await.len() as u64)
    }

    async fn find(&self, options: &QueryOptions) -> Result<Vec<Document>, ShardError> {
        let documents = self.documents.read().await;
        Ok(options.apply(documents.values().cloned()))
    }

    async fn find_stream(&self, options: &QueryOptions) -> Result<DocumentStream, ShardError> {
        let docs = self.find(options).await?;
        Ok(stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn find_existing_keys(&self, keys: &[String]) -> Result<HashSet<String>, ShardError> {
        let documents = self.documents.read().await;
        Ok(keys
            .iter()
            .filter(|k| documents.contains_key(k.as_str()))
            .cloned()
            .collect())
    }

    async fn bulk_write(&self, operations: Vec<ReplaceOne>) -> Result<BulkWriteResult, ShardError> {
        let mut documents = self.documents.write().await;
        let mut result = BulkWriteResult::default();

        for op in operations {
            let mut doc = op.document;
            doc.insert(ID_FIELD.to_string(), Value::String(op.key.clone()));
            if documents.contains_key(&op.key) {
                documents.insert(op.key, doc);
                result.matched += 1;
            } else if op.upsert {
                documents.insert(op.key, doc);
                result.upserted += 1;
            }
        }

        debug!(
            shard = %self.name,
            matched = result.matched,
            upserted = result.upserted,
            "Bulk write applied"
        );
        Ok(result)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<DeleteResult, ShardError> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|_, doc| !filter.matches(doc));
        Ok(DeleteResult {
            deleted: (before - documents.len()) as u64,
        })
    }

    async fn text_search(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, ShardError> {
        let documents = self.documents.read().await;
        let scored = documents.values().filter_map(|doc| {
            let score = text::score(doc, query, &self.text_fields);
            (score > 0.0).then(|| {
                let mut doc = doc.clone();
                doc.insert(SCORE_FIELD.to_string(), Value::from(score));
                doc
            })
        });

        let mut options = options.clone();
        if options.sort.is_none() {
            options.sort = Some(Sort::relevance());
        }
        options.projection = options.projection.map(|p| p.including(SCORE_FIELD));
        Ok(options.apply(scored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Projection;
    use futures::TryStreamExt;
    use serde_json::json;

    fn doc(id: &str, name: &str) -> Document {
        match json!({"_id": id, "isin": id, "name": name}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_bulk_write_inserts_then_replaces() {
        let shard = InMemoryShard::new("mem-0");

        let result = shard
            .bulk_write(vec![
                ReplaceOne::upsert("A", doc("A", "Alpha")),
                ReplaceOne::upsert("B", doc("B", "Beta")),
            ])
            .await
            .unwrap();
        assert_eq!(result, BulkWriteResult { matched: 0, upserted: 2 });

        let result = shard
            .bulk_write(vec![ReplaceOne::upsert("A", doc("A", "Alpha v2"))])
            .await
            .unwrap();
        assert_eq!(result, BulkWriteResult { matched: 1, upserted: 0 });

        assert_eq!(shard.count().await.unwrap(), 2);
        let found = shard
            .find(&QueryOptions::new().with_filter(Filter::eq("isin", "A")))
            .await
            .unwrap();
        assert_eq!(found[0]["name"], json!("Alpha v2"));
    }

    #[tokio::test]
    async fn test_replace_without_upsert_skips_missing() {
        let shard = InMemoryShard::new("mem-0");
        let op = ReplaceOne {
            key: "A".to_string(),
            document: doc("A", "Alpha"),
            upsert: false,
        };
        assert_eq!(shard.bulk_write(vec![op]).await.unwrap(), BulkWriteResult::default());
        assert_eq!(shard.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_existing_keys_and_delete() {
        let shard = InMemoryShard::new("mem-0");
        shard.seed(vec![doc("A", "Alpha"), doc("B", "Beta")]).await;

        let existing = shard
            .find_existing_keys(&["A".to_string(), "Z".to_string()])
            .await
            .unwrap();
        assert_eq!(existing, HashSet::from(["A".to_string()]));

        let deleted = shard.delete_many(&Filter::is_in("isin", ["A", "Z"])).await.unwrap();
        assert_eq!(deleted.deleted, 1);
        assert_eq!(shard.keys().await, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_text_search_scores_and_orders() {
        let shard = InMemoryShard::new("mem-0");
        shard
            .seed(vec![
                doc("A", "Global Equity"),
                doc("B", "Equity Equity Income"),
                doc("C", "Bond"),
            ])
            .await;

        let options = QueryOptions::new().with_projection(Projection::include(["name"]));
        let hits = shard.text_search("equity", &options).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["_id"], json!("B"));
        assert_eq!(hits[0][SCORE_FIELD], json!(2.0));
        assert_eq!(hits[1][SCORE_FIELD], json!(1.0));
    }

    #[tokio::test]
    async fn test_find_stream_yields_query_result() {
        let shard = InMemoryShard::new("mem-0");
        shard.seed(vec![doc("A", "Alpha"), doc("B", "Beta"), doc("C", "Gamma")]).await;

        let docs: Vec<Document> = shard
            .find_stream(&QueryOptions::new().with_limit(2))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
    }
}
