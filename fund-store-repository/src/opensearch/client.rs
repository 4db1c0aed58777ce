//! OpenSearch shard implementation.
//!
//! One `OpenSearchShard` is one index on one cluster. Writes are sent with
//! a refresh so that the next routing probe and count observe them.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use opensearch::{
    http::request::JsonBody,
    http::response::Response,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesExistsParts},
    params::Refresh,
    BulkParts, CountParts, DeleteByQueryParts, OpenSearch, SearchParts,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::errors::ShardError;
use crate::interfaces::{DocumentStream, Shard};
use crate::opensearch::index_config::IndexConfig;
use crate::opensearch::queries::{
    build_filter_query, build_ids_query, build_sort, build_source, build_text_query,
};
use crate::query::{Filter, QueryOptions, Sort};
use crate::types::{BulkWriteResult, DeleteResult, ReplaceOne};
use fund_store_shared::{Document, ID_FIELD, SCORE_FIELD};

/// Largest `from + size` OpenSearch serves without scrolling.
const MAX_RESULT_WINDOW: usize = 10_000;

/// Documents fetched per `search_after` page.
const DEFAULT_PAGE_SIZE: usize = 500;

/// A shard backed by one OpenSearch index.
///
/// # Example
///
/// ```ignore
/// use fund_store_repository::opensearch::{IndexConfig, OpenSearchShard};
/// use fund_store_shared::Fund;
///
/// let config = IndexConfig::for_record::<Fund>("funds");
/// let shard = OpenSearchShard::new("http://localhost:9200", config).await?;
/// shard.ensure_index().await?;
/// ```
pub struct OpenSearchShard {
    name: String,
    client: OpenSearch,
    config: IndexConfig,
    page_size: usize,
}

impl OpenSearchShard {
    /// Create a shard connected to the specified URL.
    ///
    /// # Arguments
    ///
    /// * `url` - The OpenSearch server URL (e.g., "http://localhost:9200")
    /// * `config` - The index this shard reads and writes
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchShard)` - A new shard
    /// * `Err(ShardError)` - If the URL is invalid or transport setup fails
    pub async fn new(url: &str, config: IndexConfig) -> Result<Self, ShardError> {
        let parsed_url = Url::parse(url).map_err(|e| ShardError::connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| ShardError::connection(e.to_string()))?;

        info!(url = %url, index = %config.index, "Created OpenSearch shard");

        Ok(Self {
            name: format!("{}/{}", url.trim_end_matches('/'), config.index),
            client: OpenSearch::new(transport),
            config,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Set the `search_after` page size used when streaming.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Base search body for a query, without paging.
    fn search_body(&self, options: &QueryOptions) -> Value {
        json!({
            "query": build_filter_query(&options.filter, &self.config),
            "sort": build_sort(options.sort.as_ref(), &self.config),
            "_source": build_source(options.projection.as_ref())
        })
    }
}

/// Turn a search hit into a document carrying `_id`.
///
/// Returns `None` for hits without an `_id`.
pub(crate) fn parse_hit(hit: &Value, with_score: bool) -> Option<Document> {
    let id = hit.get("_id")?.as_str()?;
    let mut doc = hit
        .get("_source")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    if with_score {
        if let Some(score) = hit.get("_score").and_then(Value::as_f64) {
            doc.insert(SCORE_FIELD.to_string(), Value::from(score));
        }
    }
    Some(doc)
}

/// Bulk action/source lines for a set of replace operations.
///
/// Upserts become `index` actions. Replace-only operations become scripted
/// `update` actions, which fail with 404 when the document is missing.
pub(crate) fn build_bulk_body(index: &str, operations: &[ReplaceOne]) -> Vec<Value> {
    let mut body = Vec::with_capacity(operations.len() * 2);
    for op in operations {
        let mut source = op.document.clone();
        source.remove(ID_FIELD);
        if op.upsert {
            body.push(json!({ "index": { "_index": index, "_id": op.key } }));
            body.push(Value::Object(source));
        } else {
            body.push(json!({ "update": { "_index": index, "_id": op.key } }));
            body.push(json!({
                "script": {
                    "source": "ctx._source = params.doc",
                    "lang": "painless",
                    "params": { "doc": source }
                }
            }));
        }
    }
    body
}

/// Tally a bulk response.
///
/// A missing document on a replace-only update is not a failure. Any other
/// item error fails the whole call.
pub(crate) fn parse_bulk_response(body: &Value) -> Result<BulkWriteResult, ShardError> {
    let mut result = BulkWriteResult::default();
    let mut failed = 0usize;
    let mut first_reason = None;

    let items = body.get("items").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    for item in items {
        let Some((action, entry)) = item.as_object().and_then(|o| o.iter().next()) else {
            continue;
        };
        if let Some(err) = entry.get("error") {
            let status = entry.get("status").and_then(Value::as_u64).unwrap_or_default();
            if action == "update" && status == 404 {
                continue;
            }
            failed += 1;
            first_reason.get_or_insert_with(|| {
                err.get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string()
            });
            continue;
        }
        match entry.get("result").and_then(Value::as_str) {
            Some("created") => result.upserted += 1,
            Some("updated") | Some("noop") => result.matched += 1,
            _ => {}
        }
    }

    if failed > 0 {
        return Err(ShardError::bulk_write(format!(
            "{} of {} operations failed: {}",
            failed,
            items.len(),
            first_reason.unwrap_or_default()
        )));
    }
    Ok(result)
}

/// Read a JSON response body. A missing index reads as `None`.
async fn read_json(response: Response, what: &str) -> Result<Option<Value>, String> {
    let status = response.status_code();
    if status.as_u16() == 404 {
        debug!(request = what, "Index not found");
        return Ok(None);
    }
    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %error_body, request = what, "Request failed");
        return Err(format!("{} failed with status {}: {}", what, status, error_body));
    }
    response.json::<Value>().await.map(Some).map_err(|e| e.to_string())
}

async fn search_hits(
    client: &OpenSearch,
    index: &str,
    body: Value,
) -> Result<Vec<Value>, ShardError> {
    let response = client
        .search(SearchParts::Index(&[index]))
        .body(body)
        .send()
        .await
        .map_err(|e| ShardError::query(e.to_string()))?;

    let body = read_json(response, "search").await.map_err(ShardError::query)?;
    Ok(body
        .and_then(|b| b.get("hits")?.get("hits")?.as_array().cloned())
        .unwrap_or_default())
}

/// Cursor for `search_after` paging.
struct Page {
    client: OpenSearch,
    index: String,
    body: Value,
    page_size: usize,
    remaining: Option<usize>,
    search_after: Option<Value>,
    exhausted: bool,
}

#[async_trait]
impl Shard for OpenSearchShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<u64, ShardError> {
        let response = self
            .client
            .count(CountParts::Index(&[self.config.index.as_str()]))
            .send()
            .await
            .map_err(|e| ShardError::connection(e.to_string()))?;

        let body = read_json(response, "count").await.map_err(ShardError::query)?;
        Ok(body
            .and_then(|b| b.get("count").and_then(Value::as_u64))
            .unwrap_or(0))
    }

    async fn find(&self, options: &QueryOptions) -> Result<Vec<Document>, ShardError> {
        self.find_stream(options).await?.try_collect().await
    }

    #[instrument(skip(self, options), fields(index = %self.config.index))]
    async fn find_stream(&self, options: &QueryOptions) -> Result<DocumentStream, ShardError> {
        let skip = options.skip.unwrap_or(0);
        let page = Page {
            client: self.client.clone(),
            index: self.config.index.clone(),
            body: self.search_body(options),
            page_size: self.page_size,
            remaining: options.limit.map(|limit| limit.saturating_add(skip)),
            search_after: None,
            exhausted: false,
        };

        let pages = stream::try_unfold(page, |mut page| async move {
            let size = match page.remaining {
                _ if page.exhausted => return Ok(None),
                Some(0) => return Ok(None),
                Some(remaining) => remaining.min(page.page_size),
                None => page.page_size,
            };

            let mut body = page.body.clone();
            body["size"] = json!(size);
            if let Some(after) = &page.search_after {
                body["search_after"] = after.clone();
            }

            let hits = search_hits(&page.client, &page.index, body).await?;
            page.exhausted = hits.len() < size;
            page.search_after = hits.last().and_then(|h| h.get("sort").cloned());
            if page.search_after.is_none() {
                page.exhausted = true;
            }
            if let Some(remaining) = page.remaining.as_mut() {
                *remaining = remaining.saturating_sub(hits.len());
            }

            let docs: Vec<Result<Document, ShardError>> =
                hits.iter().filter_map(|h| parse_hit(h, false)).map(Ok).collect();
            Ok::<_, ShardError>(Some((stream::iter(docs), page)))
        });

        Ok(pages.try_flatten().skip(skip).boxed())
    }

    async fn find_existing_keys(&self, keys: &[String]) -> Result<HashSet<String>, ShardError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let hits = search_hits(&self.client, &self.config.index, build_ids_query(keys)).await?;
        Ok(hits
            .iter()
            .filter_map(|h| h.get("_id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    #[instrument(
        skip(self, operations),
        fields(index = %self.config.index, operations = operations.len())
    )]
    async fn bulk_write(&self, operations: Vec<ReplaceOne>) -> Result<BulkWriteResult, ShardError> {
        if operations.is_empty() {
            return Ok(BulkWriteResult::default());
        }

        let body: Vec<JsonBody<Value>> = build_bulk_body(&self.config.index, &operations)
            .into_iter()
            .map(Into::into)
            .collect();

        let response = self
            .client
            .bulk(BulkParts::Index(&self.config.index))
            .refresh(Refresh::WaitFor)
            .body(body)
            .send()
            .await
            .map_err(|e| ShardError::bulk_write(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, "Bulk request failed");
            return Err(ShardError::bulk_write(format!(
                "Bulk failed with status {}: {}",
                status, error_body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ShardError::parse(e.to_string()))?;
        let result = parse_bulk_response(&body)?;
        debug!(matched = result.matched, upserted = result.upserted, "Bulk write applied");
        Ok(result)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<DeleteResult, ShardError> {
        let response = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&[self.config.index.as_str()]))
            .refresh(true)
            .body(json!({ "query": build_filter_query(filter, &self.config) }))
            .send()
            .await
            .map_err(|e| ShardError::delete(e.to_string()))?;

        let body = read_json(response, "delete_by_query")
            .await
            .map_err(ShardError::delete)?;
        Ok(DeleteResult {
            deleted: body
                .and_then(|b| b.get("deleted").and_then(Value::as_u64))
                .unwrap_or(0),
        })
    }

    async fn text_search(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, ShardError> {
        let sort = options.sort.clone().unwrap_or_else(Sort::relevance);
        let skip = options.skip.unwrap_or(0);
        let size = options
            .limit
            .unwrap_or(MAX_RESULT_WINDOW)
            .min(MAX_RESULT_WINDOW.saturating_sub(skip));

        let body = json!({
            "query": build_text_query(query, &options.filter, &self.config),
            "sort": build_sort(Some(&sort), &self.config),
            "_source": build_source(options.projection.as_ref()),
            "track_scores": true,
            "from": skip,
            "size": size
        });

        let hits = search_hits(&self.client, &self.config.index, body).await?;
        Ok(hits.iter().filter_map(|h| parse_hit(h, true)).collect())
    }

    async fn ensure_index(&self) -> Result<(), ShardError> {
        let index = self.config.index.as_str();
        let exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| ShardError::connection(e.to_string()))?;

        if exists.status_code().is_success() {
            info!(index = %index, "Index already exists");
            return Ok(());
        }

        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(self.config.index_settings())
            .send()
            .await
            .map_err(|e| ShardError::index_creation(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            if error_body.contains("resource_already_exists_exception") {
                warn!(index = %index, "Index created concurrently");
                return Ok(());
            }
            error!(status = %status, body = %error_body, "Index creation failed");
            return Err(ShardError::index_creation(format!(
                "Create index failed with status {}: {}",
                status, error_body
            )));
        }

        info!(index = %index, "Created index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_parse_hit() {
        let hit = json!({
            "_id": "GB0001",
            "_source": { "isin": "GB0001", "name": "Test Fund" },
            "_score": 1.5
        });

        let parsed = parse_hit(&hit, true).unwrap();

        assert_eq!(parsed["_id"], json!("GB0001"));
        assert_eq!(parsed["name"], json!("Test Fund"));
        assert_eq!(parsed[SCORE_FIELD], json!(1.5));
        assert!(parse_hit(&hit, false).unwrap().get(SCORE_FIELD).is_none());
    }

    #[test]
    fn test_parse_hit_without_source_or_id() {
        let ids_only = parse_hit(&json!({ "_id": "GB0002" }), false).unwrap();
        assert_eq!(ids_only.len(), 1);

        assert!(parse_hit(&json!({ "_source": { "name": "x" } }), false).is_none());
    }

    #[test]
    fn test_bulk_body_strips_id_from_source() {
        let ops = vec![
            ReplaceOne::upsert("A", doc(json!({ "_id": "A", "isin": "A" }))),
            ReplaceOne {
                key: "B".to_string(),
                document: doc(json!({ "isin": "B" })),
                upsert: false,
            },
        ];

        let body = build_bulk_body("funds", &ops);

        assert_eq!(body.len(), 4);
        assert_eq!(body[0], json!({ "index": { "_index": "funds", "_id": "A" } }));
        assert_eq!(body[1], json!({ "isin": "A" }));
        assert_eq!(body[2]["update"]["_id"], json!("B"));
        assert_eq!(body[3]["script"]["params"]["doc"], json!({ "isin": "B" }));
    }

    #[test]
    fn test_parse_bulk_response_counts_results() {
        let body = json!({
            "errors": true,
            "items": [
                { "index": { "_id": "A", "result": "created", "status": 201 } },
                { "index": { "_id": "B", "result": "updated", "status": 200 } },
                {
                    "update": {
                        "_id": "C",
                        "status": 404,
                        "error": { "reason": "document missing" }
                    }
                }
            ]
        });

        assert_eq!(
            parse_bulk_response(&body).unwrap(),
            BulkWriteResult { matched: 1, upserted: 1 }
        );
    }

    #[test]
    fn test_parse_bulk_response_fails_on_item_error() {
        let body = json!({
            "errors": true,
            "items": [
                { "index": { "_id": "A", "result": "created", "status": 201 } },
                {
                    "index": {
                        "_id": "B",
                        "status": 400,
                        "error": { "reason": "mapper_parsing_exception" }
                    }
                }
            ]
        });

        let err = parse_bulk_response(&body).unwrap_err();
        assert!(err.to_string().contains("1 of 2 operations failed"));
        assert!(err.to_string().contains("mapper_parsing_exception"));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_url() {
        let result = OpenSearchShard::new("not a url", IndexConfig::new("funds", "isin")).await;
        assert!(matches!(result, Err(ShardError::ConnectionError(_))));
    }
}
