//! Sharded repository.
//!
//! Presents one logical collection over N independent shards. Every
//! operation fans out to all shards concurrently and reconciles the
//! per-shard answers:
//!
//! - reads omit a failing shard's contribution (logged),
//! - writes absorb shard failures (logged) and report them in a summary,
//! - routing failures and malformed records propagate to the caller.
//!
//! There is no cross-shard atomicity. Callers that see an incomplete
//! summary must re-run the operation to converge.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::config::RepositoryConfig;
use crate::errors::RepositoryError;
use crate::export::RecordExporter;
use crate::interfaces::Shard;
use crate::query::{Filter, Projection, QueryOptions, Sort};
use crate::router::ShardRouter;
use crate::types::{DeleteSummary, ReplaceOne, UpsertSummary};
use fund_store_shared::{Document, Record, SCORE_FIELD};

/// Lazily merged documents from every shard.
pub type MergedStream<T> = BoxStream<'static, Result<T, RepositoryError>>;

/// A single logical collection of `R` spread over several shards.
pub struct ShardedRepository<R: Record> {
    shards: Vec<Arc<dyn Shard>>,
    config: RepositoryConfig,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> ShardedRepository<R> {
    /// Create a repository over the given shards with default configuration.
    pub fn new(shards: Vec<Arc<dyn Shard>>) -> Result<Self, RepositoryError> {
        Self::with_config(shards, RepositoryConfig::default())
    }

    /// Create a repository with custom configuration.
    pub fn with_config(
        shards: Vec<Arc<dyn Shard>>,
        config: RepositoryConfig,
    ) -> Result<Self, RepositoryError> {
        if shards.is_empty() {
            return Err(RepositoryError::NoShards);
        }
        Ok(Self {
            shards,
            config,
            _record: PhantomData,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> &[Arc<dyn Shard>] {
        &self.shards
    }

    /// Check if batch size exceeds the configured limit.
    fn validate_batch_size(&self, size: usize) -> Result<(), RepositoryError> {
        if let Some(max) = self.config.max_batch_size {
            if size > max {
                return Err(RepositoryError::BatchSizeExceeded {
                    provided: size,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Insert or replace a batch of records.
    ///
    /// Only the last occurrence of each key counts. Obsolete records are
    /// deleted from every shard instead of written. The remaining records
    /// are routed (existing shard, else least loaded) and written with one
    /// bulk write per shard, in parallel.
    /// A failed shard write is logged with the full payload and reported in
    /// the summary; it does not fail the call.
    #[instrument(skip(self, records), fields(batch = records.len()))]
    pub async fn upsert_batch(&self, records: Vec<R>) -> Result<UpsertSummary, RepositoryError> {
        let mut summary = UpsertSummary {
            total: records.len(),
            per_shard: vec![0; self.shards.len()],
            ..Default::default()
        };

        if records.is_empty() {
            info!("No records to upsert");
            return Ok(summary);
        }

        self.validate_batch_size(records.len())?;
        if records.iter().any(|r| r.key().trim().is_empty()) {
            return Err(RepositoryError::validation(format!(
                "All records must have a non-empty {}",
                R::KEY_FIELD
            )));
        }

        let (obsolete, live): (Vec<R>, Vec<R>) = last_occurrences(records)
            .into_iter()
            .partition(|r| r.is_obsolete());

        if !obsolete.is_empty() {
            let keys: Vec<String> = obsolete.iter().map(|r| r.key().to_string()).collect();
            debug!(count = keys.len(), "Removing obsolete records");
            let deleted = self.delete_batch(&Filter::is_in(R::KEY_FIELD, keys)).await;
            summary.removed = deleted.deleted;
            summary.failed_shards.extend(deleted.failed_shards);
        }

        if live.is_empty() {
            return Ok(summary);
        }

        let buckets = ShardRouter::new(&self.shards).route(live).await?;

        let mut writes = Vec::with_capacity(buckets.len());
        for (i, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let operations = bucket
                .iter()
                .map(|r| r.to_document().map(|doc| ReplaceOne::upsert(r.key(), doc)))
                .collect::<Result<Vec<_>, _>>()?;
            summary.per_shard[i] = operations.len();
            writes.push((i, operations));
        }

        let results = join_all(writes.into_iter().map(|(i, operations)| {
            let shard = Arc::clone(&self.shards[i]);
            async move {
                let payload = operations.clone();
                (i, shard.bulk_write(operations).await, payload)
            }
        }))
        .await;

        for (i, result, payload) in results {
            match result {
                Ok(written) => {
                    debug!(
                        shard = i,
                        matched = written.matched,
                        upserted = written.upserted,
                        "Shard bulk write complete"
                    );
                }
                Err(e) => {
                    let documents: Vec<&Document> = payload.iter().map(|op| &op.document).collect();
                    error!(
                        shard = i,
                        error = %e,
                        batch = %serde_json::to_string(&documents).unwrap_or_default(),
                        "Bulk upsert failed"
                    );
                    if !summary.failed_shards.contains(&i) {
                        summary.failed_shards.push(i);
                    }
                }
            }
        }

        info!(
            total = summary.total,
            written = summary.written(),
            removed = summary.removed,
            failed_shards = ?summary.failed_shards,
            "Upserted batch"
        );
        Ok(summary)
    }

    /// List records across all shards.
    ///
    /// Equivalent to running the query against the union of all shards:
    /// sort, skip and limit are re-applied after the per-shard results are
    /// concatenated.
    pub async fn list(&self, options: &QueryOptions) -> Result<Vec<R>, RepositoryError> {
        let documents = self.list_documents(options).await;
        to_records(documents)
    }

    /// Like [`ShardedRepository::list`] but returns the raw documents.
    #[instrument(skip(self, options))]
    pub async fn list_documents(&self, options: &QueryOptions) -> Vec<Document> {
        collect_documents(&self.shards, options).await
    }

    /// Like [`ShardedRepository::list`] but fails if any shard fails.
    pub async fn list_complete(&self, options: &QueryOptions) -> Result<Vec<R>, RepositoryError> {
        let shard_options = shard_options(options);
        let results = join_all(self.shards.iter().map(|shard| shard.find(&shard_options))).await;

        let mut per_shard = Vec::with_capacity(results.len());
        for (i, result) in results.into_iter().enumerate() {
            per_shard.push(result.map_err(|e| RepositoryError::shard(i, "find", e))?);
        }
        to_records(merge_documents(per_shard, options))
    }

    /// Stream records from all shards.
    pub fn stream(&self, options: QueryOptions) -> MergedStream<R> {
        self.stream_documents(options)
            .map(|item| item.and_then(|doc| R::from_document(doc).map_err(RepositoryError::from)))
            .boxed()
    }

    /// Stream documents from all shards.
    ///
    /// Without a sort, shard streams are drained one after another, in shard
    /// order, with skip and limit applied to the combined sequence. With a
    /// sort, the globally sorted listing is computed first and then yielded
    /// lazily. A shard that cannot be opened is skipped; an error in the
    /// middle of a shard stream is yielded and ends the merged stream.
    pub fn stream_documents(&self, options: QueryOptions) -> MergedStream<Document> {
        let shards = self.shards.clone();

        if options.sort.is_some() {
            debug!("Sorted stream requested, merging before streaming");
            return stream::once(async move { collect_documents(&shards, &options).await })
                .flat_map(|docs| stream::iter(docs.into_iter().map(Ok)))
                .boxed();
        }

        let skip = options.skip.unwrap_or(0);
        let limit = options.limit;
        let per_shard = shard_options(&options);

        let merged = stream::iter(shards.into_iter().enumerate())
            .then(move |(i, shard)| {
                let per_shard = per_shard.clone();
                async move {
                    match shard.find_stream(&per_shard).await {
                        Ok(docs) => docs
                            .map(move |item| {
                                item.map_err(|e| RepositoryError::shard(i, "stream", e))
                            })
                            .boxed(),
                        Err(e) => {
                            error!(
                                shard = i,
                                filter = ?per_shard.filter,
                                error = %e,
                                "Failed to open shard stream"
                            );
                            stream::empty().boxed()
                        }
                    }
                }
            })
            .flatten();

        let merged = end_on_error(merged).skip(skip);
        match limit {
            Some(limit) => merged.take(limit).boxed(),
            None => merged.boxed(),
        }
    }

    /// Full-text search across all shards, best match first.
    ///
    /// Every shard returns its own top `limit` by relevance; the union is
    /// re-sorted by score so the result is the global top `limit`.
    #[instrument(skip(self, projection))]
    pub async fn search(
        &self,
        text: &str,
        projection: Option<Projection>,
        limit: Option<usize>,
    ) -> Vec<Document> {
        let mut options = QueryOptions::new().with_sort(Sort::relevance());
        options.projection = projection.map(|p| p.including(SCORE_FIELD));
        options.limit = limit;

        let shard_options = shard_options(&options);
        let results = join_all(
            self.shards
                .iter()
                .map(|shard| shard.text_search(text, &shard_options)),
        )
        .await;

        let mut per_shard = Vec::with_capacity(results.len());
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(docs) => per_shard.push(docs),
                Err(e) => {
                    error!(shard = i, text = %text, error = %e, "Text search failed on shard")
                }
            }
        }
        merge_documents(per_shard, &options)
    }

    /// Delete every record matching `filter` on every shard.
    ///
    /// Deletions committed on healthy shards are kept when another shard
    /// fails.
    #[instrument(skip(self))]
    pub async fn delete_batch(&self, filter: &Filter) -> DeleteSummary {
        let results = join_all(self.shards.iter().map(|shard| shard.delete_many(filter))).await;

        let mut summary = DeleteSummary::default();
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(deleted) => summary.deleted += deleted.deleted,
                Err(e) => {
                    error!(shard = i, filter = ?filter, error = %e, "Delete failed on shard");
                    summary.failed_shards.push(i);
                }
            }
        }

        info!(deleted = summary.deleted, failed_shards = ?summary.failed_shards, "Deleted records");
        summary
    }

    /// Total number of records across the shards that answered.
    pub async fn count(&self) -> u64 {
        let results = join_all(self.shards.iter().map(|shard| shard.count())).await;
        results
            .into_iter()
            .enumerate()
            .filter_map(|(i, result)| match result {
                Ok(count) => Some(count),
                Err(e) => {
                    warn!(shard = i, error = %e, "Failed to count shard");
                    None
                }
            })
            .sum()
    }

    /// Create indexes on every shard.
    pub async fn ensure_indexes(&self) -> Result<(), RepositoryError> {
        let results = join_all(self.shards.iter().map(|shard| shard.ensure_index())).await;
        for (i, result) in results.into_iter().enumerate() {
            result.map_err(|e| RepositoryError::shard(i, "ensure_index", e))?;
        }
        info!(shards = self.shards.len(), "Indexes ensured");
        Ok(())
    }

    /// List documents and hand them to an exporter.
    pub async fn export(
        &self,
        options: &QueryOptions,
        exporter: &mut dyn RecordExporter,
    ) -> Result<usize, RepositoryError> {
        let documents = self.list_documents(options).await;
        exporter.export(&documents)
    }
}

/// Query options as sent to each shard.
///
/// Skip is never pushed down; each shard returns its first `skip + limit`
/// so that the merged result can be paged once. Sort fields survive an
/// include projection so the merge can re-sort.
fn shard_options(options: &QueryOptions) -> QueryOptions {
    let mut per_shard = options.clone();
    per_shard.skip = None;
    per_shard.limit = options
        .limit
        .map(|limit| limit.saturating_add(options.skip.unwrap_or(0)));
    if let (Some(projection), Some(sort)) = (&options.projection, &options.sort) {
        per_shard.projection = Some(
            sort.fields()
                .iter()
                .fold(projection.clone(), |p, key| p.including(&key.field)),
        );
    }
    per_shard
}

/// Concatenate per-shard results and re-apply sort, skip and limit.
fn merge_documents(per_shard: Vec<Vec<Document>>, options: &QueryOptions) -> Vec<Document> {
    let mut merged: Vec<Document> = per_shard.into_iter().flatten().collect();

    if options.sort.is_none() && options.skip.is_none() && options.limit.is_none() {
        return merged;
    }

    if let Some(sort) = &options.sort {
        merged.sort_by(|a, b| sort.compare(a, b));
    }
    let skip = options.skip.unwrap_or(0).min(merged.len());
    merged.drain(..skip);
    if let Some(limit) = options.limit {
        merged.truncate(limit);
    }
    if let (Some(projection), Some(_)) = (&options.projection, &options.sort) {
        merged = merged.iter().map(|d| projection.apply(d)).collect();
    }
    merged
}

async fn collect_documents(shards: &[Arc<dyn Shard>], options: &QueryOptions) -> Vec<Document> {
    let shard_options = shard_options(options);
    let results = join_all(shards.iter().map(|shard| shard.find(&shard_options))).await;

    let mut per_shard = Vec::with_capacity(results.len());
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(docs) => per_shard.push(docs),
            Err(e) => {
                error!(
                    shard = i,
                    filter = ?options.filter,
                    error = %e,
                    "Find failed on shard, omitting its results"
                );
            }
        }
    }
    merge_documents(per_shard, options)
}

fn to_records<R: Record>(documents: Vec<Document>) -> Result<Vec<R>, RepositoryError> {
    documents
        .into_iter()
        .map(|doc| R::from_document(doc).map_err(RepositoryError::from))
        .collect()
}

/// Pass items through until the first error, which is yielded last.
fn end_on_error<T, S>(stream: S) -> impl futures::Stream<Item = Result<T, RepositoryError>>
where
    S: futures::Stream<Item = Result<T, RepositoryError>>,
{
    stream.scan(false, |failed, item| {
        if *failed {
            return futures::future::ready(None);
        }
        *failed = item.is_err();
        futures::future::ready(Some(item))
    })
}

/// Keep the last record of every key, in input order.
fn last_occurrences<R: Record>(records: Vec<R>) -> Vec<R> {
    let mut last: HashMap<String, usize> = HashMap::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        last.insert(record.key().to_string(), i);
    }
    records
        .into_iter()
        .enumerate()
        .filter(|(i, record)| last.get(record.key()) == Some(i))
        .map(|(_, record)| record)
        .collect()
}
