//! Shard trait definition.
//!
//! A shard is one independently addressable storage backend holding a
//! disjoint subset of the records. The router and repository only ever
//! talk to shards through this trait.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::ShardError;
use crate::query::{Filter, QueryOptions};
use crate::types::{BulkWriteResult, DeleteResult, ReplaceOne};
use fund_store_shared::Document;

/// Lazily produced documents from one shard.
pub type DocumentStream = BoxStream<'static, Result<Document, ShardError>>;

/// Abstract interface for one storage backend.
///
/// Documents exchanged through this trait always carry the `_id` field,
/// which equals the record's identity key.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` so that the repository can fan
/// requests out to every shard concurrently.
#[async_trait]
pub trait Shard: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Number of documents currently stored.
    async fn count(&self) -> Result<u64, ShardError>;

    /// Run a query and return the matching documents.
    ///
    /// Filter, sort, skip, limit and projection are applied by the shard.
    async fn find(&self, options: &QueryOptions) -> Result<Vec<Document>, ShardError>;

    /// Like [`Shard::find`] but yields documents lazily.
    async fn find_stream(&self, options: &QueryOptions) -> Result<DocumentStream, ShardError>;

    /// Which of `keys` are stored here. Only identities are fetched.
    async fn find_existing_keys(&self, keys: &[String]) -> Result<HashSet<String>, ShardError>;

    /// Apply replace-or-insert operations in one round trip.
    ///
    /// Writes must be visible to subsequent `count` and
    /// `find_existing_keys` calls once this returns.
    async fn bulk_write(&self, operations: Vec<ReplaceOne>) -> Result<BulkWriteResult, ShardError>;

    /// Delete every document matching the filter.
    async fn delete_many(&self, filter: &Filter) -> Result<DeleteResult, ShardError>;

    /// Full-text query.
    ///
    /// Returned documents carry the relevance score in the `score` field;
    /// `options` filters, sorts (usually by relevance), limits and projects
    /// the matches.
    async fn text_search(
        &self,
        text: &str,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, ShardError>;

    /// Create indexes or mappings the backend needs. Idempotent.
    async fn ensure_index(&self) -> Result<(), ShardError> {
        Ok(())
    }
}
