//! Request and response types for shard and repository operations.

use fund_store_shared::Document;

/// Replace the document stored under `key`, inserting it if absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceOne {
    /// The identity key, also the storage `_id`.
    pub key: String,
    /// The full replacement document.
    pub document: Document,
    /// Insert when no document matches.
    pub upsert: bool,
}

impl ReplaceOne {
    /// Create a replace-or-insert operation.
    pub fn upsert(key: impl Into<String>, document: Document) -> Self {
        Self {
            key: key.into(),
            document,
            upsert: true,
        }
    }
}

/// Outcome of one shard's bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    /// Existing documents that were replaced.
    pub matched: u64,
    /// New documents that were inserted.
    pub upserted: u64,
}

/// Outcome of one shard's delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted: u64,
}

/// Summary of a sharded bulk upsert.
///
/// Shard write failures are absorbed by the repository; callers that need
/// convergence should re-run the batch when `failed_shards` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Records received.
    pub total: usize,
    /// Records sent to each shard, indexed by shard.
    pub per_shard: Vec<usize>,
    /// Obsolete records removed instead of written.
    pub removed: u64,
    /// Shards whose write or delete failed.
    pub failed_shards: Vec<usize>,
}

impl UpsertSummary {
    /// Records acknowledged by shards that did not fail.
    pub fn written(&self) -> usize {
        self.per_shard
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.failed_shards.contains(i))
            .map(|(_, n)| n)
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_shards.is_empty()
    }
}

/// Summary of a sharded delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: u64,
    pub failed_shards: Vec<usize>,
}

impl DeleteSummary {
    pub fn is_complete(&self) -> bool {
        self.failed_shards.is_empty()
    }
}
