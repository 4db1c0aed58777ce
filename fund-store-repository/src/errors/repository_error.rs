//! Repository error types.

use fund_store_shared::RecordError;
use thiserror::Error;

use crate::errors::ShardError;

/// Errors surfaced by the sharded repository.
///
/// Shard failures during fan-out reads are logged and absorbed, so callers
/// mostly see this type for structural problems: routing could not be
/// computed, a record failed to serialize, or a batch was malformed.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A shard call failed where no partial answer is acceptable.
    #[error("Shard {shard} failed during {operation}: {source}")]
    Shard {
        shard: usize,
        operation: &'static str,
        #[source]
        source: ShardError,
    },

    /// Record to document conversion failed.
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// The batch or query is invalid.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Batch size exceeds configured maximum.
    #[error("Batch size {provided} exceeds maximum {max}")]
    BatchSizeExceeded { provided: usize, max: usize },

    /// A repository needs at least one shard.
    #[error("Repository has no shards")]
    NoShards,

    /// Reading or writing the cache snapshot failed.
    #[error("Snapshot store error: {0}")]
    SnapshotStore(String),

    /// Writing an export failed.
    #[error("Export error: {0}")]
    Export(String),
}

impl RepositoryError {
    /// Wrap a shard error with the shard index and operation name.
    pub fn shard(shard: usize, operation: &'static str, source: ShardError) -> Self {
        Self::Shard {
            shard,
            operation,
            source,
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a snapshot store error.
    pub fn snapshot_store(msg: impl Into<String>) -> Self {
        Self::SnapshotStore(msg.into())
    }

    /// Create an export error.
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }
}
