//! Loader module for the fund pipeline.
//!
//! Batches processed records and writes them through the sharded repository.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::errors::PipelineError;
use fund_store_repository::ShardedRepository;
use fund_store_shared::{Fund, Record};

/// Configuration for the record loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of records to batch before flushing.
    pub batch_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

impl LoaderConfig {
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

/// Counters accumulated over the lifetime of a loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Records handed to the loader.
    pub received: usize,
    /// Records acknowledged by their shard.
    pub written: usize,
    /// Obsolete records deleted instead of written.
    pub removed: u64,
    /// Batches in which at least one shard failed.
    pub incomplete_batches: usize,
}

/// Loader that upserts records into a [`ShardedRepository`] in batches.
///
/// Shard write failures are absorbed by the repository and only counted
/// here; validation and routing errors stop the load.
pub struct RecordLoader<R: Record> {
    repository: Arc<ShardedRepository<R>>,
    config: LoaderConfig,
    pending: Vec<R>,
    stats: LoadStats,
}

/// Loader for funds.
pub type FundLoader = RecordLoader<Fund>;

impl<R: Record> RecordLoader<R> {
    /// Create a new loader with the default configuration.
    pub fn new(repository: Arc<ShardedRepository<R>>) -> Self {
        Self::with_config(repository, LoaderConfig::default())
    }

    /// Create a new loader with custom configuration.
    pub fn with_config(repository: Arc<ShardedRepository<R>>, config: LoaderConfig) -> Self {
        Self {
            repository,
            pending: Vec::with_capacity(config.batch_size),
            config,
            stats: LoadStats::default(),
        }
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Number of records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue records, flushing every full batch.
    #[instrument(skip(self, records), fields(record_count = records.len()))]
    pub async fn load(&mut self, records: Vec<R>) -> Result<(), PipelineError> {
        self.stats.received += records.len();
        self.pending.extend(records);

        while self.pending.len() >= self.config.batch_size {
            let batch: Vec<R> = self.pending.drain(..self.config.batch_size).collect();
            self.write(batch).await?;
        }
        Ok(())
    }

    /// Write whatever is pending as one final, possibly short, batch.
    #[instrument(skip(self))]
    pub async fn flush(&mut self) -> Result<(), PipelineError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch: Vec<R> = self.pending.drain(..).collect();
        self.write(batch).await
    }

    /// Flush and return the final counters.
    pub async fn finish(mut self) -> Result<LoadStats, PipelineError> {
        self.flush().await?;
        info!(
            received = self.stats.received,
            written = self.stats.written,
            removed = self.stats.removed,
            incomplete_batches = self.stats.incomplete_batches,
            "Loader finished"
        );
        Ok(self.stats)
    }

    async fn write(&mut self, batch: Vec<R>) -> Result<(), PipelineError> {
        let count = batch.len();
        debug!(count = count, "Flushing records to repository");

        let summary = self.repository.upsert_batch(batch).await?;
        self.stats.written += summary.written();
        self.stats.removed += summary.removed;

        if !summary.is_complete() {
            self.stats.incomplete_batches += 1;
            warn!(
                count = count,
                failed_shards = ?summary.failed_shards,
                "Batch only partially written"
            );
        }
        Ok(())
    }
}
