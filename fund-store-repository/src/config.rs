//! Configuration types for the ShardedRepository.

/// Configuration for the ShardedRepository.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Maximum number of records allowed in a single upsert batch.
    /// Set to None to disable the limit (not recommended for production).
    pub max_batch_size: Option<usize>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_batch_size: Some(1000),
        }
    }
}

impl RepositoryConfig {
    /// Create a config with no batch size limit (use with caution).
    pub fn unlimited() -> Self {
        Self {
            max_batch_size: None,
        }
    }

    /// Create a config with a custom batch size limit.
    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: Some(max_batch_size),
        }
    }
}
