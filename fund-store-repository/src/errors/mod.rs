//! Error types for the fund store repository.

mod repository_error;
mod shard_error;

pub use repository_error::RepositoryError;
pub use shard_error::ShardError;
