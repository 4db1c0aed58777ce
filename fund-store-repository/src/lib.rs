//! # Fund Store Repository
//!
//! One logical record collection spread over independent shards. The crate
//! provides the query model, the `Shard` trait with in-memory and
//! OpenSearch backends, the router that decides record placement, and the
//! `ShardedRepository` that fans every operation out across shards and
//! merges the answers. A `RecordCache` and a CSV export hook sit on top.

pub mod cache;
pub mod config;
pub mod errors;
pub mod export;
pub mod interfaces;
pub mod memory;
pub mod opensearch;
pub mod query;
pub mod repository;
pub mod router;
pub mod types;

pub use cache::{CacheConfig, JsonFileStore, RecordCache, SnapshotStore};
pub use config::RepositoryConfig;
pub use errors::{RepositoryError, ShardError};
pub use export::{CsvExporter, RecordExporter};
pub use interfaces::{DocumentStream, Shard};
pub use memory::InMemoryShard;
pub use opensearch::{IndexConfig, OpenSearchShard};
pub use query::{Filter, Projection, QueryOptions, Sort, SortDirection};
pub use repository::{MergedStream, ShardedRepository};
pub use router::{LoadSnapshot, ShardRouter};
pub use types::{BulkWriteResult, DeleteResult, DeleteSummary, ReplaceOne, UpsertSummary};
