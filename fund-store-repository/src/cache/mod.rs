//! Read cache over the sharded repository.

mod record_cache;
mod store;

pub use record_cache::{CacheConfig, CacheSnapshot, RecordCache, SnapshotSource};
pub use store::{JsonFileStore, SnapshotStore};
