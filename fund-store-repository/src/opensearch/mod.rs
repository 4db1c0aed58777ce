//! OpenSearch implementation of a shard.
//!
//! This module provides a concrete implementation of `Shard` using one
//! OpenSearch index as the backend.

mod client;
mod index_config;
mod queries;

pub use client::OpenSearchShard;
pub use index_config::IndexConfig;
