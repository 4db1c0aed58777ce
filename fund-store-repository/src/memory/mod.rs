//! In-memory implementation of the `Shard` trait.
//!
//! Used for local dry runs and as the reference backend in tests.

mod shard;
mod text;

pub use shard::InMemoryShard;
