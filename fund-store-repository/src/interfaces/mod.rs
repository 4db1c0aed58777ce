//! Interface definitions for shard backends.
//!
//! This module defines the abstract `Shard` trait that allows for dependency
//! injection and swappable storage backends.

mod shard;

pub use shard::{DocumentStream, Shard};
