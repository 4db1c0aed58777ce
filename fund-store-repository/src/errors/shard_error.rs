//! Shard error types.
//!
//! Errors raised by a single storage backend.

use thiserror::Error;

/// Errors that can occur while talking to one shard.
#[derive(Debug, Clone, Error)]
pub enum ShardError {
    /// Failed to establish connection to the backend.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A find, count or search request failed.
    #[error("Query error: {0}")]
    QueryError(String),

    /// A bulk write was rejected in whole or in part.
    #[error("Bulk write error: {0}")]
    BulkWriteError(String),

    /// A delete request failed.
    #[error("Delete error: {0}")]
    DeleteError(String),

    /// Failed to create the backing index.
    #[error("Index creation error: {0}")]
    IndexCreationError(String),

    /// Failed to parse a backend response.
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl ShardError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::QueryError(msg.into())
    }

    /// Create a bulk write error.
    pub fn bulk_write(msg: impl Into<String>) -> Self {
        Self::BulkWriteError(msg.into())
    }

    /// Create a delete error.
    pub fn delete(msg: impl Into<String>) -> Self {
        Self::DeleteError(msg.into())
    }

    /// Create an index creation error.
    pub fn index_creation(msg: impl Into<String>) -> Self {
        Self::IndexCreationError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }
}
