//! Error types for the fund store pipeline.

use fund_store_repository::RepositoryError;
use thiserror::Error;

use crate::http::HttpError;

/// Boxed error carried by a failed pipeline stage.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A task that failed on every allowed attempt.
///
/// Keeps the last underlying error so callers can inspect the cause.
#[derive(Debug, Error)]
#[error("Task [{description}] failed after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E> {
    description: String,
    attempts: u32,
    #[source]
    last_error: E,
}

impl<E> RetryExhausted<E> {
    pub fn new(description: impl Into<String>, attempts: u32, last_error: E) -> Self {
        Self {
            description: description.into(),
            attempts,
            last_error,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Number of attempts made, including the last one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> &E {
        &self.last_error
    }

    pub fn into_inner(self) -> E {
        self.last_error
    }
}

/// Errors that can occur in the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage function failed; the pipeline stops.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: BoxError,
    },

    /// An outbound HTTP request ran out of attempts.
    #[error("Fetch error: {0}")]
    Fetch(#[from] RetryExhausted<HttpError>),

    /// The record source returned unusable data.
    #[error("Source error: {0}")]
    SourceError(String),

    /// Error from the loader component.
    #[error("Loader error: {0}")]
    LoaderError(String),

    /// Error from the repository.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Pipeline was cancelled or interrupted.
    #[error("Pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Wrap a stage failure.
    pub fn stage(stage: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: source.into(),
        }
    }

    /// Create a source error.
    pub fn source_error(msg: impl Into<String>) -> Self {
        Self::SourceError(msg.into())
    }

    /// Create a loader error.
    pub fn loader(msg: impl Into<String>) -> Self {
        Self::LoaderError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug, Error)]
    #[error("boom {0}")]
    struct Boom(u32);

    #[test]
    fn test_retry_exhausted_keeps_last_error() {
        let err = RetryExhausted::new("GET http://x", 3, Boom(3));

        assert_eq!(err.attempts(), 3);
        assert_eq!(err.last_error().0, 3);
        assert_eq!(err.to_string(), "Task [GET http://x] failed after 3 attempts: boom 3");
        assert!(err.source().is_some());
        assert_eq!(err.into_inner().0, 3);
    }

    #[test]
    fn test_stage_error_message() {
        let err = PipelineError::stage("fetch_fund", "no such fund");
        assert_eq!(err.to_string(), "Stage 'fetch_fund' failed: no such fund");
    }
}
