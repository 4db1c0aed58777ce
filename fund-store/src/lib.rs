//! # Fund Store
//!
//! Batch task runner for the sharded fund store.
//!
//! This crate reads the configuration from the environment, wires the
//! repository and the ingestion pipeline together and runs the requested
//! tasks in order.

pub mod config;
pub mod lock;
pub mod tasks;

pub use config::{Dependencies, Settings};
pub use tasks::Task;

use thiserror::Error;

/// Errors that can occur during start-up or while running a task.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] fund_store_pipeline::PipelineError),

    /// Repository error.
    #[error("Repository error: {0}")]
    RepositoryError(#[from] fund_store_repository::RepositoryError),

    /// Another run holds the lock.
    #[error("Another run is in progress (lock file {0}); use --force to run anyway")]
    Locked(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
