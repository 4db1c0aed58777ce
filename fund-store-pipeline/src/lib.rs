//! # Fund Store Pipeline
//!
//! Ingestion components that feed the sharded fund repository.
//!
//! ## Architecture
//!
//! The pipeline follows the Source-Processor-Loader pattern:
//!
//! 1. **Source**: Lists and fetches funds over HTTP through a bounded retry executor
//! 2. **Processor**: Appends lookback returns computed from price history
//! 3. **Loader**: Upserts funds into the sharded repository in batches
//! 4. **Orchestrator**: Connects the stages and runs the ingestion tasks

pub mod errors;
pub mod executor;
pub mod http;
pub mod loader;
pub mod orchestrator;
pub mod processor;
pub mod source;
pub mod stage;

pub use errors::{BoxError, PipelineError, RetryExhausted};
pub use executor::{ExecuteOptions, ExecutorConfig, RetryExecutor};
pub use http::{HttpClient, HttpError};
pub use loader::{FundLoader, LoadStats, LoaderConfig, RecordLoader};
pub use orchestrator::{FailureHook, LogFailureHook, Orchestrator, OrchestratorConfig, UpdateReport};
pub use processor::{FundPostprocessor, Lookback};
pub use source::{FundSource, JsonFeedSource};
pub use stage::Pipeline;
