//! Source of fund data for the ingestion pipeline.

mod json_feed;

use async_trait::async_trait;
use fund_store_shared::Fund;

use crate::errors::PipelineError;

pub use json_feed::JsonFeedSource;

/// Boundary to the external data source.
///
/// `list_isins` names every fund the source currently lists; `fetch_fund`
/// returns the details of one of them. A fund the source no longer knows
/// comes back without a name, which marks it obsolete downstream.
#[async_trait]
pub trait FundSource: Send + Sync {
    async fn list_isins(&self) -> Result<Vec<String>, PipelineError>;

    async fn fetch_fund(&self, isin: &str) -> Result<Fund, PipelineError>;
}
