use std::sync::Arc;

use async_trait::async_trait;
use fund_store_shared::Fund;
use tracing::{debug, instrument};

use super::FundSource;
use crate::errors::PipelineError;
use crate::http::HttpClient;

const ISIN_PLACEHOLDER: &str = "{isin}";

/// [`FundSource`] over two JSON endpoints: a catalog returning an array of
/// ISINs and a per-fund URL template containing `{isin}`.
#[derive(Clone)]
pub struct JsonFeedSource {
    http: Arc<HttpClient>,
    catalog_url: String,
    fund_url_template: String,
}

impl JsonFeedSource {
    pub fn new(
        http: Arc<HttpClient>,
        catalog_url: impl Into<String>,
        fund_url_template: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let fund_url_template = fund_url_template.into();
        if !fund_url_template.contains(ISIN_PLACEHOLDER) {
            return Err(PipelineError::source_error(format!(
                "fund URL template '{fund_url_template}' has no {ISIN_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self {
            http,
            catalog_url: catalog_url.into(),
            fund_url_template,
        })
    }

    pub fn fund_url(&self, isin: &str) -> String {
        self.fund_url_template.replace(ISIN_PLACEHOLDER, isin)
    }
}

#[async_trait]
impl FundSource for JsonFeedSource {
    #[instrument(skip(self), fields(url = %self.catalog_url))]
    async fn list_isins(&self) -> Result<Vec<String>, PipelineError> {
        let isins: Vec<String> = self.http.get_json(&self.catalog_url).await?;
        debug!(count = isins.len(), "Listed ISINs");
        Ok(isins)
    }

    async fn fetch_fund(&self, isin: &str) -> Result<Fund, PipelineError> {
        let mut fund: Fund = self.http.get_json(&self.fund_url(isin)).await?;
        if fund.isin.trim().is_empty() {
            fund.isin = isin.to_string();
        }
        Ok(fund)
    }
}
