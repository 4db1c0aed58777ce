//! Fund record.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Legal structure of a fund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FundType {
    Oeic,
    Unit,
}

/// Income or accumulation share class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShareClass {
    Inc,
    Acc,
}

/// A single holding of a fund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub name: String,
    pub symbol: Option<String>,
    pub weight: f64,
}

impl Holding {
    pub fn new(name: impl Into<String>, symbol: Option<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            symbol,
            weight,
        }
    }
}

/// A dated closing price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricPrice {
    pub date: NaiveDate,
    pub price: f64,
}

impl HistoricPrice {
    pub fn new(date: NaiveDate, price: f64) -> Self {
        Self { date, price }
    }
}

/// A fund as scraped and enriched by the ingestion pipeline.
///
/// Identified by its ISIN. A fund whose name is missing or blank is
/// obsolete: the data source no longer lists it and it should be removed.
/// `asof` is when its data was fetched; funds without one are always due
/// for an update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fund {
    pub isin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub fund_type: Option<FundType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_class: Option<ShareClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_charge: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_charge: Option<f64>,
    #[serde(default)]
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub historic_prices: Vec<HistoricPrice>,
    #[serde(default)]
    pub returns: BTreeMap<String, f64>,
    #[serde(default)]
    pub percentiles: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asof: Option<DateTime<Utc>>,
}

impl Fund {
    /// Create an empty fund for the given ISIN.
    pub fn new(isin: impl Into<String>) -> Self {
        Self {
            isin: isin.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, fund_type: FundType) -> Self {
        self.fund_type = Some(fund_type);
        self
    }

    pub fn with_share_class(mut self, share_class: ShareClass) -> Self {
        self.share_class = Some(share_class);
        self
    }

    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.frequency = Some(frequency.into());
        self
    }

    pub fn with_charges(mut self, ocf: f64, amc: f64, entry: f64, exit: f64) -> Self {
        self.ocf = Some(ocf);
        self.amc = Some(amc);
        self.entry_charge = Some(entry);
        self.exit_charge = Some(exit);
        self
    }

    pub fn with_holdings(mut self, holdings: Vec<Holding>) -> Self {
        self.holdings = holdings;
        self
    }

    pub fn with_historic_prices(mut self, historic_prices: Vec<HistoricPrice>) -> Self {
        self.historic_prices = historic_prices;
        self
    }

    pub fn with_return(mut self, period: impl Into<String>, value: f64) -> Self {
        self.returns.insert(period.into(), value);
        self
    }

    pub fn with_asof(mut self, asof: DateTime<Utc>) -> Self {
        self.asof = Some(asof);
        self
    }

    /// Date of the most recent price, if any.
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.historic_prices.iter().map(|p| p.date).max()
    }
}

impl Record for Fund {
    const KEY_FIELD: &'static str = "isin";

    fn key(&self) -> &str {
        &self.isin
    }

    fn is_obsolete(&self) -> bool {
        self.name.as_deref().map_or(true, |n| n.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ID_FIELD, SCORE_FIELD};
    use serde_json::json;

    fn sample_fund() -> Fund {
        Fund::new("GB00B80QG615")
            .with_name("Test Fund Acc")
            .with_type(FundType::Oeic)
            .with_share_class(ShareClass::Acc)
            .with_charges(0.0007, 0.0006, 0.0, 0.0)
            .with_holdings(vec![Holding::new("Apple", Some("AAPL".to_string()), 0.05)])
            .with_historic_prices(vec![
                HistoricPrice::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 100.0),
                HistoricPrice::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 101.5),
            ])
            .with_return("1Y", 0.12)
    }

    #[test]
    fn test_document_carries_id_and_camel_case_fields() {
        let doc = sample_fund().to_document().unwrap();

        assert_eq!(doc[ID_FIELD], json!("GB00B80QG615"));
        assert_eq!(doc["isin"], json!("GB00B80QG615"));
        assert_eq!(doc["type"], json!("OEIC"));
        assert_eq!(doc["shareClass"], json!("Acc"));
        assert_eq!(doc["historicPrices"][1]["date"], json!("2024-01-02"));
        assert_eq!(doc["returns"]["1Y"], json!(0.12));
    }

    #[test]
    fn test_from_document_ignores_storage_fields() {
        let fund = sample_fund();
        let mut doc = fund.to_document().unwrap();
        doc.insert(SCORE_FIELD.to_string(), json!(3.5));

        let restored = Fund::from_document(doc).unwrap();
        assert_eq!(restored, fund);
    }

    #[test]
    fn test_obsolete_when_name_missing_or_blank() {
        assert!(Fund::new("GB0000000001").is_obsolete());
        assert!(Fund::new("GB0000000001").with_name("   ").is_obsolete());
        assert!(!Fund::new("GB0000000001").with_name("Fund").is_obsolete());
    }

    #[test]
    fn test_asof_is_stored_as_utc_timestamp() {
        let asof = NaiveDate::from_ymd_opt(2024, 3, 6)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            .and_utc();
        let fund = sample_fund().with_asof(asof);

        let doc = fund.to_document().unwrap();
        assert_eq!(doc["asof"], json!("2024-03-06T10:00:00Z"));
        assert_eq!(Fund::from_document(doc).unwrap().asof, Some(asof));
        assert!(!sample_fund().to_document().unwrap().contains_key("asof"));
    }

    #[test]
    fn test_latest_date() {
        assert_eq!(
            sample_fund().latest_date(),
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
        assert!(Fund::new("X").latest_date().is_none());
    }
}
