//! Stock record.

use serde::{Deserialize, Serialize};

use crate::fund::HistoricPrice;
use crate::record::Record;

/// A listed stock, identified by its ticker symbol.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(default)]
    pub historic_prices: Vec<HistoricPrice>,
}

impl Stock {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

impl Record for Stock {
    const KEY_FIELD: &'static str = "symbol";

    fn key(&self) -> &str {
        &self.symbol
    }

    fn is_obsolete(&self) -> bool {
        self.name.as_deref().map_or(true, str::is_empty)
    }
}
