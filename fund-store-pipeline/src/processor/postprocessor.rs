use fund_store_shared::{Fund, HistoricPrice};
use tracing::debug;

use super::lookback::{Lookback, LookbackUnit};

/// Appends short-horizon returns computed from a fund's price history.
///
/// For every lookback the latest price is compared with the price whose
/// date is closest to `latest date - lookback`. The latest price itself is
/// never a candidate, and a lookback reaching further back than the
/// history is skipped. Funds without any returns are left untouched.
#[derive(Debug, Clone)]
pub struct FundPostprocessor {
    lookbacks: Vec<Lookback>,
}

impl Default for FundPostprocessor {
    fn default() -> Self {
        Self::new(vec![
            Lookback::new(2, LookbackUnit::Week),
            Lookback::new(1, LookbackUnit::Week),
            Lookback::new(3, LookbackUnit::Day),
            Lookback::new(1, LookbackUnit::Day),
        ])
    }
}

impl FundPostprocessor {
    pub fn new(lookbacks: Vec<Lookback>) -> Self {
        Self { lookbacks }
    }

    pub fn lookbacks(&self) -> &[Lookback] {
        &self.lookbacks
    }

    /// Return `fund` with the extra lookback returns merged in.
    pub fn apply(&self, mut fund: Fund) -> Fund {
        if fund.returns.is_empty() || self.lookbacks.is_empty() {
            return fund;
        }
        let Some((latest, candidates)) = fund.historic_prices.split_last() else {
            return fund;
        };
        let Some(first) = candidates.first() else {
            return fund;
        };

        let mut computed = Vec::with_capacity(self.lookbacks.len());
        for lookback in &self.lookbacks {
            let Some(begin_date) = lookback.before(latest.date) else {
                continue;
            };
            if begin_date < first.date {
                continue;
            }
            let Some(begin) = closest(candidates, begin_date) else {
                continue;
            };
            let value = (latest.price - begin.price) / begin.price;
            if value.is_finite() {
                computed.push((lookback.to_string(), value));
            }
        }

        debug!(isin = %fund.isin, returns = computed.len(), "Computed lookback returns");
        fund.returns.extend(computed);
        fund
    }
}

/// The first price whose date is nearest to `date`.
fn closest(prices: &[HistoricPrice], date: chrono::NaiveDate) -> Option<&HistoricPrice> {
    prices
        .iter()
        .min_by_key(|p| (p.date - date).num_days().abs())
}
