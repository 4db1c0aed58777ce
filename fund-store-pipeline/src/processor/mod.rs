//! Processor module for the fund pipeline.
//!
//! Enriches fetched funds before they are loaded.

mod lookback;
mod postprocessor;

pub use lookback::{Lookback, LookbackUnit};
pub use postprocessor::FundPostprocessor;
