use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Months, NaiveDate};

use crate::errors::PipelineError;

/// Unit of a [`Lookback`] period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookbackUnit {
    Day,
    Week,
    Month,
    Year,
}

impl LookbackUnit {
    fn suffix(self) -> char {
        match self {
            LookbackUnit::Day => 'D',
            LookbackUnit::Week => 'W',
            LookbackUnit::Month => 'M',
            LookbackUnit::Year => 'Y',
        }
    }
}

/// A period such as `3D`, `2W`, `6M` or `5Y`, also used as the key of the
/// computed return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookback {
    pub amount: u32,
    pub unit: LookbackUnit,
}

impl Lookback {
    pub fn new(amount: u32, unit: LookbackUnit) -> Self {
        Self { amount, unit }
    }

    /// The date `self` before `date`, `None` when out of calendar range.
    ///
    /// Month arithmetic clamps to the end of shorter months.
    pub fn before(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.unit {
            LookbackUnit::Day => date.checked_sub_signed(Duration::days(i64::from(self.amount))),
            LookbackUnit::Week => date.checked_sub_signed(Duration::weeks(i64::from(self.amount))),
            LookbackUnit::Month => date.checked_sub_months(Months::new(self.amount)),
            LookbackUnit::Year => {
                date.checked_sub_months(Months::new(self.amount.checked_mul(12)?))
            }
        }
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

impl FromStr for Lookback {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || {
            PipelineError::source_error(format!(
                "invalid lookback '{s}', expected <n><D|W|M|Y>"
            ))
        };

        let mut chars = s.chars();
        let unit = match chars.next_back().map(|c| c.to_ascii_uppercase()) {
            Some('D') => LookbackUnit::Day,
            Some('W') => LookbackUnit::Week,
            Some('M') => LookbackUnit::Month,
            Some('Y') => LookbackUnit::Year,
            _ => return Err(invalid()),
        };
        let amount = chars.as_str().parse::<u32>().map_err(|_| invalid())?;
        Ok(Self::new(amount, unit))
    }
}
