//! When a stored fund is due for a refetch, and when it is purged.

use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, SecondsFormat, Timelike, Utc, Weekday,
};
use serde_json::Value;

use fund_store_repository::Filter;

/// Field recording when a fund was fetched.
pub const ASOF_FIELD: &str = "asof";

/// `today`, or the Friday before it on a weekend.
pub fn last_business_day(today: NaiveDate) -> NaiveDate {
    let back = match today.weekday() {
        Weekday::Sat => 1,
        Weekday::Sun => 2,
        _ => 0,
    };
    today.checked_sub_days(Days::new(back)).unwrap_or(today)
}

/// Funds fetched before this instant are refetched.
pub fn refetch_cutoff(today: NaiveDate) -> DateTime<Utc> {
    start_of(last_business_day(today))
}

/// Funds fetched before this instant are deleted.
pub fn purge_cutoff(today: NaiveDate) -> DateTime<Utc> {
    start_of(today.checked_sub_months(Months::new(1)).unwrap_or(today))
}

/// Stored funds with no `asof`, or one before `cutoff`.
pub fn due_filter(cutoff: DateTime<Utc>) -> Filter {
    Filter::Or(vec![
        Filter::eq(ASOF_FIELD, Value::Null),
        Filter::lt(ASOF_FIELD, timestamp(cutoff)),
    ])
}

/// Stored funds fetched at or after `cutoff`.
pub fn fresh_filter(cutoff: DateTime<Utc>) -> Filter {
    Filter::gte(ASOF_FIELD, timestamp(cutoff))
}

/// Stored funds fetched before `cutoff`; funds without `asof` never match.
pub fn outdated_filter(cutoff: DateTime<Utc>) -> Filter {
    Filter::lt(ASOF_FIELD, timestamp(cutoff))
}

/// The `asof` value stamped on a fund fetched at `now`.
pub fn stamp(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(0).unwrap_or(now)
}

// Same text form serde gives a whole-second `DateTime<Utc>`, so string
// comparison in storage follows time order.
fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
