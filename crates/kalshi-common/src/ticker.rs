//! Ticker parsing and settlement timing.
//!
//! Daily high-temperature tickers encode the market date in their middle
//! segment: `KXHIGHNY-26JAN09-B49.5` is the New York daily high for
//! 2026-01-09, bracket 49.5F. Settlement happens the following morning once
//! the weather service finalizes the day's observations.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use thiserror::Error;

/// Errors from ticker parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TickerError {
    #[error("ticker has no date segment: {0}")]
    MissingDateSegment(String),

    #[error("unparseable date segment '{segment}' in ticker {ticker}")]
    BadDateSegment { ticker: String, segment: String },
}

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Extract the market date from a ticker like `KXHIGHNY-26JAN09-B49.5`.
///
/// The date segment is the second dash-separated field, formatted `YYMONDD`.
pub fn market_date_from_ticker(ticker: &str) -> Result<NaiveDate, TickerError> {
    let mut parts = ticker.split('-');
    let _series = parts.next();
    let segment = parts
        .next()
        .ok_or_else(|| TickerError::MissingDateSegment(ticker.to_string()))?;

    let bad = || TickerError::BadDateSegment {
        ticker: ticker.to_string(),
        segment: segment.to_string(),
    };

    if segment.len() != 7 {
        return Err(bad());
    }
    let yy: i32 = segment[0..2].parse().map_err(|_| bad())?;
    let mon = &segment[2..5];
    let dd: u32 = segment[5..7].parse().map_err(|_| bad())?;
    let month = MONTHS
        .iter()
        .position(|m| *m == mon.to_ascii_uppercase())
        .ok_or_else(bad)? as u32
        + 1;

    NaiveDate::from_ymd_opt(2000 + yy, month, dd).ok_or_else(bad)
}

/// Settlement instant for a market date: 05:00 UTC the following day,
/// i.e. around midnight exchange-local once the daily high is final.
pub fn settlement_time(market_date: NaiveDate) -> DateTime<Utc> {
    let next = market_date + Duration::days(1);
    Utc.from_utc_datetime(&next.and_hms_opt(5, 0, 0).expect("valid fixed time"))
}
