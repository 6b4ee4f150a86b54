//! Core market types shared across the engine.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Contract price in integer cents.
///
/// Valid resting prices are 1..=99; 0 and 100 only appear as settlement
/// payouts.
pub type Cents = u32;

/// The two complementary outcomes of a binary contract.
///
/// Prices are complementary: a YES ask at `p` implies a NO bid near
/// `100 - p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    /// Short label used in log rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a fill opens (buy) or closes (sell) contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Exchange-reported lifecycle state of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    #[default]
    Open,
    Closed,
    Settled,
}

impl MarketStatus {
    /// Orders may only rest on open markets.
    pub fn is_tradeable(&self) -> bool {
        matches!(self, MarketStatus::Open)
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "open"),
            MarketStatus::Closed => write!(f, "closed"),
            MarketStatus::Settled => write!(f, "settled"),
        }
    }
}

impl std::str::FromStr for MarketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" | "active" => Ok(MarketStatus::Open),
            "closed" | "inactive" => Ok(MarketStatus::Closed),
            "settled" | "finalized" => Ok(MarketStatus::Settled),
            _ => Err(format!("Unknown market status: {}", s)),
        }
    }
}

/// Exchange-local trading day.
///
/// The exchange settles and resets daily budgets on its local calendar day,
/// not on UTC midnight. The engine works in UTC throughout and derives the
/// trading day by applying a fixed offset (default -5h, US Eastern standard)
/// before taking the date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradingDay(pub NaiveDate);

impl TradingDay {
    /// Derive the trading day for a UTC instant given the exchange offset
    /// in hours (negative = west of UTC).
    pub fn from_utc(ts: DateTime<Utc>, offset_hours: i32) -> Self {
        TradingDay((ts + Duration::hours(offset_hours as i64)).date_naive())
    }
}

impl std::fmt::Display for TradingDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Yes.opposite(), Side::No);
        assert_eq!(Side::No.opposite(), Side::Yes);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("open".parse::<MarketStatus>().unwrap(), MarketStatus::Open);
        assert_eq!(
            "SETTLED".parse::<MarketStatus>().unwrap(),
            MarketStatus::Settled
        );
        assert!("bogus".parse::<MarketStatus>().is_err());
        assert!(MarketStatus::Open.is_tradeable());
        assert!(!MarketStatus::Closed.is_tradeable());
    }

    #[test]
    fn test_trading_day_offset() {
        // 03:00 UTC on Jan 10 is still Jan 9 in Eastern standard time.
        let ts = Utc.with_ymd_and_hms(2026, 1, 10, 3, 0, 0).unwrap();
        let day = TradingDay::from_utc(ts, -5);
        assert_eq!(day.0, NaiveDate::from_ymd_opt(2026, 1, 9).unwrap());

        // 06:00 UTC has crossed into Jan 10 locally.
        let ts = Utc.with_ymd_and_hms(2026, 1, 10, 6, 0, 0).unwrap();
        let day = TradingDay::from_utc(ts, -5);
        assert_eq!(day.0, NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
    }
}
