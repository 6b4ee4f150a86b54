//! Snapshot, intent, order, and fill types flowing through the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kalshi_common::{Cents, Direction, MarketStatus, Side};

/// One market's state at one instant.
///
/// Immutable once produced; the tick source emits at most one per ticker per
/// tick. Quote fields are optional because the exchange regularly reports
/// one-sided books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub yes_bid: Option<Cents>,
    pub yes_ask: Option<Cents>,
    pub no_bid: Option<Cents>,
    pub no_ask: Option<Cents>,
    pub last_price: Option<Cents>,
    pub volume: u64,
    pub status: MarketStatus,
}

impl MarketSnapshot {
    /// Best YES bid, falling back to the complement of the NO ask when the
    /// direct bid is missing.
    pub fn best_yes_bid(&self) -> Option<Cents> {
        self.yes_bid
            .or_else(|| self.no_ask.map(|a| 100u32.saturating_sub(a)))
    }

    /// Best ask for a side.
    pub fn ask(&self, side: Side) -> Option<Cents> {
        match side {
            Side::Yes => self.yes_ask,
            Side::No => self.no_ask,
        }
    }

    /// Best bid for a side.
    pub fn bid(&self, side: Side) -> Option<Cents> {
        match side {
            Side::Yes => self.best_yes_bid(),
            Side::No => self
                .no_bid
                .or_else(|| self.yes_ask.map(|a| 100u32.saturating_sub(a))),
        }
    }

    /// Midpoint of the YES market, if both sides quote.
    pub fn yes_mid(&self) -> Option<Decimal> {
        let bid = self.best_yes_bid()?;
        let ask = self.yes_ask?;
        Some((Decimal::from(bid) + Decimal::from(ask)) / Decimal::TWO)
    }

    /// YES spread in cents, if both sides quote.
    pub fn yes_spread(&self) -> Option<Cents> {
        let bid = self.best_yes_bid()?;
        let ask = self.yes_ask?;
        Some(ask.saturating_sub(bid))
    }

    /// True when both quote fields needed for pricing are present.
    pub fn has_quotes(&self) -> bool {
        self.best_yes_bid().is_some() && self.yes_ask.is_some()
    }
}

/// What the strategy wants resting on one side of one market.
///
/// Built fresh on every evaluation, never mutated — a new evaluation
/// supersedes the previous intent set wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIntent {
    pub ticker: String,
    pub side: Side,
    /// Limit price in cents, 1..=99.
    pub price: Cents,
    /// Contracts wanted; always positive.
    pub quantity: u32,
}

impl OrderIntent {
    pub fn new(ticker: impl Into<String>, side: Side, price: Cents, quantity: u32) -> Self {
        Self {
            ticker: ticker.into(),
            side,
            price,
            quantity,
        }
    }

    /// Notional exposure in dollars (price x quantity), fee excluded.
    pub fn notional(&self) -> Decimal {
        Decimal::from(self.quantity) * Decimal::from(self.price) / Decimal::ONE_HUNDRED
    }
}

/// A resting order as known to an execution adapter.
///
/// Owned by the adapter; the reconciler only ever reads a point-in-time
/// copy of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveOrder {
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub price: Cents,
    pub remaining: u32,
    pub placed_at: DateTime<Utc>,
}

impl LiveOrder {
    /// Age of the order relative to the current tick time.
    ///
    /// Measured against tick time, not the wall clock, so replay and live
    /// runs age orders identically.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.placed_at).num_seconds()
    }
}

/// An executed trade, reported by an adapter and applied to the ledger
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub ticker: String,
    pub side: Side,
    pub direction: Direction,
    /// Execution price in cents.
    pub price: Cents,
    pub quantity: u32,
    /// Exchange fee in dollars.
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
    /// Order id the fill came from, when the adapter knows it.
    pub order_id: Option<String>,
}

impl Fill {
    /// Notional in dollars, fee excluded.
    pub fn notional(&self) -> Decimal {
        Decimal::from(self.quantity) * Decimal::from(self.price) / Decimal::ONE_HUNDRED
    }

    /// Signed cash delta: buys cost notional + fee, sells return
    /// notional - fee.
    pub fn cash_delta(&self) -> Decimal {
        match self.direction {
            Direction::Buy => -(self.notional() + self.fee),
            Direction::Sell => self.notional() - self.fee,
        }
    }
}
