//! Shared types for the kalshi temperature-market trading engine.
//!
//! CRITICAL: all dollar amounts (cash, cost, fees) use
//! `rust_decimal::Decimal`. Contract prices are integer cents (1-99).
//! NEVER use f64 for financial math.

pub mod fees;
pub mod ticker;
pub mod types;

pub use fees::convex_fee;
pub use ticker::{market_date_from_ticker, settlement_time, TickerError};
pub use types::{Cents, Direction, MarketStatus, Side, TradingDay};
