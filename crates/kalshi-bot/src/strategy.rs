//! Strategy abstraction and configuration.
//!
//! A strategy is a deterministic function from (market snapshot, ledger
//! view, parameters) to the set of orders it wants resting. It performs no
//! I/O and never mutates the ledger; per-ticker rolling state (price
//! history) is part of the fold over the tick sequence, so replaying the
//! same ticks always reproduces the same intents.

pub mod maker;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use kalshi_common::Cents;

use crate::ledger::LedgerView;
use crate::types::{MarketSnapshot, OrderIntent};

pub use maker::MeanReversionMaker;

/// Errors from strategy parameter validation.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("{field} out of range: {message}")]
    OutOfRange {
        field: &'static str,
        message: String,
    },
}

/// Strategy trait.
///
/// `evaluate` returns the complete desired quote set for the ticker at this
/// tick:
///
/// - `None` — no opinion; leave whatever is resting untouched.
/// - `Some(vec![])` — nothing should rest; cancel everything.
/// - `Some(intents)` — converge live orders onto exactly these.
///
/// The engine owns the decision of how to converge live orders onto the
/// result.
pub trait Strategy: Send {
    /// Strategy name for logs.
    fn name(&self) -> &str;

    /// Produce the desired orders for one snapshot.
    fn evaluate(
        &mut self,
        snapshot: &MarketSnapshot,
        ledger: &LedgerView,
    ) -> Option<Vec<OrderIntent>>;
}

/// Named, enumerated strategy parameters.
///
/// Every knob is listed here; an unknown key in the `[strategy]` section is
/// rejected at parse time, and out-of-range values are rejected by
/// [`StrategyParams::validate`] before the engine starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyParams {
    /// Rolling mid-price window used to estimate fair value.
    pub fair_window: usize,

    /// Required edge beyond the fee estimate, in cents.
    pub margin_cents: Decimal,

    /// Edge (cents after fees) at which sizing reaches full scale.
    pub scaling_factor: Decimal,

    /// Max fraction of spendable cash committed to one order.
    pub max_notional_pct: Decimal,

    /// Max fraction of spendable cash risked to total loss on one order.
    pub max_loss_pct: Decimal,

    /// Max contracts held per ticker per side.
    pub max_inventory: u32,

    /// Inventory skew divisor: quoted size shrinks by
    /// `1 / (1 + inventory / skew_factor)`.
    pub skew_factor: Decimal,

    /// Spread-tightness percentile gate (0-100): only quote when the
    /// current spread is at or below this percentile of the ticker's
    /// recent spreads.
    pub tightness_percentile: u8,

    /// Never quote above this price (cents).
    pub max_price: Cents,

    /// Hard cap on contracts per order.
    pub quantity_cap: u32,

    /// UTC hours during which the strategy is active (empty = always).
    pub active_hours: Vec<u8>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            fair_window: 20,
            margin_cents: Decimal::new(4, 0),
            scaling_factor: Decimal::new(4, 0),
            max_notional_pct: Decimal::new(5, 2),
            max_loss_pct: Decimal::new(2, 2),
            max_inventory: 50,
            skew_factor: Decimal::new(200, 0),
            tightness_percentile: 20,
            max_price: 95,
            quantity_cap: 100,
            active_hours: Vec::new(),
        }
    }
}

impl StrategyParams {
    /// Range-check every parameter. Called once at startup.
    pub fn validate(&self) -> Result<(), StrategyError> {
        fn err(field: &'static str, message: impl Into<String>) -> StrategyError {
            StrategyError::OutOfRange {
                field,
                message: message.into(),
            }
        }

        if self.fair_window == 0 {
            return Err(err("fair_window", "must be at least 1"));
        }
        if self.margin_cents < Decimal::ZERO {
            return Err(err("margin_cents", "must be >= 0"));
        }
        if self.scaling_factor <= Decimal::ZERO {
            return Err(err("scaling_factor", "must be positive"));
        }
        if self.max_notional_pct <= Decimal::ZERO || self.max_notional_pct > Decimal::ONE {
            return Err(err("max_notional_pct", "must be in (0, 1]"));
        }
        if self.max_loss_pct <= Decimal::ZERO || self.max_loss_pct > Decimal::ONE {
            return Err(err("max_loss_pct", "must be in (0, 1]"));
        }
        if self.max_inventory == 0 {
            return Err(err("max_inventory", "must be positive"));
        }
        if self.skew_factor <= Decimal::ZERO {
            return Err(err("skew_factor", "must be positive"));
        }
        if self.tightness_percentile > 100 {
            return Err(err("tightness_percentile", "must be 0-100"));
        }
        if self.max_price == 0 || self.max_price > 99 {
            return Err(err("max_price", "must be 1-99"));
        }
        if self.quantity_cap == 0 {
            return Err(err("quantity_cap", "must be positive"));
        }
        if let Some(h) = self.active_hours.iter().find(|h| **h > 23) {
            return Err(err("active_hours", format!("hour {} out of range", h)));
        }
        Ok(())
    }
}
