//! Cash, inventory, and daily-budget accounting.
//!
//! The ledger is the single source of truth for "can we afford this trade".
//! It is owned exclusively by the engine loop and mutated only through
//! [`PositionLedger::apply_fill`], [`PositionLedger::credit_settlement`],
//! and the once-per-day budget roll, so cash and inventory always reconcile
//! exactly with the sum of applied fills since the last snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use kalshi_common::{Cents, Direction, Side, TradingDay};

use crate::config::LimitsConfig;
use crate::types::Fill;

/// Errors from ledger operations.
///
/// Every variant is an invariant violation or a budget refusal for a single
/// ticker; none of them should take the engine down.
#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("fill would create hedged position on {ticker}: holding {held} {held_side}, filling {side}")]
    HedgedPosition {
        ticker: String,
        held: u32,
        held_side: Side,
        side: Side,
    },

    #[error("fill would oversell {ticker}: holding {held}, selling {selling}")]
    Oversell {
        ticker: String,
        held: u32,
        selling: u32,
    },

    #[error("insufficient cash: have {available}, need {required}")]
    InsufficientCash {
        available: Decimal,
        required: Decimal,
    },

    #[error("per-trade notional cap exceeded: {notional} > {cap}")]
    TradeNotionalExceeded { notional: Decimal, cap: Decimal },

    #[error("daily budget exhausted: spent {spent} of {cap}, requested {notional}")]
    DailyBudgetExceeded {
        spent: Decimal,
        cap: Decimal,
        notional: Decimal,
    },

    #[error("inventory cap on {ticker}: holding {held}, adding {adding}, cap {cap}")]
    InventoryCapExceeded {
        ticker: String,
        held: u32,
        adding: u32,
        cap: u32,
    },
}

/// Holdings on one ticker.
///
/// Inventory is signed: positive contracts are YES, negative are NO. The
/// two are mutually exclusive per ticker unless hedging is explicitly
/// enabled in the limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerPosition {
    /// Signed contract count (+YES / -NO).
    pub inventory: i64,
    /// Dollars paid to acquire the current holding, fees included.
    pub cost_basis: Decimal,
}

impl TickerPosition {
    pub fn is_flat(&self) -> bool {
        self.inventory == 0
    }

    /// Contracts held on a side (zero when holding the other side).
    pub fn held(&self, side: Side) -> u32 {
        match side {
            Side::Yes => self.inventory.max(0) as u32,
            Side::No => (-self.inventory).max(0) as u32,
        }
    }
}

/// Read-only slice of ledger state handed to the strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerView {
    /// Signed inventory on the ticker (+YES / -NO).
    pub inventory: i64,
    /// Current cash balance, dollars.
    pub cash: Decimal,
    /// Daily budget still unspent, dollars.
    pub remaining_daily_budget: Decimal,
    /// Per-order notional cap, dollars.
    pub max_trade_notional: Decimal,
}

/// The position ledger.
#[derive(Debug)]
pub struct PositionLedger {
    cash: Decimal,
    positions: BTreeMap<String, TickerPosition>,
    daily_spent: Decimal,
    current_day: TradingDay,
    limits: LimitsConfig,
    day_offset_hours: i32,
}

impl PositionLedger {
    /// Fresh ledger starting from configured cash.
    pub fn new(limits: LimitsConfig, day_offset_hours: i32, start: DateTime<Utc>) -> Self {
        Self {
            cash: limits.initial_cash,
            positions: BTreeMap::new(),
            daily_spent: Decimal::ZERO,
            current_day: TradingDay::from_utc(start, day_offset_hours),
            limits,
            day_offset_hours,
        }
    }

    /// Ledger seeded from snapshot state. The engine behaves as if it had
    /// been running continuously since the snapshot was taken.
    pub fn restore(
        limits: LimitsConfig,
        day_offset_hours: i32,
        cash: Decimal,
        positions: BTreeMap<String, TickerPosition>,
        daily_spent: Decimal,
        day: TradingDay,
    ) -> Self {
        Self {
            cash,
            positions,
            daily_spent,
            current_day: day,
            limits,
            day_offset_hours,
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn daily_spent(&self) -> Decimal {
        self.daily_spent
    }

    pub fn current_day(&self) -> TradingDay {
        self.current_day
    }

    pub fn position(&self, ticker: &str) -> TickerPosition {
        self.positions.get(ticker).cloned().unwrap_or_default()
    }

    /// Tickers with a non-flat position.
    pub fn open_positions(&self) -> impl Iterator<Item = (&String, &TickerPosition)> {
        self.positions.iter().filter(|(_, p)| !p.is_flat())
    }

    /// Export every position for snapshotting.
    pub fn positions(&self) -> &BTreeMap<String, TickerPosition> {
        &self.positions
    }

    /// Cross the day boundary if the tick time has moved to a new
    /// exchange-local day. The daily-spend counter resets exactly once per
    /// new day, never retroactively for out-of-order times.
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let day = TradingDay::from_utc(now, self.day_offset_hours);
        if day > self.current_day {
            info!(
                previous = %self.current_day,
                new = %day,
                spent = %self.daily_spent,
                "Trading day boundary: resetting daily spend"
            );
            self.current_day = day;
            self.daily_spent = Decimal::ZERO;
        }
    }

    /// Budget still available today.
    pub fn remaining_daily_budget(&self) -> Decimal {
        (self.limits.max_daily_notional - self.daily_spent).max(Decimal::ZERO)
    }

    /// Would a prospective buy of `quantity` at `price` fit within every
    /// cap? Read-only; does not mutate state.
    pub fn check_budget(
        &self,
        ticker: &str,
        side: Side,
        price: Cents,
        quantity: u32,
    ) -> Result<(), LedgerError> {
        let notional = Decimal::from(quantity) * Decimal::from(price) / Decimal::ONE_HUNDRED;

        if notional > self.limits.max_trade_notional {
            return Err(LedgerError::TradeNotionalExceeded {
                notional,
                cap: self.limits.max_trade_notional,
            });
        }

        if self.daily_spent + notional > self.limits.max_daily_notional {
            return Err(LedgerError::DailyBudgetExceeded {
                spent: self.daily_spent,
                cap: self.limits.max_daily_notional,
                notional,
            });
        }

        let held = self.position(ticker).held(side);
        if held + quantity > self.limits.max_inventory_per_ticker {
            return Err(LedgerError::InventoryCapExceeded {
                ticker: ticker.to_string(),
                held,
                adding: quantity,
                cap: self.limits.max_inventory_per_ticker,
            });
        }

        Ok(())
    }

    /// Apply a fill atomically. Either every field updates or none do.
    ///
    /// Rejections: a buy that overdraws cash, a fill that would leave
    /// simultaneous YES and NO holdings (unless hedging is enabled), or a
    /// sell of more than is held. A sell that would flip the sign of the
    /// position is treated as the hedged case: rejected rather than
    /// silently opening the opposite side.
    pub fn apply_fill(&mut self, fill: &Fill) -> Result<(), LedgerError> {
        let position = self.positions.get(&fill.ticker).cloned().unwrap_or_default();
        let qty = fill.quantity as i64;

        let new_inventory = match (fill.direction, fill.side) {
            (Direction::Buy, Side::Yes) => position.inventory + qty,
            (Direction::Buy, Side::No) => position.inventory - qty,
            (Direction::Sell, Side::Yes) => position.inventory - qty,
            (Direction::Sell, Side::No) => position.inventory + qty,
        };

        if !self.limits.allow_hedged {
            match fill.direction {
                Direction::Buy => {
                    let opposite = fill.side.opposite();
                    let held_opposite = position.held(opposite);
                    if held_opposite > 0 {
                        return Err(LedgerError::HedgedPosition {
                            ticker: fill.ticker.clone(),
                            held: held_opposite,
                            held_side: opposite,
                            side: fill.side,
                        });
                    }
                }
                Direction::Sell => {
                    let held = position.held(fill.side);
                    if fill.quantity > held {
                        return Err(LedgerError::Oversell {
                            ticker: fill.ticker.clone(),
                            held,
                            selling: fill.quantity,
                        });
                    }
                }
            }
        }

        let delta = fill.cash_delta();
        if self.cash + delta < Decimal::ZERO {
            return Err(LedgerError::InsufficientCash {
                available: self.cash,
                required: -delta,
            });
        }

        self.cash += delta;
        if fill.direction == Direction::Buy {
            self.daily_spent += fill.notional();
        }

        let entry = self.positions.entry(fill.ticker.clone()).or_default();
        entry.inventory = new_inventory;
        match fill.direction {
            Direction::Buy => entry.cost_basis += fill.notional() + fill.fee,
            Direction::Sell => {
                entry.cost_basis = (entry.cost_basis - fill.notional()).max(Decimal::ZERO)
            }
        }

        Ok(())
    }

    /// Pay out a settled market at `yes_payout` cents per YES contract
    /// (NO contracts pay the complement). Clears the position and returns
    /// the credited amount.
    pub fn credit_settlement(&mut self, ticker: &str, yes_payout: Cents) -> Decimal {
        let Some(position) = self.positions.remove(ticker) else {
            return Decimal::ZERO;
        };
        let yes_qty = position.held(Side::Yes);
        let no_qty = position.held(Side::No);
        let credit = Decimal::from(yes_qty) * Decimal::from(yes_payout) / Decimal::ONE_HUNDRED
            + Decimal::from(no_qty) * Decimal::from(100 - yes_payout) / Decimal::ONE_HUNDRED;
        self.cash += credit;
        credit
    }

    /// Read-only view for the strategy.
    pub fn view(&self, ticker: &str) -> LedgerView {
        LedgerView {
            inventory: self.position(ticker).inventory,
            cash: self.cash,
            remaining_daily_budget: self.remaining_daily_budget(),
            max_trade_notional: self.limits.max_trade_notional,
        }
    }
}
