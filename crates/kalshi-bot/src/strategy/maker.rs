//! Mean-reversion market maker.
//!
//! Estimates fair value as the rolling mean of recent mids and quotes the
//! side whose passive entry carries positive edge after the convex fee and
//! a configured margin. Size scales with edge and shrinks as inventory
//! accumulates; a spread-tightness gate keeps quotes out of wide, stale
//! books.

use std::collections::{HashMap, VecDeque};

use chrono::Timelike;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use kalshi_common::fees::fee_estimate_cents;
use kalshi_common::{convex_fee, Cents, Side};

use crate::ledger::LedgerView;
use crate::types::{MarketSnapshot, OrderIntent};

use super::{Strategy, StrategyParams};

/// Spread history length per ticker for the tightness gate.
const SPREAD_HISTORY: usize = 500;

/// Spread samples required before the percentile gate replaces the mean.
const SPREAD_WARMUP: usize = 100;

/// Per-ticker rolling state.
#[derive(Debug, Default)]
struct TickerState {
    /// Recent mids, capped at `fair_window`.
    mids: VecDeque<Decimal>,
    /// Recent YES spreads in cents, capped at `SPREAD_HISTORY`.
    spreads: VecDeque<Cents>,
}

/// Inventory-aware mean-reversion maker.
pub struct MeanReversionMaker {
    params: StrategyParams,
    state: HashMap<String, TickerState>,
}

impl MeanReversionMaker {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            params,
            state: HashMap::new(),
        }
    }

    /// Spread gate: quote only when the current spread sits at or below the
    /// configured percentile of this ticker's recent spreads. Falls back to
    /// the mean until enough history accumulates.
    fn is_tight(&self, ticker: &str, spread: Cents) -> bool {
        let Some(state) = self.state.get(ticker) else {
            return true;
        };
        if state.spreads.is_empty() {
            return true;
        }
        let threshold = if state.spreads.len() > SPREAD_WARMUP {
            percentile(&state.spreads, self.params.tightness_percentile)
        } else {
            let sum: u64 = state.spreads.iter().map(|s| *s as u64).sum();
            sum as f64 / state.spreads.len() as f64
        };
        spread as f64 <= threshold
    }

    fn observe(&mut self, ticker: &str, mid: Decimal, spread: Cents) {
        let state = self.state.entry(ticker.to_string()).or_default();
        state.mids.push_back(mid);
        while state.mids.len() > self.params.fair_window {
            state.mids.pop_front();
        }
        state.spreads.push_back(spread);
        while state.spreads.len() > SPREAD_HISTORY {
            state.spreads.pop_front();
        }
    }

    fn fair_prob(&self, ticker: &str) -> Option<Decimal> {
        let state = self.state.get(ticker)?;
        if state.mids.is_empty() {
            return None;
        }
        let sum: Decimal = state.mids.iter().sum();
        Some(sum / Decimal::from(state.mids.len()) / Decimal::ONE_HUNDRED)
    }
}

impl Strategy for MeanReversionMaker {
    fn name(&self) -> &str {
        "mean_reversion_maker"
    }

    fn evaluate(
        &mut self,
        snapshot: &MarketSnapshot,
        ledger: &LedgerView,
    ) -> Option<Vec<OrderIntent>> {
        if !snapshot.status.is_tradeable() {
            // Market no longer accepts orders; pull anything resting.
            return Some(Vec::new());
        }

        let yes_bid = snapshot.best_yes_bid()?;
        let yes_ask = snapshot.yes_ask?;
        let mid = (Decimal::from(yes_bid) + Decimal::from(yes_ask)) / Decimal::TWO;
        let spread = yes_ask.saturating_sub(yes_bid);

        // Tightness is judged against history *before* this tick's spread
        // is recorded, matching the order of observation and decision.
        let tight = self.is_tight(&snapshot.ticker, spread);
        self.observe(&snapshot.ticker, mid, spread);

        if !self.params.active_hours.is_empty() {
            let hour = snapshot.timestamp.hour() as u8;
            if !self.params.active_hours.contains(&hour) {
                return None;
            }
        }
        if !tight {
            return Some(Vec::new());
        }

        let fair_prob = self.fair_prob(&snapshot.ticker)?;

        // Passive entry prices: truncate the mid for YES, complement for NO.
        let price_yes = mid.trunc().to_u32()?.clamp(1, 99);
        let price_no = 100 - price_yes;

        let edge_yes = fair_prob - Decimal::from(price_yes) / Decimal::ONE_HUNDRED;
        let edge_no =
            (Decimal::ONE - fair_prob) - Decimal::from(price_no) / Decimal::ONE_HUNDRED;

        let (side, entry_price, edge) = if edge_yes > Decimal::ZERO {
            (Side::Yes, price_yes, edge_yes)
        } else if edge_no > Decimal::ZERO {
            (Side::No, price_no, edge_no)
        } else {
            return None;
        };

        // Mutual exclusivity: never quote the side opposite our holdings.
        let inventory = match side {
            Side::Yes => {
                if ledger.inventory < 0 {
                    return None;
                }
                ledger.inventory.max(0) as u32
            }
            Side::No => {
                if ledger.inventory > 0 {
                    return None;
                }
                (-ledger.inventory).max(0) as u32
            }
        };

        // Fee + margin gate on the continuous per-contract fee estimate;
        // the rounded fee for the actual quantity is re-checked below.
        let fee_cents = fee_estimate_cents(entry_price);
        let edge_cents = edge * Decimal::ONE_HUNDRED;
        let edge_after_fee = edge_cents - fee_cents - self.params.margin_cents;
        if edge_after_fee <= Decimal::ZERO {
            return None;
        }

        let scale = (edge_after_fee / self.params.scaling_factor).min(Decimal::ONE);

        // Spendable cash is bounded by the remaining daily budget so a
        // warm-started engine with most of the day spent sizes down to zero.
        let spendable = ledger.cash.min(ledger.remaining_daily_budget);
        if spendable <= Decimal::ZERO {
            return None;
        }
        let max_notional = (spendable * self.params.max_notional_pct)
            .min(ledger.max_trade_notional);
        let max_loss = spendable * self.params.max_loss_pct;

        let fee_unit = fee_cents / Decimal::ONE_HUNDRED;
        let cost_unit = Decimal::from(entry_price) / Decimal::ONE_HUNDRED + fee_unit;
        let qty_by_notional = (max_notional / cost_unit).floor().to_u32().unwrap_or(0);
        let qty_by_loss = (max_loss / cost_unit).floor().to_u32().unwrap_or(0);
        let base_qty = qty_by_notional.min(qty_by_loss);
        if base_qty == 0 {
            return None;
        }

        let room = self.params.max_inventory.saturating_sub(inventory);
        if room == 0 {
            return None;
        }

        let penalty = Decimal::ONE
            / (Decimal::ONE + Decimal::from(inventory) / self.params.skew_factor);
        let scaled = (Decimal::from(base_qty) * scale * penalty)
            .floor()
            .to_u32()
            .unwrap_or(0);
        let qty = scaled.max(1).min(room).min(self.params.quantity_cap);

        // Re-gate with the rounded fee the order would actually pay.
        let fee_real = convex_fee(entry_price, qty);
        let fee_cents_real = fee_real / Decimal::from(qty) * Decimal::ONE_HUNDRED;
        if edge_cents - fee_cents_real - self.params.margin_cents <= Decimal::ZERO {
            return None;
        }

        // Quote at the opposing ask; respect the price ceiling.
        let quote_price = snapshot.ask(side)?;
        if quote_price == 0 || quote_price > self.params.max_price {
            return None;
        }

        Some(vec![OrderIntent::new(
            snapshot.ticker.clone(),
            side,
            quote_price,
            qty,
        )])
    }
}

/// Linear-interpolated percentile over a spread history.
fn percentile(values: &VecDeque<Cents>, pct: u8) -> f64 {
    let mut sorted: Vec<Cents> = values.iter().copied().collect();
    sorted.sort_unstable();
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct as f64 / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kalshi_common::MarketStatus;
    use rust_decimal_macros::dec;

    fn snap(yes_bid: u32, yes_ask: u32, no_ask: u32) -> MarketSnapshot {
        MarketSnapshot {
            ticker: "KXHIGHNY-26JAN09-B49.5".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 9, 14, 0, 0).unwrap(),
            yes_bid: Some(yes_bid),
            yes_ask: Some(yes_ask),
            no_bid: None,
            no_ask: Some(no_ask),
            last_price: None,
            volume: 10,
            status: MarketStatus::Open,
        }
    }

    fn view(inventory: i64, cash: Decimal) -> LedgerView {
        LedgerView {
            inventory,
            cash,
            remaining_daily_budget: cash,
            max_trade_notional: dec!(25),
        }
    }

    fn maker() -> MeanReversionMaker {
        MeanReversionMaker::new(StrategyParams {
            margin_cents: dec!(0.5),
            ..StrategyParams::default()
        })
    }

    /// Feed a descending price path so fair value sits above the current
    /// price and a YES entry shows edge.
    fn warm_with_downtrend(maker: &mut MeanReversionMaker, view: &LedgerView) {
        for price in (40..60).rev() {
            let s = snap(price - 1, price + 1, 100 - price + 1);
            let _ = maker.evaluate(&s, view);
        }
    }

    #[test]
    fn test_missing_quotes_keeps_orders() {
        let mut m = maker();
        let mut s = snap(44, 46, 55);
        s.yes_ask = None;
        assert_eq!(m.evaluate(&s, &view(0, dec!(100))), None);
    }

    #[test]
    fn test_closed_market_cancels() {
        let mut m = maker();
        let mut s = snap(44, 46, 55);
        s.status = MarketStatus::Closed;
        assert_eq!(m.evaluate(&s, &view(0, dec!(100))), Some(vec![]));
    }

    #[test]
    fn test_downtrend_produces_yes_quote() {
        let mut m = maker();
        let v = view(0, dec!(100));
        warm_with_downtrend(&mut m, &v);

        // Price has fallen well below the rolling mean: YES is cheap.
        let s = snap(39, 41, 61);
        let intents = m.evaluate(&s, &v).expect("decision expected");
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, Side::Yes);
        assert_eq!(intents[0].price, 41);
        assert!(intents[0].quantity >= 1);
    }

    #[test]
    fn test_no_edge_keeps_orders() {
        let mut m = maker();
        let v = view(0, dec!(100));
        // Flat price path: fair == mid, no edge anywhere.
        for _ in 0..30 {
            let s = snap(49, 51, 51);
            assert_eq!(m.evaluate(&s, &v), None);
        }
    }

    #[test]
    fn test_opposite_inventory_blocks_quote() {
        let mut m = maker();
        let v_no = view(-10, dec!(100));
        warm_with_downtrend(&mut m, &v_no);

        // YES has edge but we hold NO: mutual exclusivity wins.
        let s = snap(39, 41, 61);
        assert_eq!(m.evaluate(&s, &v_no), None);
    }

    #[test]
    fn test_exhausted_budget_suppresses_quotes() {
        let mut m = maker();
        let mut v = view(0, dec!(100));
        warm_with_downtrend(&mut m, &v);

        v.remaining_daily_budget = Decimal::ZERO;
        let s = snap(39, 41, 61);
        assert_eq!(m.evaluate(&s, &v), None);
    }

    #[test]
    fn test_full_inventory_suppresses_quotes() {
        let mut m = maker();
        let v = view(50, dec!(100));
        warm_with_downtrend(&mut m, &v);

        let s = snap(39, 41, 61);
        assert_eq!(m.evaluate(&s, &v), None);
    }

    #[test]
    fn test_price_ceiling_respected() {
        let mut m = MeanReversionMaker::new(StrategyParams {
            margin_cents: dec!(0.5),
            max_price: 40,
            ..StrategyParams::default()
        });
        let v = view(0, dec!(100));
        warm_with_downtrend(&mut m, &v);

        // Edge exists but the ask sits above the ceiling.
        let s = snap(39, 41, 61);
        assert_eq!(m.evaluate(&s, &v), None);
    }

    #[test]
    fn test_inactive_hour_keeps_orders() {
        let mut m = MeanReversionMaker::new(StrategyParams {
            margin_cents: dec!(0.5),
            active_hours: vec![5, 6, 7],
            ..StrategyParams::default()
        });
        let v = view(0, dec!(100));
        // Snapshot hour is 14:00 UTC, outside the active window.
        let s = snap(44, 46, 55);
        assert_eq!(m.evaluate(&s, &v), None);
    }

    #[test]
    fn test_determinism_identical_runs() {
        let run = || {
            let mut m = maker();
            let v = view(0, dec!(100));
            let mut out = Vec::new();
            for price in (35..60).rev() {
                let s = snap(price - 1, price + 1, 100 - price + 1);
                out.push(m.evaluate(&s, &v));
            }
            out
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_percentile_interpolation() {
        let values: VecDeque<Cents> = (1..=5).collect();
        assert_eq!(percentile(&values, 0), 1.0);
        assert_eq!(percentile(&values, 50), 3.0);
        assert_eq!(percentile(&values, 100), 5.0);
        assert_eq!(percentile(&values, 25), 2.0);
    }
}
