//! In-process fill simulator.
//!
//! Fill model: a buy whose limit is at or above the opposing best ask fills
//! immediately, completely, at the ask. Anything else rests until a later
//! snapshot crosses it or the reconciler cancels it. No partial fills, no
//! queue position, no slippage.

use async_trait::async_trait;
use tracing::debug;

use kalshi_common::{convex_fee, Direction, Side};

use crate::reconcile::ReconcileAction;
use crate::types::{Fill, LiveOrder, MarketSnapshot, OrderIntent};

use super::{ActionOutcome, ExecutionAdapter, ExecutorError};

/// Simulated execution backend.
#[derive(Debug, Default)]
pub struct SimAdapter {
    /// Resting orders in placement order (deterministic fill sequence).
    orders: Vec<LiveOrder>,
    /// Monotonic id counter; ids are stable across identical replays.
    next_id: u64,
}

impl SimAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_order_id(&mut self) -> String {
        self.next_id += 1;
        format!("SIM-{}", self.next_id)
    }

    /// Does a limit price cross the snapshot's opposing ask?
    fn crossing_ask(snapshot: &MarketSnapshot, side: Side, limit: u32) -> Option<u32> {
        let ask = snapshot.ask(side)?;
        if ask > 0 && limit >= ask {
            Some(ask)
        } else {
            None
        }
    }

    fn fill_from(intent_side: Side, snapshot: &MarketSnapshot, ask: u32, qty: u32, order_id: String) -> Fill {
        Fill {
            ticker: snapshot.ticker.clone(),
            side: intent_side,
            direction: Direction::Buy,
            price: ask,
            quantity: qty,
            fee: convex_fee(ask, qty),
            timestamp: snapshot.timestamp,
            order_id: Some(order_id),
        }
    }

    fn place(&mut self, intent: &OrderIntent, snapshot: &MarketSnapshot) -> ActionOutcome {
        let order_id = self.next_order_id();
        if let Some(ask) = Self::crossing_ask(snapshot, intent.side, intent.price) {
            let fill = Self::fill_from(intent.side, snapshot, ask, intent.quantity, order_id);
            debug!(ticker = %intent.ticker, side = %intent.side, price = ask, qty = intent.quantity, "sim: immediate fill");
            return ActionOutcome::Filled { fill };
        }

        let order = LiveOrder {
            order_id,
            ticker: intent.ticker.clone(),
            side: intent.side,
            price: intent.price,
            remaining: intent.quantity,
            placed_at: snapshot.timestamp,
        };
        self.orders.push(order.clone());
        debug!(ticker = %intent.ticker, side = %intent.side, price = intent.price, qty = intent.quantity, "sim: resting");
        ActionOutcome::Placed { order }
    }

    fn amend(
        &mut self,
        order_id: &str,
        intent: &OrderIntent,
        snapshot: &MarketSnapshot,
    ) -> ActionOutcome {
        let Some(index) = self.orders.iter().position(|o| o.order_id == order_id) else {
            return ActionOutcome::Rejected {
                reason: format!("unknown order {}", order_id),
            };
        };

        if let Some(ask) = Self::crossing_ask(snapshot, intent.side, intent.price) {
            let order = self.orders.remove(index);
            let fill =
                Self::fill_from(intent.side, snapshot, ask, intent.quantity, order.order_id);
            return ActionOutcome::AmendFilled { fill };
        }

        // Requote resets the order's age; it is a fresh commitment at the
        // new price.
        let order = &mut self.orders[index];
        order.price = intent.price;
        order.remaining = intent.quantity;
        order.placed_at = snapshot.timestamp;
        ActionOutcome::Amended {
            order: order.clone(),
        }
    }

    fn cancel(&mut self, order_id: &str) -> ActionOutcome {
        // Idempotent: canceling an order the simulator no longer knows
        // (e.g. it just filled) is not an error.
        self.orders.retain(|o| o.order_id != order_id);
        ActionOutcome::Canceled {
            order_id: order_id.to_string(),
        }
    }
}

#[async_trait]
impl ExecutionAdapter for SimAdapter {
    async fn on_snapshot(
        &mut self,
        snapshot: &MarketSnapshot,
    ) -> Result<Vec<Fill>, ExecutorError> {
        let mut fills = Vec::new();
        let mut remaining = Vec::with_capacity(self.orders.len());
        for order in self.orders.drain(..) {
            if order.ticker != snapshot.ticker {
                remaining.push(order);
                continue;
            }
            match Self::crossing_ask(snapshot, order.side, order.price) {
                Some(ask) => {
                    fills.push(Self::fill_from(
                        order.side,
                        snapshot,
                        ask,
                        order.remaining,
                        order.order_id,
                    ));
                }
                None => remaining.push(order),
            }
        }
        self.orders = remaining;
        Ok(fills)
    }

    async fn submit(
        &mut self,
        action: &ReconcileAction,
        snapshot: &MarketSnapshot,
    ) -> Result<ActionOutcome, ExecutorError> {
        let outcome = match action {
            ReconcileAction::Place { intent } => self.place(intent, snapshot),
            ReconcileAction::Amend { order_id, intent } => {
                self.amend(order_id, intent, snapshot)
            }
            ReconcileAction::Cancel { order_id, .. } => self.cancel(order_id),
        };
        Ok(outcome)
    }

    fn known_orders(&self, ticker: &str) -> Vec<LiveOrder> {
        self.orders
            .iter()
            .filter(|o| o.ticker == ticker)
            .cloned()
            .collect()
    }

    fn open_orders(&self) -> Vec<LiveOrder> {
        self.orders.clone()
    }

    fn seed_orders(&mut self, orders: Vec<LiveOrder>) {
        // Keep the id counter ahead of any seeded sim ids so a warm start
        // never reuses an id from before the snapshot.
        for order in &orders {
            if let Some(n) = order
                .order_id
                .strip_prefix("SIM-")
                .and_then(|s| s.parse::<u64>().ok())
            {
                self.next_id = self.next_id.max(n);
            }
        }
        self.orders = orders;
    }

    async fn shutdown(&mut self) {}
}
