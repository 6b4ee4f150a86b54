//! Live execution against the exchange.
//!
//! A background task polls the exchange's order state into a concurrent
//! cache; the reconciler reads that cache without ever blocking on network
//! I/O. Exchange-reported truth always wins: an order we believed open that
//! comes back executed is folded into the next fill application for its
//! ticker, never discarded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use kalshi_common::{convex_fee, Cents, Direction, Side};

use crate::config::ExchangeConfig;
use crate::exchange::{ApiOrder, ExchangeClient, ExchangeError};
use crate::reconcile::ReconcileAction;
use crate::types::{Fill, LiveOrder, MarketSnapshot, OrderIntent};

use super::{ActionOutcome, ExecutionAdapter, ExecutorError};

impl From<ExchangeError> for ExecutorError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Timeout(d) => ExecutorError::Timeout(format!("{:?}", d)),
            ExchangeError::Http(inner) => ExecutorError::Connection(inner.to_string()),
            ExchangeError::Api { status: 401, body } | ExchangeError::Api { status: 403, body } => {
                ExecutorError::Auth(body)
            }
            ExchangeError::Api { status, body } => {
                ExecutorError::Rejected(format!("{}: {}", status, body))
            }
            other => ExecutorError::Internal(other.to_string()),
        }
    }
}

/// A fill detected by the poller, waiting to be applied on the next
/// snapshot for its ticker.
#[derive(Debug, Clone)]
struct PendingFill {
    ticker: String,
    side: Side,
    price: Cents,
    quantity: u32,
    order_id: String,
}

/// Shared state between the adapter and its poll task.
#[derive(Default)]
struct SharedState {
    /// Resting orders by exchange order id.
    orders: DashMap<String, LiveOrder>,
    /// Fills learned from polling, not yet applied.
    pending_fills: Mutex<Vec<PendingFill>>,
    /// Last polled exchange balance, dollars.
    balance: RwLock<Option<Decimal>>,
}

impl SharedState {
    /// Fold one poll's order list into the cache, deriving fills from
    /// remaining-count drops and executed statuses.
    fn absorb_orders(&self, polled: Vec<ApiOrder>) {
        let mut seen: Vec<String> = Vec::with_capacity(polled.len());

        for api_order in polled {
            let Some(side) = api_order.side() else {
                warn!(order_id = %api_order.order_id, "order with unknown side, skipping");
                continue;
            };
            let Some(price) = api_order.price() else {
                continue;
            };
            seen.push(api_order.order_id.clone());

            let previous = self
                .orders
                .get(&api_order.order_id)
                .map(|o| o.value().clone());
            let previously_remaining = previous.as_ref().map(|o| o.remaining);

            if api_order.is_open() {
                // Exchange truth replaces our view; a shrunk remaining
                // count is a fill for the difference.
                if let Some(prev_remaining) = previously_remaining {
                    if prev_remaining > api_order.remaining_count {
                        self.queue_fill(
                            &api_order,
                            side,
                            price,
                            prev_remaining - api_order.remaining_count,
                        );
                    }
                }
                let placed_at = api_order
                    .created_time
                    .or(previous.map(|o| o.placed_at))
                    .unwrap_or_else(chrono::Utc::now);
                self.orders.insert(
                    api_order.order_id.clone(),
                    LiveOrder {
                        order_id: api_order.order_id.clone(),
                        ticker: api_order.ticker.clone(),
                        side,
                        price,
                        remaining: api_order.remaining_count,
                        placed_at,
                    },
                );
            } else {
                // Terminal on the exchange. Executed remainder becomes a
                // fill; canceled/expired just leaves the cache.
                if api_order.status.to_lowercase() == "executed" {
                    if let Some(prev_remaining) = previously_remaining {
                        if prev_remaining > 0 {
                            self.queue_fill(&api_order, side, price, prev_remaining);
                        }
                    }
                }
                self.orders.remove(&api_order.order_id);
            }
        }

        // Orders we know that the exchange no longer reports at all:
        // treat as executed ground truth rather than dropping silently.
        let vanished: Vec<LiveOrder> = self
            .orders
            .iter()
            .filter(|entry| !seen.contains(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        for order in vanished {
            warn!(order_id = %order.order_id, ticker = %order.ticker, "order vanished from exchange, folding as fill");
            self.pending_fills.lock().push(PendingFill {
                ticker: order.ticker.clone(),
                side: order.side,
                price: order.price,
                quantity: order.remaining,
                order_id: order.order_id.clone(),
            });
            self.orders.remove(&order.order_id);
        }
    }

    fn queue_fill(&self, api_order: &ApiOrder, side: Side, price: Cents, quantity: u32) {
        self.pending_fills.lock().push(PendingFill {
            ticker: api_order.ticker.clone(),
            side,
            price,
            quantity,
            order_id: api_order.order_id.clone(),
        });
    }
}

/// Live execution adapter.
pub struct LiveAdapter {
    client: Arc<ExchangeClient>,
    state: Arc<SharedState>,
    poll_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl LiveAdapter {
    /// Build the adapter and start its background poll task.
    pub fn new(config: &ExchangeConfig) -> Result<Self, ExecutorError> {
        let key_id = config
            .api_key_id
            .clone()
            .ok_or_else(|| ExecutorError::Auth("missing API key id".to_string()))?;
        let key_path = config
            .private_key_path
            .clone()
            .ok_or_else(|| ExecutorError::Auth("missing private key path".to_string()))?;

        let client = Arc::new(
            ExchangeClient::new(
                config.api_url.clone(),
                key_id,
                key_path,
                Duration::from_secs(config.fetch_timeout_secs),
                config.max_retries,
            )
            .map_err(|e| ExecutorError::Auth(e.to_string()))?,
        );

        let state = Arc::new(SharedState::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_task = tokio::spawn(Self::poll_loop(
            client.clone(),
            state.clone(),
            Duration::from_secs(config.poll_interval_secs),
            shutdown_rx,
        ));

        Ok(Self {
            client,
            state,
            poll_task: Some(poll_task),
            shutdown_tx,
        })
    }

    /// Background refresh of orders and balance. Transient failures are
    /// logged and retried on the next cycle; the engine never waits on
    /// this loop.
    async fn poll_loop(
        client: Arc<ExchangeClient>,
        state: Arc<SharedState>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => {
                    info!("live adapter poll task shutting down");
                    return;
                }
            }

            match client.orders().await {
                Ok(orders) => state.absorb_orders(orders),
                Err(e) => warn!(error = %e, "order poll failed"),
            }
            match client.balance().await {
                Ok(balance) => *state.balance.write() = Some(balance),
                Err(e) => warn!(error = %e, "balance poll failed"),
            }
        }
    }

    async fn place(
        &mut self,
        intent: &OrderIntent,
        snapshot: &MarketSnapshot,
    ) -> Result<ActionOutcome, ExecutorError> {
        let api_order = self
            .client
            .create_order(&intent.ticker, intent.side, intent.price, intent.quantity)
            .await?;

        if api_order.is_open() {
            let order = LiveOrder {
                order_id: api_order.order_id.clone(),
                ticker: intent.ticker.clone(),
                side: intent.side,
                price: intent.price,
                remaining: api_order.remaining_count,
                placed_at: snapshot.timestamp,
            };
            self.state
                .orders
                .insert(order.order_id.clone(), order.clone());
            return Ok(ActionOutcome::Placed { order });
        }

        // Crossed on arrival. The poll stream will not see it as open, so
        // report the fill directly. Fee is the schedule estimate until the
        // exchange's fill report lands.
        let filled = intent.quantity.saturating_sub(api_order.remaining_count);
        let price = api_order.price().unwrap_or(intent.price);
        Ok(ActionOutcome::Filled {
            fill: Fill {
                ticker: intent.ticker.clone(),
                side: intent.side,
                direction: Direction::Buy,
                price,
                quantity: filled.max(1),
                fee: convex_fee(price, filled.max(1)),
                timestamp: snapshot.timestamp,
                order_id: Some(api_order.order_id),
            },
        })
    }

    async fn cancel(&mut self, order_id: &str) -> Result<ActionOutcome, ExecutorError> {
        match self.client.cancel_order(order_id).await {
            Ok(()) => {
                self.state.orders.remove(order_id);
                Ok(ActionOutcome::Canceled {
                    order_id: order_id.to_string(),
                })
            }
            // Already gone on the exchange: poll truth will reconcile it.
            Err(ExchangeError::Api { status: 404, .. }) => {
                self.state.orders.remove(order_id);
                Ok(ActionOutcome::Canceled {
                    order_id: order_id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ExecutionAdapter for LiveAdapter {
    async fn on_snapshot(
        &mut self,
        snapshot: &MarketSnapshot,
    ) -> Result<Vec<Fill>, ExecutorError> {
        // Drain fills the poller learned about for this ticker. Timestamps
        // come from tick time so the ledger and logs stay tick-ordered.
        let mut pending = self.state.pending_fills.lock();
        let mut fills = Vec::new();
        let mut keep = Vec::with_capacity(pending.len());
        for p in pending.drain(..) {
            if p.ticker == snapshot.ticker {
                fills.push(Fill {
                    ticker: p.ticker,
                    side: p.side,
                    direction: Direction::Buy,
                    price: p.price,
                    quantity: p.quantity,
                    fee: convex_fee(p.price, p.quantity),
                    timestamp: snapshot.timestamp,
                    order_id: Some(p.order_id),
                });
            } else {
                keep.push(p);
            }
        }
        *pending = keep;
        Ok(fills)
    }

    async fn submit(
        &mut self,
        action: &ReconcileAction,
        snapshot: &MarketSnapshot,
    ) -> Result<ActionOutcome, ExecutorError> {
        match action {
            ReconcileAction::Place { intent } => self.place(intent, snapshot).await,
            // The exchange has no in-place amend; requote as cancel+replace.
            ReconcileAction::Amend { order_id, intent } => {
                self.cancel(order_id).await?;
                self.place(intent, snapshot).await
            }
            ReconcileAction::Cancel { order_id, .. } => self.cancel(order_id).await,
        }
    }

    fn known_orders(&self, ticker: &str) -> Vec<LiveOrder> {
        let mut orders: Vec<LiveOrder> = self
            .state
            .orders
            .iter()
            .filter(|entry| entry.value().ticker == ticker)
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    fn open_orders(&self) -> Vec<LiveOrder> {
        let mut orders: Vec<LiveOrder> = self
            .state
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    fn seed_orders(&mut self, orders: Vec<LiveOrder>) {
        for order in orders {
            self.state.orders.insert(order.order_id.clone(), order);
        }
    }

    fn exchange_balance(&self) -> Option<Decimal> {
        *self.state.balance.read()
    }

    async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.poll_task.take() {
            let _ = task.await;
        }
        info!("live adapter shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn api_order(id: &str, status: &str, remaining: u32) -> ApiOrder {
        ApiOrder {
            order_id: id.to_string(),
            ticker: "KXHIGHNY-26JAN09-B49.5".to_string(),
            side: "yes".to_string(),
            yes_price: Some(40),
            no_price: None,
            remaining_count: remaining,
            status: status.to_string(),
            created_time: None,
        }
    }

    fn live_order(id: &str, remaining: u32) -> LiveOrder {
        LiveOrder {
            order_id: id.to_string(),
            ticker: "KXHIGHNY-26JAN09-B49.5".to_string(),
            side: Side::Yes,
            price: 40,
            remaining,
            placed_at: Utc::now(),
        }
    }

    #[test]
    fn test_absorb_new_open_order() {
        let state = SharedState::default();
        state.absorb_orders(vec![api_order("O1", "resting", 10)]);
        assert_eq!(state.orders.len(), 1);
        assert!(state.pending_fills.lock().is_empty());
    }

    #[test]
    fn test_absorb_executed_order_yields_fill() {
        let state = SharedState::default();
        state.orders.insert("O1".to_string(), live_order("O1", 10));

        state.absorb_orders(vec![api_order("O1", "executed", 0)]);
        assert!(state.orders.is_empty());
        let pending = state.pending_fills.lock();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].quantity, 10);
        assert_eq!(pending[0].price, 40);
    }

    #[test]
    fn test_absorb_shrunk_remaining_yields_partial_fill() {
        let state = SharedState::default();
        state.orders.insert("O1".to_string(), live_order("O1", 10));

        state.absorb_orders(vec![api_order("O1", "resting", 4)]);
        let pending = state.pending_fills.lock();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].quantity, 6);
        assert_eq!(state.orders.get("O1").unwrap().remaining, 4);
    }

    #[test]
    fn test_absorb_canceled_order_no_fill() {
        let state = SharedState::default();
        state.orders.insert("O1".to_string(), live_order("O1", 10));

        state.absorb_orders(vec![api_order("O1", "canceled", 0)]);
        assert!(state.orders.is_empty());
        assert!(state.pending_fills.lock().is_empty());
    }

    #[test]
    fn test_vanished_order_folded_as_fill() {
        let state = SharedState::default();
        state.orders.insert("O1".to_string(), live_order("O1", 10));

        // Poll comes back without O1 at all: ground truth says it is gone.
        state.absorb_orders(vec![]);
        assert!(state.orders.is_empty());
        assert_eq!(state.pending_fills.lock().len(), 1);
    }

    #[test]
    fn test_unexpected_exchange_order_adopted() {
        let state = SharedState::default();
        // An order we never placed (e.g. from before a restart) appears.
        state.absorb_orders(vec![api_order("O9", "resting", 5)]);
        assert!(state.orders.contains_key("O9"));
    }
}
