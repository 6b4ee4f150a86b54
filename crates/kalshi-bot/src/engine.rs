//! The unified evaluation loop.
//!
//! One synchronous pass per tick batch: feed the adapter the snapshot and
//! apply whatever filled, settle expired markets, ask the strategy what
//! should be resting, reconcile, dispatch, log. The loop is identical for
//! every tick-source/adapter pairing — determinism under substitution is
//! the whole point — and a failure on one ticker never stalls the others.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use kalshi_common::{market_date_from_ticker, settlement_time, Cents, Side};

use crate::executor::{ActionOutcome, ExecutionAdapter, ExecutorError};
use crate::ledger::{LedgerError, PositionLedger};
use crate::logs::{ActionLog, TradeLog};
use crate::reconcile::{ReconcileAction, Reconciler};
use crate::snapshot::{EngineSnapshot, SnapshotStore};
use crate::strategy::Strategy;
use crate::tick_source::{TickSource, TickSourceError};
use crate::types::{MarketSnapshot, OrderIntent};

/// Errors that stop the whole engine (per-ticker trouble never does).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tick source failed: {0}")]
    TickSource(#[from] TickSourceError),

    #[error("log write failed: {0}")]
    Log(#[source] anyhow::Error),

    #[error("snapshot save failed: {0}")]
    Snapshot(#[source] anyhow::Error),
}

/// Snap a settlement mid to a payout price: within a cent of the rails the
/// market settles at the rail.
fn settle_payout(last_mid: Decimal) -> Cents {
    if last_mid >= Decimal::new(99, 0) {
        100
    } else if last_mid <= Decimal::ONE {
        0
    } else {
        last_mid
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u32()
            .unwrap_or(50)
            .min(100)
    }
}

/// The engine loop.
pub struct Engine<T, A, S>
where
    T: TickSource,
    A: ExecutionAdapter,
    S: Strategy,
{
    tick_source: T,
    adapter: A,
    strategy: S,
    ledger: PositionLedger,
    reconciler: Reconciler,
    trade_log: TradeLog,
    action_log: ActionLog,
    snapshot_store: Option<SnapshotStore>,
    snapshot_interval_secs: u64,
    shutdown_rx: Option<watch::Receiver<bool>>,

    /// Last mid per ticker, for settlement pricing.
    last_mids: HashMap<String, Decimal>,
    /// Tickers settled this process; settlement happens at most once.
    settled: HashSet<String>,
    /// Tickers blocked by an invariant violation: placement stops,
    /// cancels continue.
    blocked: HashSet<String>,
    last_tick: Option<DateTime<Utc>>,
    last_snapshot_save: Option<DateTime<Utc>>,
}

impl<T, A, S> Engine<T, A, S>
where
    T: TickSource,
    A: ExecutionAdapter,
    S: Strategy,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tick_source: T,
        adapter: A,
        strategy: S,
        ledger: PositionLedger,
        reconciler: Reconciler,
        trade_log: TradeLog,
        action_log: ActionLog,
    ) -> Self {
        Self {
            tick_source,
            adapter,
            strategy,
            ledger,
            reconciler,
            trade_log,
            action_log,
            snapshot_store: None,
            snapshot_interval_secs: 0,
            shutdown_rx: None,
            last_mids: HashMap::new(),
            settled: HashSet::new(),
            blocked: HashSet::new(),
            last_tick: None,
            last_snapshot_save: None,
        }
    }

    /// Persist state to `store` on shutdown, and every `interval_secs`
    /// while running (0 = shutdown only).
    pub fn with_snapshots(mut self, store: SnapshotStore, interval_secs: u64) -> Self {
        self.snapshot_store = Some(store);
        self.snapshot_interval_secs = interval_secs;
        self
    }

    /// Install a shutdown signal. The current batch finishes, logs flush,
    /// and a final snapshot is saved before `run` returns.
    pub fn with_shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(rx);
        self
    }

    /// Seed engine state from a warm-start snapshot.
    pub fn seed_from_snapshot(&mut self, snapshot: &EngineSnapshot) {
        for order in &snapshot.open_orders {
            self.reconciler
                .seed_last_action(&order.ticker, snapshot.last_tick);
        }
        self.adapter.seed_orders(snapshot.open_orders.clone());
        self.last_tick = Some(snapshot.last_tick);
        info!(
            last_tick = %snapshot.last_tick,
            cash = %snapshot.cash,
            "engine seeded from snapshot"
        );
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Run to stream end (historical) or shutdown (live).
    pub async fn run(mut self) -> Result<(), EngineError> {
        info!(strategy = self.strategy.name(), "engine loop starting");

        loop {
            if self.shutdown_requested() {
                info!("shutdown requested, finishing up");
                break;
            }

            let Some(batch) = self.tick_source.next_batch().await? else {
                info!("tick source exhausted");
                break;
            };

            for snapshot in &batch.snapshots {
                self.process_snapshot(snapshot).await?;
            }
            self.last_tick = Some(batch.timestamp);

            self.maybe_save_snapshot(batch.timestamp)?;
        }

        self.finish().await
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown_rx
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// One ticker, one tick.
    async fn process_snapshot(&mut self, snapshot: &MarketSnapshot) -> Result<(), EngineError> {
        let now = snapshot.timestamp;
        self.ledger.roll_day(now);

        if let Some(mid) = snapshot.yes_mid() {
            self.last_mids.insert(snapshot.ticker.clone(), mid);
        }

        self.check_settlements(now).await?;

        // Adapter first: resting orders may have filled against this
        // snapshot (sim) or the exchange may have reported fills (live).
        match self.adapter.on_snapshot(snapshot).await {
            Ok(fills) => {
                for fill in fills {
                    self.apply_fill_logged(&fill.ticker.clone(), &fill)?;
                }
            }
            Err(e) => {
                // Transient adapter trouble on one ticker; carry on.
                warn!(ticker = %snapshot.ticker, error = %e, "adapter snapshot processing failed");
            }
        }

        let desired = self.desired_orders(snapshot)?;

        let live = self.adapter.known_orders(&snapshot.ticker);
        let actions =
            self.reconciler
                .reconcile(&snapshot.ticker, desired.as_deref(), &live, now);

        for action in actions {
            self.dispatch(action, snapshot).await?;
        }

        Ok(())
    }

    /// Ask the strategy, then clamp to budget. Blocked tickers skip the
    /// strategy entirely and converge to an empty book.
    fn desired_orders(
        &mut self,
        snapshot: &MarketSnapshot,
    ) -> Result<Option<Vec<OrderIntent>>, EngineError> {
        if self.blocked.contains(&snapshot.ticker) {
            return Ok(Some(Vec::new()));
        }

        let view = self.ledger.view(&snapshot.ticker);
        let Some(intents) = self.strategy.evaluate(snapshot, &view) else {
            return Ok(None);
        };

        let mut fitting = Vec::with_capacity(intents.len());
        for intent in intents {
            match self
                .ledger
                .check_budget(&intent.ticker, intent.side, intent.price, intent.quantity)
            {
                Ok(()) => fitting.push(intent),
                Err(reason) => {
                    debug!(ticker = %intent.ticker, %reason, "intent refused by budget check");
                    self.action_log
                        .record_budget_reject(
                            snapshot.timestamp,
                            &intent.ticker,
                            intent.side,
                            intent.price,
                            intent.quantity,
                            &reason.to_string(),
                        )
                        .map_err(EngineError::Log)?;
                }
            }
        }
        Ok(Some(fitting))
    }

    /// Submit one action and fold its outcome into ledger and logs.
    async fn dispatch(
        &mut self,
        action: ReconcileAction,
        snapshot: &MarketSnapshot,
    ) -> Result<(), EngineError> {
        match self.adapter.submit(&action, snapshot).await {
            Ok(outcome) => {
                self.action_log
                    .record(snapshot.timestamp, &action, &outcome)
                    .map_err(EngineError::Log)?;
                if let Some(fill) = outcome.fill() {
                    let fill = fill.clone();
                    self.apply_fill_logged(&fill.ticker.clone(), &fill)?;
                }
                if let ActionOutcome::Rejected { reason } = &outcome {
                    warn!(ticker = %action.ticker(), reason, "action rejected");
                }
            }
            Err(e) => {
                // Per-ticker failure: log it, leave the other tickers alone.
                self.action_log
                    .record_failure(snapshot.timestamp, &action, &e.to_string())
                    .map_err(EngineError::Log)?;
                self.note_executor_error(action.ticker(), &e);
            }
        }
        Ok(())
    }

    fn note_executor_error(&mut self, ticker: &str, error: &ExecutorError) {
        if error.is_transient() {
            warn!(ticker, %error, "transient execution failure");
        } else {
            error!(ticker, %error, "execution failure");
        }
    }

    /// Apply a fill to the ledger and log it. An invariant violation
    /// blocks the ticker: no further placements until resolved, but the
    /// loop keeps running for everything else.
    fn apply_fill_logged(&mut self, ticker: &str, fill: &crate::types::Fill) -> Result<(), EngineError> {
        match self.ledger.apply_fill(fill) {
            Ok(()) => {
                self.trade_log.record_fill(fill).map_err(EngineError::Log)?;
                debug!(
                    ticker,
                    side = %fill.side,
                    price = fill.price,
                    qty = fill.quantity,
                    cash = %self.ledger.cash(),
                    "fill applied"
                );
            }
            Err(e @ LedgerError::HedgedPosition { .. })
            | Err(e @ LedgerError::Oversell { .. }) => {
                error!(ticker, %e, "invariant violation, blocking ticker");
                self.blocked.insert(ticker.to_string());
            }
            Err(e) => {
                error!(ticker, %e, "fill refused by ledger, blocking ticker");
                self.blocked.insert(ticker.to_string());
            }
        }
        Ok(())
    }

    /// Settle markets whose settlement time has passed, at the last known
    /// mid snapped to the rails. Resting orders on a settled market are
    /// pulled first so nothing fills after expiry.
    async fn check_settlements(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let mut due: Vec<String> = Vec::new();
        for (ticker, _) in self.ledger.open_positions() {
            if self.settled.contains(ticker) {
                continue;
            }
            let Ok(date) = market_date_from_ticker(ticker) else {
                continue;
            };
            if now >= settlement_time(date) {
                due.push(ticker.clone());
            }
        }

        for ticker in due {
            let Some(mid) = self.last_mids.get(&ticker).copied() else {
                // No price ever seen; leave it for a later tick.
                continue;
            };
            let payout = settle_payout(mid);

            for order in self.adapter.known_orders(&ticker) {
                let cancel = ReconcileAction::Cancel {
                    order_id: order.order_id.clone(),
                    ticker: ticker.clone(),
                    side: order.side,
                    reason: crate::reconcile::CancelReason::Expired,
                };
                // Settlement cancels reuse the ordinary dispatch path so
                // they show up in the action log like any other cancel.
                match self.adapter.submit(&cancel, &placeholder_snapshot(&ticker, now)).await {
                    Ok(outcome) => self
                        .action_log
                        .record(now, &cancel, &outcome)
                        .map_err(EngineError::Log)?,
                    Err(e) => self
                        .action_log
                        .record_failure(now, &cancel, &e.to_string())
                        .map_err(EngineError::Log)?,
                }
            }

            let position = self.ledger.position(&ticker);
            let quantity = position.held(Side::Yes) + position.held(Side::No);
            let credit = self.ledger.credit_settlement(&ticker, payout);
            self.trade_log
                .record_settlement(now, &ticker, payout, quantity, credit)
                .map_err(EngineError::Log)?;
            self.settled.insert(ticker.clone());
            self.blocked.remove(&ticker);
            info!(ticker, payout, %credit, "market settled");
        }
        Ok(())
    }

    fn maybe_save_snapshot(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.snapshot_interval_secs == 0 {
            return Ok(());
        }
        let due = match self.last_snapshot_save {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.snapshot_interval_secs as i64,
        };
        if due {
            self.save_snapshot(now)?;
            self.last_snapshot_save = Some(now);
        }
        Ok(())
    }

    fn save_snapshot(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let Some(store) = &self.snapshot_store else {
            return Ok(());
        };
        let snapshot = EngineSnapshot::capture(&self.ledger, self.adapter.open_orders(), now);
        store.save(&snapshot).map_err(EngineError::Snapshot)
    }

    /// Flush logs, save the final snapshot, shut the backends down.
    async fn finish(mut self) -> Result<(), EngineError> {
        self.trade_log.flush().map_err(EngineError::Log)?;
        self.action_log.flush().map_err(EngineError::Log)?;

        if let Some(last_tick) = self.last_tick {
            self.save_snapshot(last_tick)?;
        }

        self.adapter.shutdown().await;
        self.tick_source.shutdown().await;

        info!(
            cash = %self.ledger.cash(),
            positions = self.ledger.open_positions().count(),
            "engine loop finished"
        );
        Ok(())
    }
}

/// Minimal snapshot used when an action must be submitted outside a market
/// tick (settlement-time cancels). Carries only what adapters need: ticker
/// and timestamp.
fn placeholder_snapshot(ticker: &str, now: DateTime<Utc>) -> MarketSnapshot {
    MarketSnapshot {
        ticker: ticker.to_string(),
        timestamp: now,
        yes_bid: None,
        yes_ask: None,
        no_bid: None,
        no_ask: None,
        last_price: None,
        volume: 0,
        status: kalshi_common::MarketStatus::Closed,
    }
}
