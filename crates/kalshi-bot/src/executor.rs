//! Order execution abstraction over live and simulated backends.
//!
//! The engine never branches on "are we live?": both backends implement
//! [`ExecutionAdapter`] and the reconciler's actions mean the same thing
//! against either. The simulator fills crossing orders against the current
//! snapshot; the live adapter submits to the exchange and folds
//! exchange-reported truth back into the engine.

pub mod live;
pub mod sim;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::reconcile::ReconcileAction;
use crate::types::{Fill, LiveOrder, MarketSnapshot};

pub use live::LiveAdapter;
pub use sim::SimAdapter;

/// Errors from order execution.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Transient errors are worth retrying with backoff; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutorError::Connection(_) | ExecutorError::Timeout(_))
    }
}

/// What happened to a submitted reconciliation action.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// Order is resting on the book.
    Placed { order: LiveOrder },
    /// Order crossed and filled completely on submission.
    Filled { fill: Fill },
    /// Order moved to a new price/quantity.
    Amended { order: LiveOrder },
    /// An amend that crossed at its new price and filled completely.
    AmendFilled { fill: Fill },
    /// Order removed from the book.
    Canceled { order_id: String },
    /// The exchange (or simulator) refused the action.
    Rejected { reason: String },
}

impl ActionOutcome {
    /// Outcome label for the action log.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Placed { .. } => "placed",
            ActionOutcome::Filled { .. } => "filled",
            ActionOutcome::Amended { .. } => "amended",
            ActionOutcome::AmendFilled { .. } => "filled",
            ActionOutcome::Canceled { .. } => "canceled",
            ActionOutcome::Rejected { .. } => "rejected",
        }
    }

    /// The fill produced by this outcome, if any.
    pub fn fill(&self) -> Option<&Fill> {
        match self {
            ActionOutcome::Filled { fill } | ActionOutcome::AmendFilled { fill } => Some(fill),
            _ => None,
        }
    }
}

/// Execution backend interface.
///
/// Implementations own the authoritative set of [`LiveOrder`]s; the
/// reconciler only ever sees the point-in-time copies returned from
/// [`ExecutionAdapter::known_orders`], and that read never blocks on
/// network I/O.
#[async_trait]
pub trait ExecutionAdapter: Send {
    /// Feed the adapter the next snapshot for a ticker.
    ///
    /// The simulator crosses resting orders against the new quotes; the
    /// live adapter drains exchange-reported fills it learned about since
    /// the last call. Returned fills are applied to the ledger exactly
    /// once, in order.
    async fn on_snapshot(
        &mut self,
        snapshot: &MarketSnapshot,
    ) -> Result<Vec<Fill>, ExecutorError>;

    /// Execute one reconciliation action.
    async fn submit(
        &mut self,
        action: &ReconcileAction,
        snapshot: &MarketSnapshot,
    ) -> Result<ActionOutcome, ExecutorError>;

    /// Current resting orders for one ticker. Non-blocking cache read.
    fn known_orders(&self, ticker: &str) -> Vec<LiveOrder>;

    /// All resting orders, for snapshotting.
    fn open_orders(&self) -> Vec<LiveOrder>;

    /// Seed resting orders from a warm-start snapshot.
    fn seed_orders(&mut self, orders: Vec<LiveOrder>);

    /// Available balance, when the backend tracks one independently of the
    /// ledger (live reads the exchange; the simulator defers to the ledger
    /// and returns `None`).
    fn exchange_balance(&self) -> Option<Decimal> {
        None
    }

    /// Graceful shutdown; no in-flight action is abandoned half-applied.
    async fn shutdown(&mut self);
}
