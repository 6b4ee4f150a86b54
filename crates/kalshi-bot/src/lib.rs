//! Unified trading engine for kalshi daily-temperature markets.
//!
//! One evaluation loop drives every mode: a [`tick_source::TickSource`]
//! yields chronologically ordered market snapshots (replayed from captured
//! logs or polled live), a [`strategy::Strategy`] turns each snapshot into
//! the set of orders it wants resting, and the [`reconcile::Reconciler`]
//! converges the orders known to an [`executor::ExecutionAdapter`] (live
//! exchange or in-process fill simulator) onto that desired set. Fills flow
//! into the [`ledger::PositionLedger`], the single source of truth for cash,
//! inventory, and the daily budget, which round-trips through the
//! [`snapshot::SnapshotStore`] for warm starts.
//!
//! Swapping the tick source or the execution backend changes where data
//! comes from and where orders go — never what the engine decides.
//!
//! ## Modules
//!
//! - `config`: TOML configuration with eager validation
//! - `types`: snapshots, intents, live orders, fills
//! - `tick_source`: historical replay and live polling sources
//! - `strategy`: strategy trait + mean-reversion maker
//! - `reconcile`: desired-vs-live order diffing with requote throttling
//! - `executor`: simulated and live execution adapters
//! - `ledger`: cash/inventory/budget accounting
//! - `snapshot`: engine state persistence for warm starts
//! - `logs`: append-only trade and action records
//! - `engine`: the per-tick orchestration loop

pub mod config;
pub mod engine;
pub mod exchange;
pub mod executor;
pub mod ledger;
pub mod logs;
pub mod reconcile;
pub mod snapshot;
pub mod strategy;
pub mod tick_source;
pub mod types;

pub use config::{BotConfig, EngineConfig, LimitsConfig, TradingMode};
pub use engine::{Engine, EngineError};
pub use executor::{ActionOutcome, ExecutionAdapter, ExecutorError};
pub use ledger::{LedgerError, LedgerView, PositionLedger};
pub use reconcile::{ReconcileAction, Reconciler};
pub use snapshot::{EngineSnapshot, SnapshotStore};
pub use strategy::{MeanReversionMaker, Strategy, StrategyParams};
pub use tick_source::{TickBatch, TickSource, TickSourceError};
pub use types::{Fill, LiveOrder, MarketSnapshot, OrderIntent};
