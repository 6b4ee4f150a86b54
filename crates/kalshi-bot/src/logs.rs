//! Append-only trade and action logs.
//!
//! Every applied fill and every reconciliation action lands in a CSV row
//! keyed by ticker and tick timestamp. External reporting reads these
//! files; the engine only ever appends. All timestamps are tick time, so
//! replaying the same ticks produces byte-identical logs.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

use kalshi_common::{Cents, Direction, Side};

use crate::executor::ActionOutcome;
use crate::reconcile::ReconcileAction;
use crate::types::Fill;

const TRADES_FILE: &str = "unified_trades.csv";
const ACTIONS_FILE: &str = "unified_actions.csv";

const TRADES_HEADER: &str = "time,action,ticker,price,qty,fee,cost\n";
const ACTIONS_HEADER: &str = "time,ticker,action,side,price,qty,order_id,outcome,detail\n";

fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Open a log file for appending, writing the header when the file is new.
fn open_append(path: &Path, header: &str) -> Result<File> {
    let is_new = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))?;
    if is_new {
        file.write_all(header.as_bytes())
            .with_context(|| format!("Failed to write header to {:?}", path))?;
    }
    Ok(file)
}

fn trade_action(direction: Direction, side: Side) -> &'static str {
    match (direction, side) {
        (Direction::Buy, Side::Yes) => "BUY_YES",
        (Direction::Buy, Side::No) => "BUY_NO",
        (Direction::Sell, Side::Yes) => "SELL_YES",
        (Direction::Sell, Side::No) => "SELL_NO",
    }
}

/// Writer for `unified_trades.csv`.
pub struct TradeLog {
    file: File,
    path: PathBuf,
}

impl TradeLog {
    pub fn open(out_dir: impl AsRef<Path>) -> Result<Self> {
        let path = out_dir.as_ref().join(TRADES_FILE);
        Ok(Self {
            file: open_append(&path, TRADES_HEADER)?,
            path,
        })
    }

    /// Record an applied fill.
    pub fn record_fill(&mut self, fill: &Fill) -> Result<()> {
        let cost = match fill.direction {
            Direction::Buy => fill.notional() + fill.fee,
            Direction::Sell => fill.notional() - fill.fee,
        };
        writeln!(
            self.file,
            "{},{},{},{},{},{},{}",
            format_time(fill.timestamp),
            trade_action(fill.direction, fill.side),
            fill.ticker,
            fill.price,
            fill.quantity,
            fill.fee,
            cost,
        )
        .with_context(|| format!("Failed to append trade row to {:?}", self.path))
    }

    /// Record a settlement payout.
    pub fn record_settlement(
        &mut self,
        timestamp: DateTime<Utc>,
        ticker: &str,
        yes_payout: Cents,
        quantity: u32,
        credit: Decimal,
    ) -> Result<()> {
        writeln!(
            self.file,
            "{},SETTLE,{},{},{},0,{}",
            format_time(timestamp),
            ticker,
            yes_payout,
            quantity,
            credit,
        )
        .with_context(|| format!("Failed to append settlement row to {:?}", self.path))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().context("Failed to flush trade log")
    }
}

/// Writer for `unified_actions.csv`.
///
/// Failed actions carry an explicit `failed`/`rejected` outcome with a
/// detail message — distinguishable from a deliberate no-op, which writes
/// no row at all.
pub struct ActionLog {
    file: File,
    path: PathBuf,
}

impl ActionLog {
    pub fn open(out_dir: impl AsRef<Path>) -> Result<Self> {
        let path = out_dir.as_ref().join(ACTIONS_FILE);
        Ok(Self {
            file: open_append(&path, ACTIONS_HEADER)?,
            path,
        })
    }

    /// Record a reconciliation action and its outcome.
    pub fn record(
        &mut self,
        timestamp: DateTime<Utc>,
        action: &ReconcileAction,
        outcome: &ActionOutcome,
    ) -> Result<()> {
        let (kind, side, price, qty, order_id) = describe(action);
        let detail = match outcome {
            ActionOutcome::Rejected { reason } => reason.clone(),
            _ => String::new(),
        };
        self.write_row(
            timestamp,
            action.ticker(),
            kind,
            side,
            price,
            qty,
            &order_id,
            outcome.as_str(),
            &detail,
        )
    }

    /// Record an action whose submission errored.
    pub fn record_failure(
        &mut self,
        timestamp: DateTime<Utc>,
        action: &ReconcileAction,
        error: &str,
    ) -> Result<()> {
        let (kind, side, price, qty, order_id) = describe(action);
        self.write_row(
            timestamp,
            action.ticker(),
            kind,
            side,
            price,
            qty,
            &order_id,
            "failed",
            error,
        )
    }

    /// Record an intent refused by the budget check before reconciliation.
    pub fn record_budget_reject(
        &mut self,
        timestamp: DateTime<Utc>,
        ticker: &str,
        side: Side,
        price: Cents,
        qty: u32,
        reason: &str,
    ) -> Result<()> {
        self.write_row(
            timestamp, ticker, "place", side.as_str(), price, qty, "", "rejected", reason,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn write_row(
        &mut self,
        timestamp: DateTime<Utc>,
        ticker: &str,
        kind: &str,
        side: &str,
        price: Cents,
        qty: u32,
        order_id: &str,
        outcome: &str,
        detail: &str,
    ) -> Result<()> {
        writeln!(
            self.file,
            "{},{},{},{},{},{},{},{},{}",
            format_time(timestamp),
            ticker,
            kind,
            side,
            price,
            qty,
            order_id,
            outcome,
            // Keep the CSV single-line and comma-free in the detail column.
            detail.replace([',', '\n'], ";"),
        )
        .with_context(|| format!("Failed to append action row to {:?}", self.path))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().context("Failed to flush action log")
    }
}

fn describe(action: &ReconcileAction) -> (&'static str, &'static str, Cents, u32, String) {
    match action {
        ReconcileAction::Place { intent } => (
            "place",
            intent.side.as_str(),
            intent.price,
            intent.quantity,
            String::new(),
        ),
        ReconcileAction::Amend { order_id, intent } => (
            "amend",
            intent.side.as_str(),
            intent.price,
            intent.quantity,
            order_id.clone(),
        ),
        ReconcileAction::Cancel {
            order_id,
            side,
            reason,
            ..
        } => ("cancel", side.as_str(), 0, 0, format!("{}:{}", order_id, reason.as_str())),
    }
}
