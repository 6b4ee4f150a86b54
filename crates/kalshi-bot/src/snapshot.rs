//! Engine state persistence for warm starts.
//!
//! A snapshot is the complete seed for a fresh engine: cash, per-ticker
//! positions, the day's spent budget, resting orders, and the last tick
//! processed. Loading one makes the engine behave as if it had been running
//! since the snapshot's timestamp — budget already spent and inventory
//! already held suppress the top-up buying a cold start would do.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use kalshi_common::TradingDay;

use crate::ledger::{PositionLedger, TickerPosition};
use crate::types::LiveOrder;

/// Serialized engine state.
///
/// Every field is required: a snapshot missing one is rejected at load
/// time rather than silently defaulted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSnapshot {
    /// Last tick the engine processed before saving.
    pub last_tick: DateTime<Utc>,
    /// Exchange-local trading day the budget counter belongs to.
    pub trading_day: TradingDay,
    /// Cash balance, dollars.
    pub cash: Decimal,
    /// Notional spent so far on `trading_day`.
    pub daily_spent: Decimal,
    /// Per-ticker holdings.
    pub positions: BTreeMap<String, TickerPosition>,
    /// Orders resting at save time.
    pub open_orders: Vec<LiveOrder>,
}

impl EngineSnapshot {
    /// Capture the current engine state.
    pub fn capture(
        ledger: &PositionLedger,
        open_orders: Vec<LiveOrder>,
        last_tick: DateTime<Utc>,
    ) -> Self {
        Self {
            last_tick,
            trading_day: ledger.current_day(),
            cash: ledger.cash(),
            daily_spent: ledger.daily_spent(),
            positions: ledger.positions().clone(),
            open_orders,
        }
    }
}

/// Loads and saves [`EngineSnapshot`]s as JSON.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot atomically (temp file + rename) so a crash
    /// mid-save never leaves a torn file behind.
    pub fn save(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write snapshot temp file {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move snapshot into place at {:?}", self.path))?;
        info!(path = %self.path.display(), last_tick = %snapshot.last_tick, "snapshot saved");
        Ok(())
    }

    /// Load a snapshot. A missing or incomplete file is an error — warm
    /// starts are explicit, never guessed.
    pub fn load(&self) -> Result<EngineSnapshot> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read snapshot {:?}", self.path))?;
        let snapshot: EngineSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Invalid snapshot file {:?}", self.path))?;
        info!(
            path = %self.path.display(),
            last_tick = %snapshot.last_tick,
            cash = %snapshot.cash,
            positions = snapshot.positions.len(),
            open_orders = snapshot.open_orders.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;
    use chrono::TimeZone;
    use kalshi_common::{Direction, Side};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 9, 14, 0, 0).unwrap()
    }

    fn sample() -> EngineSnapshot {
        let mut ledger = PositionLedger::new(
            LimitsConfig {
                initial_cash: dec!(1000),
                max_trade_notional: dec!(100),
                max_daily_notional: dec!(1000),
                max_inventory_per_ticker: 70,
                allow_hedged: false,
            },
            -5,
            t0(),
        );
        ledger
            .apply_fill(&crate::types::Fill {
                ticker: "KXHIGHNY-26JAN09-B49.5".to_string(),
                side: Side::Yes,
                direction: Direction::Buy,
                price: 50,
                quantity: 70,
                fee: dec!(1.23),
                timestamp: t0(),
                order_id: None,
            })
            .unwrap();

        EngineSnapshot::capture(
            &ledger,
            vec![LiveOrder {
                order_id: "SIM-1".to_string(),
                ticker: "KXHIGHNY-26JAN09-B49.5".to_string(),
                side: Side::Yes,
                price: 45,
                remaining: 5,
                placed_at: t0(),
            }],
            t0(),
        )
    }

    #[test]
    fn test_round_trip_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));

        let snapshot = sample();
        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_missing_file_is_error() {
        let store = SnapshotStore::new("/nonexistent/state.json");
        assert!(store.load().is_err());
    }

    #[test]
    fn test_missing_field_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        // No `daily_spent` field: must fail, not default to zero.
        std::fs::write(
            &path,
            r#"{"last_tick":"2026-01-09T14:00:00Z","trading_day":"2026-01-09","cash":"100","positions":{},"open_orders":[]}"#,
        )
        .unwrap();
        let store = SnapshotStore::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_save_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));

        let mut snapshot = sample();
        store.save(&snapshot).unwrap();
        snapshot.cash = dec!(42);
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.cash, dec!(42));
        // No temp file left behind.
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
