//! End-to-end replay tests for the engine loop.
//!
//! These drive the full pipeline — tick source, strategy, reconciler,
//! simulator, ledger, logs — over synthetic tick sequences and check the
//! engine-level guarantees: identical replays produce byte-identical logs,
//! fills move the ledger by exactly their cost, and the simulator's fill
//! rule behaves at the engine boundary as it does in isolation.

use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;

use kalshi_bot::config::LimitsConfig;
use kalshi_bot::engine::Engine;
use kalshi_bot::executor::SimAdapter;
use kalshi_bot::ledger::PositionLedger;
use kalshi_bot::logs::{ActionLog, TradeLog};
use kalshi_bot::reconcile::{Reconciler, ReconcilerConfig};
use kalshi_bot::strategy::{MeanReversionMaker, StrategyParams};
use kalshi_bot::tick_source::{HistoricalTickSource, TickBatch};
use kalshi_bot::types::MarketSnapshot;
use kalshi_common::MarketStatus;

const TICKER: &str = "KXHIGHNY-26JAN09-B49.5";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 9, 14, 0, 0).unwrap()
}

fn snapshot(ts: DateTime<Utc>, yes_bid: u32, yes_ask: u32) -> MarketSnapshot {
    MarketSnapshot {
        ticker: TICKER.to_string(),
        timestamp: ts,
        yes_bid: Some(yes_bid),
        yes_ask: Some(yes_ask),
        no_bid: Some(100 - yes_ask),
        no_ask: Some(100 - yes_bid),
        last_price: None,
        volume: 25,
        status: MarketStatus::Open,
    }
}

/// A steadily falling market: fair value (rolling mean) stays above the
/// current price, so the maker keeps finding YES edge and its resting
/// quotes keep crossing as the ask drops through them.
fn falling_market() -> Vec<TickBatch> {
    let mut batches = Vec::new();
    for (i, price) in (36..=60).rev().enumerate() {
        let ts = t0() + Duration::seconds(3 * i as i64);
        batches.push(TickBatch::new(
            ts,
            vec![snapshot(ts, price - 1, price + 1)],
        ));
    }
    batches
}

fn limits() -> LimitsConfig {
    LimitsConfig {
        initial_cash: dec!(100),
        max_trade_notional: dec!(25),
        max_daily_notional: dec!(250),
        max_inventory_per_ticker: 50,
        allow_hedged: false,
    }
}

fn params() -> StrategyParams {
    StrategyParams {
        margin_cents: dec!(0.5),
        ..StrategyParams::default()
    }
}

fn reconciler() -> Reconciler {
    Reconciler::new(ReconcilerConfig {
        min_requote_interval_secs: 2.0,
        max_order_age_secs: 300,
        price_tolerance_cents: 0,
    })
}

async fn run_replay(out_dir: &Path, batches: Vec<TickBatch>) {
    let engine = Engine::new(
        HistoricalTickSource::from_batches(batches),
        SimAdapter::new(),
        MeanReversionMaker::new(params()),
        PositionLedger::new(limits(), -5, DateTime::UNIX_EPOCH),
        reconciler(),
        TradeLog::open(out_dir).unwrap(),
        ActionLog::open(out_dir).unwrap(),
    );
    engine.run().await.unwrap();
}

fn read(out_dir: &Path, name: &str) -> String {
    std::fs::read_to_string(out_dir.join(name)).unwrap()
}

#[tokio::test]
async fn identical_replays_produce_identical_logs() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    run_replay(dir_a.path(), falling_market()).await;
    run_replay(dir_b.path(), falling_market()).await;

    let trades_a = read(dir_a.path(), "unified_trades.csv");
    let trades_b = read(dir_b.path(), "unified_trades.csv");
    assert_eq!(trades_a, trades_b);
    // The run actually traded; an empty log would make this test vacuous.
    assert!(trades_a.lines().count() > 1, "expected trades, got:\n{}", trades_a);

    let actions_a = read(dir_a.path(), "unified_actions.csv");
    let actions_b = read(dir_b.path(), "unified_actions.csv");
    assert_eq!(actions_a, actions_b);
    assert!(actions_a.lines().count() > 1);
}

#[tokio::test]
async fn fills_move_cash_by_exactly_cost() {
    let dir = tempfile::tempdir().unwrap();
    run_replay(dir.path(), falling_market()).await;

    // Recompute cash from the trade log and compare with the snapshot the
    // engine wrote at shutdown... the log is the ground truth the ledger
    // must reconcile against.
    let trades = read(dir.path(), "unified_trades.csv");
    let mut cash = dec!(100);
    for line in trades.lines().skip(1) {
        let fields: Vec<&str> = line.split(',').collect();
        let action = fields[1];
        let cost: rust_decimal::Decimal = fields[6].parse().unwrap();
        match action {
            "BUY_YES" | "BUY_NO" => cash -= cost,
            "SELL_YES" | "SELL_NO" | "SETTLE" => cash += cost,
            other => panic!("unexpected action {}", other),
        }
    }

    // Replay the identical sequence and check the ledger agrees.
    let dir2 = tempfile::tempdir().unwrap();
    let engine = Engine::new(
        HistoricalTickSource::from_batches(falling_market()),
        SimAdapter::new(),
        MeanReversionMaker::new(params()),
        PositionLedger::new(limits(), -5, DateTime::UNIX_EPOCH),
        reconciler(),
        TradeLog::open(dir2.path()).unwrap(),
        ActionLog::open(dir2.path()).unwrap(),
    );
    // Engine::run consumes the engine; inspect cash through the final
    // snapshot instead.
    let store = kalshi_bot::snapshot::SnapshotStore::new(dir2.path().join("engine_state.json"));
    let engine = engine.with_snapshots(store, 0);
    engine.run().await.unwrap();

    let final_state = kalshi_bot::snapshot::SnapshotStore::new(
        dir2.path().join("engine_state.json"),
    )
    .load()
    .unwrap();
    assert_eq!(final_state.cash, cash);
}

#[tokio::test]
async fn no_actions_inside_requote_interval() {
    let dir = tempfile::tempdir().unwrap();

    // Ticks every second, requote interval two seconds: convergence
    // actions must never be less than two seconds apart per ticker.
    let mut batches = Vec::new();
    for (i, price) in (36..=60).rev().enumerate() {
        let ts = t0() + Duration::seconds(i as i64);
        batches.push(TickBatch::new(
            ts,
            vec![snapshot(ts, price - 1, price + 1)],
        ));
    }
    run_replay(dir.path(), batches).await;

    let actions = read(dir.path(), "unified_actions.csv");
    let mut last: Option<DateTime<Utc>> = None;
    for line in actions.lines().skip(1) {
        let fields: Vec<&str> = line.split(',').collect();
        // Safety cancels and budget rejections are not paced convergence
        // actions; skip them.
        if fields[6].contains(":expired")
            || fields[6].contains(":duplicate")
            || fields[7] == "rejected"
        {
            continue;
        }
        let ts: DateTime<Utc> = fields[0].parse().unwrap();
        if let Some(prev) = last {
            assert!(
                (ts - prev).num_milliseconds() >= 2000,
                "actions {} and {} violate the requote interval",
                prev,
                ts
            );
        }
        last = Some(ts);
    }
}

#[tokio::test]
async fn closed_market_gets_cancels_not_quotes() {
    let dir = tempfile::tempdir().unwrap();

    let mut batches = falling_market();
    // Market closes at the end: any resting order must be pulled.
    let ts = t0() + Duration::seconds(300);
    let mut closing = snapshot(ts, 36, 38);
    closing.status = MarketStatus::Closed;
    batches.push(TickBatch::new(ts, vec![closing]));

    run_replay(dir.path(), batches).await;

    let actions = read(dir.path(), "unified_actions.csv");
    let closing_rows: Vec<&str> = actions
        .lines()
        .filter(|l| l.starts_with("2026-01-09T14:05:00"))
        .collect();
    for row in &closing_rows {
        assert!(
            row.contains(",cancel,"),
            "only cancels expected on a closed market, got {}",
            row
        );
    }
}
