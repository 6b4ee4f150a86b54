//! kalshi-bot: unified trading engine for daily-temperature markets.
//!
//! Usage:
//!   kalshi-bot [OPTIONS]
//!
//! Options:
//!   -m, --mode <MODE>       Trading mode: backtest, live
//!   -c, --config <FILE>     Config file path (default: config/bot.toml)
//!   --log-dir <DIR>         Historical market logs (backtest input)
//!   --out-dir <DIR>         Output directory for logs and snapshots
//!   --snapshot <FILE>       Warm-start from a saved engine snapshot
//!   --start-ts <TS>         Backtest window start (YYYY-mm-dd HH:MM:SS)
//!   --end-ts <TS>           Backtest window end

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use kalshi_bot::config::{BotConfig, TradingMode};
use kalshi_bot::engine::Engine;
use kalshi_bot::exchange::ExchangeClient;
use kalshi_bot::executor::{LiveAdapter, SimAdapter};
use kalshi_bot::ledger::PositionLedger;
use kalshi_bot::logs::{ActionLog, TradeLog};
use kalshi_bot::reconcile::{Reconciler, ReconcilerConfig};
use kalshi_bot::snapshot::{EngineSnapshot, SnapshotStore};
use kalshi_bot::strategy::MeanReversionMaker;
use kalshi_bot::tick_source::{HistoricalTickSource, LiveTickSource};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "kalshi-bot")]
#[command(about = "Unified trading engine for kalshi daily-temperature markets")]
#[command(version)]
struct Args {
    /// Trading mode: backtest, live
    #[arg(short, long)]
    mode: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "config/bot.toml")]
    config: PathBuf,

    /// Directory of captured market logs (overrides config)
    #[arg(long)]
    log_dir: Option<String>,

    /// Output directory (overrides config)
    #[arg(long)]
    out_dir: Option<String>,

    /// Snapshot file to warm-start from (overrides config)
    #[arg(long)]
    snapshot: Option<String>,

    /// Backtest window start (YYYY-mm-dd HH:MM:SS[.fff])
    #[arg(long)]
    start_ts: Option<String>,

    /// Backtest window end (YYYY-mm-dd HH:MM:SS[.fff])
    #[arg(long)]
    end_ts: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        warn!("Config file not found at {:?}, using defaults", args.config);
        BotConfig::default()
    };

    config.apply_env_overrides();
    config.apply_cli_overrides(args.mode.clone(), args.log_dir, args.out_dir, args.snapshot);

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    info!("Starting kalshi-bot");
    info!("Mode: {}", config.mode);

    config.validate().context("Configuration validation failed")?;

    std::fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("Failed to create output directory {}", config.out_dir))?;

    let start_ts = args
        .start_ts
        .as_deref()
        .map(parse_ts)
        .transpose()
        .context("Invalid --start-ts")?;
    let end_ts = args
        .end_ts
        .as_deref()
        .map(parse_ts)
        .transpose()
        .context("Invalid --end-ts")?;

    match config.mode {
        TradingMode::Backtest => run_backtest(config, start_ts, end_ts).await,
        TradingMode::Live => run_live(config).await,
    }
}

/// Accepts "YYYY-mm-dd HH:MM:SS[.fff]" with space, T, or _ separators.
fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    let normalized = raw.replace(['T', '_'], " ");
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(&normalized, format) {
            return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    anyhow::bail!("Unparseable timestamp: {}", raw)
}

/// Shared engine assembly: ledger (fresh or snapshot-seeded), reconciler,
/// logs, snapshot store.
struct EngineParts {
    ledger: PositionLedger,
    reconciler: Reconciler,
    trade_log: TradeLog,
    action_log: ActionLog,
    store: SnapshotStore,
    seed: Option<EngineSnapshot>,
}

fn build_parts(config: &BotConfig) -> Result<EngineParts> {
    let seed = match &config.snapshot {
        Some(path) => Some(
            SnapshotStore::new(path)
                .load()
                .context("Failed to load warm-start snapshot")?,
        ),
        None => None,
    };

    let ledger = match &seed {
        Some(snap) => PositionLedger::restore(
            config.limits.clone(),
            config.engine.day_offset_hours,
            snap.cash,
            snap.positions.clone(),
            snap.daily_spent,
            snap.trading_day,
        ),
        None => PositionLedger::new(
            config.limits.clone(),
            config.engine.day_offset_hours,
            DateTime::UNIX_EPOCH,
        ),
    };

    let reconciler = Reconciler::new(ReconcilerConfig {
        min_requote_interval_secs: config.engine.min_requote_interval_secs,
        max_order_age_secs: config.engine.max_order_age_secs,
        price_tolerance_cents: config.engine.price_tolerance_cents,
    });

    Ok(EngineParts {
        ledger,
        reconciler,
        trade_log: TradeLog::open(&config.out_dir)?,
        action_log: ActionLog::open(&config.out_dir)?,
        store: SnapshotStore::new(PathBuf::from(&config.out_dir).join("engine_state.json")),
        seed,
    })
}

async fn run_backtest(
    config: BotConfig,
    start_ts: Option<DateTime<Utc>>,
    end_ts: Option<DateTime<Utc>>,
) -> Result<()> {
    info!("Replaying market logs from {}", config.log_dir);

    let source = HistoricalTickSource::from_dir(&config.log_dir, start_ts, end_ts)
        .context("Failed to load historical ticks")?;
    info!("{} tick batches loaded", source.remaining_batches());

    let parts = build_parts(&config)?;
    let strategy = MeanReversionMaker::new(config.strategy.clone());

    let mut engine = Engine::new(
        source,
        SimAdapter::new(),
        strategy,
        parts.ledger,
        parts.reconciler,
        parts.trade_log,
        parts.action_log,
    )
    // Backtests snapshot once at the end; the file doubles as the final
    // positions report.
    .with_snapshots(parts.store, 0);

    if let Some(seed) = &parts.seed {
        engine.seed_from_snapshot(seed);
    }

    engine.run().await.context("Engine loop failed")?;
    info!("Backtest complete, outputs in {}", config.out_dir);
    Ok(())
}

async fn run_live(config: BotConfig) -> Result<()> {
    let exchange = &config.exchange;
    let client = Arc::new(
        ExchangeClient::new(
            exchange.api_url.clone(),
            exchange.api_key_id.clone().expect("validated"),
            exchange.private_key_path.clone().expect("validated"),
            Duration::from_secs(exchange.fetch_timeout_secs),
            exchange.max_retries,
        )
        .context("Failed to build exchange client")?,
    );

    let mut parts = build_parts(&config)?;

    // Live mode trades the real balance, not the configured starting cash.
    match client.balance().await {
        Ok(balance) => {
            info!(%balance, "exchange balance fetched");
            if parts.seed.is_none() {
                parts.ledger = PositionLedger::restore(
                    config.limits.clone(),
                    config.engine.day_offset_hours,
                    balance,
                    Default::default(),
                    rust_decimal::Decimal::ZERO,
                    parts.ledger.current_day(),
                );
            }
        }
        Err(e) => warn!(error = %e, "could not fetch balance, using configured cash"),
    }

    let source = LiveTickSource::new(
        client.clone(),
        exchange.series.clone(),
        Duration::from_secs(exchange.poll_interval_secs),
        exchange.max_retries,
    );
    let adapter = LiveAdapter::new(exchange).context("Failed to start live adapter")?;
    let strategy = MeanReversionMaker::new(config.strategy.clone());

    // Ctrl-C lets the current batch finish, then flushes and snapshots.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down after current tick");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut engine = Engine::new(
        source,
        adapter,
        strategy,
        parts.ledger,
        parts.reconciler,
        parts.trade_log,
        parts.action_log,
    )
    .with_snapshots(parts.store, config.engine.snapshot_interval_secs)
    .with_shutdown(shutdown_rx);

    if let Some(seed) = &parts.seed {
        engine.seed_from_snapshot(seed);
    }

    engine.run().await.context("Engine loop failed")?;
    info!("Live session ended");
    Ok(())
}
