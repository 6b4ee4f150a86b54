//! Configuration for kalshi-bot.
//!
//! Loaded from a TOML file, with environment-variable overrides for
//! credentials and CLI overrides for mode and paths. Validation is eager:
//! an unknown key or out-of-range value is a startup failure, never a
//! silent default.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::strategy::StrategyParams;

/// Trading mode determines the tick source and executor pairing.
///
/// Everything between them — strategy, reconciler, ledger — is shared, so
/// a backtest and a live session make the same decisions from the same
/// ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Historical replay against the fill simulator.
    #[default]
    Backtest,
    /// Live exchange feed and live order submission.
    Live,
}

impl TradingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "backtest" | "replay" => Some(TradingMode::Backtest),
            "live" => Some(TradingMode::Live),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Backtest => write!(f, "backtest"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    /// Trading mode: backtest or live.
    pub mode: TradingMode,

    /// Logging level (trace|debug|info|warn|error).
    pub log_level: String,

    /// Directory of captured market logs (backtest input).
    pub log_dir: String,

    /// Output directory for trade/action logs and snapshots.
    pub out_dir: String,

    /// Optional snapshot file to warm-start from.
    pub snapshot: Option<String>,

    /// Engine pacing and reconciliation thresholds.
    pub engine: EngineConfig,

    /// Budget and inventory caps consumed by the ledger.
    pub limits: LimitsConfig,

    /// Strategy parameters (validated eagerly, unknown keys rejected).
    pub strategy: StrategyParams,

    /// Live exchange connection settings.
    pub exchange: ExchangeConfig,
}

/// Engine pacing and reconciliation thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Minimum seconds between reconciliation action batches per ticker.
    pub min_requote_interval_secs: f64,

    /// Resting orders older than this are force-canceled.
    pub max_order_age_secs: i64,

    /// Price drift (cents) tolerated before a resting order is amended.
    pub price_tolerance_cents: u32,

    /// Exchange-local day offset from UTC in hours (Eastern standard = -5).
    /// Drives budget resets and trading-day boundaries.
    pub day_offset_hours: i32,

    /// Seconds between periodic snapshot saves in live mode (0 = only on
    /// shutdown).
    pub snapshot_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_requote_interval_secs: 2.0,
            max_order_age_secs: 300,
            price_tolerance_cents: 0,
            day_offset_hours: -5,
            snapshot_interval_secs: 300,
        }
    }
}

/// Budget and inventory caps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Starting cash in dollars (backtest; live reads the real balance).
    pub initial_cash: Decimal,

    /// Maximum notional per single order, dollars.
    pub max_trade_notional: Decimal,

    /// Maximum notional spent per exchange-local day, dollars.
    pub max_daily_notional: Decimal,

    /// Maximum contracts held per ticker.
    pub max_inventory_per_ticker: u32,

    /// Allow simultaneous YES and NO holdings on one ticker. Off by
    /// default: a fill that would create a hedged book is an invariant
    /// violation.
    pub allow_hedged: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::new(100, 0),
            max_trade_notional: Decimal::new(25, 0),
            max_daily_notional: Decimal::new(250, 0),
            max_inventory_per_ticker: 50,
            allow_hedged: false,
        }
    }
}

/// Live exchange connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExchangeConfig {
    /// REST API base URL.
    pub api_url: String,

    /// Ticker series to poll (e.g. "KXHIGHNY").
    pub series: Vec<String>,

    /// Seconds between market polls.
    pub poll_interval_secs: u64,

    /// Per-poll fetch timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Retry attempts for transient failures before surfacing an error.
    pub max_retries: u32,

    /// API key id (overridden by KALSHI_API_KEY_ID).
    pub api_key_id: Option<String>,

    /// Path to the RSA private key PEM (overridden by
    /// KALSHI_PRIVATE_KEY_PATH).
    pub private_key_path: Option<String>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.elections.kalshi.com".to_string(),
            series: vec!["KXHIGHNY".to_string()],
            poll_interval_secs: 5,
            fetch_timeout_secs: 10,
            max_retries: 3,
            api_key_id: None,
            private_key_path: None,
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string. Unknown keys anywhere in the
    /// document are an error.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BotConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment-variable overrides for credentials. Secrets never
    /// live in the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key_id) = std::env::var("KALSHI_API_KEY_ID") {
            self.exchange.api_key_id = Some(key_id);
        }
        if let Ok(path) = std::env::var("KALSHI_PRIVATE_KEY_PATH") {
            self.exchange.private_key_path = Some(path);
        }
    }

    /// Apply CLI overrides.
    pub fn apply_cli_overrides(
        &mut self,
        mode: Option<String>,
        log_dir: Option<String>,
        out_dir: Option<String>,
        snapshot: Option<String>,
    ) {
        if let Some(mode_str) = mode {
            if let Some(m) = TradingMode::parse(&mode_str) {
                self.mode = m;
            }
        }
        if let Some(dir) = log_dir {
            self.log_dir = dir;
        }
        if let Some(dir) = out_dir {
            self.out_dir = dir;
        }
        if let Some(path) = snapshot {
            self.snapshot = Some(path);
        }
    }

    /// Validate configuration. Errors here abort startup.
    pub fn validate(&self) -> Result<()> {
        if self.mode == TradingMode::Live {
            if self.exchange.api_key_id.is_none() {
                bail!("Live mode requires KALSHI_API_KEY_ID");
            }
            if self.exchange.private_key_path.is_none() {
                bail!("Live mode requires KALSHI_PRIVATE_KEY_PATH");
            }
            if self.exchange.series.is_empty() {
                bail!("Live mode requires at least one ticker series to poll");
            }
        }

        if self.engine.min_requote_interval_secs < 0.0 {
            bail!("engine.min_requote_interval_secs must be >= 0");
        }
        if self.engine.max_order_age_secs <= 0 {
            bail!("engine.max_order_age_secs must be positive");
        }

        if self.limits.initial_cash < Decimal::ZERO {
            bail!("limits.initial_cash must be >= 0");
        }
        if self.limits.max_trade_notional <= Decimal::ZERO {
            bail!("limits.max_trade_notional must be positive");
        }
        if self.limits.max_daily_notional < self.limits.max_trade_notional {
            bail!("limits.max_daily_notional must be >= limits.max_trade_notional");
        }
        if self.limits.max_inventory_per_ticker == 0 {
            bail!("limits.max_inventory_per_ticker must be positive");
        }

        self.strategy
            .validate()
            .context("Invalid [strategy] configuration")?;

        Ok(())
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Backtest,
            log_level: "info".to_string(),
            log_dir: "market_logs".to_string(),
            out_dir: "engine_out".to_string(),
            snapshot: None,
            engine: EngineConfig::default(),
            limits: LimitsConfig::default(),
            strategy: StrategyParams::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_validate() {
        let config = BotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, TradingMode::Backtest);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = BotConfig::from_toml_str(
            r#"
            mode = "backtest"
            log_dir = "vm_logs/market_logs"

            [limits]
            initial_cash = "100.0"
            max_daily_notional = "1000"
            max_trade_notional = "25"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_dir, "vm_logs/market_logs");
        assert_eq!(config.limits.max_daily_notional, dec!(1000));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = BotConfig::from_toml_str(
            r#"
            mode = "backtest"
            totally_unknown = 5
            "#,
        );
        assert!(err.is_err());

        // Unknown keys nested in sections are rejected too.
        let err = BotConfig::from_toml_str(
            r#"
            [strategy]
            margin_cnets = 4.0
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let mut config = BotConfig::default();
        config.mode = TradingMode::Live;
        assert!(config.validate().is_err());

        config.exchange.api_key_id = Some("key".to_string());
        config.exchange.private_key_path = Some("/tmp/key.pem".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_limit_ordering_enforced() {
        let mut config = BotConfig::default();
        config.limits.max_daily_notional = dec!(10);
        config.limits.max_trade_notional = dec!(25);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = BotConfig::default();
        config.apply_cli_overrides(
            Some("live".to_string()),
            None,
            Some("custom_out".to_string()),
            Some("snap.json".to_string()),
        );
        assert_eq!(config.mode, TradingMode::Live);
        assert_eq!(config.out_dir, "custom_out");
        assert_eq!(config.snapshot.as_deref(), Some("snap.json"));
    }
}
