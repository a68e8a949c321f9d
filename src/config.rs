//! Configuration module for the trader
//!
//! Settings are layered: built-in defaults, then an optional TOML file
//! (`TRADER_CONFIG`, default `trader.toml`), then `TRADER_*` environment
//! variables with `__` separating nested keys (`TRADER_STREAM__DEPTH=50`).
//! API credentials are read separately from `BYBIT_API_KEY` and
//! `BYBIT_API_SECRET`.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TraderError};

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub venue: VenueConfig,
    pub stream: StreamConfig,
    pub signal: SignalConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub notify: NotifyConfig,
    pub health: HealthConfig,
}

/// Venue endpoints and request parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    /// REST API base URL
    pub rest_endpoint: String,

    /// Public WebSocket endpoint for linear contracts
    pub ws_endpoint: String,

    /// Product category sent with every request
    pub category: String,

    /// Signed request validity window in milliseconds
    pub recv_window: u64,

    /// Upper bound for any single REST call
    pub request_timeout_ms: u64,

    /// Wallet queried for account equity
    pub account_type: String,
    pub settle_coin: String,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            rest_endpoint: "https://api.bybit.com".to_string(),
            ws_endpoint: "wss://stream.bybit.com/v5/public/linear".to_string(),
            category: "linear".to_string(),
            recv_window: 5000,
            request_timeout_ms: 10_000,
            account_type: "UNIFIED".to_string(),
            settle_coin: "USDT".to_string(),
        }
    }
}

impl VenueConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Streaming subscription and connection upkeep
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Traded symbol (e.g. "BTCUSDT")
    pub symbol: String,

    /// Order book depth to subscribe to
    pub depth: usize,

    /// Heartbeat settings
    pub ping_interval_secs: u64,
    pub max_missed_pongs: u32,

    /// Fixed delay before every reconnect
    pub reconnect_delay_ms: u64,

    /// Maximum number of prints kept in the trade tape
    pub trade_tape_capacity: usize,

    /// Health check interval in seconds
    pub health_check_interval_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            depth: 50,
            ping_interval_secs: 20,
            max_missed_pongs: 3,
            reconnect_delay_ms: 5000,
            trade_tape_capacity: 20_000,
            health_check_interval_secs: 60,
        }
    }
}

impl StreamConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Which signal strategy drives execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Book imbalance, evaluated on every book update
    Imbalance,
    /// Weighted indicator composite, evaluated on a timer
    Composite,
}

/// Signal generation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub strategy: StrategyKind,

    /// Number of top levels summed for the imbalance ratio
    pub imbalance_levels: usize,

    /// Imbalance above this opens a long
    pub long_threshold: f64,

    /// Imbalance below this opens a short
    pub short_threshold: f64,

    /// Timer period for composite evaluation
    pub evaluation_interval_secs: u64,

    /// Candle interval and history length fetched for indicators
    pub kline_interval: String,
    pub kline_limit: u32,

    pub composite: CompositeConfig,
    pub confirmation: ConfirmationConfig,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Imbalance,
            imbalance_levels: 5,
            long_threshold: 1.6,
            short_threshold: 0.6,
            evaluation_interval_secs: 5,
            kline_interval: "1".to_string(),
            kline_limit: 250,
            composite: CompositeConfig::default(),
            confirmation: ConfirmationConfig::default(),
        }
    }
}

impl SignalConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }
}

/// Per-indicator switches for the composite score
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorToggles {
    pub ema_alignment: bool,
    pub momentum: bool,
    pub volume_confirmation: bool,
    pub stoch_rsi: bool,
    pub rsi: bool,
    pub cci: bool,
    pub williams_r: bool,
    pub psar: bool,
    pub vwap: bool,
    pub sma: bool,
}

impl Default for IndicatorToggles {
    fn default() -> Self {
        Self {
            ema_alignment: true,
            momentum: true,
            volume_confirmation: true,
            stoch_rsi: true,
            rsi: true,
            cci: true,
            williams_r: true,
            psar: true,
            vwap: true,
            sma: true,
        }
    }
}

/// Hand-tuned weight set (the "scalping" set)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorWeights {
    pub ema_alignment: f64,
    pub momentum: f64,
    pub volume_confirmation: f64,
    pub stoch_rsi: f64,
    pub rsi: f64,
    pub cci: f64,
    pub williams_r: f64,
    pub psar: f64,
    pub vwap: f64,
    pub sma: f64,
}

impl Default for IndicatorWeights {
    fn default() -> Self {
        Self {
            ema_alignment: 0.2,
            momentum: 0.3,
            volume_confirmation: 0.2,
            stoch_rsi: 0.6,
            rsi: 0.2,
            cci: 0.3,
            williams_r: 0.3,
            psar: 0.2,
            vwap: 0.4,
            sma: 0.1,
        }
    }
}

/// Weighted composite thresholds and indicator periods
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    pub indicators: IndicatorToggles,
    pub weights: IndicatorWeights,

    /// |score| at or above this produces a decision
    pub score_threshold: f64,

    pub stoch_rsi_oversold: f64,
    pub stoch_rsi_overbought: f64,
    /// Added to the stoch-RSI weight as `boost / 10`
    pub stoch_rsi_boost: f64,

    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Added to the RSI weight as `boost / 10`
    pub rsi_boost: f64,

    pub cci_threshold: f64,
    pub williams_oversold: f64,
    pub williams_overbought: f64,
    pub volume_multiplier: f64,

    pub ema_short_period: usize,
    pub ema_long_period: usize,
    pub momentum_period: usize,
    pub volume_ma_period: usize,
    pub rsi_period: usize,
    pub stoch_period: usize,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub cci_period: usize,
    pub williams_period: usize,
    pub sma_period: usize,
    pub psar_step: f64,
    pub psar_max: f64,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            indicators: IndicatorToggles::default(),
            weights: IndicatorWeights::default(),
            score_threshold: 3.0,
            stoch_rsi_oversold: 25.0,
            stoch_rsi_overbought: 75.0,
            stoch_rsi_boost: 7.0,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            rsi_boost: 3.0,
            cci_threshold: 100.0,
            williams_oversold: -80.0,
            williams_overbought: -20.0,
            volume_multiplier: 2.0,
            ema_short_period: 9,
            ema_long_period: 21,
            momentum_period: 7,
            volume_ma_period: 15,
            rsi_period: 14,
            stoch_period: 12,
            stoch_k: 3,
            stoch_d: 3,
            cci_period: 20,
            williams_period: 14,
            sma_period: 10,
            psar_step: 0.01,
            psar_max: 0.2,
        }
    }
}

/// Book-depth veto applied to non-Hold decisions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub enabled: bool,

    /// Also veto imbalance decisions; the composite strategy is always covered
    pub apply_to_imbalance: bool,

    /// Resting size near the price must exceed `multiplier × opposite best size`
    pub wall_multiplier: f64,

    /// Levels inspected per side
    pub depth: usize,

    /// Fractional band around the price counted as "near"
    pub band: f64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            apply_to_imbalance: false,
            wall_multiplier: 3.0,
            depth: 20,
            band: 0.001,
        }
    }
}

/// How the stop distance fed to the sizer is derived
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StopRule {
    /// Fixed fraction of the reference price
    Percent { fraction: Decimal },
    /// `multiple × ATR(period)` over fetched candles
    Atr { multiple: Decimal, period: usize },
}

impl Default for StopRule {
    fn default() -> Self {
        StopRule::Percent {
            fraction: Decimal::new(5, 3),
        }
    }
}

/// Position sizing and protective exits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Share of equity risked per trade
    pub risk_fraction: Decimal,

    pub stop: StopRule,

    /// Venue quantity filters (overridden by instrument info when fetched)
    pub qty_step: Decimal,
    pub min_qty: Decimal,

    /// Exit thresholds measured from the entry price
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,

    /// Fetch `qtyStep`/`minOrderQty` from the venue at startup
    pub fetch_instrument_filters: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: Decimal::new(1, 2),
            stop: StopRule::default(),
            qty_step: Decimal::new(1, 3),
            min_qty: Decimal::new(1, 3),
            take_profit_pct: Decimal::new(1, 2),
            stop_loss_pct: Decimal::new(5, 3),
            fetch_instrument_filters: true,
        }
    }
}

/// Order type submitted for entries and exits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderTypeConfig {
    Market,
    Limit,
}

/// Order submission and retry settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub order_type: OrderTypeConfig,
    pub time_in_force: String,

    /// Retry policy shared by all outbound REST calls
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retry_statuses: Vec<u16>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_type: OrderTypeConfig::Market,
            time_in_force: "GTC".to_string(),
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 30_000,
            retry_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

/// Alert sink settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// JSON webhook receiving alerts; alerts are only logged when unset
    pub webhook_url: Option<String>,
    pub queue_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            queue_capacity: 64,
        }
    }
}

/// Health / metrics HTTP server
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:9090".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the optional config file and the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = env::var("TRADER_CONFIG").unwrap_or_else(|_| "trader.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load configuration with `path` as the (optional) file layer
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.stream.symbol = normalize_symbol(&config.stream.symbol);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.stream.symbol.is_empty() {
            return Err(TraderError::ConfigError("stream.symbol is empty".into()));
        }
        if self.signal.imbalance_levels == 0 {
            return Err(TraderError::ConfigError(
                "signal.imbalance_levels must be positive".into(),
            ));
        }
        if self.signal.short_threshold >= self.signal.long_threshold {
            return Err(TraderError::ConfigError(format!(
                "signal.short_threshold ({}) must be below signal.long_threshold ({})",
                self.signal.short_threshold, self.signal.long_threshold
            )));
        }
        if self.execution.max_attempts == 0 {
            return Err(TraderError::ConfigError(
                "execution.max_attempts must be at least 1".into(),
            ));
        }
        if self.stream.ping_interval_secs == 0 || self.stream.max_missed_pongs == 0 {
            return Err(TraderError::ConfigError(
                "heartbeat interval and miss limit must be positive".into(),
            ));
        }
        if self.risk.qty_step <= Decimal::ZERO {
            return Err(TraderError::ConfigError("risk.qty_step must be positive".into()));
        }
        Ok(())
    }
}

/// "btc/usdt" -> "BTCUSDT"
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().replace('/', "").to_uppercase()
}

/// API key pair used to sign private requests
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read `BYBIT_API_KEY` / `BYBIT_API_SECRET`; both must be non-empty.
    pub fn from_env() -> Result<Self> {
        let key = env::var("BYBIT_API_KEY").unwrap_or_default();
        let secret = env::var("BYBIT_API_SECRET").unwrap_or_default();
        Self::from_parts(&key, &secret)
    }

    fn from_parts(key: &str, secret: &str) -> Result<Self> {
        if key.trim().is_empty() || secret.trim().is_empty() {
            return Err(TraderError::MissingCredentials);
        }
        Ok(Self::new(key.trim(), secret.trim()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}
