// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the Meridian put engine. Every tunable
// parameter lives here so that the engine can be reconfigured at runtime
// without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// Unit conventions (they differ on purpose, see the field docs):
//   - `exits.stop_loss_pct` is a fraction of the ENTRY PREMIUM (-2.0 means
//     the position is closed when the loss reaches 200 % of premium).
//   - `risk.max_daily_loss` is a fraction of ACCOUNT EQUITY (-0.02 = -2 %).
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::TrendDirection;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_ibkr_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ibkr_port() -> u16 {
    7497
}

fn default_ibkr_client_id() -> u32 {
    1
}

fn default_max_daily_loss() -> f64 {
    -0.02
}

fn default_max_position_loss() -> f64 {
    -500.0
}

fn default_max_positions() -> u32 {
    10
}

fn default_max_positions_per_day() -> u32 {
    10
}

fn default_max_sector_concentration() -> f64 {
    0.30
}

fn default_max_margin_utilization() -> f64 {
    0.80
}

fn default_otm_min() -> f64 {
    0.15
}

fn default_otm_max() -> f64 {
    0.20
}

fn default_premium_min() -> f64 {
    0.30
}

fn default_premium_max() -> f64 {
    0.50
}

fn default_dte_min() -> i64 {
    7
}

fn default_dte_max() -> i64 {
    14
}

fn default_contracts() -> u32 {
    5
}

fn default_trend_filter() -> TrendDirection {
    TrendDirection::Uptrend
}

fn default_max_spread_pct() -> f64 {
    10.0
}

fn default_min_margin_efficiency_pct() -> f64 {
    5.0
}

fn default_profit_target_pct() -> f64 {
    0.50
}

fn default_stop_loss_pct() -> f64 {
    -2.00
}

fn default_time_exit_dte() -> i64 {
    3
}

fn default_poll_interval_sec() -> u64 {
    1
}

fn default_max_wait_market_sec() -> u64 {
    30
}

fn default_max_wait_limit_sec() -> u64 {
    10
}

fn default_monitor_interval_secs() -> u64 {
    900
}

fn default_min_sample_size() -> usize {
    30
}

fn default_p_value_threshold() -> f64 {
    0.05
}

fn default_min_effect_size() -> f64 {
    0.005
}

fn default_min_data_quality() -> f64 {
    0.70
}

fn default_auto_apply_confidence() -> f64 {
    0.90
}

fn default_daily_snapshot_time() -> String {
    "16:00".to_string()
}

fn default_db_path() -> String {
    "meridian.db".to_string()
}

// =============================================================================
// Section: Trading
// =============================================================================

/// Broker connectivity and the paper/live safety interlock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Paper mode uses the broker sandbox; no real capital at risk.
    #[serde(default = "default_true")]
    pub paper_trading: bool,

    #[serde(default = "default_ibkr_host")]
    pub ibkr_host: String,

    /// 7497 is the paper port, 7496 is live.
    #[serde(default = "default_ibkr_port")]
    pub ibkr_port: u16,

    #[serde(default = "default_ibkr_client_id")]
    pub ibkr_client_id: u32,

    /// The ONLY way past the paper-mode interlock: orders on a non-paper
    /// port are refused unless this is explicitly set.
    #[serde(default)]
    pub enable_live_trading: bool,

    /// Simulate order placement without contacting the broker at all.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            paper_trading: true,
            ibkr_host: default_ibkr_host(),
            ibkr_port: default_ibkr_port(),
            ibkr_client_id: default_ibkr_client_id(),
            enable_live_trading: false,
            dry_run: false,
        }
    }
}

// =============================================================================
// Section: Risk
// =============================================================================

/// The six configurable limits enforced by the risk governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum daily loss as a FRACTION OF ACCOUNT EQUITY (negative).
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    /// Maximum loss per position in DOLLARS (negative).
    #[serde(default = "default_max_position_loss")]
    pub max_position_loss: f64,

    /// Maximum concurrent open positions.
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,

    /// Maximum new positions per trading day.
    #[serde(default = "default_max_positions_per_day")]
    pub max_positions_per_day: u32,

    /// Maximum fraction of deployable margin (buying power) allocated to a
    /// single sector.
    #[serde(default = "default_max_sector_concentration")]
    pub max_sector_concentration: f64,

    /// Maximum fraction of buying power committed as margin.
    #[serde(default = "default_max_margin_utilization")]
    pub max_margin_utilization: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: default_max_daily_loss(),
            max_position_loss: default_max_position_loss(),
            max_positions: default_max_positions(),
            max_positions_per_day: default_max_positions_per_day(),
            max_sector_concentration: default_max_sector_concentration(),
            max_margin_utilization: default_max_margin_utilization(),
        }
    }
}

// =============================================================================
// Section: Strategy
// =============================================================================

/// Validation thresholds applied by the enricher when it runs in full
/// (validating) mode. The enricher also accepts `None` and then only enriches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Reject when (ask - bid) / mid exceeds this percentage.
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: f64,

    /// Reject when premium * 100 / margin falls below this percentage.
    /// Healthy cash-secured puts land in the 5-15 % band.
    #[serde(default = "default_min_margin_efficiency_pct")]
    pub min_margin_efficiency_pct: f64,

    /// Reject when the underlying is not in an uptrend.
    #[serde(default = "default_true")]
    pub require_uptrend: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_spread_pct: default_max_spread_pct(),
            min_margin_efficiency_pct: default_min_margin_efficiency_pct(),
            require_uptrend: true,
        }
    }
}

/// Candidate-selection windows for the screener and chain listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// OTM window as fractions of spot: strike between (1-otm_max) and
    /// (1-otm_min) of the stock price.
    #[serde(default = "default_otm_min")]
    pub otm_min: f64,

    #[serde(default = "default_otm_max")]
    pub otm_max: f64,

    /// Acceptable entry premium per share, in dollars.
    #[serde(default = "default_premium_min")]
    pub premium_min: f64,

    #[serde(default = "default_premium_max")]
    pub premium_max: f64,

    /// Days-to-expiration window, inclusive.
    #[serde(default = "default_dte_min")]
    pub dte_min: i64,

    #[serde(default = "default_dte_max")]
    pub dte_max: i64,

    /// Contracts per trade.
    #[serde(default = "default_contracts")]
    pub contracts: u32,

    /// Trend gate for candidate selection.
    #[serde(default = "default_trend_filter")]
    pub trend_filter: TrendDirection,

    /// Skip new entries during monthly options-expiration weeks.
    /// Typically flipped by the parameter optimizer, not by hand.
    #[serde(default)]
    pub skip_opex_week: bool,

    /// Sectors excluded from new entries.
    #[serde(default)]
    pub avoid_sectors: Vec<String>,

    #[serde(default)]
    pub validation: ValidationConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            otm_min: default_otm_min(),
            otm_max: default_otm_max(),
            premium_min: default_premium_min(),
            premium_max: default_premium_max(),
            dte_min: default_dte_min(),
            dte_max: default_dte_max(),
            contracts: default_contracts(),
            trend_filter: default_trend_filter(),
            skip_opex_week: false,
            avoid_sectors: Vec::new(),
            validation: ValidationConfig::default(),
        }
    }
}

// =============================================================================
// Section: Exits
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Close when unrealised P&L reaches this FRACTION OF ENTRY PREMIUM.
    #[serde(default = "default_profit_target_pct")]
    pub profit_target_pct: f64,

    /// Close when unrealised P&L falls to this FRACTION OF ENTRY PREMIUM.
    /// Stored negative: -2.0 means a loss of 200 % of the premium collected.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Close when days-to-expiration falls to this value or below.
    #[serde(default = "default_time_exit_dte")]
    pub time_exit_dte: i64,

    /// Seconds between order-status probes.
    #[serde(default = "default_poll_interval_sec")]
    pub poll_interval_sec: u64,

    /// Maximum seconds to wait for a MARKET exit order to resolve.
    #[serde(default = "default_max_wait_market_sec")]
    pub max_wait_market_sec: u64,

    /// Maximum seconds to wait for a LIMIT order to resolve.
    #[serde(default = "default_max_wait_limit_sec")]
    pub max_wait_limit_sec: u64,

    /// Seconds between position-monitor sweeps.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            profit_target_pct: default_profit_target_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            time_exit_dte: default_time_exit_dte(),
            poll_interval_sec: default_poll_interval_sec(),
            max_wait_market_sec: default_max_wait_market_sec(),
            max_wait_limit_sec: default_max_wait_limit_sec(),
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

// =============================================================================
// Section: Learning
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Minimum closed trades per bucket/arm before a pattern is considered.
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: usize,

    #[serde(default = "default_p_value_threshold")]
    pub p_value_threshold: f64,

    /// Minimum absolute effect on win rate / ROI (0.005 = 0.5 points).
    #[serde(default = "default_min_effect_size")]
    pub min_effect_size: f64,

    /// Entry snapshots below this data-quality score are excluded from the
    /// learning dataset.
    #[serde(default = "default_min_data_quality")]
    pub min_data_quality_for_learning: f64,

    /// Proposals above this confidence may be auto-applied; the rest wait
    /// for explicit approval.
    #[serde(default = "default_auto_apply_confidence")]
    pub auto_apply_confidence: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_sample_size: default_min_sample_size(),
            p_value_threshold: default_p_value_threshold(),
            min_effect_size: default_min_effect_size(),
            min_data_quality_for_learning: default_min_data_quality(),
            auto_apply_confidence: default_auto_apply_confidence(),
        }
    }
}

// =============================================================================
// Section: Snapshots
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Local-exchange time (HH:MM, America/New_York) at which the daily
    /// position snapshot job runs.
    #[serde(default = "default_daily_snapshot_time")]
    pub daily_snapshot_time: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            daily_snapshot_time: default_daily_snapshot_time(),
        }
    }
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotConfig {
    #[serde(default)]
    pub trading: TradingConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub exits: ExitConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl BotConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            paper_trading = config.trading.paper_trading,
            port = config.trading.ibkr_port,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }
}
