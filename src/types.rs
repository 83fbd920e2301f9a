// =============================================================================
// Shared types used across the Meridian put-selling engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Whether the engine runs against the broker's paper sandbox or real capital.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Paper,
    Live,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Where a trade candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunitySource {
    ManualWeb,
    ManualFile,
    Screener,
    /// Same candidate surfaced by more than one source.
    Hybrid,
}

impl OpportunitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualWeb => "manual_web",
            Self::ManualFile => "manual_file",
            Self::Screener => "screener",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual_web" => Some(Self::ManualWeb),
            "manual_file" => Some(Self::ManualFile),
            "screener" => Some(Self::Screener),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpportunitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of an opportunity. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityState {
    Pending,
    Enriched,
    Validated,
    RiskBlocked,
    Offered,
    Approved,
    Rejected,
    Skipped,
    Executing,
    Executed,
    Failed,
    Expired,
}

impl OpportunityState {
    /// Terminal states: once entered, no further transition is recorded.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Executed | Self::Failed | Self::Expired | Self::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Enriched => "ENRICHED",
            Self::Validated => "VALIDATED",
            Self::RiskBlocked => "RISK_BLOCKED",
            Self::Offered => "OFFERED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Skipped => "SKIPPED",
            Self::Executing => "EXECUTING",
            Self::Executed => "EXECUTED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "ENRICHED" => Some(Self::Enriched),
            "VALIDATED" => Some(Self::Validated),
            "RISK_BLOCKED" => Some(Self::RiskBlocked),
            "OFFERED" => Some(Self::Offered),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "SKIPPED" => Some(Self::Skipped),
            "EXECUTING" => Some(Self::Executing),
            "EXECUTED" => Some(Self::Executed),
            "FAILED" => Some(Self::Failed),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpportunityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    TimeExit,
    Manual,
    Emergency,
    Expiration,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfitTarget => "profit_target",
            Self::StopLoss => "stop_loss",
            Self::TimeExit => "time_exit",
            Self::Manual => "manual",
            Self::Emergency => "emergency",
            Self::Expiration => "expiration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "profit_target" => Some(Self::ProfitTarget),
            "stop_loss" => Some(Self::StopLoss),
            "time_exit" => Some(Self::TimeExit),
            "manual" => Some(Self::Manual),
            "emergency" => Some(Self::Emergency),
            "expiration" => Some(Self::Expiration),
            _ => None,
        }
    }

    /// Stop-loss and emergency exits go out as market orders; everything else
    /// uses a limit order.
    pub fn uses_market_order(&self) -> bool {
        matches!(self, Self::StopLoss | Self::Emergency)
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Price trend of the underlying relative to its moving averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Uptrend,
    Downtrend,
    Sideways,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uptrend => "uptrend",
            Self::Downtrend => "downtrend",
            Self::Sideways => "sideways",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uptrend" => Some(Self::Uptrend),
            "downtrend" => Some(Self::Downtrend),
            "sideways" => Some(Self::Sideways),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// VIX-derived volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolRegime {
    Low,
    Normal,
    Elevated,
    Extreme,
}

impl VolRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::Extreme => "extreme",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "elevated" => Some(Self::Elevated),
            "extreme" => Some(Self::Extreme),
            _ => None,
        }
    }
}

impl std::fmt::Display for VolRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broad-market regime classification at entry time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Bullish,
    Bearish,
    Neutral,
    Volatile,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::Neutral => "neutral",
            Self::Volatile => "volatile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bullish" => Some(Self::Bullish),
            "bearish" => Some(Self::Bearish),
            "neutral" => Some(Self::Neutral),
            "volatile" => Some(Self::Volatile),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the next earnings report lands before the open or after the close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EarningsTiming {
    /// Before market open.
    Bmo,
    /// After market close.
    Amc,
}

impl EarningsTiming {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bmo => "BMO",
            Self::Amc => "AMC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BMO" => Some(Self::Bmo),
            "AMC" => Some(Self::Amc),
            _ => None,
        }
    }
}

impl std::fmt::Display for EarningsTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order status values produced by the broker.
///
/// `PendingSubmit`, `PreSubmitted`, and `Submitted` are *working* states and
/// must never be treated as failures; only `Cancelled` and `Inactive` are
/// terminal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit,
    PreSubmitted,
    Submitted,
    Filled,
    Cancelled,
    Inactive,
}

impl OrderStatus {
    /// Order is still making its way to (or resting at) the exchange.
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            Self::PendingSubmit | Self::PreSubmitted | Self::Submitted
        )
    }

    /// Order is dead and will never fill.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Inactive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingSubmit => "PendingSubmit",
            Self::PreSubmitted => "PreSubmitted",
            Self::Submitted => "Submitted",
            Self::Filled => "Filled",
            Self::Cancelled => "Cancelled",
            Self::Inactive => "Inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PendingSubmit" => Some(Self::PendingSubmit),
            "PreSubmitted" => Some(Self::PreSubmitted),
            "Submitted" => Some(Self::Submitted),
            "Filled" => Some(Self::Filled),
            "Cancelled" => Some(Self::Cancelled),
            "Inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
