// =============================================================================
// Structured error kinds at subsystem boundaries
// =============================================================================
//
// Policy: local recovery wherever the next action is well-defined (drop the
// candidate, skip, keep polling); only conditions that require user action
// (no connectivity, missing credentials, halt) surface to the top. Snapshot,
// cache, and learning errors must never affect a trade.
// =============================================================================

use thiserror::Error;

/// Errors raised by broker interaction.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// TCP-level connection failure. Presented to the user as a "cannot
    /// connect" message with a checklist; never retried inside a single call.
    #[error("cannot connect to broker at {host}:{port}")]
    ConnectionRefused { host: String, port: u16 },

    /// The requested strike/expiration is not listed (contract id 0 or a
    /// "no security definition" response).
    #[error("no security definition for {0}")]
    InvalidContract(String),

    /// Short option orders must carry the chain's trading-class identifier.
    #[error("trading class not specified for {0}")]
    TradingClassMissing(String),

    /// An RPC exceeded its deadline.
    #[error("broker request timed out after {seconds}s: {what}")]
    Timeout { what: String, seconds: u64 },

    /// The broker actively rejected the request.
    #[error("broker rejected request: {0}")]
    Rejected(String),

    /// Any other API-level failure.
    #[error("broker API error: {0}")]
    Api(String),
}

impl BrokerError {
    /// Operator checklist shown alongside a `ConnectionRefused` error.
    pub fn connection_checklist() -> &'static str {
        "Check that: (1) TWS or IB Gateway is running, (2) API connections are \
         enabled in its settings, (3) the port matches your configuration \
         (7497 paper / 7496 live), (4) the client id is not already in use."
    }
}

/// Configuration problems that must stop the affected operation with a clean
/// one-line message (exit code 1, no stack trace).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("screener API key is not configured")]
    MissingScreenerKey,

    /// The paper-mode interlock: refusing to place orders when the runtime
    /// config does not assert paper mode and the port is not the paper port.
    #[error("refusing to trade: port {port} is not the paper port and live mode is not enabled")]
    LiveModeInterlock { port: u16 },

    #[error("failed to read configuration: {0}")]
    Io(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    /// The single user-facing line plus setup instructions (no raw
    /// validation dump).
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingScreenerKey => format!(
                "{self}\n\nTo enable screener-driven scans, set BARCHART_API_KEY in your \
                 environment or .env file. Manual-only cycles do not need it."
            ),
            Self::LiveModeInterlock { .. } => format!(
                "{self}\n\nEither set paper_trading=true (port 7497), or explicitly enable \
                 live trading in the configuration."
            ),
            _ => self.to_string(),
        }
    }
}

/// Terminal outcomes of an exit-order polling loop that did not fill.
///
/// A timeout is *ambiguous*: the order may still fill at the broker. The
/// caller must reconcile on the next monitor cycle and never silently mark
/// the position as closed or the exit as failed-with-certainty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExitFailure {
    #[error("exit order cancelled by broker")]
    Cancelled,

    #[error("exit order inactive at broker")]
    Inactive,

    #[error("exit order status unresolved after {waited_secs}s")]
    Timeout { waited_secs: u64 },
}

impl ExitFailure {
    /// True when the order's fate is unknown and the position's store state
    /// must be treated as unverified.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
