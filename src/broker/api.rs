// =============================================================================
// Broker API — operations and wire-level data types
// =============================================================================
//
// The broker's protocol framing is a black box behind this trait; the engine
// only depends on the operations below. Implementations: `IbkrClient` (live
// gateway) and, in tests, a scripted in-memory double.
// =============================================================================

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::BrokerError;
use crate::types::OrderStatus;

/// A put-option contract specification prior to qualification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    /// Distinguishes weekly from standard series on the same underlying.
    /// Required for short-put order placement.
    pub trading_class: Option<String>,
}

/// A qualified contract. `con_id` is nonzero iff the instrument is listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub con_id: i64,
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub trading_class: Option<String>,
}

impl Contract {
    pub fn is_listed(&self) -> bool {
        self.con_id != 0
    }

    /// Short human-readable contract label for logs.
    pub fn label(&self) -> String {
        format!(
            "{} {} {}P",
            self.symbol,
            self.expiration.format("%Y%m%d"),
            self.strike
        )
    }
}

/// Option greeks from a market-data snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    pub implied_vol: f64,
}

/// Snapshot quote for an option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: f64,
    pub open_interest: f64,
    pub greeks: Option<Greeks>,
}

impl OptionQuote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Bid-ask spread as a percentage of the mid. Zero when mid is zero.
    pub fn spread_pct(&self) -> f64 {
        let mid = self.mid();
        if mid > 0.0 {
            (self.ask - self.bid) / mid * 100.0
        } else {
            0.0
        }
    }
}

/// Snapshot quote for a stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockQuote {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

/// A single daily OHLCV bar from historical data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Strikes listed for one (symbol, expiration) pair.
///
/// Weekly expirations list far fewer strikes than monthlies, so strikes must
/// be requested per expiration, never once per underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeListing {
    pub expiration: NaiveDate,
    pub strikes: Vec<f64>,
    pub trading_class: String,
}

/// Buy/sell side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Limit or market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit => write!(f, "LMT"),
            Self::Market => write!(f, "MKT"),
        }
    }
}

/// An order to be placed against a qualified contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub action: OrderAction,
    pub order_type: OrderType,
    pub quantity: u32,
    /// Required for limit orders, ignored for market orders.
    pub limit_price: Option<f64>,
}

/// Handle to a placed order, used for status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: i64,
}

/// Broker-reported order state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub status: OrderStatus,
    pub avg_fill_price: Option<f64>,
}

/// One row from the broker's position list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    /// Negative for short positions.
    pub contracts: i32,
    pub avg_cost: f64,
}

/// Account-level figures used by the risk governor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub net_liquidation: f64,
    pub buying_power: f64,
    pub maintenance_margin: f64,
    pub daily_pnl: f64,
}

/// Broker-computed margin impact of a hypothetical order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginEstimate {
    pub initial_margin: f64,
}

/// The operations the engine requires from a broker connection.
///
/// Every method is a suspension point and may take seconds; implementations
/// carry their own timeouts. Callers must run on a live async reactor — a
/// worker that borrows the shared connection without its own running task
/// loop will hang waiting for responses that are never polled.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Verify connectivity to the gateway. Paper port is 7497, live 7496.
    async fn ensure_connected(&self) -> Result<(), BrokerError>;

    /// Qualify a contract spec. The returned contract has a nonzero
    /// `con_id` iff the strike/expiration is actually listed.
    async fn qualify_contract(&self, spec: &ContractSpec) -> Result<Contract, BrokerError>;

    /// Qualify a batch of specs in one round trip. Unlisted specs yield
    /// contracts with `con_id == 0` rather than errors.
    async fn qualify_contracts(
        &self,
        specs: &[ContractSpec],
    ) -> Result<Vec<Contract>, BrokerError>;

    /// All listed expirations for an underlying.
    async fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, BrokerError>;

    /// Strikes listed for one specific expiration.
    async fn strikes(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<StrikeListing, BrokerError>;

    async fn stock_quote(&self, symbol: &str) -> Result<StockQuote, BrokerError>;

    async fn option_quote(&self, contract: &Contract) -> Result<OptionQuote, BrokerError>;

    /// Daily OHLCV bars for the last `days` trading days.
    async fn historical_daily(&self, symbol: &str, days: u32) -> Result<Vec<Bar>, BrokerError>;

    /// Place an order. Short option orders must carry the contract's
    /// trading class; the broker rejects them otherwise.
    async fn place_order(
        &self,
        contract: &Contract,
        order: &OrderRequest,
    ) -> Result<OrderHandle, BrokerError>;

    async fn order_status(&self, handle: OrderHandle) -> Result<OrderState, BrokerError>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn account_summary(&self) -> Result<AccountSummary, BrokerError>;

    /// Margin impact of a hypothetical order without placing it.
    async fn what_if(
        &self,
        contract: &Contract,
        order: &OrderRequest,
    ) -> Result<MarginEstimate, BrokerError>;
}
