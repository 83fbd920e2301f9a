// =============================================================================
// Positions — open short-put tracking and P&L math
// =============================================================================
//
// Position ids are deterministic from (symbol, strike, expiration) so
// repeated monitor sweeps stably refer to the same logical position.
//
// Sign conventions for a short put:
//   - P&L dollars  = (entry_premium - current_premium) * 100 * contracts
//   - P&L percent  = (entry_premium - current_premium) / entry_premium,
//     a FRACTION OF PREMIUM: +0.5 means half the premium captured, -2.0
//     means the loss is twice the premium collected.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::api::{Contract, Greeks};
use crate::risk::PositionExposure;

/// Deterministic logical id for a short-put position.
pub fn position_id(symbol: &str, strike: f64, expiration: NaiveDate) -> String {
    format!("{symbol}-{strike}-{}", expiration.format("%Y%m%d"))
}

/// Realised dollars of P&L for a short put closed (or marked) at
/// `current_premium`.
pub fn short_put_pnl(entry_premium: f64, current_premium: f64, contracts: u32) -> f64 {
    (entry_premium - current_premium) * 100.0 * contracts as f64
}

/// P&L as a fraction of the entry premium. Zero entry premium yields zero.
pub fn short_put_pnl_pct(entry_premium: f64, current_premium: f64) -> f64 {
    if entry_premium <= 0.0 {
        return 0.0;
    }
    (entry_premium - current_premium) / entry_premium
}

/// An open short-put position under management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub position_id: String,
    /// Store row id of the owning trade.
    pub trade_id: i64,
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub contracts: u32,
    pub entry_premium: f64,
    pub entry_date: NaiveDate,
    pub margin_requirement: f64,
    pub sector: Option<String>,
    pub contract: Contract,
}

impl OpenPosition {
    pub fn exposure(&self) -> PositionExposure {
        PositionExposure {
            sector: self.sector.clone(),
            margin: self.margin_requirement,
        }
    }
}

/// One monitor observation of an open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub position_id: String,
    pub trade_id: i64,
    pub current_premium: f64,
    pub pnl: f64,
    /// Fraction of entry premium (see module docs for sign convention).
    pub pnl_pct: f64,
    pub dte_remaining: i64,
    pub stock_price: f64,
    pub distance_to_strike_pct: f64,
    pub greeks: Option<Greeks>,
    pub at: DateTime<Utc>,
}

impl OpenPosition {
    /// Fold a fresh quote into a monitor observation.
    pub fn observe(
        &self,
        current_premium: f64,
        stock_price: f64,
        greeks: Option<Greeks>,
        today: NaiveDate,
    ) -> PositionUpdate {
        let distance_to_strike_pct = if stock_price > 0.0 {
            (stock_price - self.strike) / stock_price * 100.0
        } else {
            0.0
        };

        PositionUpdate {
            position_id: self.position_id.clone(),
            trade_id: self.trade_id,
            current_premium,
            pnl: short_put_pnl(self.entry_premium, current_premium, self.contracts),
            pnl_pct: short_put_pnl_pct(self.entry_premium, current_premium),
            dte_remaining: (self.expiration - today).num_days().max(0),
            stock_price,
            distance_to_strike_pct,
            greeks,
            at: Utc::now(),
        }
    }
}
