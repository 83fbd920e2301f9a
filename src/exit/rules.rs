// =============================================================================
// Exit Rules — profit target, stop loss, time exit
// =============================================================================
//
// All thresholds are FRACTIONS OF ENTRY PREMIUM (see config docs). When
// several conditions match on the same tick, priority is fixed:
// profit_target > stop_loss > time_exit.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::config::ExitConfig;
use crate::types::ExitReason;

/// Per-position exit thresholds derived from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitRules {
    /// Close when P&L% >= this (default 0.50 = half the premium captured).
    pub profit_target_pct: f64,
    /// Close when P&L% <= this. Negative: -2.0 = loss of 200% of premium.
    pub stop_loss_pct: f64,
    /// Close when DTE <= this.
    pub time_exit_dte: i64,
}

impl ExitRules {
    pub fn from_config(config: &ExitConfig) -> Self {
        Self {
            profit_target_pct: config.profit_target_pct,
            stop_loss_pct: config.stop_loss_pct,
            time_exit_dte: config.time_exit_dte,
        }
    }

    /// Evaluate one observation. Returns the exit reason, or `None` to keep
    /// holding.
    pub fn evaluate(&self, pnl_pct: f64, dte_remaining: i64) -> Option<ExitReason> {
        if pnl_pct >= self.profit_target_pct {
            return Some(ExitReason::ProfitTarget);
        }
        if pnl_pct <= self.stop_loss_pct {
            return Some(ExitReason::StopLoss);
        }
        if dte_remaining <= self.time_exit_dte {
            return Some(ExitReason::TimeExit);
        }
        None
    }

    /// Alert thresholds for the monitor: "approaching" is 80% of the way to
    /// a trigger.
    pub fn approaching(&self, pnl_pct: f64, dte_remaining: i64) -> Option<&'static str> {
        if pnl_pct >= self.profit_target_pct * 0.8 && pnl_pct < self.profit_target_pct {
            return Some("approaching profit target");
        }
        if pnl_pct <= self.stop_loss_pct * 0.8 && pnl_pct > self.stop_loss_pct {
            return Some("approaching stop loss");
        }
        if dte_remaining == self.time_exit_dte + 1 {
            return Some("approaching time exit");
        }
        None
    }
}
