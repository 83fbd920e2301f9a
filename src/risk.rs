// =============================================================================
// Risk Governor — six limits and a process-wide halt protecting capital
// =============================================================================
//
// Pre-trade checks, in order (the first failing check supplies the reason):
//   1. Halt flag       — manual or circuit-breaker halt.
//   2. Daily Loss      — cumulative daily PnL vs. a fraction of equity.
//   3. Max Positions   — concurrent open position cap.
//   4. Trade Limit     — new positions per trading day.
//   5. Margin          — projected margin vs. buying power and utilisation.
//   6. Sector          — per-sector concentration of total margin.
//
// The daily-loss breaker trips the halt automatically; `resume_trading`
// clears it manually. Daily counters reset at exchange-local midnight
// (America/New_York). `emergency_halt` is a flag write and takes effect for
// the very next pre-trade check.
// =============================================================================

use chrono::Utc;
use chrono_tz::America::New_York;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::broker::api::AccountSummary;
use crate::config::RiskConfig;

/// What the governor needs to know about one open position.
#[derive(Debug, Clone)]
pub struct PositionExposure {
    pub sector: Option<String>,
    pub margin: f64,
}

/// Serialisable snapshot of the governor's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub daily_pnl: f64,
    pub trades_today: u32,
    pub current_date: String,
}

struct Inner {
    halted: bool,
    halt_reason: Option<String>,
    daily_pnl: f64,
    trades_today: u32,
    current_date: String,
    reference_equity: f64,
}

/// Gates every trade and every cycle against the configured limits.
pub struct RiskGovernor {
    state: RwLock<Inner>,
    config: RiskConfig,
}

impl RiskGovernor {
    pub fn new(config: RiskConfig, starting_equity: f64) -> Self {
        let today = ny_date_string();
        info!(
            max_daily_loss = config.max_daily_loss,
            max_positions = config.max_positions,
            max_positions_per_day = config.max_positions_per_day,
            max_sector_concentration = config.max_sector_concentration,
            max_margin_utilization = config.max_margin_utilization,
            starting_equity,
            "RiskGovernor initialised"
        );
        Self {
            state: RwLock::new(Inner {
                halted: false,
                halt_reason: None,
                daily_pnl: 0.0,
                trades_today: 0,
                current_date: today,
                reference_equity: starting_equity,
            }),
            config,
        }
    }

    // -------------------------------------------------------------------------
    // Pre-trade gate
    // -------------------------------------------------------------------------

    /// Check whether a new position may be opened.
    ///
    /// Returns `(true, None)` when all limits clear, or `(false,
    /// Some(reason))` naming the first failing check.
    pub fn can_enter(
        &self,
        new_margin: f64,
        sector: Option<&str>,
        open_positions: &[PositionExposure],
        account: &AccountSummary,
    ) -> (bool, Option<String>) {
        self.maybe_reset_daily();

        {
            let mut s = self.state.write();
            if account.net_liquidation > 0.0 {
                s.reference_equity = account.net_liquidation;
            }
        }

        let s = self.state.read();

        // 1. Halt flag
        if s.halted {
            let reason = s.halt_reason.as_deref().unwrap_or("unspecified");
            return (false, Some(format!("Trading halted: {reason}")));
        }

        // 2. Daily loss
        let loss_floor = self.config.max_daily_loss * s.reference_equity;
        if s.daily_pnl <= loss_floor {
            warn!(
                daily_pnl = s.daily_pnl,
                loss_floor, "daily loss limit reached"
            );
            return (false, Some("Daily loss limit reached".to_string()));
        }

        // 3. Concurrent positions
        if open_positions.len() as u32 >= self.config.max_positions {
            return (false, Some("Max positions".to_string()));
        }

        // 4. New positions today
        if s.trades_today >= self.config.max_positions_per_day {
            return (
                false,
                Some(format!(
                    "Max trades per day reached: {}/{}",
                    s.trades_today, self.config.max_positions_per_day
                )),
            );
        }

        // 5. Margin
        let current_margin: f64 = open_positions.iter().map(|p| p.margin).sum();
        let projected = current_margin + new_margin;
        if new_margin > account.buying_power - current_margin {
            return (false, Some("Insufficient margin".to_string()));
        }
        if projected > self.config.max_margin_utilization * account.buying_power {
            return (false, Some("Margin utilization too high".to_string()));
        }

        // 6. Sector concentration, measured against deployable margin
        // (buying power). Membership is not always known at pre-trade time;
        // unknown sector skips the check with a note.
        match sector {
            Some(sector) => {
                let sector_margin: f64 = open_positions
                    .iter()
                    .filter(|p| p.sector.as_deref() == Some(sector))
                    .map(|p| p.margin)
                    .sum();
                if account.buying_power > 0.0
                    && (sector_margin + new_margin) / account.buying_power
                        > self.config.max_sector_concentration
                {
                    return (false, Some("Sector concentration".to_string()));
                }
            }
            None => {
                debug!("sector unknown at pre-trade time, skipping concentration check");
            }
        }

        (true, None)
    }

    // -------------------------------------------------------------------------
    // Counters & results
    // -------------------------------------------------------------------------

    /// Record an APPROVED -> EXECUTING transition. Call once per entry.
    pub fn record_entry(&self) {
        self.maybe_reset_daily();
        let mut s = self.state.write();
        s.trades_today += 1;
        debug!(trades_today = s.trades_today, "entry recorded");
    }

    /// Record the realised PnL of a completed trade. Crossing the daily
    /// loss threshold trips the circuit breaker immediately.
    pub fn record_trade_result(&self, pnl: f64) {
        self.maybe_reset_daily();
        let mut s = self.state.write();
        s.daily_pnl += pnl;

        let loss_floor = self.config.max_daily_loss * s.reference_equity;
        if s.daily_pnl <= loss_floor && !s.halted {
            s.halted = true;
            s.halt_reason = Some(format!(
                "daily loss limit crossed ({:.2} <= {:.2})",
                s.daily_pnl, loss_floor
            ));
            error!(
                daily_pnl = s.daily_pnl,
                loss_floor, "CIRCUIT BREAKER — daily loss limit crossed, trading halted"
            );
        }

        debug!(pnl, daily_pnl = s.daily_pnl, "trade result recorded");
    }

    // -------------------------------------------------------------------------
    // Halt control
    // -------------------------------------------------------------------------

    /// Flip the process-wide halt. Takes effect for the very next pre-trade
    /// check; this is a single flag write and completes in microseconds.
    pub fn emergency_halt(&self, reason: &str) {
        let mut s = self.state.write();
        s.halted = true;
        s.halt_reason = Some(reason.to_string());
        error!(reason, "EMERGENCY HALT — all trading stopped");
    }

    /// Manually clear the halt.
    pub fn resume_trading(&self) {
        let mut s = self.state.write();
        s.halted = false;
        s.halt_reason = None;
        info!("trading resumed (halt cleared manually)");
    }

    pub fn is_halted(&self) -> bool {
        self.state.read().halted
    }

    // -------------------------------------------------------------------------
    // State snapshot
    // -------------------------------------------------------------------------

    pub fn get_state(&self) -> RiskState {
        self.maybe_reset_daily();
        let s = self.state.read();
        RiskState {
            halted: s.halted,
            halt_reason: s.halt_reason.clone(),
            daily_pnl: s.daily_pnl,
            trades_today: s.trades_today,
            current_date: s.current_date.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Reset daily counters when the exchange-local date rolls over. The
    /// halt flag survives the reset; only `resume_trading` clears it.
    fn maybe_reset_daily(&self) {
        let today = ny_date_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        // Double-check after acquiring the write lock.
        if s.current_date != today {
            info!(
                old_date = %s.current_date,
                new_date = %today,
                "exchange date rolled — resetting daily risk counters"
            );
            s.daily_pnl = 0.0;
            s.trades_today = 0;
            s.current_date = today;
        }
    }
}

fn ny_date_string() -> String {
    Utc::now()
        .with_timezone(&New_York)
        .format("%Y-%m-%d")
        .to_string()
}

impl std::fmt::Debug for RiskGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("RiskGovernor")
            .field("halted", &s.halted)
            .field("trades_today", &s.trades_today)
            .field("daily_pnl", &s.daily_pnl)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountSummary {
        AccountSummary {
            net_liquidation: 100_000.0,
            buying_power: 100_000.0,
            maintenance_margin: 0.0,
            daily_pnl: 0.0,
        }
    }

    fn governor() -> RiskGovernor {
        RiskGovernor::new(RiskConfig::default(), 100_000.0)
    }

    #[test]
    fn clean_state_approves() {
        let gov = governor();
        let (ok, reason) = gov.can_enter(1_000.0, Some("Technology"), &[], &account());
        assert!(ok, "unexpected rejection: {reason:?}");
        assert!(reason.is_none());
    }

    #[test]
    fn twenty_entries_stop_at_the_daily_cap() {
        let gov = governor();
        let mut approved = 0;
        let mut rejections = Vec::new();

        for _ in 0..20 {
            let (ok, reason) = gov.can_enter(1_000.0, None, &[], &account());
            if ok {
                gov.record_entry();
                approved += 1;
            } else {
                rejections.push(reason.unwrap());
            }
        }

        assert_eq!(approved, 10);
        assert_eq!(rejections.len(), 10);
        for reason in &rejections {
            assert_eq!(reason, "Max trades per day reached: 10/10");
        }
    }

    #[test]
    fn emergency_halt_takes_effect_immediately_and_fast() {
        let gov = governor();
        gov.emergency_halt("test");

        let started = std::time::Instant::now();
        let (ok, reason) = gov.can_enter(1_000.0, None, &[], &account());
        let elapsed = started.elapsed();

        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("Trading halted: test"));
        assert!(
            elapsed < std::time::Duration::from_millis(10),
            "halt check took {elapsed:?}"
        );
    }

    #[test]
    fn resume_clears_the_halt() {
        let gov = governor();
        gov.emergency_halt("maintenance");
        assert!(gov.is_halted());
        gov.resume_trading();
        assert!(!gov.is_halted());
        let (ok, _) = gov.can_enter(1_000.0, None, &[], &account());
        assert!(ok);
    }

    #[test]
    fn halt_outranks_every_other_check() {
        let gov = governor();
        gov.emergency_halt("first");
        // Also trip the position cap; halt must still be the reason.
        let positions: Vec<PositionExposure> = (0..20)
            .map(|_| PositionExposure {
                sector: None,
                margin: 1_000.0,
            })
            .collect();
        let (_, reason) = gov.can_enter(1_000.0, None, &positions, &account());
        assert_eq!(reason.as_deref(), Some("Trading halted: first"));
    }

    #[test]
    fn daily_loss_breaker_trips_the_halt() {
        let gov = governor();
        // Limit is -2% of 100k = -2000. A -2500 loss crosses it.
        gov.record_trade_result(-2_500.0);
        assert!(gov.is_halted());

        let (ok, reason) = gov.can_enter(1_000.0, None, &[], &account());
        assert!(!ok);
        assert!(reason.unwrap().starts_with("Trading halted"));
    }

    #[test]
    fn losses_below_threshold_do_not_trip() {
        let gov = governor();
        gov.record_trade_result(-500.0);
        gov.record_trade_result(-800.0);
        assert!(!gov.is_halted());
        let (ok, _) = gov.can_enter(1_000.0, None, &[], &account());
        assert!(ok);
    }

    #[test]
    fn concurrent_position_cap() {
        let gov = governor();
        let positions: Vec<PositionExposure> = (0..10)
            .map(|_| PositionExposure {
                sector: None,
                margin: 1_000.0,
            })
            .collect();
        let (ok, reason) = gov.can_enter(1_000.0, None, &positions, &account());
        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("Max positions"));
    }

    #[test]
    fn margin_checks() {
        let gov = governor();
        // More margin than buying power remains.
        let positions = vec![PositionExposure {
            sector: None,
            margin: 95_000.0,
        }];
        let (ok, reason) = gov.can_enter(10_000.0, None, &positions, &account());
        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("Insufficient margin"));

        // Fits within buying power but blows the 80% utilisation cap.
        let positions = vec![PositionExposure {
            sector: None,
            margin: 70_000.0,
        }];
        let (ok, reason) = gov.can_enter(15_000.0, None, &positions, &account());
        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("Margin utilization too high"));
    }

    #[test]
    fn sector_concentration_check() {
        let gov = governor();
        let positions = vec![
            PositionExposure {
                sector: Some("Technology".into()),
                margin: 25_000.0,
            },
            PositionExposure {
                sector: Some("Energy".into()),
                margin: 10_000.0,
            },
        ];
        // Adding 8k tech: 33k of 100k buying power = 33% > 30%.
        let (ok, reason) = gov.can_enter(8_000.0, Some("Technology"), &positions, &account());
        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("Sector concentration"));

        // Unknown sector skips the check.
        let (ok, _) = gov.can_enter(8_000.0, None, &positions, &account());
        assert!(ok);

        // A small addition to an underweight sector passes.
        let (ok, reason) = gov.can_enter(1_000.0, Some("Financials"), &positions, &account());
        assert!(ok, "unexpected rejection: {reason:?}");
    }
}
