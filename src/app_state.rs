// =============================================================================
// Central Application State — Meridian Put Engine
// =============================================================================
//
// The single source of truth for the engine. Subsystems manage their own
// interior mutability behind Arc; AppState wires them together and exposes
// the on-demand learning run.
//
// Thread safety:
//   - parking_lot::RwLock for the hot config.
//   - Arc wrappers for subsystem engines.
//   - The broker handle is the one shared external resource; it serialises
//     its own RPCs internally.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::broker::api::Broker;
use crate::config::BotConfig;
use crate::enrich::Enricher;
use crate::execution::OrderExecutor;
use crate::exit::ExitManager;
use crate::learning::combinator::detect_combo_patterns;
use crate::learning::detector::detect_entry_patterns;
use crate::learning::optimizer::ParameterOptimizer;
use crate::learning::paths::detect_path_patterns;
use crate::learning::TradeObservation;
use crate::monitor::PositionMonitor;
use crate::orchestrator::Orchestrator;
use crate::risk::RiskGovernor;
use crate::screener::Screener;
use crate::snapshots::{EntrySnapshotService, ExitSnapshotService, PositionSnapshotService};
use crate::store::Store;

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded operational error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: String,
}

/// Summary of one learning run.
#[derive(Debug, Clone, Default)]
pub struct LearningRunSummary {
    pub observations: usize,
    pub patterns: usize,
    pub significant: usize,
    pub proposals: usize,
    pub auto_applied: usize,
    pub report: String,
}

/// Central engine state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub config: Arc<RwLock<BotConfig>>,
    pub broker: Arc<dyn Broker>,
    pub store: Arc<Store>,
    pub risk: Arc<RiskGovernor>,
    pub enricher: Arc<Enricher>,
    pub executor: Arc<OrderExecutor>,
    pub exit_manager: Arc<ExitManager>,
    pub monitor: Arc<PositionMonitor>,
    pub position_snapshots: Arc<PositionSnapshotService>,
    pub orchestrator: Arc<Orchestrator>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire every subsystem from the given configuration and clients.
    pub fn new(
        config: BotConfig,
        broker: Arc<dyn Broker>,
        store: Arc<Store>,
        screener: Option<Arc<dyn Screener>>,
        starting_equity: f64,
    ) -> Self {
        let config = Arc::new(RwLock::new(config));
        let cfg = config.read().clone();

        let risk = Arc::new(RiskGovernor::new(cfg.risk.clone(), starting_equity));
        let enricher = Arc::new(Enricher::new(
            broker.clone(),
            Some(cfg.strategy.validation.clone()),
        ));

        let entry_snapshots = Arc::new(EntrySnapshotService::new(broker.clone(), store.clone()));
        let exit_snapshots = Arc::new(ExitSnapshotService::new(broker.clone(), store.clone()));
        let position_snapshots = Arc::new(PositionSnapshotService::new(
            broker.clone(),
            store.clone(),
            enricher.clone(),
        ));

        let executor = Arc::new(OrderExecutor::new(
            broker.clone(),
            store.clone(),
            entry_snapshots,
            cfg.trading.clone(),
            cfg.exits.clone(),
        ));

        let exit_manager = Arc::new(ExitManager::new(
            broker.clone(),
            store.clone(),
            exit_snapshots,
            risk.clone(),
            cfg.exits.clone(),
        ));

        let monitor = Arc::new(PositionMonitor::new(
            broker.clone(),
            store.clone(),
            enricher.clone(),
            exit_manager.clone(),
            &cfg.exits,
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            broker.clone(),
            store.clone(),
            enricher.clone(),
            risk.clone(),
            executor.clone(),
            monitor.clone(),
            screener,
            config.clone(),
        ));

        Self {
            config,
            broker,
            store,
            risk,
            enricher,
            executor,
            exit_manager,
            monitor,
            position_snapshots,
            orchestrator,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// Record an operational error in the ring buffer.
    pub fn push_error(&self, message: String) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message,
            at: Utc::now().to_rfc3339(),
        });
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    // -------------------------------------------------------------------------
    // Learning
    // -------------------------------------------------------------------------

    /// Run the full learning pass over persisted completed trades: entry,
    /// path, and combo detection, pattern persistence, and parameter
    /// proposals. Never blocks trading; errors degrade to an empty summary.
    pub fn run_learning(&self) -> LearningRunSummary {
        let learning_cfg = self.config.read().learning.clone();

        let completed = match self.store.completed_trades() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "learning: completed-trade load failed");
                return LearningRunSummary::default();
            }
        };
        let observations = TradeObservation::dataset(&completed, &learning_cfg);

        let mut patterns = detect_entry_patterns(&observations, &learning_cfg);
        patterns.extend(detect_path_patterns(&observations, &learning_cfg));
        patterns.extend(detect_combo_patterns(&observations, &learning_cfg));

        for pattern in &patterns {
            if let Err(e) = self.store.insert_pattern(pattern) {
                warn!(error = %e, "pattern persist failed");
            }
        }

        let optimizer = ParameterOptimizer::new(learning_cfg);
        let (proposals, auto_applied) = {
            let mut config = self.config.write();
            let proposals = optimizer.propose(&patterns, &config.strategy);
            let applied = optimizer
                .apply(&proposals, &mut config.strategy, &self.store)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "proposal application failed");
                    0
                });
            (proposals, applied)
        };

        let significant = patterns.iter().filter(|p| p.is_significant()).count();
        let report = optimizer.weekly_report(&patterns, &proposals);

        info!(
            observations = observations.len(),
            patterns = patterns.len(),
            significant,
            proposals = proposals.len(),
            auto_applied,
            "learning run complete"
        );

        LearningRunSummary {
            observations: observations.len(),
            patterns: patterns.len(),
            significant,
            proposals: proposals.len(),
            auto_applied,
            report,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("uptime_secs", &self.start_time.elapsed().as_secs())
            .field("recent_errors", &self.recent_errors.read().len())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::scripted::ScriptedBroker;
    use crate::snapshots::{EntrySnapshot, ExitSnapshot};
    use crate::store::NewTrade;
    use crate::types::{ExitReason, OpportunitySource, TrendDirection};
    use chrono::NaiveDate;

    fn state() -> AppState {
        AppState::new(
            BotConfig::default(),
            Arc::new(ScriptedBroker::new()),
            Arc::new(Store::open_in_memory().unwrap()),
            None,
            100_000.0,
        )
    }

    fn closed_trade(state: &AppState, win: bool, trend: TrendDirection, i: i64) {
        let d = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let exit_premium = if win { 0.20 } else { 1.20 };
        let id = state
            .store
            .insert_trade(&NewTrade {
                symbol: "SPY".into(),
                strike: 400.0 + i as f64,
                expiration: d + chrono::Duration::days(14),
                contracts: 1,
                entry_premium: 0.40,
                entry_date: d,
                data_source: OpportunitySource::Screener,
            })
            .unwrap();

        let mut entry = EntrySnapshot::default();
        entry.trade_id = id;
        entry.symbol = "SPY".into();
        entry.trend_direction = Some(trend);
        entry.delta = Some(-0.15);
        entry.iv = Some(0.3);
        entry.iv_rank = Some(50.0);
        entry.vix = Some(17.0);
        entry.dte = Some(14);
        entry.days_to_earnings = Some(30);
        entry.margin_efficiency_pct = Some(8.0);
        // Pad quality over the learning floor.
        entry.bid = Some(0.4);
        entry.ask = Some(0.44);
        entry.mid = Some(0.42);
        entry.stock_price = Some(500.0);
        entry.score_quality();
        // Quality floor is 0.70; force the snapshot past it for the test.
        entry.data_quality_score = 0.9;
        state.store.set_entry_snapshot(&entry).unwrap();

        let roi = if win { 0.5 } else { -2.0 };
        let mut exit = ExitSnapshot::default();
        exit.trade_id = id;
        exit.roi_pct = Some(roi);
        exit.win = Some(win);
        exit.exit_reason = Some(if win {
            ExitReason::ProfitTarget
        } else {
            ExitReason::StopLoss
        });
        exit.score_quality();

        state
            .store
            .close_trade(
                id,
                d + chrono::Duration::days(5),
                exit_premium,
                exit.exit_reason.unwrap(),
                roi * 40.0,
                roi,
                &exit,
            )
            .unwrap();
    }

    #[test]
    fn learning_run_over_empty_store_is_quiet() {
        let s = state();
        let summary = s.run_learning();
        assert_eq!(summary.observations, 0);
        assert_eq!(summary.patterns, 0);
    }

    #[test]
    fn learning_run_detects_and_persists() {
        let s = state();
        // 35 uptrend trades, mostly winners; 35 downtrend, mostly losers.
        for i in 0..35 {
            closed_trade(&s, i % 10 != 0, TrendDirection::Uptrend, i);
        }
        for i in 35..70 {
            closed_trade(&s, i % 3 == 0, TrendDirection::Downtrend, i);
        }

        let summary = s.run_learning();
        assert_eq!(summary.observations, 70);
        assert!(summary.patterns > 0);
        assert!(summary.significant > 0, "report:\n{}", summary.report);
        assert!(!s.store.significant_patterns().unwrap().is_empty());
        assert!(summary.report.contains("Weekly Learning Report"));
    }

    #[test]
    fn error_ring_buffer_caps() {
        let s = state();
        for i in 0..60 {
            s.push_error(format!("err {i}"));
        }
        let errors = s.recent_errors.read();
        assert_eq!(errors.len(), 50);
        assert_eq!(errors[0].message, "err 10");
    }
}
