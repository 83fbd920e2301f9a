// =============================================================================
// Position Monitor — periodic sweep over open positions
// =============================================================================
//
// Runs as a background Tokio task, waking every monitor interval
// (default 15 minutes) to:
//   1. Rebuild the open-position list from the store (contracts re-derived
//      through the enricher's caches, so restarts are seamless).
//   2. Pull a fresh quote per position and compute P&L, DTE, and
//      distance-to-strike.
//   3. Emit alerts when a threshold is being approached.
//   4. Hand triggered exits to the exit manager, honouring its priority
//      and reconciliation semantics.
//
// Spawn once at engine startup:
//
//   tokio::spawn(monitor.run());
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::broker::api::Broker;
use crate::calendar::MarketCalendar;
use crate::config::ExitConfig;
use crate::enrich::{estimate_margin, Enricher};
use crate::errors::ExitFailure;
use crate::exit::{ExitManager, ExitOutcome, ExitRules};
use crate::market_context::sector_for;
use crate::positions::{position_id, OpenPosition, PositionUpdate};
use crate::store::Store;

/// Maximum alerts retained in the ring buffer.
const MAX_ALERTS: usize = 100;

/// A monitor alert for the operator.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub position_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

pub struct PositionMonitor {
    broker: Arc<dyn Broker>,
    store: Arc<Store>,
    enricher: Arc<Enricher>,
    exit_manager: Arc<ExitManager>,
    calendar: MarketCalendar,
    rules: ExitRules,
    interval_secs: u64,

    alerts: RwLock<Vec<Alert>>,
    /// Position ids whose last exit attempt timed out; their true state is
    /// unknown until a later sweep confirms it.
    pending_reconcile: RwLock<Vec<String>>,
}

impl PositionMonitor {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<Store>,
        enricher: Arc<Enricher>,
        exit_manager: Arc<ExitManager>,
        config: &ExitConfig,
    ) -> Self {
        Self {
            broker,
            store,
            enricher,
            exit_manager,
            calendar: MarketCalendar::new(),
            rules: ExitRules::from_config(config),
            interval_secs: config.monitor_interval_secs,
            alerts: RwLock::new(Vec::new()),
            pending_reconcile: RwLock::new(Vec::new()),
        }
    }

    /// Run forever; spawn as a background task.
    pub async fn run(self: Arc<Self>) {
        info!(interval_secs = self.interval_secs, "position monitor started");
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// One monitoring pass. Returns the per-position observations.
    pub async fn sweep(&self) -> Vec<PositionUpdate> {
        let positions = self.build_open_positions().await;
        if positions.is_empty() {
            debug!("monitor sweep: no open positions");
            return Vec::new();
        }

        debug!(count = positions.len(), "monitor sweep: evaluating positions");
        let today = self.calendar.today();
        let mut updates = Vec::with_capacity(positions.len());

        for position in &positions {
            // Expired positions settle without a broker order.
            if position.expiration < today {
                let outcome = self.exit_manager.settle_expired(position).await;
                if !outcome.is_closed() {
                    warn!(position_id = %position.position_id, ?outcome, "expiry settlement failed");
                }
                continue;
            }

            let (current_mid, stock_price, greeks) = match self.quotes_for(position).await {
                Some(t) => t,
                None => continue,
            };

            let update = position.observe(current_mid, stock_price, greeks, today);

            if let Some(message) = self.rules.approaching(update.pnl_pct, update.dte_remaining) {
                self.push_alert(&position.position_id, message);
            }

            if let Some(reason) = self.rules.evaluate(update.pnl_pct, update.dte_remaining) {
                info!(
                    position_id = %position.position_id,
                    reason = %reason,
                    pnl_pct = format!("{:.2}", update.pnl_pct),
                    dte = update.dte_remaining,
                    "EXIT TRIGGERED"
                );

                let exit_iv = greeks.map(|g| g.implied_vol);
                let outcome = self
                    .exit_manager
                    .execute_exit(position, reason, current_mid, exit_iv)
                    .await;
                self.note_outcome(&position.position_id, &outcome);
            }

            updates.push(update);
        }

        updates
    }

    /// Rebuild the live position list from open trade rows.
    pub async fn build_open_positions(&self) -> Vec<OpenPosition> {
        let trades = match self.store.open_trades() {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "monitor: cannot list open trades");
                return Vec::new();
            }
        };

        let mut positions = Vec::with_capacity(trades.len());
        for trade in trades {
            let contract = match self
                .enricher
                .qualified_contract(&trade.symbol, trade.strike, trade.expiration)
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(trade_id = trade.id, error = %e, "monitor: contract resolution failed");
                    continue;
                }
            };

            let entry = self.store.entry_snapshot(trade.id).ok().flatten();
            let margin = entry
                .as_ref()
                .and_then(|e| e.margin_requirement)
                .map(|m| m * trade.contracts as f64)
                .unwrap_or_else(|| {
                    estimate_margin(
                        trade.strike, // conservative fallback without spot
                        trade.strike,
                        trade.entry_premium,
                        trade.contracts,
                    )
                });
            let sector = entry
                .as_ref()
                .and_then(|e| e.sector.clone())
                .or_else(|| sector_for(&trade.symbol).map(|(s, _)| s.to_string()));

            positions.push(OpenPosition {
                position_id: position_id(&trade.symbol, trade.strike, trade.expiration),
                trade_id: trade.id,
                symbol: trade.symbol.clone(),
                strike: trade.strike,
                expiration: trade.expiration,
                contracts: trade.contracts,
                entry_premium: trade.entry_premium,
                entry_date: trade.entry_date,
                margin_requirement: margin,
                sector,
                contract,
            });
        }
        positions
    }

    async fn quotes_for(
        &self,
        position: &OpenPosition,
    ) -> Option<(f64, f64, Option<crate::broker::api::Greeks>)> {
        let quote = match self.broker.option_quote(&position.contract).await {
            Ok(q) => q,
            Err(e) => {
                warn!(position_id = %position.position_id, error = %e, "option quote failed");
                return None;
            }
        };
        let stock = match self.broker.stock_quote(&position.symbol).await {
            Ok(q) => q.last,
            Err(e) => {
                warn!(position_id = %position.position_id, error = %e, "stock quote failed");
                0.0
            }
        };
        Some((quote.mid(), stock, quote.greeks))
    }

    fn note_outcome(&self, position_id: &str, outcome: &ExitOutcome) {
        match outcome {
            ExitOutcome::Closed { profit_loss, .. } => {
                self.push_alert(
                    position_id,
                    &format!("position closed, P&L {profit_loss:+.2}"),
                );
                self.pending_reconcile
                    .write()
                    .retain(|id| id != position_id);
            }
            ExitOutcome::Failed(ExitFailure::Timeout { waited_secs }) => {
                // Ambiguous: the order may still fill. Do NOT mark failed.
                self.push_alert(
                    position_id,
                    &format!("exit unresolved after {waited_secs}s, reconciling next sweep"),
                );
                let mut pending = self.pending_reconcile.write();
                if !pending.iter().any(|id| id == position_id) {
                    pending.push(position_id.to_string());
                }
            }
            ExitOutcome::Failed(f) => {
                self.push_alert(position_id, &format!("exit failed: {f}"));
            }
            ExitOutcome::Error(e) => {
                self.push_alert(position_id, &format!("exit error: {e}"));
            }
        }
    }

    fn push_alert(&self, position_id: &str, message: &str) {
        info!(position_id, alert = message, "monitor alert");
        let mut alerts = self.alerts.write();
        alerts.push(Alert {
            position_id: position_id.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        });
        while alerts.len() > MAX_ALERTS {
            alerts.remove(0);
        }
    }

    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    pub fn pending_reconcile(&self) -> Vec<String> {
        self.pending_reconcile.read().clone()
    }
}

impl std::fmt::Debug for PositionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionMonitor")
            .field("interval_secs", &self.interval_secs)
            .field("alerts", &self.alerts.read().len())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::api::{Greeks, OptionQuote};
    use crate::broker::scripted::ScriptedBroker;
    use crate::config::RiskConfig;
    use crate::risk::RiskGovernor;
    use crate::snapshots::ExitSnapshotService;
    use crate::store::NewTrade;
    use crate::types::{OpportunitySource, OrderStatus};

    fn quote(bid: f64, ask: f64) -> OptionQuote {
        OptionQuote {
            bid,
            ask,
            last: (bid + ask) / 2.0,
            volume: 100.0,
            open_interest: 1_000.0,
            greeks: Some(Greeks {
                delta: -0.15,
                gamma: 0.01,
                theta: -0.04,
                vega: 0.06,
                rho: -0.01,
                implied_vol: 0.30,
            }),
        }
    }

    struct Fixture {
        broker: Arc<ScriptedBroker>,
        store: Arc<Store>,
        monitor: PositionMonitor,
    }

    fn fixture(days_out: i64) -> Fixture {
        let broker = Arc::new(ScriptedBroker::new());
        let store = Arc::new(Store::open_in_memory().unwrap());
        let expiry = chrono::Utc::now().date_naive() + chrono::Duration::days(days_out);

        broker.list_strikes("SPY", expiry, &[450.0], "SPY");
        broker.set_stock_quote("SPY", 459.0, 461.0, 460.0);

        store
            .insert_trade(&NewTrade {
                symbol: "SPY".into(),
                strike: 450.0,
                expiration: expiry,
                contracts: 5,
                entry_premium: 0.40,
                entry_date: chrono::Utc::now().date_naive(),
                data_source: OpportunitySource::Screener,
            })
            .unwrap();

        let enricher = Arc::new(Enricher::new(broker.clone(), None));
        let snapshots = Arc::new(ExitSnapshotService::new(broker.clone(), store.clone()));
        let risk = Arc::new(RiskGovernor::new(RiskConfig::default(), 100_000.0));
        let exit_manager = Arc::new(ExitManager::new(
            broker.clone(),
            store.clone(),
            snapshots,
            risk,
            ExitConfig::default(),
        ));
        let monitor = PositionMonitor::new(
            broker.clone(),
            store.clone(),
            enricher,
            exit_manager,
            &ExitConfig::default(),
        );

        Fixture {
            broker,
            store,
            monitor,
        }
    }

    #[tokio::test]
    async fn sweep_computes_updates_without_exit() {
        let fx = fixture(10);
        // Premium decayed 25%: no trigger, no alert.
        fx.broker.set_default_option_quote(quote(0.28, 0.32));

        let updates = fx.monitor.sweep().await;
        assert_eq!(updates.len(), 1);
        let u = &updates[0];
        assert!((u.current_premium - 0.30).abs() < 1e-12);
        assert!((u.pnl_pct - 0.25).abs() < 1e-12);
        assert_eq!(u.dte_remaining, 10);
        assert!(u.distance_to_strike_pct > 0.0);
        assert!(fx.monitor.recent_alerts().is_empty());

        let trade = &fx.store.open_trades().unwrap()[0];
        assert!(!trade.is_closed());
    }

    #[tokio::test]
    async fn approaching_threshold_emits_alert() {
        let fx = fixture(10);
        // pnl_pct = (0.40-0.22)/0.40 = 0.45: approaching the 0.50 target.
        fx.broker.set_default_option_quote(quote(0.20, 0.24));

        fx.monitor.sweep().await;
        let alerts = fx.monitor.recent_alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message.contains("approaching profit target"));
    }

    #[tokio::test(start_paused = true)]
    async fn profit_target_trigger_closes_the_position() {
        let fx = fixture(10);
        // pnl_pct = (0.40-0.10)/0.40 = 0.75 >= 0.50.
        fx.broker.set_default_option_quote(quote(0.08, 0.12));
        fx.broker.push_simple_script(&[OrderStatus::Filled], 0.10);

        fx.monitor.sweep().await;

        let trade = &fx.store.closed_trades().unwrap()[0];
        assert_eq!(trade.exit_reason, Some(crate::types::ExitReason::ProfitTarget));
        assert!((trade.exit_premium.unwrap() - 0.10).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_marks_position_for_reconciliation() {
        let fx = fixture(2); // dte 2 <= 3 triggers the time exit
        fx.broker.set_default_option_quote(quote(0.28, 0.32));
        fx.broker
            .push_simple_script(&[OrderStatus::PendingSubmit], 0.0);

        fx.monitor.sweep().await;

        // Exit timed out: position open, flagged for reconciliation.
        assert_eq!(fx.store.open_trades().unwrap().len(), 1);
        let pending = fx.monitor.pending_reconcile();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].starts_with("SPY-450-"));
    }

    #[tokio::test]
    async fn expired_position_settles_at_zero() {
        let fx = fixture(-1); // already expired
        fx.monitor.sweep().await;

        let trade = &fx.store.closed_trades().unwrap()[0];
        assert_eq!(trade.exit_reason, Some(crate::types::ExitReason::Expiration));
        assert_eq!(trade.exit_premium, Some(0.0));
        // Full premium kept: (0.40 - 0) * 100 * 5 = 200.
        assert!((trade.profit_loss.unwrap() - 200.0).abs() < 1e-9);
    }
}
