// =============================================================================
// Exit Manager — order placement, polling, and store reconciliation
// =============================================================================
//
// The polling contract here exists because market-order exits routinely run
// PendingSubmit -> Submitted -> Filled within milliseconds. A single status
// read shortly after placement can observe PendingSubmit and wrongly
// declare the exit failed while the broker has already filled it, leaving
// the position closed at the broker but open in the store. So:
//
//   1. Poll every second up to max_wait (30 s market / 10 s limit).
//   2. Filled    -> atomically update the trade row, compute P&L, persist,
//                   capture the exit snapshot, return success.
//   3. Cancelled or Inactive -> failure; the position stays open.
//   4. Any working status     -> keep polling, NEVER a failure.
//   5. Deadline with no terminal status -> a TIMEOUT failure. State is
//      ambiguous; the next monitor cycle reconciles. Never "failed because
//      status is PendingSubmit".
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::broker::api::{Broker, OrderAction, OrderRequest, OrderType};
use crate::config::ExitConfig;
use crate::errors::ExitFailure;
use crate::execution::{poll_order_status, PollOutcome};
use crate::positions::{short_put_pnl, short_put_pnl_pct, OpenPosition};
use crate::risk::RiskGovernor;
use crate::snapshots::ExitSnapshotService;
use crate::store::Store;
use crate::types::{ExitReason, OrderStatus};

/// Outcome of one exit attempt.
#[derive(Debug, Clone)]
pub enum ExitOutcome {
    Closed {
        trade_id: i64,
        exit_premium: f64,
        profit_loss: f64,
    },
    /// The order died or timed out; the position remains open in the store.
    Failed(ExitFailure),
    /// Infrastructure error (broker unreachable, store error).
    Error(String),
}

impl ExitOutcome {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

pub struct ExitManager {
    broker: Arc<dyn Broker>,
    store: Arc<Store>,
    snapshots: Arc<ExitSnapshotService>,
    risk: Arc<RiskGovernor>,
    config: ExitConfig,
}

impl ExitManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<Store>,
        snapshots: Arc<ExitSnapshotService>,
        risk: Arc<RiskGovernor>,
        config: ExitConfig,
    ) -> Self {
        Self {
            broker,
            store,
            snapshots,
            risk,
            config,
        }
    }

    /// Close `position` for `reason`. `current_mid` prices the limit order
    /// for non-urgent exits; `exit_iv` annotates the snapshot when known.
    pub async fn execute_exit(
        &self,
        position: &OpenPosition,
        reason: ExitReason,
        current_mid: f64,
        exit_iv: Option<f64>,
    ) -> ExitOutcome {
        let is_market = reason.uses_market_order();
        let order = OrderRequest {
            action: OrderAction::Buy, // buy to close the short put
            order_type: if is_market {
                OrderType::Market
            } else {
                OrderType::Limit
            },
            quantity: position.contracts,
            limit_price: (!is_market).then_some(current_mid),
        };

        info!(
            position_id = %position.position_id,
            trade_id = position.trade_id,
            reason = %reason,
            order_type = %order.order_type,
            "placing exit order"
        );

        let handle = match self.broker.place_order(&position.contract, &order).await {
            Ok(h) => h,
            Err(e) => {
                error!(
                    position_id = %position.position_id,
                    error = %e,
                    "exit order placement failed"
                );
                return ExitOutcome::Error(e.to_string());
            }
        };

        let max_wait = Duration::from_secs(if is_market {
            self.config.max_wait_market_sec
        } else {
            self.config.max_wait_limit_sec
        });

        let outcome = match poll_order_status(
            self.broker.as_ref(),
            handle,
            Duration::from_secs(self.config.poll_interval_sec),
            max_wait,
        )
        .await
        {
            Ok(o) => o,
            Err(e) => {
                error!(position_id = %position.position_id, error = %e, "exit polling failed");
                return ExitOutcome::Error(e.to_string());
            }
        };

        match outcome {
            PollOutcome::Filled { avg_fill_price } => {
                self.reconcile_fill(position, reason, avg_fill_price, exit_iv)
                    .await
            }
            PollOutcome::Terminal(OrderStatus::Cancelled) => {
                warn!(position_id = %position.position_id, "exit order cancelled — position stays open");
                ExitOutcome::Failed(ExitFailure::Cancelled)
            }
            PollOutcome::Terminal(status) => {
                warn!(position_id = %position.position_id, status = %status, "exit order inactive — position stays open");
                ExitOutcome::Failed(ExitFailure::Inactive)
            }
            PollOutcome::TimedOut => {
                warn!(
                    position_id = %position.position_id,
                    waited_secs = max_wait.as_secs(),
                    "exit order unresolved — state ambiguous until next monitor cycle"
                );
                ExitOutcome::Failed(ExitFailure::Timeout {
                    waited_secs: max_wait.as_secs(),
                })
            }
        }
    }

    /// The fill landed: bring the store into agreement with the broker in
    /// one transaction, then feed the result to risk and learning.
    async fn reconcile_fill(
        &self,
        position: &OpenPosition,
        reason: ExitReason,
        exit_premium: f64,
        exit_iv: Option<f64>,
    ) -> ExitOutcome {
        let trade = match self.store.get_trade(position.trade_id) {
            Ok(Some(t)) => t,
            Ok(None) => {
                error!(trade_id = position.trade_id, "filled exit for unknown trade");
                return ExitOutcome::Error(format!("trade {} not found", position.trade_id));
            }
            Err(e) => return ExitOutcome::Error(e.to_string()),
        };

        let exit_date = Utc::now().date_naive();
        let profit_loss = short_put_pnl(trade.entry_premium, exit_premium, trade.contracts);
        let profit_pct = short_put_pnl_pct(trade.entry_premium, exit_premium);

        let snapshot = self
            .snapshots
            .build(&trade, exit_premium, reason, exit_date, exit_iv)
            .await;

        if let Err(e) = self.store.close_trade(
            trade.id,
            exit_date,
            exit_premium,
            reason,
            profit_loss,
            profit_pct,
            &snapshot,
        ) {
            // Broker says closed, store update failed: surface loudly so
            // the operator reconciles by hand.
            error!(
                trade_id = trade.id,
                error = %e,
                "exit FILLED at broker but store update failed"
            );
            return ExitOutcome::Error(format!("filled at broker, store error: {e}"));
        }

        self.risk.record_trade_result(profit_loss);

        info!(
            trade_id = trade.id,
            reason = %reason,
            exit_premium,
            profit_loss,
            "position closed and reconciled"
        );

        ExitOutcome::Closed {
            trade_id: trade.id,
            exit_premium,
            profit_loss,
        }
    }

    /// Settle a short put that expired out of the money: no broker order,
    /// the position closes at a premium of zero with reason `expiration`.
    pub async fn settle_expired(&self, position: &OpenPosition) -> ExitOutcome {
        info!(
            position_id = %position.position_id,
            trade_id = position.trade_id,
            "settling expired position at zero premium"
        );
        self.reconcile_fill(position, ExitReason::Expiration, 0.0, None)
            .await
    }

    /// Close everything, now. Logs at critical level, keeps going past
    /// individual failures, and reports per-position outcomes.
    pub async fn emergency_exit_all(
        &self,
        positions: &[OpenPosition],
    ) -> Vec<(String, ExitOutcome)> {
        error!(
            count = positions.len(),
            "EMERGENCY EXIT — closing all open positions"
        );

        let mut results = Vec::with_capacity(positions.len());
        for position in positions {
            let outcome = self
                .execute_exit(position, ExitReason::Emergency, 0.0, None)
                .await;
            if !outcome.is_closed() {
                error!(
                    position_id = %position.position_id,
                    outcome = ?outcome,
                    "emergency exit failed for position, continuing"
                );
            }
            results.push((position.position_id.clone(), outcome));
        }

        let closed = results.iter().filter(|(_, o)| o.is_closed()).count();
        error!(
            closed,
            failed = results.len() - closed,
            "emergency exit sweep complete"
        );
        results
    }
}

impl std::fmt::Debug for ExitManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitManager")
            .field("poll_interval_sec", &self.config.poll_interval_sec)
            .field("max_wait_market_sec", &self.config.max_wait_market_sec)
            .field("max_wait_limit_sec", &self.config.max_wait_limit_sec)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::api::Contract;
    use crate::broker::scripted::ScriptedBroker;
    use crate::config::RiskConfig;
    use crate::store::NewTrade;
    use crate::types::OpportunitySource;
    use chrono::NaiveDate;

    struct Fixture {
        broker: Arc<ScriptedBroker>,
        store: Arc<Store>,
        manager: ExitManager,
        position: OpenPosition,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(ScriptedBroker::new());
        let store = Arc::new(Store::open_in_memory().unwrap());
        let expiry = chrono::Utc::now().date_naive() + chrono::Duration::days(9);

        let trade_id = store
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

        let position = OpenPosition {
            position_id: crate::positions::position_id("SPY", 450.0, expiry),
            trade_id,
            symbol: "SPY".into(),
            strike: 450.0,
            expiration: expiry,
            contracts: 5,
            entry_premium: 0.40,
            entry_date: chrono::Utc::now().date_naive(),
            margin_requirement: 5_000.0,
            sector: None,
            contract: Contract {
                con_id: 42,
                symbol: "SPY".into(),
                strike: 450.0,
                expiration: expiry,
                trading_class: Some("SPY".into()),
            },
        };

        let snapshots = Arc::new(ExitSnapshotService::new(broker.clone(), store.clone()));
        let risk = Arc::new(RiskGovernor::new(RiskConfig::default(), 100_000.0));
        let manager = ExitManager::new(
            broker.clone(),
            store.clone(),
            snapshots,
            risk,
            ExitConfig::default(),
        );

        Fixture {
            broker,
            store,
            manager,
            position,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn market_exit_that_fills_late_is_reconciled() {
        // Broker trace: PendingSubmit at t=0..2s, Filled at ~2.5s with
        // avgFillPrice 2.50. A single-shot t=2s read would wrongly fail.
        let fx = fixture();
        fx.broker.push_simple_script(
            &[
                OrderStatus::PendingSubmit,
                OrderStatus::PendingSubmit,
                OrderStatus::PendingSubmit,
                OrderStatus::Filled,
            ],
            2.50,
        );

        let outcome = fx
            .manager
            .execute_exit(&fx.position, ExitReason::StopLoss, 2.40, Some(0.55))
            .await;
        assert!(outcome.is_closed());

        let trade = fx.store.get_trade(fx.position.trade_id).unwrap().unwrap();
        assert!(trade.exit_date.is_some());
        assert_eq!(trade.exit_premium, Some(2.50));
        assert_eq!(trade.exit_reason, Some(ExitReason::StopLoss));
        // (0.40 - 2.50) * 100 * 5 = -1050.
        assert!((trade.profit_loss.unwrap() - -1050.0).abs() < 0.01);
        assert!(trade.exit_fields_consistent());

        // The exit snapshot was persisted in the same transaction.
        let snap = fx.store.exit_snapshot(trade.id).unwrap().unwrap();
        assert_eq!(snap.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(snap.exit_premium, Some(2.50));

        // Stop-loss exits go out as market orders.
        let placed = fx.broker.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].1.order_type, OrderType::Market);
        assert_eq!(placed[0].1.action, OrderAction::Buy);
    }

    #[tokio::test(start_paused = true)]
    async fn profit_target_uses_a_limit_order() {
        let fx = fixture();
        fx.broker
            .push_simple_script(&[OrderStatus::Submitted, OrderStatus::Filled], 0.20);

        let outcome = fx
            .manager
            .execute_exit(&fx.position, ExitReason::ProfitTarget, 0.20, None)
            .await;
        assert!(outcome.is_closed());

        let placed = fx.broker.placed_orders();
        assert_eq!(placed[0].1.order_type, OrderType::Limit);
        assert_eq!(placed[0].1.limit_price, Some(0.20));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_exit_keeps_position_open() {
        let fx = fixture();
        fx.broker.push_simple_script(
            &[OrderStatus::PendingSubmit, OrderStatus::Cancelled],
            0.0,
        );

        let outcome = fx
            .manager
            .execute_exit(&fx.position, ExitReason::TimeExit, 0.30, None)
            .await;
        assert!(matches!(
            outcome,
            ExitOutcome::Failed(ExitFailure::Cancelled)
        ));

        let trade = fx.store.get_trade(fx.position.trade_id).unwrap().unwrap();
        assert!(!trade.is_closed());
        assert!(fx.store.exit_snapshot(trade.id).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_exit_times_out_never_misreads_pending_as_failed() {
        let fx = fixture();
        // PendingSubmit forever.
        fx.broker
            .push_simple_script(&[OrderStatus::PendingSubmit], 0.0);

        let outcome = fx
            .manager
            .execute_exit(&fx.position, ExitReason::ProfitTarget, 0.20, None)
            .await;
        match outcome {
            ExitOutcome::Failed(ExitFailure::Timeout { waited_secs }) => {
                // Limit-order window.
                assert_eq!(waited_secs, 10);
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        // Position untouched pending reconciliation.
        let trade = fx.store.get_trade(fx.position.trade_id).unwrap().unwrap();
        assert!(!trade.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_exit_all_continues_past_failures() {
        let fx = fixture();

        // Second position whose trade also exists.
        let expiry = chrono::Utc::now().date_naive() + chrono::Duration::days(9);
        let trade2 = fx
            .store
            .insert_trade(&NewTrade {
                symbol: "AAPL".into(),
                strike: 185.0,
                expiration: expiry,
                contracts: 2,
                entry_premium: 0.30,
                entry_date: chrono::Utc::now().date_naive(),
                data_source: OpportunitySource::Screener,
            })
            .unwrap();
        let mut position2 = fx.position.clone();
        position2.trade_id = trade2;
        position2.symbol = "AAPL".into();
        position2.position_id = crate::positions::position_id("AAPL", 185.0, expiry);
        position2.contract.symbol = "AAPL".into();

        // First exit cancels, second fills.
        fx.broker
            .push_simple_script(&[OrderStatus::PendingSubmit, OrderStatus::Cancelled], 0.0);
        fx.broker
            .push_simple_script(&[OrderStatus::Filled], 0.35);

        let results = fx
            .manager
            .emergency_exit_all(&[fx.position.clone(), position2])
            .await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].1.is_closed());
        assert!(results[1].1.is_closed());

        // Emergency exits are market orders.
        for (_, order) in fx.broker.placed_orders() {
            assert_eq!(order.order_type, OrderType::Market);
        }
    }
}
