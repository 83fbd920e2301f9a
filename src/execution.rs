// =============================================================================
// Order Executor — interlocked entry placement with status polling
// =============================================================================
//
// Safety interlock: when the runtime configuration does not assert paper
// mode AND the broker port is not the paper port (7497), execute_trade
// fails immediately with a configuration error. The only bypass is the
// dedicated `enable_live_trading` flag.
//
// Entry orders are SELL limit orders at half the mid premium. After
// placement, status is polled once per second; `PreSubmitted` and
// `Submitted` are working states, never failures. Only `Cancelled` and
// `Inactive` end the attempt. A fill records the trade row and triggers the
// entry snapshot — snapshot failure never fails the trade.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::api::{Broker, OrderAction, OrderHandle, OrderRequest, OrderType};
use crate::config::{ExitConfig, TradingConfig};
use crate::errors::{BrokerError, ConfigError};
use crate::opportunity::Opportunity;
use crate::snapshots::EntrySnapshotService;
use crate::store::{NewTrade, Store};
use crate::types::OrderStatus;

/// Options under $3 trade in nickels.
const PRICE_TICK: f64 = 0.05;
/// Entry limit as a fraction of the mid premium.
const ENTRY_LIMIT_FRACTION: f64 = 0.5;

/// Outcome of an execution attempt.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// Order filled; the trade row exists.
    Filled { trade_id: i64, avg_fill_price: f64 },
    /// Dry-run mode: synthetic fill, no broker contact.
    Simulated { trade_id: i64, fill_price: f64 },
    /// The paper-mode interlock refused to place the order.
    Interlocked(String),
    /// The order never resolved within the polling window; its fate is
    /// unknown and the caller reconciles on the next monitor cycle.
    TimedOut { order_id: i64 },
    /// Broker rejected, cancelled, or errored.
    Failed(String),
}

/// Outcome of one status-polling loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    Filled { avg_fill_price: f64 },
    Terminal(OrderStatus),
    TimedOut,
}

/// Poll an order once per `poll_interval` until fill, terminal failure, or
/// `max_wait` elapses. Working statuses (`PendingSubmit`, `PreSubmitted`,
/// `Submitted`) keep the loop alive; they are never treated as outcomes.
pub async fn poll_order_status(
    broker: &dyn Broker,
    handle: OrderHandle,
    poll_interval: Duration,
    max_wait: Duration,
) -> Result<PollOutcome, BrokerError> {
    let deadline = tokio::time::Instant::now() + max_wait;

    loop {
        let state = broker.order_status(handle).await?;

        match state.status {
            OrderStatus::Filled => {
                return Ok(PollOutcome::Filled {
                    avg_fill_price: state.avg_fill_price.unwrap_or(0.0),
                });
            }
            status if status.is_terminal_failure() => {
                return Ok(PollOutcome::Terminal(status));
            }
            status => {
                debug_assert!(status.is_working());
                if tokio::time::Instant::now() >= deadline {
                    return Ok(PollOutcome::TimedOut);
                }
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

/// Round a limit price down to the nearest tick, with a one-tick floor.
/// The epsilon keeps exact multiples (0.25 / 0.05) from flooring a tick low.
fn round_to_tick(price: f64) -> f64 {
    let ticks = (price / PRICE_TICK + 1e-9).floor();
    (ticks * PRICE_TICK).max(PRICE_TICK)
}

/// Places entry orders for approved opportunities.
pub struct OrderExecutor {
    broker: Arc<dyn Broker>,
    store: Arc<Store>,
    snapshots: Arc<EntrySnapshotService>,
    trading: TradingConfig,
    exits: ExitConfig,
}

impl OrderExecutor {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<Store>,
        snapshots: Arc<EntrySnapshotService>,
        trading: TradingConfig,
        exits: ExitConfig,
    ) -> Self {
        Self {
            broker,
            store,
            snapshots,
            trading,
            exits,
        }
    }

    /// The paper-mode interlock. Errors unless the config asserts paper
    /// mode, the port is the paper port, or live trading is explicitly
    /// enabled.
    pub fn check_interlock(&self) -> Result<(), ConfigError> {
        if self.trading.paper_trading || self.trading.ibkr_port == 7497 {
            return Ok(());
        }
        if self.trading.enable_live_trading {
            warn!(port = self.trading.ibkr_port, "LIVE trading enabled — real capital at risk");
            return Ok(());
        }
        Err(ConfigError::LiveModeInterlock {
            port: self.trading.ibkr_port,
        })
    }

    /// Ask the broker for the real margin impact of this entry via a
    /// what-if order. `None` when the broker cannot answer; callers fall
    /// back to the local estimate.
    pub async fn refined_margin(&self, opp: &Opportunity, contracts: u32) -> Option<f64> {
        let contract = opp.contract.as_ref()?;
        let order = OrderRequest {
            action: OrderAction::Sell,
            order_type: OrderType::Limit,
            quantity: contracts,
            limit_price: opp.mid.map(|m| round_to_tick(m * ENTRY_LIMIT_FRACTION)),
        };
        match self.broker.what_if(contract, &order).await {
            Ok(estimate) => Some(estimate.initial_margin),
            Err(e) => {
                warn!(contract = %contract.label(), error = %e, "what-if margin check failed");
                None
            }
        }
    }

    /// Execute an approved short-put entry.
    pub async fn execute_trade(
        &self,
        opp: &Opportunity,
        contracts: u32,
    ) -> ExecutionResult {
        if let Err(e) = self.check_interlock() {
            error!(error = %e, "execution refused by paper-mode interlock");
            return ExecutionResult::Interlocked(e.user_message());
        }

        let Some(mid) = opp.mid else {
            return ExecutionResult::Failed("opportunity not enriched (no mid)".into());
        };
        let limit_price = round_to_tick(mid * ENTRY_LIMIT_FRACTION);

        if self.trading.dry_run {
            return self.execute_dry_run(opp, contracts, limit_price).await;
        }

        let Some(contract) = opp.contract.clone() else {
            return ExecutionResult::Failed("opportunity not enriched (no contract)".into());
        };
        if contract.trading_class.is_none() {
            // The broker would reject this with "trading class not
            // specified"; refuse before the wire call.
            return ExecutionResult::Failed(format!(
                "trading class not specified for {}",
                contract.label()
            ));
        }

        let order = OrderRequest {
            action: OrderAction::Sell,
            order_type: OrderType::Limit,
            quantity: contracts,
            limit_price: Some(limit_price),
        };

        info!(
            contract = %contract.label(),
            contracts,
            limit_price,
            "placing entry order"
        );

        let handle = match self.broker.place_order(&contract, &order).await {
            Ok(h) => h,
            Err(e @ BrokerError::ConnectionRefused { .. }) => {
                error!(error = %e, "cannot connect to broker");
                return ExecutionResult::Failed(format!(
                    "{e}\n{}",
                    BrokerError::connection_checklist()
                ));
            }
            Err(e) => {
                warn!(error = %e, "entry order placement failed");
                return ExecutionResult::Failed(e.to_string());
            }
        };

        let outcome = match poll_order_status(
            self.broker.as_ref(),
            handle,
            Duration::from_secs(self.exits.poll_interval_sec),
            Duration::from_secs(self.exits.max_wait_limit_sec),
        )
        .await
        {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, order_id = handle.order_id, "status polling failed");
                return ExecutionResult::Failed(e.to_string());
            }
        };

        match outcome {
            PollOutcome::Filled { avg_fill_price } => {
                self.record_fill(opp, contracts, avg_fill_price).await
            }
            PollOutcome::Terminal(status) => {
                warn!(order_id = handle.order_id, status = %status, "entry order dead");
                ExecutionResult::Failed(format!("order {status}"))
            }
            PollOutcome::TimedOut => {
                warn!(
                    order_id = handle.order_id,
                    waited_secs = self.exits.max_wait_limit_sec,
                    "entry order unresolved, will reconcile next cycle"
                );
                ExecutionResult::TimedOut {
                    order_id: handle.order_id,
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Dry-run
    // -------------------------------------------------------------------------

    async fn execute_dry_run(
        &self,
        opp: &Opportunity,
        contracts: u32,
        fill_price: f64,
    ) -> ExecutionResult {
        let sim_order_id = Uuid::new_v4();
        info!(
            symbol = %opp.symbol,
            strike = opp.strike,
            fill_price,
            sim_order_id = %sim_order_id,
            "dry-run: simulating entry fill"
        );
        self.record_fill(opp, contracts, fill_price)
            .await
            .into_simulated()
    }

    // -------------------------------------------------------------------------
    // Fill handling
    // -------------------------------------------------------------------------

    async fn record_fill(
        &self,
        opp: &Opportunity,
        contracts: u32,
        avg_fill_price: f64,
    ) -> ExecutionResult {
        let new_trade = NewTrade {
            symbol: opp.symbol.clone(),
            strike: opp.strike,
            expiration: opp.expiration,
            contracts,
            entry_premium: avg_fill_price,
            entry_date: chrono::Utc::now().date_naive(),
            data_source: opp.source,
        };

        let trade_id = match self.store.insert_trade(&new_trade) {
            Ok(id) => id,
            Err(e) => {
                // The broker holds the position; surface loudly.
                error!(error = %e, "FILLED at broker but trade row insert failed");
                return ExecutionResult::Failed(format!("fill recorded at broker, store error: {e}"));
            }
        };

        info!(
            trade_id,
            symbol = %opp.symbol,
            strike = opp.strike,
            avg_fill_price,
            contracts,
            "entry filled"
        );

        // Snapshot capture must never fail the trade.
        if let Err(e) = self
            .snapshots
            .capture(trade_id, opp, avg_fill_price, contracts)
            .await
        {
            error!(trade_id, error = %e, "entry snapshot capture failed (trade unaffected)");
        }

        ExecutionResult::Filled {
            trade_id,
            avg_fill_price,
        }
    }
}

impl ExecutionResult {
    fn into_simulated(self) -> ExecutionResult {
        match self {
            ExecutionResult::Filled {
                trade_id,
                avg_fill_price,
            } => ExecutionResult::Simulated {
                trade_id,
                fill_price: avg_fill_price,
            },
            other => other,
        }
    }
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("paper_trading", &self.trading.paper_trading)
            .field("port", &self.trading.ibkr_port)
            .field("dry_run", &self.trading.dry_run)
            .finish()
    }
}
