// =============================================================================
// Scripted Broker — deterministic in-memory test double
// =============================================================================
//
// Lets tests stage chain listings, quotes, and per-order status traces
// (e.g. PendingSubmit, PendingSubmit, Filled) and then observe exactly what
// the engine placed. Status scripts are consumed one entry per poll; the
// final entry repeats forever.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::broker::api::{
    AccountSummary, Bar, Broker, BrokerPosition, Contract, ContractSpec, MarginEstimate,
    OptionQuote, OrderHandle, OrderRequest, OrderState, StockQuote, StrikeListing,
};
use crate::errors::BrokerError;
use crate::types::OrderStatus;

pub struct ScriptedBroker {
    listings: Mutex<HashMap<(String, NaiveDate), StrikeListing>>,
    stock_quotes: Mutex<HashMap<String, StockQuote>>,
    option_quotes: Mutex<HashMap<i64, OptionQuote>>,
    default_option_quote: Mutex<Option<OptionQuote>>,
    history: Mutex<HashMap<String, Vec<Bar>>>,
    account: Mutex<AccountSummary>,
    broker_positions: Mutex<Vec<BrokerPosition>>,
    what_if_margin: Mutex<Option<f64>>,

    /// Status scripts assigned to orders in placement sequence.
    pending_scripts: Mutex<VecDeque<Vec<OrderState>>>,
    order_scripts: Mutex<HashMap<i64, VecDeque<OrderState>>>,
    placed: Mutex<Vec<(Contract, OrderRequest)>>,
    next_order_id: AtomicI64,

    /// Number of qualification batches issued (cache tests rely on this).
    pub qualify_batches: AtomicU32,
    /// When set, all calls fail as if the gateway were down.
    pub refuse_connections: Mutex<bool>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self {
            listings: Mutex::new(HashMap::new()),
            stock_quotes: Mutex::new(HashMap::new()),
            option_quotes: Mutex::new(HashMap::new()),
            default_option_quote: Mutex::new(None),
            history: Mutex::new(HashMap::new()),
            account: Mutex::new(AccountSummary {
                net_liquidation: 100_000.0,
                buying_power: 100_000.0,
                maintenance_margin: 0.0,
                daily_pnl: 0.0,
            }),
            broker_positions: Mutex::new(Vec::new()),
            what_if_margin: Mutex::new(None),
            pending_scripts: Mutex::new(VecDeque::new()),
            order_scripts: Mutex::new(HashMap::new()),
            placed: Mutex::new(Vec::new()),
            next_order_id: AtomicI64::new(1),
            qualify_batches: AtomicU32::new(0),
            refuse_connections: Mutex::new(false),
        }
    }

    // -- staging -------------------------------------------------------------

    pub fn list_strikes(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        strikes: &[f64],
        trading_class: &str,
    ) {
        self.listings.lock().insert(
            (symbol.to_string(), expiration),
            StrikeListing {
                expiration,
                strikes: strikes.to_vec(),
                trading_class: trading_class.to_string(),
            },
        );
    }

    pub fn set_stock_quote(&self, symbol: &str, bid: f64, ask: f64, last: f64) {
        self.stock_quotes
            .lock()
            .insert(symbol.to_string(), StockQuote { bid, ask, last });
    }

    pub fn set_default_option_quote(&self, quote: OptionQuote) {
        *self.default_option_quote.lock() = Some(quote);
    }

    pub fn set_option_quote(&self, con_id: i64, quote: OptionQuote) {
        self.option_quotes.lock().insert(con_id, quote);
    }

    pub fn set_history(&self, symbol: &str, bars: Vec<Bar>) {
        self.history.lock().insert(symbol.to_string(), bars);
    }

    pub fn set_account(&self, account: AccountSummary) {
        *self.account.lock() = account;
    }

    pub fn set_what_if_margin(&self, margin: f64) {
        *self.what_if_margin.lock() = Some(margin);
    }

    /// Queue the status trace the NEXT placed order will play back.
    pub fn push_status_script(&self, statuses: Vec<OrderState>) {
        self.pending_scripts.lock().push_back(statuses);
    }

    /// Convenience: a script of plain statuses with a fill price on Filled.
    pub fn push_simple_script(&self, statuses: &[OrderStatus], fill_price: f64) {
        let script = statuses
            .iter()
            .map(|&status| OrderState {
                status,
                avg_fill_price: (status == OrderStatus::Filled).then_some(fill_price),
            })
            .collect();
        self.push_status_script(script);
    }

    // -- observation ---------------------------------------------------------

    pub fn placed_orders(&self) -> Vec<(Contract, OrderRequest)> {
        self.placed.lock().clone()
    }

    fn check_reachable(&self) -> Result<(), BrokerError> {
        if *self.refuse_connections.lock() {
            return Err(BrokerError::ConnectionRefused {
                host: "127.0.0.1".into(),
                port: 7497,
            });
        }
        Ok(())
    }

    /// Deterministic nonzero contract id for a listed strike.
    fn con_id_for(symbol: &str, strike: f64, expiration: NaiveDate) -> i64 {
        use chrono::Datelike;
        let mut id: i64 = 7;
        for b in symbol.bytes() {
            id = id.wrapping_mul(31).wrapping_add(b as i64);
        }
        1 + (id.abs() % 1_000_000) * 1_000_000
            + (strike as i64 % 1_000) * 1_000
            + i64::from(expiration.num_days_from_ce()) % 1_000
    }
}

impl Default for ScriptedBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn ensure_connected(&self) -> Result<(), BrokerError> {
        self.check_reachable()
    }

    async fn qualify_contract(&self, spec: &ContractSpec) -> Result<Contract, BrokerError> {
        let mut batch = self.qualify_contracts(std::slice::from_ref(spec)).await?;
        Ok(batch.pop().expect("one spec in, one contract out"))
    }

    async fn qualify_contracts(
        &self,
        specs: &[ContractSpec],
    ) -> Result<Vec<Contract>, BrokerError> {
        self.check_reachable()?;
        self.qualify_batches.fetch_add(1, Ordering::Relaxed);

        let listings = self.listings.lock();
        Ok(specs
            .iter()
            .map(|spec| {
                let listed = listings
                    .get(&(spec.symbol.clone(), spec.expiration))
                    .map(|l| l.strikes.iter().any(|&s| (s - spec.strike).abs() < 1e-9))
                    .unwrap_or(false);
                Contract {
                    con_id: if listed {
                        Self::con_id_for(&spec.symbol, spec.strike, spec.expiration)
                    } else {
                        0
                    },
                    symbol: spec.symbol.clone(),
                    strike: spec.strike,
                    expiration: spec.expiration,
                    trading_class: listings
                        .get(&(spec.symbol.clone(), spec.expiration))
                        .map(|l| l.trading_class.clone())
                        .or_else(|| spec.trading_class.clone()),
                }
            })
            .collect())
    }

    async fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, BrokerError> {
        self.check_reachable()?;
        let mut expirations: Vec<NaiveDate> = self
            .listings
            .lock()
            .keys()
            .filter(|(s, _)| s == symbol)
            .map(|(_, e)| *e)
            .collect();
        expirations.sort();
        Ok(expirations)
    }

    async fn strikes(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<StrikeListing, BrokerError> {
        self.check_reachable()?;
        self.listings
            .lock()
            .get(&(symbol.to_string(), expiration))
            .cloned()
            .ok_or_else(|| BrokerError::InvalidContract(format!("{symbol} {expiration}")))
    }

    async fn stock_quote(&self, symbol: &str) -> Result<StockQuote, BrokerError> {
        self.check_reachable()?;
        self.stock_quotes
            .lock()
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::InvalidContract(symbol.to_string()))
    }

    async fn option_quote(&self, contract: &Contract) -> Result<OptionQuote, BrokerError> {
        self.check_reachable()?;
        if let Some(q) = self.option_quotes.lock().get(&contract.con_id) {
            return Ok(q.clone());
        }
        self.default_option_quote
            .lock()
            .clone()
            .ok_or_else(|| BrokerError::InvalidContract(contract.label()))
    }

    async fn historical_daily(&self, symbol: &str, _days: u32) -> Result<Vec<Bar>, BrokerError> {
        self.check_reachable()?;
        self.history
            .lock()
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::InvalidContract(symbol.to_string()))
    }

    async fn place_order(
        &self,
        contract: &Contract,
        order: &OrderRequest,
    ) -> Result<OrderHandle, BrokerError> {
        self.check_reachable()?;
        if contract.trading_class.is_none() {
            return Err(BrokerError::TradingClassMissing(contract.label()));
        }

        let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        self.placed.lock().push((contract.clone(), order.clone()));

        let script = self
            .pending_scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                vec![OrderState {
                    status: OrderStatus::Filled,
                    avg_fill_price: order.limit_price.or(Some(0.0)),
                }]
            });
        self.order_scripts
            .lock()
            .insert(order_id, script.into_iter().collect());

        Ok(OrderHandle { order_id })
    }

    async fn order_status(&self, handle: OrderHandle) -> Result<OrderState, BrokerError> {
        self.check_reachable()?;
        let mut scripts = self.order_scripts.lock();
        let script = scripts
            .get_mut(&handle.order_id)
            .ok_or_else(|| BrokerError::Api(format!("unknown order {}", handle.order_id)))?;
        // Consume entries until one remains, then repeat it forever.
        if script.len() > 1 {
            Ok(script.pop_front().expect("nonempty script"))
        } else {
            Ok(*script.front().expect("script keeps its final state"))
        }
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.check_reachable()?;
        Ok(self.broker_positions.lock().clone())
    }

    async fn account_summary(&self) -> Result<AccountSummary, BrokerError> {
        self.check_reachable()?;
        Ok(*self.account.lock())
    }

    async fn what_if(
        &self,
        _contract: &Contract,
        _order: &OrderRequest,
    ) -> Result<MarginEstimate, BrokerError> {
        self.check_reachable()?;
        match *self.what_if_margin.lock() {
            Some(initial_margin) => Ok(MarginEstimate { initial_margin }),
            None => Err(BrokerError::Api("what-if not staged".into())),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()
    }

    #[tokio::test]
    async fn unlisted_strikes_qualify_with_zero_con_id() {
        let broker = ScriptedBroker::new();
        broker.list_strikes("SPY", expiry(), &[95.0, 100.0, 105.0], "SPYW");

        let specs: Vec<ContractSpec> = [90.0, 100.0, 120.0]
            .iter()
            .map(|&strike| ContractSpec {
                symbol: "SPY".into(),
                strike,
                expiration: expiry(),
                trading_class: None,
            })
            .collect();

        let contracts = broker.qualify_contracts(&specs).await.unwrap();
        assert_eq!(contracts.len(), 3);
        assert!(!contracts[0].is_listed());
        assert!(contracts[1].is_listed());
        assert!(!contracts[2].is_listed());
        assert_eq!(contracts[1].trading_class.as_deref(), Some("SPYW"));
    }

    #[tokio::test]
    async fn status_script_plays_back_and_final_state_repeats() {
        let broker = ScriptedBroker::new();
        broker.list_strikes("SPY", expiry(), &[100.0], "SPY");
        broker.push_simple_script(
            &[
                OrderStatus::PendingSubmit,
                OrderStatus::Submitted,
                OrderStatus::Filled,
            ],
            2.50,
        );

        let contract = broker
            .qualify_contract(&ContractSpec {
                symbol: "SPY".into(),
                strike: 100.0,
                expiration: expiry(),
                trading_class: None,
            })
            .await
            .unwrap();

        let handle = broker
            .place_order(
                &contract,
                &OrderRequest {
                    action: crate::broker::api::OrderAction::Sell,
                    order_type: crate::broker::api::OrderType::Limit,
                    quantity: 1,
                    limit_price: Some(0.5),
                },
            )
            .await
            .unwrap();

        let s1 = broker.order_status(handle).await.unwrap();
        assert_eq!(s1.status, OrderStatus::PendingSubmit);
        let s2 = broker.order_status(handle).await.unwrap();
        assert_eq!(s2.status, OrderStatus::Submitted);
        let s3 = broker.order_status(handle).await.unwrap();
        assert_eq!(s3.status, OrderStatus::Filled);
        assert_eq!(s3.avg_fill_price, Some(2.50));
        // Final state repeats.
        let s4 = broker.order_status(handle).await.unwrap();
        assert_eq!(s4.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn missing_trading_class_is_rejected() {
        let broker = ScriptedBroker::new();
        let contract = Contract {
            con_id: 42,
            symbol: "SPY".into(),
            strike: 100.0,
            expiration: expiry(),
            trading_class: None,
        };
        let err = broker
            .place_order(
                &contract,
                &OrderRequest {
                    action: crate::broker::api::OrderAction::Sell,
                    order_type: crate::broker::api::OrderType::Market,
                    quantity: 1,
                    limit_price: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::TradingClassMissing(_)));
    }
}
