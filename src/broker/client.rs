// =============================================================================
// IBKR Gateway Client — HTTP bridge to TWS / IB Gateway
// =============================================================================
//
// Talks JSON to the local gateway bridge on the configured API port
// (7497 paper, 7496 live). One RPC is in flight at a time: the gateway binds
// its network callbacks to a single session, so all calls funnel through an
// async gate. Each caller must be a real tokio task with a running reactor;
// a worker that issues calls without one will wait forever on a response
// that is never polled.
// =============================================================================

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::broker::api::{
    AccountSummary, Bar, Broker, BrokerPosition, Contract, ContractSpec, MarginEstimate,
    OptionQuote, OrderHandle, OrderRequest, OrderState, StockQuote, StrikeListing,
};
use crate::errors::BrokerError;

/// Default per-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;
/// Historical data is the slowest RPC the gateway serves.
const HISTORICAL_TIMEOUT_SECS: u64 = 15;

/// HTTP client for the IBKR gateway bridge.
pub struct IbkrClient {
    host: String,
    port: u16,
    client_id: u32,
    base_url: String,
    http: reqwest::Client,
    /// Serialises RPCs: one in-flight gateway call at a time.
    rpc_gate: tokio::sync::Mutex<()>,
}

impl IbkrClient {
    /// Create a client for the gateway at `host:port`.
    ///
    /// # Arguments
    /// * `host`      — gateway host, normally 127.0.0.1.
    /// * `port`      — 7497 for the paper sandbox, 7496 for live.
    /// * `client_id` — gateway session id; must be unique per connection.
    pub fn new(host: impl Into<String>, port: u16, client_id: u32) -> Self {
        let host = host.into();
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        debug!(host = %host, port, client_id, "IbkrClient initialised");

        Self {
            base_url: format!("http://{host}:{port}"),
            host,
            port,
            client_id,
            http,
            rpc_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    // -------------------------------------------------------------------------
    // Transport helpers
    // -------------------------------------------------------------------------

    fn map_transport_error(&self, e: reqwest::Error, what: &str) -> BrokerError {
        if e.is_connect() {
            BrokerError::ConnectionRefused {
                host: self.host.clone(),
                port: self.port,
            }
        } else if e.is_timeout() {
            BrokerError::Timeout {
                what: what.to_string(),
                seconds: REQUEST_TIMEOUT_SECS,
            }
        } else {
            BrokerError::Api(format!("{what}: {e}"))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, BrokerError> {
        let _guard = self.rpc_gate.lock().await;
        let url = format!("{}{path}", self.base_url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, what))?;

        Self::decode(resp, what).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<T, BrokerError> {
        let _guard = self.rpc_gate.lock().await;
        let url = format!("{}{path}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, what))?;

        Self::decode(resp, what).await
    }

    async fn decode<T: DeserializeOwned>(
        resp: reqwest::Response,
        what: &str,
    ) -> Result<T, BrokerError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // The gateway reports unlisted instruments as 404 with a
            // security-definition message.
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(BrokerError::InvalidContract(format!("{what}: {body}")));
            }
            return Err(BrokerError::Rejected(format!("{what}: {status} {body}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| BrokerError::Api(format!("{what}: malformed response: {e}")))
    }
}

#[async_trait]
impl Broker for IbkrClient {
    #[instrument(skip(self), name = "ibkr::ensure_connected")]
    async fn ensure_connected(&self) -> Result<(), BrokerError> {
        let _: serde_json::Value = self
            .get_json(
                &format!("/v1/status?client_id={}", self.client_id),
                "status check",
            )
            .await?;
        debug!("gateway reachable");
        Ok(())
    }

    #[instrument(skip(self, spec), name = "ibkr::qualify_contract")]
    async fn qualify_contract(&self, spec: &ContractSpec) -> Result<Contract, BrokerError> {
        let mut contracts = self.qualify_contracts(std::slice::from_ref(spec)).await?;
        contracts
            .pop()
            .ok_or_else(|| BrokerError::Api("empty qualification response".into()))
    }

    #[instrument(skip(self, specs), fields(count = specs.len()), name = "ibkr::qualify_contracts")]
    async fn qualify_contracts(
        &self,
        specs: &[ContractSpec],
    ) -> Result<Vec<Contract>, BrokerError> {
        let contracts: Vec<Contract> = self
            .post_json("/v1/contracts/qualify", &specs, "contract qualification")
            .await?;
        let listed = contracts.iter().filter(|c| c.is_listed()).count();
        debug!(
            requested = specs.len(),
            listed, "contract qualification batch complete"
        );
        Ok(contracts)
    }

    #[instrument(skip(self), name = "ibkr::option_expirations")]
    async fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, BrokerError> {
        self.get_json(
            &format!("/v1/options/{symbol}/expirations"),
            "option chain request",
        )
        .await
    }

    #[instrument(skip(self), name = "ibkr::strikes")]
    async fn strikes(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<StrikeListing, BrokerError> {
        self.get_json(
            &format!(
                "/v1/options/{symbol}/strikes?expiration={}",
                expiration.format("%Y-%m-%d")
            ),
            "strike listing",
        )
        .await
    }

    #[instrument(skip(self), name = "ibkr::stock_quote")]
    async fn stock_quote(&self, symbol: &str) -> Result<StockQuote, BrokerError> {
        self.get_json(&format!("/v1/stocks/{symbol}/quote"), "stock quote")
            .await
    }

    #[instrument(skip(self, contract), fields(contract = %contract.label()), name = "ibkr::option_quote")]
    async fn option_quote(&self, contract: &Contract) -> Result<OptionQuote, BrokerError> {
        self.post_json("/v1/options/quote", contract, "option quote")
            .await
    }

    #[instrument(skip(self), name = "ibkr::historical_daily")]
    async fn historical_daily(&self, symbol: &str, days: u32) -> Result<Vec<Bar>, BrokerError> {
        // This endpoint gets a longer deadline than the rest of the API.
        let _guard = self.rpc_gate.lock().await;
        let url = format!(
            "{}/v1/stocks/{symbol}/history?days={days}&bar=1d",
            self.base_url
        );

        let resp = self
            .http
            .get(&url)
            .timeout(std::time::Duration::from_secs(HISTORICAL_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrokerError::Timeout {
                        what: format!("historical data for {symbol}"),
                        seconds: HISTORICAL_TIMEOUT_SECS,
                    }
                } else {
                    self.map_transport_error(e, "historical data")
                }
            })?;

        Self::decode(resp, "historical data").await
    }

    #[instrument(skip(self, contract, order), fields(contract = %contract.label()), name = "ibkr::place_order")]
    async fn place_order(
        &self,
        contract: &Contract,
        order: &OrderRequest,
    ) -> Result<OrderHandle, BrokerError> {
        // The gateway rejects short option orders without a trading class;
        // fail fast with the same error instead of burning a round trip.
        if contract.trading_class.is_none() {
            warn!(contract = %contract.label(), "order rejected locally: trading class missing");
            return Err(BrokerError::TradingClassMissing(contract.label()));
        }

        let body = json!({ "contract": contract, "order": order });
        self.post_json("/v1/orders", &body, "order placement").await
    }

    #[instrument(skip(self), name = "ibkr::order_status")]
    async fn order_status(&self, handle: OrderHandle) -> Result<OrderState, BrokerError> {
        self.get_json(
            &format!("/v1/orders/{}", handle.order_id),
            "order status read",
        )
        .await
    }

    #[instrument(skip(self), name = "ibkr::positions")]
    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.get_json("/v1/positions", "position list").await
    }

    #[instrument(skip(self), name = "ibkr::account_summary")]
    async fn account_summary(&self) -> Result<AccountSummary, BrokerError> {
        self.get_json("/v1/account/summary", "account summary").await
    }

    #[instrument(skip(self, contract, order), fields(contract = %contract.label()), name = "ibkr::what_if")]
    async fn what_if(
        &self,
        contract: &Contract,
        order: &OrderRequest,
    ) -> Result<MarginEstimate, BrokerError> {
        let body = json!({ "contract": contract, "order": order });
        self.post_json("/v1/orders/what-if", &body, "what-if margin check")
            .await
    }
}

impl std::fmt::Debug for IbkrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IbkrClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .finish()
    }
}
