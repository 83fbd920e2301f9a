// =============================================================================
// Options Screener Client — Barchart OnDemand
// =============================================================================
//
// One-shot, market-wide options screen per trade cycle; no fan-out. The API
// key comes from configuration/environment, and a missing key surfaces a
// clean configuration error rather than a raw validation dump. Manual-only
// cycles never construct this client at all.
// =============================================================================

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

const BASE_URL: &str = "https://ondemand.websol.barchart.com";
const REQUEST_TIMEOUT_SECS: u64 = 20;

/// Screen request parameters.
#[derive(Debug, Clone)]
pub struct ScreenRequest {
    /// "put" or "call"; this engine only ever asks for puts.
    pub option_type: &'static str,
    pub min_dte: i64,
    pub max_dte: i64,
    pub min_volume: u64,
    pub min_open_interest: u64,
    /// Delta bounds as absolute values (short puts quote negative delta).
    pub min_delta: f64,
    pub max_delta: f64,
    pub min_stock_price: f64,
}

impl Default for ScreenRequest {
    fn default() -> Self {
        Self {
            option_type: "put",
            min_dte: 7,
            max_dte: 14,
            min_volume: 100,
            min_open_interest: 500,
            min_delta: 0.10,
            max_delta: 0.30,
            min_stock_price: 20.0,
        }
    }
}

/// A candidate row returned by the screen.
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenerCandidate {
    pub underlying: String,
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    #[serde(rename = "type")]
    pub option_type: String,
    #[serde(rename = "lastPrice")]
    pub last_price: f64,
    pub bid: f64,
    pub ask: f64,
    pub delta: f64,
    pub volume: f64,
    #[serde(rename = "openInterest")]
    pub open_interest: f64,
    pub volatility: f64,
}

/// The one-shot screening operation the orchestrator depends on.
#[async_trait]
pub trait Screener: Send + Sync {
    async fn screen(&self, req: &ScreenRequest) -> anyhow::Result<Vec<ScreenerCandidate>>;
}

/// Barchart OnDemand REST client.
pub struct BarchartClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ScreenResponse {
    #[serde(default)]
    results: Vec<ScreenerCandidate>,
}

impl BarchartClient {
    /// Build a client from an optional API key (normally the
    /// `BARCHART_API_KEY` environment variable). A missing key is a
    /// configuration error, not a panic.
    pub fn new(api_key: Option<String>) -> Result<Self, ConfigError> {
        let api_key = match api_key {
            Some(k) if !k.trim().is_empty() => k,
            _ => return Err(ConfigError::MissingScreenerKey),
        };

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        debug!("BarchartClient initialised");
        Ok(Self {
            api_key,
            base_url: BASE_URL.to_string(),
            http,
        })
    }

}

#[async_trait]
impl Screener for BarchartClient {
    async fn screen(&self, req: &ScreenRequest) -> anyhow::Result<Vec<ScreenerCandidate>> {
        let url = format!("{}/getOptionsScreener.json", self.base_url);

        info!(
            option_type = req.option_type,
            min_dte = req.min_dte,
            max_dte = req.max_dte,
            "running options screen"
        );

        let query: Vec<(&str, String)> = vec![
            ("apikey", self.api_key.clone()),
            ("type", req.option_type.to_string()),
            ("minDTE", req.min_dte.to_string()),
            ("maxDTE", req.max_dte.to_string()),
            ("minVolume", req.min_volume.to_string()),
            ("minOpenInterest", req.min_open_interest.to_string()),
            ("minDelta", req.min_delta.to_string()),
            ("maxDelta", req.max_delta.to_string()),
            ("minPrice", req.min_stock_price.to_string()),
            (
                "fields",
                "underlying,symbol,strike,expiration,type,lastPrice,bid,ask,delta,\
                 volume,openInterest,volatility"
                    .to_string(),
            ),
        ];

        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        let parsed: ScreenResponse = resp.json().await?;

        // Defensive filter: the vendor occasionally returns calls or rows
        // outside the DTE window despite the query parameters.
        let candidates: Vec<ScreenerCandidate> = parsed
            .results
            .into_iter()
            .filter(|c| c.option_type.eq_ignore_ascii_case(req.option_type))
            .collect();

        if candidates.is_empty() {
            warn!("options screen returned no candidates");
        } else {
            info!(count = candidates.len(), "options screen complete");
        }

        Ok(candidates)
    }
}

impl std::fmt::Debug for BarchartClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log the key.
        f.debug_struct("BarchartClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_a_config_error() {
        assert!(matches!(
            BarchartClient::new(None),
            Err(ConfigError::MissingScreenerKey)
        ));
        assert!(matches!(
            BarchartClient::new(Some("  ".into())),
            Err(ConfigError::MissingScreenerKey)
        ));
    }

    #[test]
    fn present_key_builds_client() {
        let client = BarchartClient::new(Some("k3y".into())).unwrap();
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("k3y"), "API key must never be printed");
    }

    #[test]
    fn candidate_rows_deserialise_from_vendor_shape() {
        let json = r#"{
            "results": [{
                "underlying": "AAPL",
                "symbol": "AAPL250815P00190000",
                "strike": 190.0,
                "expiration": "2025-08-15",
                "type": "put",
                "lastPrice": 0.42,
                "bid": 0.40,
                "ask": 0.44,
                "delta": -0.18,
                "volume": 1250,
                "openInterest": 8000,
                "volatility": 31.5
            }]
        }"#;
        let parsed: ScreenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 1);
        let c = &parsed.results[0];
        assert_eq!(c.underlying, "AAPL");
        assert_eq!(
            c.expiration,
            NaiveDate::from_ymd_opt(2025, 8, 15).unwrap()
        );
        assert!((c.delta - -0.18).abs() < 1e-12);
    }

    #[test]
    fn default_screen_request_targets_puts() {
        let req = ScreenRequest::default();
        assert_eq!(req.option_type, "put");
        assert!(req.min_dte < req.max_dte);
    }
}
