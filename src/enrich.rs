// =============================================================================
// Enricher / Validator — attach live broker data to candidates
// =============================================================================
//
// Enrichment needs no thresholds: resolve the contract (a zero contract id
// means the strike/expiration is not listed and the candidate is dropped),
// fetch spot and the option quote, and compute the derived metrics.
// Validation is a separate, threshold-driven capability: constructed with a
// `None` config the component only enriches.
//
// Chain listing is strictly per-expiration: weekly expirations list far
// fewer strikes than monthlies, and qualifying a monthly strike against a
// weekly series produces "no security definition" noise the caller must
// never see.
// =============================================================================

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::broker::api::{Broker, Contract, ContractSpec};
use crate::broker::pacing::{Pacer, QUALIFY_BATCH_GAP};
use crate::cache::{TtlCache, CHAIN_TTL, TREND_TTL};
use crate::calendar::MarketCalendar;
use crate::config::ValidationConfig;
use crate::errors::BrokerError;
use crate::indicators::sma::latest_sma;
use crate::opportunity::Opportunity;
use crate::broker::api::StrikeListing;
use crate::types::TrendDirection;

/// Strike scaled to tenths of a cent for hash-stable cache keys.
fn strike_key(strike: f64) -> i64 {
    (strike * 1000.0).round() as i64
}

/// Standard naked-put margin estimate:
/// `max(0.20*stock - (stock-strike), 0.10*stock) * 100 * contracts
///  + premium * 100 * contracts`
pub fn estimate_margin(stock: f64, strike: f64, premium: f64, contracts: u32) -> f64 {
    let otm_amount = stock - strike;
    let base = (0.20 * stock - otm_amount).max(0.10 * stock);
    let contracts = contracts as f64;
    base * 100.0 * contracts + premium * 100.0 * contracts
}

/// Premium collected per dollar of margin, as a percentage.
pub fn margin_efficiency_pct(premium: f64, contracts: u32, margin: f64) -> Option<f64> {
    if margin <= 0.0 {
        return None;
    }
    Some(premium * 100.0 * contracts as f64 / margin * 100.0)
}

/// Classify trend from the latest price against SMA-20 and SMA-50.
pub fn classify_trend(closes: &[f64], price: f64) -> TrendDirection {
    let sma_20 = latest_sma(closes, 20);
    let sma_50 = latest_sma(closes, 50);
    match (sma_20, sma_50) {
        (Some(s20), Some(s50)) => {
            if price > s20 && price > s50 {
                TrendDirection::Uptrend
            } else if price < s20 && price < s50 {
                TrendDirection::Downtrend
            } else {
                TrendDirection::Sideways
            }
        }
        _ => TrendDirection::Sideways,
    }
}

/// Enriches candidates with live broker data; optionally validates them
/// against configured thresholds.
pub struct Enricher {
    broker: Arc<dyn Broker>,
    calendar: MarketCalendar,
    /// `None` puts the component in enrich-only mode.
    validation: Option<ValidationConfig>,
    chain_cache: TtlCache<(String, NaiveDate), StrikeListing>,
    trend_cache: TtlCache<String, TrendDirection>,
    contract_cache: TtlCache<(String, NaiveDate, i64), Contract>,
    qualify_pacer: Pacer,
}

impl Enricher {
    pub fn new(broker: Arc<dyn Broker>, validation: Option<ValidationConfig>) -> Self {
        Self {
            broker,
            calendar: MarketCalendar::new(),
            validation,
            chain_cache: TtlCache::new(Some(CHAIN_TTL)),
            trend_cache: TtlCache::new(Some(TREND_TTL)),
            // Qualified contract ids never go stale.
            contract_cache: TtlCache::new(None),
            qualify_pacer: Pacer::new(QUALIFY_BATCH_GAP),
        }
    }

    // -------------------------------------------------------------------------
    // Enrichment
    // -------------------------------------------------------------------------

    /// Enrich `opp` in place with live broker data.
    ///
    /// Errors (timeouts, missing security) are logged here and returned so
    /// the caller drops the candidate; they are never retried in-cycle.
    pub async fn enrich(&self, opp: &mut Opportunity) -> Result<(), BrokerError> {
        let contract = match self
            .qualified_contract(&opp.symbol, opp.strike, opp.expiration)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                info!(
                    symbol = %opp.symbol,
                    strike = opp.strike,
                    expiration = %opp.expiration,
                    error = %e,
                    "dropping candidate: contract resolution failed"
                );
                return Err(e);
            }
        };

        let stock = self.broker.stock_quote(&opp.symbol).await?;
        let quote = self.broker.option_quote(&contract).await?;

        let mid = quote.mid();
        let today = self.calendar.today();
        let dte = self.calendar.dte(opp.expiration, today);

        opp.bid = Some(quote.bid);
        opp.ask = Some(quote.ask);
        opp.mid = Some(mid);
        opp.spread_pct = Some(quote.spread_pct());
        opp.stock_price = Some(stock.last);
        opp.option_volume = Some(quote.volume);
        opp.open_interest = Some(quote.open_interest);
        opp.dte = Some(dte);

        if stock.last > 0.0 {
            opp.otm_pct = Some((stock.last - opp.strike) / stock.last);
        }

        let contracts = 1; // margin metrics are per-contract at this stage
        let margin = estimate_margin(stock.last, opp.strike, mid, contracts);
        opp.margin_requirement = Some(margin);
        opp.margin_efficiency_pct = margin_efficiency_pct(mid, contracts, margin);

        opp.trend = Some(self.trend_for(&opp.symbol, stock.last).await);

        // Rank: margin efficiency carries the score, OTM cushion breaks ties.
        opp.rank_score = opp
            .margin_efficiency_pct
            .map(|eff| eff + opp.otm_pct.unwrap_or(0.0) * 10.0);

        opp.contract = Some(contract);
        debug!(
            symbol = %opp.symbol,
            strike = opp.strike,
            mid,
            dte,
            margin,
            "candidate enriched"
        );
        Ok(())
    }

    /// Apply the configured validation thresholds. Returns the rejection
    /// reason, never an error: with no config this always passes.
    pub fn validate(&self, opp: &Opportunity) -> Result<(), String> {
        let Some(cfg) = &self.validation else {
            return Ok(());
        };

        if let Some(spread) = opp.spread_pct {
            if spread > cfg.max_spread_pct {
                return Err(format!(
                    "Spread too wide: {spread:.1}% > {:.1}%",
                    cfg.max_spread_pct
                ));
            }
        }

        if let Some(eff) = opp.margin_efficiency_pct {
            if eff < cfg.min_margin_efficiency_pct {
                return Err(format!(
                    "Margin efficiency too low: {eff:.1}% < {:.1}%",
                    cfg.min_margin_efficiency_pct
                ));
            }
        }

        if cfg.require_uptrend && opp.trend != Some(TrendDirection::Uptrend) {
            return Err(format!(
                "Trend filter: {} is not an uptrend",
                opp.trend.map(|t| t.as_str()).unwrap_or("unknown")
            ));
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Chain listing
    // -------------------------------------------------------------------------

    /// List qualified put contracts for `symbol` inside the DTE and OTM
    /// windows. Strikes are requested and qualified once per expiration;
    /// batches are paced >= 200 ms apart. Unlisted strikes are silently
    /// filtered, never surfaced as errors.
    pub async fn list_chain(
        &self,
        symbol: &str,
        stock_price: f64,
        dte_min: i64,
        dte_max: i64,
        otm_min: f64,
        otm_max: f64,
    ) -> Result<Vec<Contract>, BrokerError> {
        let today = self.calendar.today();
        let expirations = self.broker.option_expirations(symbol).await?;

        let in_window: Vec<NaiveDate> = expirations
            .into_iter()
            .filter(|exp| {
                let dte = self.calendar.dte(*exp, today);
                dte >= dte_min && dte <= dte_max
            })
            .collect();

        let strike_lo = stock_price * (1.0 - otm_max);
        let strike_hi = stock_price * (1.0 - otm_min);

        let mut contracts: Vec<Contract> = Vec::new();

        for expiration in in_window {
            let listing = match self.strikes_for(symbol, expiration).await {
                Ok(l) => l,
                Err(e) => {
                    warn!(symbol, expiration = %expiration, error = %e, "strike listing failed");
                    continue;
                }
            };

            let wanted: Vec<f64> = listing
                .strikes
                .iter()
                .copied()
                .filter(|&s| s >= strike_lo && s <= strike_hi)
                .collect();
            if wanted.is_empty() {
                continue;
            }

            // Serve from the qualified-contract cache first.
            let mut to_qualify: Vec<ContractSpec> = Vec::new();
            for &strike in &wanted {
                let key = (symbol.to_string(), expiration, strike_key(strike));
                if let Some(cached) = self.contract_cache.get(&key) {
                    contracts.push(cached);
                } else {
                    to_qualify.push(ContractSpec {
                        symbol: symbol.to_string(),
                        strike,
                        expiration,
                        trading_class: Some(listing.trading_class.clone()),
                    });
                }
            }

            if to_qualify.is_empty() {
                continue;
            }

            self.qualify_pacer.pace().await;
            let qualified = self.broker.qualify_contracts(&to_qualify).await?;

            for contract in qualified {
                if contract.is_listed() {
                    let key = (
                        contract.symbol.clone(),
                        contract.expiration,
                        strike_key(contract.strike),
                    );
                    self.contract_cache.insert(key, contract.clone());
                    contracts.push(contract);
                } else {
                    debug!(
                        symbol = %contract.symbol,
                        strike = contract.strike,
                        expiration = %contract.expiration,
                        "strike not listed for this expiration"
                    );
                }
            }
        }

        info!(symbol, count = contracts.len(), "chain listing complete");
        Ok(contracts)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Resolve the qualified contract for a strike, using the caches. Also
    /// used by the monitor and snapshot services to re-derive contracts for
    /// trades restored from the store.
    pub async fn qualified_contract(
        &self,
        symbol: &str,
        strike: f64,
        expiration: NaiveDate,
    ) -> Result<Contract, BrokerError> {
        let key = (symbol.to_string(), expiration, strike_key(strike));
        if let Some(cached) = self.contract_cache.get(&key) {
            return Ok(cached);
        }

        let listing = self.strikes_for(symbol, expiration).await?;
        if !listing.strikes.iter().any(|&s| (s - strike).abs() < 1e-9) {
            return Err(BrokerError::InvalidContract(format!(
                "{symbol} {expiration} {strike}P not in listed strikes"
            )));
        }

        self.qualify_pacer.pace().await;
        let contract = self
            .broker
            .qualify_contract(&ContractSpec {
                symbol: symbol.to_string(),
                strike,
                expiration,
                trading_class: Some(listing.trading_class),
            })
            .await?;

        if !contract.is_listed() {
            return Err(BrokerError::InvalidContract(contract.label()));
        }

        self.contract_cache.insert(key, contract.clone());
        Ok(contract)
    }

    async fn strikes_for(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<StrikeListing, BrokerError> {
        let key = (symbol.to_string(), expiration);
        if let Some(cached) = self.chain_cache.get(&key) {
            return Ok(cached);
        }
        let listing = self.broker.strikes(symbol, expiration).await?;
        self.chain_cache.insert(key, listing.clone());
        Ok(listing)
    }

    async fn trend_for(&self, symbol: &str, price: f64) -> TrendDirection {
        let key = symbol.to_string();
        if let Some(cached) = self.trend_cache.get(&key) {
            return cached;
        }

        let trend = match self.broker.historical_daily(symbol, 60).await {
            Ok(bars) => {
                let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
                classify_trend(&closes, price)
            }
            Err(e) => {
                warn!(symbol, error = %e, "trend history fetch failed, assuming sideways");
                TrendDirection::Sideways
            }
        };

        self.trend_cache.insert(key, trend);
        trend
    }
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("validation", &self.validation.is_some())
            .field("chain_cache", &self.chain_cache)
            .field("contract_cache", &self.contract_cache)
            .finish()
    }
}
