// =============================================================================
// Market Context — index levels, volatility regime, sector mapping
// =============================================================================
//
// Captures the broad-market backdrop stamped onto every entry snapshot:
// SPY/QQQ/IWM levels, VIX, the volatility regime bucket, a market regime
// classification, and the candidate's sector ETF performance.
//
// Every field is optional: a failed index fetch degrades snapshot quality
// but never blocks a trade.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::api::Broker;
use crate::indicators::sma::latest_sma;
use crate::types::{MarketRegime, VolRegime};

/// Static symbol -> (sector, sector ETF) table. The screener's sector field
/// overrides this when present; unknown symbols simply skip sector checks.
const SECTOR_TABLE: &[(&str, &str, &str)] = &[
    ("AAPL", "Technology", "XLK"),
    ("MSFT", "Technology", "XLK"),
    ("NVDA", "Technology", "XLK"),
    ("AMD", "Technology", "XLK"),
    ("AVGO", "Technology", "XLK"),
    ("CRM", "Technology", "XLK"),
    ("ORCL", "Technology", "XLK"),
    ("GOOGL", "Communication Services", "XLC"),
    ("META", "Communication Services", "XLC"),
    ("NFLX", "Communication Services", "XLC"),
    ("DIS", "Communication Services", "XLC"),
    ("AMZN", "Consumer Discretionary", "XLY"),
    ("TSLA", "Consumer Discretionary", "XLY"),
    ("HD", "Consumer Discretionary", "XLY"),
    ("MCD", "Consumer Discretionary", "XLY"),
    ("NKE", "Consumer Discretionary", "XLY"),
    ("JPM", "Financials", "XLF"),
    ("BAC", "Financials", "XLF"),
    ("GS", "Financials", "XLF"),
    ("WFC", "Financials", "XLF"),
    ("V", "Financials", "XLF"),
    ("UNH", "Health Care", "XLV"),
    ("JNJ", "Health Care", "XLV"),
    ("PFE", "Health Care", "XLV"),
    ("LLY", "Health Care", "XLV"),
    ("XOM", "Energy", "XLE"),
    ("CVX", "Energy", "XLE"),
    ("COP", "Energy", "XLE"),
    ("BA", "Industrials", "XLI"),
    ("CAT", "Industrials", "XLI"),
    ("UPS", "Industrials", "XLI"),
    ("PG", "Consumer Staples", "XLP"),
    ("KO", "Consumer Staples", "XLP"),
    ("WMT", "Consumer Staples", "XLP"),
    ("COST", "Consumer Staples", "XLP"),
    ("NEE", "Utilities", "XLU"),
    ("LIN", "Materials", "XLB"),
    ("AMT", "Real Estate", "XLRE"),
];

/// Look up a symbol's sector and sector ETF.
pub fn sector_for(symbol: &str) -> Option<(&'static str, &'static str)> {
    let upper = symbol.to_uppercase();
    SECTOR_TABLE
        .iter()
        .find(|(sym, _, _)| *sym == upper)
        .map(|&(_, sector, etf)| (sector, etf))
}

/// VIX level -> volatility regime bucket.
pub fn classify_vol_regime(vix: f64) -> VolRegime {
    if vix < 15.0 {
        VolRegime::Low
    } else if vix < 20.0 {
        VolRegime::Normal
    } else if vix < 30.0 {
        VolRegime::Elevated
    } else {
        VolRegime::Extreme
    }
}

/// Market regime from SPY's position against its moving averages and VIX.
/// Extreme VIX dominates everything else.
pub fn classify_market_regime(
    spy: f64,
    spy_sma_20: Option<f64>,
    spy_sma_50: Option<f64>,
    vix: f64,
) -> MarketRegime {
    if vix >= 30.0 {
        return MarketRegime::Volatile;
    }
    match (spy_sma_20, spy_sma_50) {
        (Some(s20), Some(s50)) => {
            if spy > s20 && spy > s50 {
                MarketRegime::Bullish
            } else if spy < s20 && spy < s50 {
                MarketRegime::Bearish
            } else {
                MarketRegime::Neutral
            }
        }
        _ => MarketRegime::Neutral,
    }
}

/// The broad-market backdrop at a moment in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketContext {
    pub spy: Option<f64>,
    pub spy_change_pct: Option<f64>,
    pub vix: Option<f64>,
    pub vix_change_pct: Option<f64>,
    pub qqq: Option<f64>,
    pub iwm: Option<f64>,
    pub sector: Option<String>,
    pub sector_etf: Option<String>,
    pub sector_change_1d: Option<f64>,
    pub sector_change_5d: Option<f64>,
    pub vol_regime: Option<VolRegime>,
    pub market_regime: Option<MarketRegime>,
}

/// Fetches and classifies market context through the shared broker handle.
pub struct MarketContextService {
    broker: Arc<dyn Broker>,
}

impl MarketContextService {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Capture the full market backdrop for `symbol`. Individual fetch
    /// failures are logged and leave their fields empty.
    pub async fn capture(&self, symbol: &str) -> MarketContext {
        let mut ctx = MarketContext::default();

        // -- index levels ----------------------------------------------------
        let (spy, spy_change) = self.quote_with_change("SPY").await;
        ctx.spy = spy;
        ctx.spy_change_pct = spy_change;

        let (vix, vix_change) = self.quote_with_change("VIX").await;
        ctx.vix = vix;
        ctx.vix_change_pct = vix_change;

        ctx.qqq = self.last_price("QQQ").await;
        ctx.iwm = self.last_price("IWM").await;

        // -- regimes ---------------------------------------------------------
        if let Some(vix_level) = ctx.vix {
            ctx.vol_regime = Some(classify_vol_regime(vix_level));
        }
        if let (Some(spy_level), Some(vix_level)) = (ctx.spy, ctx.vix) {
            let closes = self.daily_closes("SPY", 60).await;
            let sma_20 = latest_sma(&closes, 20);
            let sma_50 = latest_sma(&closes, 50);
            ctx.market_regime = Some(classify_market_regime(
                spy_level, sma_20, sma_50, vix_level,
            ));
        }

        // -- sector ----------------------------------------------------------
        if let Some((sector, etf)) = sector_for(symbol) {
            ctx.sector = Some(sector.to_string());
            ctx.sector_etf = Some(etf.to_string());

            let closes = self.daily_closes(etf, 10).await;
            if closes.len() >= 2 {
                let last = closes[closes.len() - 1];
                let prev = closes[closes.len() - 2];
                if prev > 0.0 {
                    ctx.sector_change_1d = Some((last - prev) / prev * 100.0);
                }
            }
            if closes.len() >= 6 {
                let last = closes[closes.len() - 1];
                let week_ago = closes[closes.len() - 6];
                if week_ago > 0.0 {
                    ctx.sector_change_5d = Some((last - week_ago) / week_ago * 100.0);
                }
            }
        } else {
            debug!(symbol, "no sector mapping for symbol");
        }

        ctx
    }

    async fn last_price(&self, symbol: &str) -> Option<f64> {
        match self.broker.stock_quote(symbol).await {
            Ok(q) => Some(q.last),
            Err(e) => {
                warn!(symbol, error = %e, "index quote fetch failed");
                None
            }
        }
    }

    /// Latest price plus the change from the prior daily close.
    async fn quote_with_change(&self, symbol: &str) -> (Option<f64>, Option<f64>) {
        let last = self.last_price(symbol).await;
        let Some(last) = last else {
            return (None, None);
        };

        let closes = self.daily_closes(symbol, 5).await;
        let change = closes
            .iter()
            .rev()
            .nth(1)
            .filter(|&&prev| prev > 0.0)
            .map(|&prev| (last - prev) / prev * 100.0);

        (Some(last), change)
    }

    async fn daily_closes(&self, symbol: &str, days: u32) -> Vec<f64> {
        match self.broker.historical_daily(symbol, days).await {
            Ok(bars) => bars.iter().map(|b| b.close).collect(),
            Err(e) => {
                warn!(symbol, error = %e, "historical fetch failed");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for MarketContextService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketContextService").finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vol_regime_buckets() {
        assert_eq!(classify_vol_regime(12.0), VolRegime::Low);
        assert_eq!(classify_vol_regime(15.0), VolRegime::Normal);
        assert_eq!(classify_vol_regime(19.9), VolRegime::Normal);
        assert_eq!(classify_vol_regime(25.0), VolRegime::Elevated);
        assert_eq!(classify_vol_regime(30.0), VolRegime::Extreme);
        assert_eq!(classify_vol_regime(80.0), VolRegime::Extreme);
    }

    #[test]
    fn market_regime_classification() {
        // Above both SMAs, calm VIX -> bullish.
        assert_eq!(
            classify_market_regime(500.0, Some(490.0), Some(480.0), 14.0),
            MarketRegime::Bullish
        );
        // Below both -> bearish.
        assert_eq!(
            classify_market_regime(470.0, Some(490.0), Some(480.0), 14.0),
            MarketRegime::Bearish
        );
        // Mixed -> neutral.
        assert_eq!(
            classify_market_regime(485.0, Some(490.0), Some(480.0), 14.0),
            MarketRegime::Neutral
        );
        // Extreme VIX dominates.
        assert_eq!(
            classify_market_regime(500.0, Some(490.0), Some(480.0), 35.0),
            MarketRegime::Volatile
        );
        // Missing SMAs -> neutral.
        assert_eq!(
            classify_market_regime(500.0, None, None, 14.0),
            MarketRegime::Neutral
        );
    }

    #[test]
    fn sector_lookup() {
        assert_eq!(sector_for("AAPL"), Some(("Technology", "XLK")));
        assert_eq!(sector_for("aapl"), Some(("Technology", "XLK")));
        assert_eq!(sector_for("XOM"), Some(("Energy", "XLE")));
        assert_eq!(sector_for("ZZZZ"), None);
    }

    #[tokio::test]
    async fn capture_degrades_gracefully_without_data() {
        use crate::broker::scripted::ScriptedBroker;

        let broker = Arc::new(ScriptedBroker::new());
        // Only SPY staged; VIX/QQQ/IWM fetches fail.
        broker.set_stock_quote("SPY", 499.0, 501.0, 500.0);

        let svc = MarketContextService::new(broker);
        let ctx = svc.capture("AAPL").await;
        assert_eq!(ctx.spy, Some(500.0));
        assert_eq!(ctx.vix, None);
        assert_eq!(ctx.vol_regime, None);
        // Sector mapping is static and still resolves.
        assert_eq!(ctx.sector.as_deref(), Some("Technology"));
        assert_eq!(ctx.sector_etf.as_deref(), Some("XLK"));
    }
}
