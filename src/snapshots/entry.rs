// =============================================================================
// Entry Snapshot Service — capture everything knowable at the fill
// =============================================================================
//
// Gathers option greeks, underlying history and technicals, market context,
// calendar flags, and event data into one EntrySnapshot. Every fetch is
// individually fallible: a missing piece leaves its field empty and lowers
// the quality score, nothing more. Only the final store insert can error,
// and the executor swallows even that — a trade never fails on its
// snapshot.
// =============================================================================

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{debug, info, warn};

use crate::broker::api::{Bar, Broker};
use crate::calendar::MarketCalendar;
use crate::indicators::{adx, atr, bollinger, levels, macd, rsi, sma};
use crate::market_context::MarketContextService;
use crate::opportunity::Opportunity;
use crate::snapshots::{whole_seconds, EntrySnapshot};
use crate::store::Store;
use crate::types::TrendDirection;

/// Trading days of history fetched for technicals (enough for SMA-50 plus
/// a 52-week volatility lookback would be 252; we pull one year).
const HISTORY_DAYS: u32 = 252;

pub struct EntrySnapshotService {
    broker: Arc<dyn Broker>,
    store: Arc<Store>,
    market: MarketContextService,
    calendar: MarketCalendar,
}

impl EntrySnapshotService {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<Store>) -> Self {
        Self {
            market: MarketContextService::new(broker.clone()),
            broker,
            store,
            calendar: MarketCalendar::new(),
        }
    }

    /// Capture and persist the entry snapshot for a freshly filled trade.
    /// Returns the snapshot row id.
    pub async fn capture(
        &self,
        trade_id: i64,
        opp: &Opportunity,
        fill_price: f64,
        contracts: u32,
    ) -> anyhow::Result<i64> {
        let mut snap = EntrySnapshot {
            trade_id,
            symbol: opp.symbol.clone(),
            strike: opp.strike,
            expiration: Some(opp.expiration),
            contracts,
            ..EntrySnapshot::default()
        };

        let today = self.calendar.today();

        // -- straight from the enriched opportunity --------------------------
        snap.bid = opp.bid;
        snap.ask = opp.ask;
        snap.mid = opp.mid;
        snap.entry_premium = Some(fill_price);
        snap.spread_pct = opp.spread_pct;
        snap.stock_price = opp.stock_price;
        snap.option_volume = opp.option_volume;
        snap.open_interest = opp.open_interest;
        snap.volume_oi_ratio = match (opp.option_volume, opp.open_interest) {
            (Some(v), Some(oi)) if oi > 0.0 => Some(v / oi),
            _ => None,
        };
        snap.otm_pct = opp.otm_pct;
        snap.otm_dollars = opp.stock_price.map(|s| s - opp.strike);
        snap.dte = opp.dte;
        snap.margin_requirement = opp.margin_requirement;
        snap.margin_efficiency_pct = opp.margin_efficiency_pct;
        snap.trend_direction = opp.trend;
        snap.source = Some(opp.source);

        // -- live greeks -----------------------------------------------------
        if let Some(contract) = &opp.contract {
            match self.broker.option_quote(contract).await {
                Ok(quote) => {
                    if let Some(g) = quote.greeks {
                        snap.delta = Some(g.delta);
                        snap.gamma = Some(g.gamma);
                        snap.theta = Some(g.theta);
                        snap.vega = Some(g.vega);
                        snap.rho = Some(g.rho);
                        snap.iv = Some(g.implied_vol);
                    }
                }
                Err(e) => warn!(trade_id, error = %e, "greeks fetch failed"),
            }
        }

        // -- underlying history & technicals ---------------------------------
        match self.broker.historical_daily(&opp.symbol, HISTORY_DAYS).await {
            Ok(bars) => self.fill_technicals(&mut snap, &bars),
            Err(e) => warn!(trade_id, symbol = %opp.symbol, error = %e, "history fetch failed"),
        }

        // -- market context --------------------------------------------------
        let ctx = self.market.capture(&opp.symbol).await;
        snap.spy = ctx.spy;
        snap.spy_change_pct = ctx.spy_change_pct;
        snap.vix = ctx.vix;
        snap.vix_change_pct = ctx.vix_change_pct;
        snap.qqq = ctx.qqq;
        snap.iwm = ctx.iwm;
        snap.sector = opp.sector.clone().or(ctx.sector);
        snap.sector_etf = ctx.sector_etf;
        snap.sector_change_1d = ctx.sector_change_1d;
        snap.sector_change_5d = ctx.sector_change_5d;
        snap.vol_regime = ctx.vol_regime;
        snap.market_regime = ctx.market_regime;

        // -- calendar --------------------------------------------------------
        snap.day_of_week = Some(today.weekday().num_days_from_monday());
        snap.is_opex_week = Some(self.calendar.is_opex_week(today));
        snap.days_to_fomc = self.calendar.days_to_fomc(today);

        // -- events (only when the candidate carried them) -------------------
        snap.earnings_date = opp.earnings_date;
        snap.days_to_earnings = opp.earnings_date.map(|d| (d - today).num_days());
        snap.earnings_in_dte = opp.earnings_date.map(|d| d <= opp.expiration && d >= today);
        snap.earnings_timing = opp.earnings_timing;

        snap.captured_at = Some(whole_seconds(Utc::now()));
        snap.score_quality();

        let id = self.store.set_entry_snapshot(&snap)?;
        info!(
            trade_id,
            snapshot_id = id,
            quality = format!("{:.2}", snap.data_quality_score),
            criticals = snap.critical_field_count,
            "entry snapshot captured"
        );
        Ok(id)
    }

    /// Derive all history-based fields from daily bars.
    fn fill_technicals(&self, snap: &mut EntrySnapshot, bars: &[Bar]) {
        if bars.is_empty() {
            return;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let last = bars[bars.len() - 1].clone();
        let spot = snap.stock_price.unwrap_or(last.close);

        snap.stock_open = Some(last.open);
        snap.stock_high = Some(last.high);
        snap.stock_low = Some(last.low);
        if bars.len() >= 2 {
            let prev = bars[bars.len() - 2].close;
            snap.prev_close = Some(prev);
            if prev > 0.0 {
                snap.stock_change_pct = Some((last.close - prev) / prev * 100.0);
            }
        }

        snap.sma_20 = sma::latest_sma(&closes, 20);
        snap.sma_50 = sma::latest_sma(&closes, 50);
        snap.price_vs_sma20_pct = snap.sma_20.and_then(|s| sma::price_vs_sma_pct(spot, s));
        snap.price_vs_sma50_pct = snap.sma_50.and_then(|s| sma::price_vs_sma_pct(spot, s));
        snap.trend_strength = snap.price_vs_sma50_pct.map(|p| p.abs());
        if snap.trend_direction.is_none() {
            snap.trend_direction = Some(classify(&closes, spot));
        }

        snap.rsi_14 = rsi::latest_rsi(&closes, 14);
        snap.rsi_7 = rsi::latest_rsi(&closes, 7);

        if let Some(m) = macd::latest_macd(&closes) {
            snap.macd = Some(m.macd);
            snap.macd_signal = Some(m.signal);
            snap.macd_histogram = Some(m.histogram);
        }

        if let Some(a) = adx::calculate_adx(bars, 14) {
            snap.adx = Some(a.adx);
            snap.plus_di = Some(a.plus_di);
            snap.minus_di = Some(a.minus_di);
        }

        snap.atr_14 = atr::calculate_atr(bars, 14);
        snap.atr_pct = atr::calculate_atr_pct(bars, 14);

        if let Some(bb) = bollinger::calculate_bollinger(&closes, 20, 2.0) {
            snap.bb_upper = Some(bb.upper);
            snap.bb_lower = Some(bb.lower);
            snap.bb_position = Some(bb.position);
        }

        let lv = levels::detect_levels(bars, spot);
        snap.support_1 = lv.support_1;
        snap.support_2 = lv.support_2;
        snap.resistance_1 = lv.resistance_1;
        snap.resistance_2 = lv.resistance_2;
        snap.distance_to_support_pct = lv.distance_to_support_pct(spot);

        // Historical volatility and the IV's place in the year's range.
        snap.hv_20 = hv_from_closes(&closes, 20);
        if let Some(iv) = snap.iv {
            snap.iv_hv_ratio = snap.hv_20.filter(|&hv| hv > 0.0).map(|hv| iv * 100.0 / hv);
            let series = rolling_hv_series(&closes, 20);
            snap.iv_rank = iv_rank_in_range(iv * 100.0, &series);
            snap.iv_percentile = iv_percentile_in_series(iv * 100.0, &series);
        }

        debug!(symbol = %snap.symbol, bars = bars.len(), "technicals filled");
    }
}

fn classify(closes: &[f64], spot: f64) -> TrendDirection {
    crate::enrich::classify_trend(closes, spot)
}

/// Annualised close-to-close historical volatility over the trailing
/// `period` days, in percent.
fn hv_from_closes(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    let window = &closes[closes.len() - period - 1..];
    let returns: Vec<f64> = window
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let hv = var.sqrt() * (252.0_f64).sqrt() * 100.0;
    hv.is_finite().then_some(hv)
}

/// Rolling 20-day HV samples across the whole history, used as the proxy
/// range for IV rank/percentile.
fn rolling_hv_series(closes: &[f64], period: usize) -> Vec<f64> {
    if closes.len() < period + 1 {
        return Vec::new();
    }
    (period + 1..=closes.len())
        .step_by(5)
        .filter_map(|end| hv_from_closes(&closes[..end], period))
        .collect()
}

/// Where `iv` (percent) sits in the series' min..max range, 0-100.
fn iv_rank_in_range(iv: f64, series: &[f64]) -> Option<f64> {
    let (min, max) = series
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || max <= min {
        return None;
    }
    Some(((iv - min) / (max - min) * 100.0).clamp(0.0, 100.0))
}

/// Fraction of the series below `iv`, 0-100.
fn iv_percentile_in_series(iv: f64, series: &[f64]) -> Option<f64> {
    if series.is_empty() {
        return None;
    }
    let below = series.iter().filter(|&&v| v < iv).count();
    Some(below as f64 / series.len() as f64 * 100.0)
}

impl std::fmt::Debug for EntrySnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntrySnapshotService").finish()
    }
}
