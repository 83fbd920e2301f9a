// =============================================================================
// Snapshot Data Model — per-trade learning dataset records
// =============================================================================
//
// Three record kinds per trade: one entry snapshot at fill, one position
// snapshot per trading day, one exit snapshot at close. The shared design
// rule across all three capture services: SNAPSHOT FAILURES NEVER
// PROPAGATE. They log and drop; the trading operation succeeds regardless.
//
// `data_quality_score` is the fraction of populated fields;
// `critical_field_count` counts the eight fields that carry most of the
// predictive power (delta, iv, iv_rank, vix, dte, trend_direction,
// days_to_earnings, margin_efficiency_pct).

pub mod entry;
pub mod exit;
pub mod position;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    EarningsTiming, ExitReason, MarketRegime, OpportunitySource, TrendDirection, VolRegime,
};

pub use entry::EntrySnapshotService;
pub use exit::ExitSnapshotService;
pub use position::PositionSnapshotService;

/// Number of critical fields (the denominator of `critical_field_count`).
pub const CRITICAL_FIELD_TOTAL: u32 = 8;

/// Truncate a timestamp to whole seconds so persisted snapshots read back
/// field-equal.
pub fn whole_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::Timelike;
    ts.with_nanosecond(0).unwrap_or(ts)
}

// =============================================================================
// EntrySnapshot
// =============================================================================

/// Everything known about a trade at the moment it filled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    /// Store row id once persisted.
    pub id: Option<i64>,
    pub trade_id: i64,
    pub symbol: String,
    pub strike: f64,
    pub expiration: Option<NaiveDate>,
    pub contracts: u32,

    // -- option pricing & greeks ---------------------------------------------
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub mid: Option<f64>,
    pub entry_premium: Option<f64>,
    pub spread_pct: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,

    // -- volatility ----------------------------------------------------------
    pub iv: Option<f64>,
    pub iv_rank: Option<f64>,
    pub iv_percentile: Option<f64>,
    pub hv_20: Option<f64>,
    pub iv_hv_ratio: Option<f64>,

    // -- liquidity -----------------------------------------------------------
    pub option_volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub volume_oi_ratio: Option<f64>,

    // -- underlying ----------------------------------------------------------
    pub stock_price: Option<f64>,
    pub stock_open: Option<f64>,
    pub stock_high: Option<f64>,
    pub stock_low: Option<f64>,
    pub prev_close: Option<f64>,
    pub stock_change_pct: Option<f64>,

    // -- computed ------------------------------------------------------------
    pub otm_pct: Option<f64>,
    pub otm_dollars: Option<f64>,
    pub dte: Option<i64>,
    pub margin_requirement: Option<f64>,
    pub margin_efficiency_pct: Option<f64>,

    // -- trend ---------------------------------------------------------------
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub trend_direction: Option<TrendDirection>,
    pub trend_strength: Option<f64>,
    pub price_vs_sma20_pct: Option<f64>,
    pub price_vs_sma50_pct: Option<f64>,

    // -- market --------------------------------------------------------------
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

    // -- calendar ------------------------------------------------------------
    /// 0 = Monday .. 6 = Sunday.
    pub day_of_week: Option<u32>,
    pub is_opex_week: Option<bool>,
    pub days_to_fomc: Option<i64>,

    // -- events --------------------------------------------------------------
    pub earnings_date: Option<NaiveDate>,
    pub days_to_earnings: Option<i64>,
    /// Earnings land inside the trade's DTE window.
    pub earnings_in_dte: Option<bool>,
    pub earnings_timing: Option<EarningsTiming>,

    // -- technicals ----------------------------------------------------------
    pub rsi_14: Option<f64>,
    pub rsi_7: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub adx: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
    pub atr_14: Option<f64>,
    pub atr_pct: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_position: Option<f64>,
    pub support_1: Option<f64>,
    pub support_2: Option<f64>,
    pub resistance_1: Option<f64>,
    pub resistance_2: Option<f64>,
    pub distance_to_support_pct: Option<f64>,

    // -- metadata ------------------------------------------------------------
    pub captured_at: Option<DateTime<Utc>>,
    pub data_quality_score: f64,
    pub critical_field_count: u32,
    pub source: Option<OpportunitySource>,
}

impl EntrySnapshot {
    /// Recompute `data_quality_score` and `critical_field_count` from the
    /// populated fields. Call after capture, before persisting.
    pub fn score_quality(&mut self) {
        let flags = self.populated_flags();
        let populated = flags.iter().filter(|&&p| p).count();
        self.data_quality_score = populated as f64 / flags.len() as f64;

        let criticals = [
            self.delta.is_some(),
            self.iv.is_some(),
            self.iv_rank.is_some(),
            self.vix.is_some(),
            self.dte.is_some(),
            self.trend_direction.is_some(),
            self.days_to_earnings.is_some(),
            self.margin_efficiency_pct.is_some(),
        ];
        self.critical_field_count = criticals.iter().filter(|&&p| p).count() as u32;
    }

    /// One entry per optional field, in declaration order.
    fn populated_flags(&self) -> Vec<bool> {
        vec![
            self.expiration.is_some(),
            self.bid.is_some(),
            self.ask.is_some(),
            self.mid.is_some(),
            self.entry_premium.is_some(),
            self.spread_pct.is_some(),
            self.delta.is_some(),
            self.gamma.is_some(),
            self.theta.is_some(),
            self.vega.is_some(),
            self.rho.is_some(),
            self.iv.is_some(),
            self.iv_rank.is_some(),
            self.iv_percentile.is_some(),
            self.hv_20.is_some(),
            self.iv_hv_ratio.is_some(),
            self.option_volume.is_some(),
            self.open_interest.is_some(),
            self.volume_oi_ratio.is_some(),
            self.stock_price.is_some(),
            self.stock_open.is_some(),
            self.stock_high.is_some(),
            self.stock_low.is_some(),
            self.prev_close.is_some(),
            self.stock_change_pct.is_some(),
            self.otm_pct.is_some(),
            self.otm_dollars.is_some(),
            self.dte.is_some(),
            self.margin_requirement.is_some(),
            self.margin_efficiency_pct.is_some(),
            self.sma_20.is_some(),
            self.sma_50.is_some(),
            self.trend_direction.is_some(),
            self.trend_strength.is_some(),
            self.price_vs_sma20_pct.is_some(),
            self.price_vs_sma50_pct.is_some(),
            self.spy.is_some(),
            self.spy_change_pct.is_some(),
            self.vix.is_some(),
            self.vix_change_pct.is_some(),
            self.qqq.is_some(),
            self.iwm.is_some(),
            self.sector.is_some(),
            self.sector_etf.is_some(),
            self.sector_change_1d.is_some(),
            self.sector_change_5d.is_some(),
            self.vol_regime.is_some(),
            self.market_regime.is_some(),
            self.day_of_week.is_some(),
            self.is_opex_week.is_some(),
            self.days_to_fomc.is_some(),
            self.earnings_date.is_some(),
            self.days_to_earnings.is_some(),
            self.earnings_in_dte.is_some(),
            self.earnings_timing.is_some(),
            self.rsi_14.is_some(),
            self.rsi_7.is_some(),
            self.macd.is_some(),
            self.macd_signal.is_some(),
            self.macd_histogram.is_some(),
            self.adx.is_some(),
            self.plus_di.is_some(),
            self.minus_di.is_some(),
            self.atr_14.is_some(),
            self.atr_pct.is_some(),
            self.bb_upper.is_some(),
            self.bb_lower.is_some(),
            self.bb_position.is_some(),
            self.support_1.is_some(),
            self.support_2.is_some(),
            self.resistance_1.is_some(),
            self.resistance_2.is_some(),
            self.distance_to_support_pct.is_some(),
            self.captured_at.is_some(),
            self.source.is_some(),
        ]
    }
}

// =============================================================================
// PositionSnapshot
// =============================================================================

/// One observation per open trade per trading day. Unique on
/// (trade_id, snapshot_date).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: Option<i64>,
    pub trade_id: i64,
    pub snapshot_date: NaiveDate,
    pub current_premium: Option<f64>,
    pub current_pnl: Option<f64>,
    pub current_pnl_pct: Option<f64>,
    pub dte_remaining: Option<i64>,
    pub delta: Option<f64>,
    pub theta: Option<f64>,
    pub gamma: Option<f64>,
    pub vega: Option<f64>,
    pub iv: Option<f64>,
    pub stock_price: Option<f64>,
    pub distance_to_strike_pct: Option<f64>,
    pub vix: Option<f64>,
    pub spy_price: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
    pub data_quality_score: f64,
}

impl PositionSnapshot {
    pub fn score_quality(&mut self) {
        let flags = [
            self.current_premium.is_some(),
            self.current_pnl.is_some(),
            self.current_pnl_pct.is_some(),
            self.dte_remaining.is_some(),
            self.delta.is_some(),
            self.theta.is_some(),
            self.gamma.is_some(),
            self.vega.is_some(),
            self.iv.is_some(),
            self.stock_price.is_some(),
            self.distance_to_strike_pct.is_some(),
            self.vix.is_some(),
            self.spy_price.is_some(),
            self.captured_at.is_some(),
        ];
        let populated = flags.iter().filter(|&&p| p).count();
        self.data_quality_score = populated as f64 / flags.len() as f64;
    }
}

// =============================================================================
// ExitSnapshot
// =============================================================================

/// Outcome record captured when an exit order fills.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitSnapshot {
    pub id: Option<i64>,
    pub trade_id: i64,

    // -- exit details --------------------------------------------------------
    pub exit_date: Option<NaiveDate>,
    pub exit_premium: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub days_held: Option<i64>,
    pub gross_profit: Option<f64>,
    pub net_profit: Option<f64>,
    /// P&L as a fraction of entry premium.
    pub roi_pct: Option<f64>,
    /// P&L as a fraction of margin held.
    pub roi_on_margin: Option<f64>,
    pub win: Option<bool>,
    /// Exit P&L% divided by the best unrealised P&L% seen during the trade
    /// (`max_profit_pct`); zero when the maximum never went positive.
    pub max_profit_captured_pct: Option<f64>,

    // -- context changes -----------------------------------------------------
    pub exit_iv: Option<f64>,
    pub iv_change_during_trade: Option<f64>,
    pub stock_change_during_trade_pct: Option<f64>,
    pub vix_change_during_trade: Option<f64>,

    // -- path stats (from daily position snapshots) --------------------------
    /// Minimum distance-to-strike observed, in percent (>= 0 when the
    /// strike never traded through).
    pub closest_to_strike_pct: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    /// Best unrealised P&L% observed during the trade.
    pub max_profit_pct: Option<f64>,

    // -- learning features ---------------------------------------------------
    pub trade_quality_score: Option<f64>,
    /// roi_pct / max_drawdown_pct, 0 when drawdown is 0.
    pub risk_adjusted_return: Option<f64>,

    pub captured_at: Option<DateTime<Utc>>,
    pub data_quality_score: f64,
}

impl ExitSnapshot {
    pub fn score_quality(&mut self) {
        let flags = [
            self.exit_date.is_some(),
            self.exit_premium.is_some(),
            self.exit_reason.is_some(),
            self.days_held.is_some(),
            self.gross_profit.is_some(),
            self.net_profit.is_some(),
            self.roi_pct.is_some(),
            self.roi_on_margin.is_some(),
            self.win.is_some(),
            self.max_profit_captured_pct.is_some(),
            self.exit_iv.is_some(),
            self.iv_change_during_trade.is_some(),
            self.stock_change_during_trade_pct.is_some(),
            self.vix_change_during_trade.is_some(),
            self.closest_to_strike_pct.is_some(),
            self.max_drawdown_pct.is_some(),
            self.max_profit_pct.is_some(),
            self.trade_quality_score.is_some(),
            self.risk_adjusted_return.is_some(),
            self.captured_at.is_some(),
        ];
        let populated = flags.iter().filter(|&&p| p).count();
        self.data_quality_score = populated as f64 / flags.len() as f64;
    }
}
