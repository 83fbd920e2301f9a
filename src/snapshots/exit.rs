// =============================================================================
// Exit Snapshot Service — outcome, context deltas, and path statistics
// =============================================================================
//
// Builds the exit record from three sources: the trade's entry snapshot
// (for during-trade deltas), its daily position snapshots (for path stats),
// and live quotes at exit time. The built snapshot is handed to
// `Store::close_trade`, which persists it atomically with the trade-row
// update.
// =============================================================================

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::broker::api::Broker;
use crate::positions::short_put_pnl;
use crate::snapshots::{whole_seconds, ExitSnapshot, PositionSnapshot};
use crate::store::{Store, Trade};
use crate::types::ExitReason;

/// Per-contract, per-side commission estimate used for net profit.
const COMMISSION_PER_CONTRACT: f64 = 0.65;

/// Path statistics reduced from the daily snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PathStats {
    pub closest_to_strike_pct: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    pub max_profit_pct: Option<f64>,
}

/// Reduce daily snapshots to path statistics.
///
/// `closest_to_strike_pct` and `max_drawdown_pct` are clamped at zero: a
/// strike traded through reads as distance 0, and a trade that was never
/// underwater has zero drawdown.
pub fn compute_path_stats(snapshots: &[PositionSnapshot]) -> PathStats {
    if snapshots.is_empty() {
        return PathStats::default();
    }

    let closest = snapshots
        .iter()
        .filter_map(|s| s.distance_to_strike_pct)
        .fold(None::<f64>, |acc, d| {
            Some(acc.map_or(d, |a| a.min(d)))
        })
        .map(|d| d.max(0.0));

    let pnl_pcts: Vec<f64> = snapshots.iter().filter_map(|s| s.current_pnl_pct).collect();
    let (max_drawdown, max_profit) = if pnl_pcts.is_empty() {
        (None, None)
    } else {
        let worst = pnl_pcts.iter().cloned().fold(f64::INFINITY, f64::min);
        let best = pnl_pcts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        (Some((-worst).max(0.0)), Some(best))
    };

    PathStats {
        closest_to_strike_pct: closest,
        max_drawdown_pct: max_drawdown,
        max_profit_pct: max_profit,
    }
}

/// Blend of risk/reward, capture efficiency, and time efficiency on [0, 1].
pub fn trade_quality_score(
    roi_pct: f64,
    max_drawdown_pct: f64,
    max_profit_captured: Option<f64>,
    days_held: i64,
    max_hold_days: i64,
) -> f64 {
    // Risk vs. reward: 0.5 is neutral, scaled by how roi compares to the
    // pain endured getting it.
    let risk_reward = if max_drawdown_pct <= 0.0 {
        if roi_pct > 0.0 {
            1.0
        } else {
            0.5
        }
    } else {
        (0.5 + 0.5 * (roi_pct / (roi_pct.abs() + max_drawdown_pct))).clamp(0.0, 1.0)
    };

    // How much of the best available profit the exit captured.
    let capture = max_profit_captured.map_or(0.5, |c| c.clamp(0.0, 1.0));

    // Capital efficiency: quicker resolutions score higher.
    let time = if max_hold_days <= 0 {
        0.5
    } else {
        (1.0 - days_held as f64 / max_hold_days as f64).clamp(0.0, 1.0)
    };

    (0.4 * risk_reward + 0.4 * capture + 0.2 * time).clamp(0.0, 1.0)
}

pub struct ExitSnapshotService {
    broker: Arc<dyn Broker>,
    store: Arc<Store>,
}

impl ExitSnapshotService {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<Store>) -> Self {
        Self { broker, store }
    }

    /// Build the exit snapshot for a filled exit. Every data source is
    /// optional; what cannot be read simply stays empty.
    pub async fn build(
        &self,
        trade: &Trade,
        exit_premium: f64,
        exit_reason: ExitReason,
        exit_date: NaiveDate,
        exit_iv: Option<f64>,
    ) -> ExitSnapshot {
        let mut snap = ExitSnapshot {
            trade_id: trade.id,
            exit_date: Some(exit_date),
            exit_premium: Some(exit_premium),
            exit_reason: Some(exit_reason),
            captured_at: Some(whole_seconds(Utc::now())),
            ..ExitSnapshot::default()
        };

        snap.days_held = Some((exit_date - trade.entry_date).num_days().max(0));

        let gross = short_put_pnl(trade.entry_premium, exit_premium, trade.contracts);
        snap.gross_profit = Some(gross);
        // Round trip commissions.
        snap.net_profit = Some(gross - 2.0 * COMMISSION_PER_CONTRACT * trade.contracts as f64);
        snap.win = Some(gross > 0.0);

        if trade.entry_premium > 0.0 {
            snap.roi_pct = Some((trade.entry_premium - exit_premium) / trade.entry_premium);
        }

        // -- entry snapshot deltas -------------------------------------------
        let entry = match self.store.entry_snapshot(trade.id) {
            Ok(e) => e,
            Err(e) => {
                warn!(trade_id = trade.id, error = %e, "entry snapshot read failed");
                None
            }
        };

        snap.exit_iv = exit_iv;
        if let Some(entry) = &entry {
            if let (Some(entry_iv), Some(exit_iv)) = (entry.iv, exit_iv) {
                snap.iv_change_during_trade = Some(exit_iv - entry_iv);
            }
            if let Some(margin) = entry.margin_requirement {
                let total_margin = margin * trade.contracts as f64;
                if total_margin > 0.0 {
                    snap.roi_on_margin = Some(gross / total_margin);
                }
            }

            if let Some(entry_stock) = entry.stock_price {
                if let Ok(stock) = self.broker.stock_quote(&trade.symbol).await {
                    if entry_stock > 0.0 {
                        snap.stock_change_during_trade_pct =
                            Some((stock.last - entry_stock) / entry_stock * 100.0);
                    }
                }
            }
            if let Some(entry_vix) = entry.vix {
                if let Ok(vix) = self.broker.stock_quote("VIX").await {
                    snap.vix_change_during_trade = Some(vix.last - entry_vix);
                }
            }
        }

        // -- path stats ------------------------------------------------------
        let daily = self.store.position_snapshots(trade.id).unwrap_or_default();
        let path = compute_path_stats(&daily);
        snap.closest_to_strike_pct = path.closest_to_strike_pct;
        snap.max_drawdown_pct = path.max_drawdown_pct;
        snap.max_profit_pct = path.max_profit_pct;

        if let (Some(roi), Some(max_profit)) = (snap.roi_pct, path.max_profit_pct) {
            snap.max_profit_captured_pct = if max_profit > 0.0 {
                Some((roi / max_profit).max(0.0))
            } else {
                Some(0.0)
            };
        }

        // -- learning features -----------------------------------------------
        if let (Some(roi), Some(dd)) = (snap.roi_pct, snap.max_drawdown_pct) {
            snap.risk_adjusted_return = Some(if dd > 0.0 { roi / dd } else { 0.0 });

            let max_hold = entry.as_ref().and_then(|e| e.dte).unwrap_or(14);
            snap.trade_quality_score = Some(trade_quality_score(
                roi,
                dd,
                snap.max_profit_captured_pct,
                snap.days_held.unwrap_or(0),
                max_hold,
            ));
        }

        snap.score_quality();
        info!(
            trade_id = trade.id,
            reason = %exit_reason,
            gross_profit = gross,
            quality = snap.trade_quality_score.unwrap_or(0.0),
            "exit snapshot built"
        );
        snap
    }
}

impl std::fmt::Debug for ExitSnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitSnapshotService").finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::scripted::ScriptedBroker;
    use crate::snapshots::EntrySnapshot;
    use crate::store::NewTrade;
    use crate::types::OpportunitySource;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn daily(trade_id: i64, date: NaiveDate, pnl_pct: f64, dist: f64) -> PositionSnapshot {
        let mut s = PositionSnapshot::default();
        s.trade_id = trade_id;
        s.snapshot_date = date;
        s.current_pnl_pct = Some(pnl_pct);
        s.distance_to_strike_pct = Some(dist);
        s
    }

    #[test]
    fn path_stats_reduce_min_and_extremes() {
        let snaps = vec![
            daily(1, d(2025, 8, 5), 0.10, 5.0),
            daily(1, d(2025, 8, 6), -0.40, 1.5),
            daily(1, d(2025, 8, 7), 0.35, 3.0),
        ];
        let path = compute_path_stats(&snaps);
        assert_eq!(path.closest_to_strike_pct, Some(1.5));
        assert_eq!(path.max_drawdown_pct, Some(0.40));
        assert_eq!(path.max_profit_pct, Some(0.35));
    }

    #[test]
    fn path_stats_clamp_at_zero() {
        // Strike traded through (negative distance), never underwater.
        let snaps = vec![
            daily(1, d(2025, 8, 5), 0.10, -2.0),
            daily(1, d(2025, 8, 6), 0.30, 4.0),
        ];
        let path = compute_path_stats(&snaps);
        assert_eq!(path.closest_to_strike_pct, Some(0.0));
        assert_eq!(path.max_drawdown_pct, Some(0.0));
    }

    #[test]
    fn path_stats_empty() {
        assert_eq!(compute_path_stats(&[]), PathStats::default());
    }

    #[test]
    fn quality_score_rewards_clean_trades() {
        // Full profit, no drawdown, quick exit.
        let clean = trade_quality_score(0.5, 0.0, Some(1.0), 3, 14);
        // Deep drawdown, gave back most of the peak, held to the end.
        let ugly = trade_quality_score(-2.0, 2.5, Some(0.0), 14, 14);
        assert!(clean > 0.85, "clean {clean}");
        assert!(ugly < 0.25, "ugly {ugly}");
        assert!((0.0..=1.0).contains(&clean));
        assert!((0.0..=1.0).contains(&ugly));
    }

    #[tokio::test]
    async fn build_composes_outcome_deltas_and_path() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_stock_quote("AAPL", 224.0, 226.0, 225.0);
        broker.set_stock_quote("VIX", 19.0, 19.4, 19.2);

        let store = Arc::new(Store::open_in_memory().unwrap());
        let trade_id = store
            .insert_trade(&NewTrade {
                symbol: "AAPL".into(),
                strike: 185.0,
                expiration: d(2025, 8, 15),
                contracts: 5,
                entry_premium: 0.40,
                entry_date: d(2025, 8, 4),
                data_source: OpportunitySource::Screener,
            })
            .unwrap();

        // Entry snapshot with iv/vix/stock/margin for the deltas.
        let mut entry = EntrySnapshot::default();
        entry.trade_id = trade_id;
        entry.symbol = "AAPL".into();
        entry.iv = Some(0.32);
        entry.vix = Some(17.0);
        entry.stock_price = Some(220.0);
        entry.margin_requirement = Some(2_000.0);
        entry.dte = Some(11);
        entry.score_quality();
        store.set_entry_snapshot(&entry).unwrap();

        // Two daily snapshots.
        store
            .insert_position_snapshot(&daily(trade_id, d(2025, 8, 5), -0.20, 4.0))
            .unwrap();
        store
            .insert_position_snapshot(&daily(trade_id, d(2025, 8, 6), 0.30, 6.0))
            .unwrap();

        let trade = store.get_trade(trade_id).unwrap().unwrap();
        let service = ExitSnapshotService::new(broker, store);
        let snap = service
            .build(&trade, 0.20, ExitReason::ProfitTarget, d(2025, 8, 8), Some(0.26))
            .await;

        assert_eq!(snap.days_held, Some(4));
        assert!((snap.gross_profit.unwrap() - 100.0).abs() < 1e-9);
        assert!((snap.net_profit.unwrap() - (100.0 - 6.5)).abs() < 1e-9);
        assert!((snap.roi_pct.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(snap.win, Some(true));

        // Deltas against entry.
        assert!((snap.iv_change_during_trade.unwrap() - (0.26 - 0.32)).abs() < 1e-12);
        assert!((snap.vix_change_during_trade.unwrap() - (19.2 - 17.0)).abs() < 1e-9);
        assert!(
            (snap.stock_change_during_trade_pct.unwrap() - (5.0 / 220.0 * 100.0)).abs() < 1e-9
        );
        assert!((snap.roi_on_margin.unwrap() - 100.0 / 10_000.0).abs() < 1e-12);

        // Path.
        assert_eq!(snap.closest_to_strike_pct, Some(4.0));
        assert_eq!(snap.max_drawdown_pct, Some(0.20));
        assert_eq!(snap.max_profit_pct, Some(0.30));
        // Exit (0.5) beat the best daily observation (0.3).
        assert!(snap.max_profit_captured_pct.unwrap() > 1.0);

        assert!(snap.trade_quality_score.is_some());
        assert!(snap.risk_adjusted_return.unwrap() > 0.0);
        assert!(snap.data_quality_score > 0.8);
    }

    #[tokio::test]
    async fn invariants_hold_with_at_least_one_daily_snapshot() {
        let broker = Arc::new(ScriptedBroker::new());
        let store = Arc::new(Store::open_in_memory().unwrap());
        let trade_id = store
            .insert_trade(&NewTrade {
                symbol: "AAPL".into(),
                strike: 185.0,
                expiration: d(2025, 8, 15),
                contracts: 1,
                entry_premium: 0.40,
                entry_date: d(2025, 8, 4),
                data_source: OpportunitySource::Screener,
            })
            .unwrap();
        store
            .insert_position_snapshot(&daily(trade_id, d(2025, 8, 5), -1.2, -0.5))
            .unwrap();

        let trade = store.get_trade(trade_id).unwrap().unwrap();
        let service = ExitSnapshotService::new(broker, store);
        let snap = service
            .build(&trade, 1.20, ExitReason::StopLoss, d(2025, 8, 6), None)
            .await;

        // Both path stats are clamped non-negative.
        assert!(snap.max_drawdown_pct.unwrap() >= 0.0);
        assert!(snap.closest_to_strike_pct.unwrap() >= 0.0);
        assert_eq!(snap.win, Some(false));
    }
}
