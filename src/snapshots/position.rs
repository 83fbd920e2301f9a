// =============================================================================
// Position Snapshot Service — one record per open trade per trading day
// =============================================================================
//
// Runs after session close. Uniqueness on (trade_id, snapshot_date) makes
// the job safely re-runnable within a day. Per-position failures are
// logged and skipped; the sweep always finishes.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::broker::api::Broker;
use crate::calendar::MarketCalendar;
use crate::enrich::Enricher;
use crate::positions::{short_put_pnl, short_put_pnl_pct};
use crate::snapshots::{whole_seconds, PositionSnapshot};
use crate::store::{Store, Trade};

pub struct PositionSnapshotService {
    broker: Arc<dyn Broker>,
    store: Arc<Store>,
    enricher: Arc<Enricher>,
    calendar: MarketCalendar,
}

impl PositionSnapshotService {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<Store>, enricher: Arc<Enricher>) -> Self {
        Self {
            broker,
            store,
            enricher,
            calendar: MarketCalendar::new(),
        }
    }

    /// Snapshot every open trade for today. Returns how many new snapshots
    /// were written (re-runs within a day write zero).
    pub async fn run_daily(&self) -> usize {
        let trades = match self.store.open_trades() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "daily snapshot sweep: cannot list open trades");
                return 0;
            }
        };

        if trades.is_empty() {
            info!("daily snapshot sweep: no open positions");
            return 0;
        }

        let today = self.calendar.today();
        let vix = self.broker.stock_quote("VIX").await.ok().map(|q| q.last);
        let spy = self.broker.stock_quote("SPY").await.ok().map(|q| q.last);

        let mut written = 0;
        for trade in &trades {
            match self.capture_one(trade, vix, spy).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(trade_id = trade.id, error = %e, "position snapshot failed, skipping");
                }
            }
        }

        info!(
            date = %today,
            open_positions = trades.len(),
            written,
            "daily snapshot sweep complete"
        );
        written
    }

    async fn capture_one(
        &self,
        trade: &Trade,
        vix: Option<f64>,
        spy: Option<f64>,
    ) -> anyhow::Result<bool> {
        let today = self.calendar.today();

        let mut snap = PositionSnapshot {
            trade_id: trade.id,
            snapshot_date: today,
            dte_remaining: Some(self.calendar.dte(trade.expiration, today)),
            vix,
            spy_price: spy,
            captured_at: Some(whole_seconds(Utc::now())),
            ..PositionSnapshot::default()
        };

        if let Ok(stock) = self.broker.stock_quote(&trade.symbol).await {
            snap.stock_price = Some(stock.last);
            if stock.last > 0.0 {
                snap.distance_to_strike_pct =
                    Some((stock.last - trade.strike) / stock.last * 100.0);
            }
        }

        match self
            .enricher
            .qualified_contract(&trade.symbol, trade.strike, trade.expiration)
            .await
        {
            Ok(contract) => match self.broker.option_quote(&contract).await {
                Ok(quote) => {
                    let current = quote.mid();
                    snap.current_premium = Some(current);
                    snap.current_pnl = Some(short_put_pnl(
                        trade.entry_premium,
                        current,
                        trade.contracts,
                    ));
                    snap.current_pnl_pct =
                        Some(short_put_pnl_pct(trade.entry_premium, current));
                    if let Some(g) = quote.greeks {
                        snap.delta = Some(g.delta);
                        snap.theta = Some(g.theta);
                        snap.gamma = Some(g.gamma);
                        snap.vega = Some(g.vega);
                        snap.iv = Some(g.implied_vol);
                    }
                }
                Err(e) => warn!(trade_id = trade.id, error = %e, "option quote failed"),
            },
            Err(e) => warn!(trade_id = trade.id, error = %e, "contract resolution failed"),
        }

        snap.score_quality();
        Ok(self.store.insert_position_snapshot(&snap)?)
    }
}

impl std::fmt::Debug for PositionSnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionSnapshotService").finish()
    }
}
