// =============================================================================
// Opportunity — a candidate short put and its lifecycle state machine
// =============================================================================
//
// One opportunity = (symbol, strike, expiration, PUT) on a given creation
// date. The hash over those keys is the idempotency and serialisation key:
// duplicate sources merge into one record instead of duplicating, and state
// transitions are linearised per hash.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::broker::api::Contract;
use crate::types::{OpportunitySource, OpportunityState, TrendDirection};

/// One recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: OpportunityState,
    pub to: OpportunityState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
    /// Which component made the change ("orchestrator", "risk", "executor"...).
    pub actor: String,
}

/// A candidate short-put trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// Store row id once persisted.
    pub id: Option<i64>,
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub source: OpportunitySource,
    pub opportunity_hash: String,
    pub state: OpportunityState,
    pub created_on: NaiveDate,

    // -- enrichment (populated by the enricher from live broker data) --------
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub mid: Option<f64>,
    pub stock_price: Option<f64>,
    pub spread_pct: Option<f64>,
    pub otm_pct: Option<f64>,
    pub dte: Option<i64>,
    pub margin_requirement: Option<f64>,
    pub margin_efficiency_pct: Option<f64>,
    pub trend: Option<TrendDirection>,
    pub rank_score: Option<f64>,
    pub contract: Option<Contract>,

    // -- screener-supplied context -------------------------------------------
    pub screener_delta: Option<f64>,
    pub screener_iv: Option<f64>,
    pub option_volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub sector: Option<String>,

    // -- event context (manual entries may carry these) ----------------------
    pub earnings_date: Option<NaiveDate>,
    pub earnings_timing: Option<crate::types::EarningsTiming>,

    pub transitions: Vec<StateTransition>,
}

impl Opportunity {
    pub fn new(
        symbol: impl Into<String>,
        strike: f64,
        expiration: NaiveDate,
        source: OpportunitySource,
        created_on: NaiveDate,
    ) -> Self {
        let symbol = symbol.into();
        let opportunity_hash = compute_hash(&symbol, strike, expiration, created_on);
        Self {
            id: None,
            symbol,
            strike,
            expiration,
            source,
            opportunity_hash,
            state: OpportunityState::Pending,
            created_on,
            bid: None,
            ask: None,
            mid: None,
            stock_price: None,
            spread_pct: None,
            otm_pct: None,
            dte: None,
            margin_requirement: None,
            margin_efficiency_pct: None,
            trend: None,
            rank_score: None,
            contract: None,
            screener_delta: None,
            screener_iv: None,
            option_volume: None,
            open_interest: None,
            sector: None,
            earnings_date: None,
            earnings_timing: None,
            transitions: Vec::new(),
        }
    }

    /// Move to `to`, recording the transition. Transitions out of a terminal
    /// state are refused and logged; the record is never silently corrupted.
    pub fn transition_to(
        &mut self,
        to: OpportunityState,
        reason: Option<String>,
        actor: &str,
    ) -> bool {
        if self.state.is_terminal() {
            warn!(
                hash = %self.opportunity_hash,
                from = %self.state,
                to = %to,
                "refusing transition out of terminal state"
            );
            return false;
        }
        if self.state == to {
            return true;
        }

        debug!(
            hash = %self.opportunity_hash,
            symbol = %self.symbol,
            from = %self.state,
            to = %to,
            reason = reason.as_deref().unwrap_or(""),
            actor,
            "opportunity transition"
        );

        self.transitions.push(StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
            reason,
            actor: actor.to_string(),
        });
        self.state = to;
        true
    }

    /// Fold a duplicate candidate from another source into this one.
    ///
    /// Sources differing means the candidate was surfaced independently;
    /// the merged record becomes `hybrid`. Enrichment fields prefer
    /// whichever side has data.
    pub fn merge_from(&mut self, other: &Opportunity) {
        debug_assert_eq!(self.opportunity_hash, other.opportunity_hash);

        if self.source != other.source {
            self.source = OpportunitySource::Hybrid;
        }

        fn fill<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if dst.is_none() {
                *dst = src.clone();
            }
        }

        fill(&mut self.bid, &other.bid);
        fill(&mut self.ask, &other.ask);
        fill(&mut self.mid, &other.mid);
        fill(&mut self.stock_price, &other.stock_price);
        fill(&mut self.spread_pct, &other.spread_pct);
        fill(&mut self.otm_pct, &other.otm_pct);
        fill(&mut self.dte, &other.dte);
        fill(&mut self.margin_requirement, &other.margin_requirement);
        fill(&mut self.margin_efficiency_pct, &other.margin_efficiency_pct);
        fill(&mut self.trend, &other.trend);
        fill(&mut self.rank_score, &other.rank_score);
        fill(&mut self.contract, &other.contract);
        fill(&mut self.screener_delta, &other.screener_delta);
        fill(&mut self.screener_iv, &other.screener_iv);
        fill(&mut self.option_volume, &other.option_volume);
        fill(&mut self.open_interest, &other.open_interest);
        fill(&mut self.sector, &other.sector);
        fill(&mut self.earnings_date, &other.earnings_date);
        fill(&mut self.earnings_timing, &other.earnings_timing);
    }

    /// Deterministic per-position identifier shared with the monitor.
    pub fn position_id(&self) -> String {
        crate::positions::position_id(&self.symbol, self.strike, self.expiration)
    }
}

/// SHA-256 over the identity tuple, hex-encoded and truncated to 32 chars.
/// Stable across runs by construction.
pub fn compute_hash(
    symbol: &str,
    strike: f64,
    expiration: NaiveDate,
    created_on: NaiveDate,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{:.4}|{}|PUT|{}",
            symbol.to_uppercase(),
            strike,
            expiration.format("%Y-%m-%d"),
            created_on.format("%Y-%m-%d"),
        )
        .as_bytes(),
    );
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}
