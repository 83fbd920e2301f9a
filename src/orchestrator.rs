// =============================================================================
// Orchestrator — one trade cycle: scan, enrich, gate, offer, execute, capture
// =============================================================================
//
// Candidates come from the screener (one shot per cycle, never fanned out)
// and/or manual entry. Duplicates merge by opportunity hash. Each phase
// persists the session record so an interrupted cycle can be enumerated and
// resumed on the next start.
//
// A missing screener key only disables screener scans; manual-only cycles
// never load the screener configuration at all.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::api::Broker;
use crate::calendar::MarketCalendar;
use crate::config::BotConfig;
use crate::enrich::Enricher;
use crate::execution::{ExecutionResult, OrderExecutor};
use crate::monitor::PositionMonitor;
use crate::opportunity::Opportunity;
use crate::risk::RiskGovernor;
use crate::screener::{ScreenRequest, Screener, ScreenerCandidate};
use crate::snapshots::whole_seconds;
use crate::store::{Session, Store};
use crate::types::{EarningsTiming, OpportunitySource, OpportunityState};

/// A manually entered candidate (web form or JSON file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualCandidate {
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    #[serde(default)]
    pub earnings_date: Option<NaiveDate>,
    #[serde(default)]
    pub earnings_timing: Option<EarningsTiming>,
}

impl ManualCandidate {
    /// Read a JSON array of candidates from disk (`manual_file` source).
    pub fn load_file(path: &str) -> anyhow::Result<Vec<ManualCandidate>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Counts from one completed cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub session_id: String,
    pub scanned: usize,
    pub enriched: usize,
    pub validated: usize,
    pub rejected: usize,
    pub risk_blocked: usize,
    pub skipped: usize,
    pub executed: usize,
    pub failed: usize,
}

pub struct Orchestrator {
    broker: Arc<dyn Broker>,
    store: Arc<Store>,
    enricher: Arc<Enricher>,
    risk: Arc<RiskGovernor>,
    executor: Arc<OrderExecutor>,
    monitor: Arc<PositionMonitor>,
    screener: Option<Arc<dyn Screener>>,
    config: Arc<parking_lot::RwLock<BotConfig>>,
    calendar: MarketCalendar,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<Store>,
        enricher: Arc<Enricher>,
        risk: Arc<RiskGovernor>,
        executor: Arc<OrderExecutor>,
        monitor: Arc<PositionMonitor>,
        screener: Option<Arc<dyn Screener>>,
        config: Arc<parking_lot::RwLock<BotConfig>>,
    ) -> Self {
        Self {
            broker,
            store,
            enricher,
            risk,
            executor,
            monitor,
            screener,
            config,
            calendar: MarketCalendar::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Cycle entry points
    // -------------------------------------------------------------------------

    /// Run one full trade cycle over screener plus manual candidates.
    pub async fn run_cycle(&self, manual: Vec<ManualCandidate>) -> anyhow::Result<CycleReport> {
        let session_id = Uuid::new_v4().to_string();
        let mut session = Session {
            id: session_id.clone(),
            phase: "scan".into(),
            payload: serde_json::json!({}),
            completed: false,
            created_at: whole_seconds(Utc::now()),
            updated_at: whole_seconds(Utc::now()),
        };
        self.store.save_session(&session)?;

        let opportunities = self.collect_candidates(manual).await;
        info!(
            session = %session_id,
            candidates = opportunities.len(),
            "scan phase complete"
        );

        let mut report = CycleReport {
            session_id: session_id.clone(),
            scanned: opportunities.len(),
            ..CycleReport::default()
        };

        self.process(opportunities, &mut session, &mut report)
            .await?;

        self.store.complete_session(&session.id)?;
        info!(
            session = %session_id,
            executed = report.executed,
            rejected = report.rejected,
            risk_blocked = report.risk_blocked,
            failed = report.failed,
            "cycle complete"
        );
        Ok(report)
    }

    /// Enumerate incomplete sessions and push their unfinished
    /// opportunities back through the pipeline.
    pub async fn resume_sessions(&self) -> anyhow::Result<Vec<CycleReport>> {
        let sessions = self.store.incomplete_sessions()?;
        if sessions.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = sessions.len(), "resuming incomplete sessions");

        let mut reports = Vec::new();
        for old in sessions {
            let hashes: Vec<String> = old
                .payload
                .get("opportunities")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();

            let mut opportunities = Vec::new();
            for hash in &hashes {
                match self.store.get_opportunity(hash) {
                    Ok(Some(opp)) if !opp.state.is_terminal() => opportunities.push(opp),
                    Ok(_) => {}
                    Err(e) => warn!(hash, error = %e, "resume: opportunity load failed"),
                }
            }

            warn!(
                session = %old.id,
                phase = %old.phase,
                resumable = opportunities.len(),
                "resuming interrupted session"
            );

            let mut session = Session {
                id: Uuid::new_v4().to_string(),
                phase: "resume".into(),
                payload: serde_json::json!({ "resumed_from": old.id }),
                completed: false,
                created_at: whole_seconds(Utc::now()),
                updated_at: whole_seconds(Utc::now()),
            };
            self.store.save_session(&session)?;

            let mut report = CycleReport {
                session_id: session.id.clone(),
                scanned: opportunities.len(),
                ..CycleReport::default()
            };
            self.process(opportunities, &mut session, &mut report)
                .await?;

            self.store.complete_session(&old.id)?;
            self.store.complete_session(&session.id)?;
            reports.push(report);
        }
        Ok(reports)
    }

    // -------------------------------------------------------------------------
    // Phase: scan
    // -------------------------------------------------------------------------

    /// Screener + manual candidates, merged by hash.
    async fn collect_candidates(&self, manual: Vec<ManualCandidate>) -> Vec<Opportunity> {
        let today = self.calendar.today();
        let mut by_hash: HashMap<String, Opportunity> = HashMap::new();

        if let Some(screener) = &self.screener {
            let request = {
                let cfg = self.config.read();
                ScreenRequest {
                    min_dte: cfg.strategy.dte_min,
                    max_dte: cfg.strategy.dte_max,
                    ..ScreenRequest::default()
                }
            };
            match screener.screen(&request).await {
                Ok(candidates) => {
                    for c in candidates {
                        let opp = screener_opportunity(&c, today);
                        merge_into(&mut by_hash, opp);
                    }
                }
                Err(e) => warn!(error = %e, "screener scan failed, continuing with manual only"),
            }
        }

        for m in manual {
            let mut opp = Opportunity::new(
                m.symbol,
                m.strike,
                m.expiration,
                OpportunitySource::ManualWeb,
                today,
            );
            opp.earnings_date = m.earnings_date;
            opp.earnings_timing = m.earnings_timing;
            merge_into(&mut by_hash, opp);
        }

        let mut opportunities: Vec<Opportunity> = by_hash.into_values().collect();
        for opp in &mut opportunities {
            if let Err(e) = self.store.upsert_opportunity(opp) {
                warn!(hash = %opp.opportunity_hash, error = %e, "opportunity persist failed");
            }
        }
        opportunities
    }

    // -------------------------------------------------------------------------
    // Phases: enrich -> validate -> gate -> execute
    // -------------------------------------------------------------------------

    async fn process(
        &self,
        mut opportunities: Vec<Opportunity>,
        session: &mut Session,
        report: &mut CycleReport,
    ) -> anyhow::Result<()> {
        let hashes: Vec<String> = opportunities
            .iter()
            .map(|o| o.opportunity_hash.clone())
            .collect();
        session.payload = serde_json::json!({ "opportunities": hashes });

        // -- enrich ----------------------------------------------------------
        self.advance_phase(session, "enrich")?;
        let mut enriched: Vec<Opportunity> = Vec::new();
        for mut opp in opportunities.drain(..) {
            match self.enricher.enrich(&mut opp).await {
                Ok(()) => {
                    self.transition(&mut opp, OpportunityState::Enriched, None, "enricher");
                    report.enriched += 1;
                    enriched.push(opp);
                }
                Err(e) => {
                    // Dropped, never retried in-cycle.
                    self.transition(
                        &mut opp,
                        OpportunityState::Failed,
                        Some(e.to_string()),
                        "enricher",
                    );
                    report.failed += 1;
                }
            }
        }

        // -- validate --------------------------------------------------------
        self.advance_phase(session, "validate")?;
        let (skip_opex, avoid_sectors, premium_min, premium_max) = {
            let cfg = self.config.read();
            (
                cfg.strategy.skip_opex_week,
                cfg.strategy.avoid_sectors.clone(),
                cfg.strategy.premium_min,
                cfg.strategy.premium_max,
            )
        };
        let today = self.calendar.today();

        let mut validated: Vec<Opportunity> = Vec::new();
        for mut opp in enriched.drain(..) {
            if skip_opex && self.calendar.is_opex_week(today) {
                self.transition(
                    &mut opp,
                    OpportunityState::Skipped,
                    Some("opex week".into()),
                    "orchestrator",
                );
                report.skipped += 1;
                continue;
            }
            if let Some(sector) = opp.sector.clone() {
                if avoid_sectors.contains(&sector) {
                    self.transition(
                        &mut opp,
                        OpportunityState::Skipped,
                        Some(format!("sector avoided: {sector}")),
                        "orchestrator",
                    );
                    report.skipped += 1;
                    continue;
                }
            }
            // Screener candidates also face the premium window; manual
            // entries are explicit operator intent and bypass it.
            if opp.source == OpportunitySource::Screener {
                if let Some(mid) = opp.mid {
                    if mid < premium_min || mid > premium_max {
                        self.transition(
                            &mut opp,
                            OpportunityState::Rejected,
                            Some(format!("premium {mid:.2} outside window")),
                            "validator",
                        );
                        report.rejected += 1;
                        continue;
                    }
                }
            }

            match self.enricher.validate(&opp) {
                Ok(()) => {
                    self.transition(&mut opp, OpportunityState::Validated, None, "validator");
                    report.validated += 1;
                    validated.push(opp);
                }
                Err(reason) => {
                    self.transition(
                        &mut opp,
                        OpportunityState::Rejected,
                        Some(reason),
                        "validator",
                    );
                    report.rejected += 1;
                }
            }
        }

        // Best-ranked first.
        validated.sort_by(|a, b| {
            b.rank_score
                .unwrap_or(0.0)
                .partial_cmp(&a.rank_score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // -- risk gate + offer + execute -------------------------------------
        self.advance_phase(session, "execute")?;

        if validated.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.executor.check_interlock() {
            error!("{}", e.user_message());
            for mut opp in validated {
                self.transition(
                    &mut opp,
                    OpportunityState::Skipped,
                    Some("paper-mode interlock".into()),
                    "executor",
                );
                report.skipped += 1;
            }
            return Ok(());
        }

        let account = match self.broker.account_summary().await {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "account summary unavailable, cycle ends cleanly");
                return Ok(());
            }
        };
        let contracts = self.config.read().strategy.contracts;

        for mut opp in validated {
            let exposures: Vec<_> = self
                .monitor
                .build_open_positions()
                .await
                .iter()
                .map(|p| p.exposure())
                .collect();

            // Prefer the broker's own margin figure over the estimate.
            let estimated = opp.margin_requirement.unwrap_or(0.0) * contracts as f64;
            let new_margin = self
                .executor
                .refined_margin(&opp, contracts)
                .await
                .unwrap_or(estimated);
            let (approved, reason) =
                self.risk
                    .can_enter(new_margin, opp.sector.as_deref(), &exposures, &account);

            if !approved {
                self.transition(&mut opp, OpportunityState::RiskBlocked, reason, "risk");
                report.risk_blocked += 1;
                continue;
            }

            self.transition(&mut opp, OpportunityState::Offered, None, "orchestrator");
            // Autonomous operation: validated offers are self-approved.
            self.transition(&mut opp, OpportunityState::Approved, None, "orchestrator");
            self.transition(&mut opp, OpportunityState::Executing, None, "executor");
            self.risk.record_entry();

            match self.executor.execute_trade(&opp, contracts).await {
                ExecutionResult::Filled { trade_id, .. }
                | ExecutionResult::Simulated { trade_id, .. } => {
                    self.transition(
                        &mut opp,
                        OpportunityState::Executed,
                        Some(format!("trade {trade_id}")),
                        "executor",
                    );
                    report.executed += 1;
                }
                ExecutionResult::TimedOut { order_id } => {
                    // Ambiguous: stays EXECUTING for the next reconcile pass.
                    warn!(
                        hash = %opp.opportunity_hash,
                        order_id,
                        "entry unresolved, left in EXECUTING"
                    );
                    let _ = self.store.upsert_opportunity(&opp);
                }
                ExecutionResult::Interlocked(msg) => {
                    error!("{msg}");
                    self.transition(
                        &mut opp,
                        OpportunityState::Skipped,
                        Some("paper-mode interlock".into()),
                        "executor",
                    );
                    report.skipped += 1;
                }
                ExecutionResult::Failed(reason) => {
                    self.transition(
                        &mut opp,
                        OpportunityState::Failed,
                        Some(reason),
                        "executor",
                    );
                    report.failed += 1;
                }
            }
        }

        // Final session payload carries the outcome counts for recovery
        // inspection.
        session.payload = serde_json::json!({
            "opportunities": session.payload.get("opportunities").cloned().unwrap_or_default(),
            "approved": report.executed + report.failed,
            "executed": report.executed,
            "failed": report.failed,
        });
        self.advance_phase(session, "capture")?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn advance_phase(&self, session: &mut Session, phase: &str) -> anyhow::Result<()> {
        session.phase = phase.to_string();
        session.updated_at = whole_seconds(Utc::now());
        self.store.save_session(session)?;
        Ok(())
    }

    /// Apply a transition and persist both the record and the opportunity.
    fn transition(
        &self,
        opp: &mut Opportunity,
        to: OpportunityState,
        reason: Option<String>,
        actor: &str,
    ) {
        if !opp.transition_to(to, reason, actor) {
            return;
        }
        if let Some(t) = opp.transitions.last() {
            if let Err(e) = self.store.record_transition(&opp.opportunity_hash, t) {
                warn!(hash = %opp.opportunity_hash, error = %e, "transition persist failed");
            }
        }
        if let Err(e) = self.store.upsert_opportunity(opp) {
            warn!(hash = %opp.opportunity_hash, error = %e, "opportunity persist failed");
        }
    }
}

fn merge_into(by_hash: &mut HashMap<String, Opportunity>, opp: Opportunity) {
    match by_hash.get_mut(&opp.opportunity_hash) {
        Some(existing) => existing.merge_from(&opp),
        None => {
            by_hash.insert(opp.opportunity_hash.clone(), opp);
        }
    }
}

fn screener_opportunity(c: &ScreenerCandidate, today: NaiveDate) -> Opportunity {
    let mut opp = Opportunity::new(
        c.underlying.clone(),
        c.strike,
        c.expiration,
        OpportunitySource::Screener,
        today,
    );
    opp.screener_delta = Some(c.delta);
    opp.screener_iv = Some(c.volatility);
    opp.option_volume = Some(c.volume);
    opp.open_interest = Some(c.open_interest);
    opp
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("screener", &self.screener.is_some())
            .finish()
    }
}
