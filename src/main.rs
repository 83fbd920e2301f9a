// =============================================================================
// Meridian Put Engine — Main Entry Point
// =============================================================================
//
// An autonomous cash-secured put seller. The engine starts in paper mode
// for safety; live trading requires the dedicated flag in the config file.
//
// Long-running tasks: the hourly trade cycle, the position monitor, and the
// daily snapshot job. `meridian-bot learn` runs the learning engine once
// over the captured dataset and prints the report.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod app_state;
mod broker;
mod cache;
mod calendar;
mod config;
mod enrich;
mod errors;
mod execution;
mod exit;
mod indicators;
mod learning;
mod market_context;
mod monitor;
mod opportunity;
mod orchestrator;
mod positions;
mod risk;
mod screener;
mod snapshots;
mod store;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::api::Broker;
use crate::broker::IbkrClient;
use crate::calendar::MarketCalendar;
use crate::config::BotConfig;
use crate::errors::BrokerError;
use crate::orchestrator::ManualCandidate;
use crate::screener::{BarchartClient, Screener};
use crate::store::Store;

const CONFIG_PATH: &str = "meridian_config.json";
/// Seconds between trade cycles.
const CYCLE_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Put Engine — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = BotConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        BotConfig::default()
    });

    // SAFETY: without the dedicated live flag, force paper mode on startup.
    if !config.trading.enable_live_trading {
        config.trading.paper_trading = true;
    }

    info!(
        paper_trading = config.trading.paper_trading,
        port = config.trading.ibkr_port,
        dry_run = config.trading.dry_run,
        "engine mode"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();

    // ── 2. Store ─────────────────────────────────────────────────────────
    let store = Arc::new(Store::open(&config.db_path)?);

    // ── 3. Broker connection ─────────────────────────────────────────────
    let broker: Arc<dyn Broker> = Arc::new(IbkrClient::new(
        config.trading.ibkr_host.clone(),
        config.trading.ibkr_port,
        config.trading.ibkr_client_id,
    ));

    if let Err(e) = broker.ensure_connected().await {
        // Clean one-line failure, never a backtrace.
        eprintln!("{e}");
        if matches!(e, BrokerError::ConnectionRefused { .. }) {
            eprintln!("{}", BrokerError::connection_checklist());
        }
        std::process::exit(1);
    }
    info!("broker gateway reachable");

    // ── 4. Screener (optional — manual-only cycles skip it entirely) ─────
    let screener: Option<Arc<dyn Screener>> = match std::env::var("BARCHART_API_KEY").ok() {
        Some(key) => match BarchartClient::new(Some(key)) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                eprintln!("{}", e.user_message());
                std::process::exit(1);
            }
        },
        None if args.iter().any(|a| a == "--require-screener") => {
            eprintln!(
                "{}",
                crate::errors::ConfigError::MissingScreenerKey.user_message()
            );
            std::process::exit(1);
        }
        None => {
            info!("no screener key configured, running manual-only cycles");
            None
        }
    };

    // ── 5. Build shared state ────────────────────────────────────────────
    let starting_equity = match broker.account_summary().await {
        Ok(a) => a.net_liquidation,
        Err(e) => {
            warn!(error = %e, "account summary unavailable, assuming 100k equity");
            100_000.0
        }
    };

    let snapshot_time = config.snapshot.daily_snapshot_time.clone();
    let state = Arc::new(AppState::new(
        config,
        broker,
        store,
        screener,
        starting_equity,
    ));

    // ── 6. One-shot learning run ─────────────────────────────────────────
    if args.iter().any(|a| a == "learn") {
        let summary = state.run_learning();
        println!("{}", summary.report);
        return Ok(());
    }

    // ── 7. Recover interrupted sessions ──────────────────────────────────
    match state.orchestrator.resume_sessions().await {
        Ok(reports) if !reports.is_empty() => {
            info!(resumed = reports.len(), "interrupted sessions resumed");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "session resume failed");
            state.push_error(format!("session resume failed: {e}"));
        }
    }

    // ── 8. Background tasks ──────────────────────────────────────────────
    tokio::spawn(state.monitor.clone().run());

    {
        let state = state.clone();
        let calendar = MarketCalendar::new();
        tokio::spawn(async move {
            loop {
                let wait = calendar
                    .seconds_until_next(&snapshot_time)
                    .unwrap_or(24 * 3600);
                info!(wait_secs = wait, "daily snapshot job sleeping until session close");
                tokio::time::sleep(std::time::Duration::from_secs(wait + 1)).await;
                state.position_snapshots.run_daily().await;
            }
        });
    }

    // ── 9. Trade cycle loop ──────────────────────────────────────────────
    let manual = load_manual_candidates();
    let cycle_state = state.clone();
    let cycles = async move {
        let calendar = MarketCalendar::new();
        let mut manual = Some(manual);
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(CYCLE_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            if !calendar.is_trading_day(calendar.today()) {
                info!("market closed today, skipping cycle");
                continue;
            }
            let candidates = manual.take().unwrap_or_default();
            match cycle_state.orchestrator.run_cycle(candidates).await {
                Ok(report) => info!(
                    session = %report.session_id,
                    executed = report.executed,
                    "trade cycle finished"
                ),
                Err(e) => {
                    error!(error = %e, "trade cycle failed");
                    cycle_state.push_error(format!("cycle failed: {e}"));
                }
            }
        }
    };

    // ── 10. Run until shutdown ───────────────────────────────────────────
    tokio::select! {
        _ = cycles => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received — draining and exiting");
        }
    }

    info!(
        uptime_secs = state.start_time.elapsed().as_secs(),
        "Meridian Put Engine stopped"
    );
    Ok(())
}

/// Manual candidates from the file named by MERIDIAN_MANUAL_FILE, if any.
fn load_manual_candidates() -> Vec<ManualCandidate> {
    let Ok(path) = std::env::var("MERIDIAN_MANUAL_FILE") else {
        return Vec::new();
    };
    match ManualCandidate::load_file(&path) {
        Ok(candidates) => {
            info!(path, count = candidates.len(), "manual candidates loaded");
            candidates
        }
        Err(e) => {
            warn!(path, error = %e, "manual candidate file unreadable, ignoring");
            Vec::new()
        }
    }
}
