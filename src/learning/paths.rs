// =============================================================================
// Path Analyzer — trajectory and exit-outcome dimensions
// =============================================================================
//
// The same bucket-vs-rest analysis as the entry detector, run over the
// fields derived from daily position snapshots and the exit snapshot.
// =============================================================================

use tracing::info;

use crate::config::LearningConfig;
use crate::learning::{analyze_dimensions, DetectedPattern, Dimension, TradeObservation};

fn exit_reason_bucket(obs: &TradeObservation) -> Option<String> {
    obs.exit.exit_reason.map(|r| format!("exit {r}"))
}

fn trade_quality_bucket(obs: &TradeObservation) -> Option<String> {
    let q = obs.exit.trade_quality_score?;
    Some(match q {
        x if x < 0.33 => "quality low".to_string(),
        x if x < 0.66 => "quality medium".to_string(),
        _ => "quality high".to_string(),
    })
}

fn risk_adjusted_bucket(obs: &TradeObservation) -> Option<String> {
    let rar = obs.exit.risk_adjusted_return?;
    Some(match rar {
        x if x < 0.0 => "rar negative".to_string(),
        x if x < 1.0 => "rar modest".to_string(),
        _ => "rar strong".to_string(),
    })
}

fn iv_change_bucket(obs: &TradeObservation) -> Option<String> {
    let chg = obs.exit.iv_change_during_trade?;
    Some(match chg {
        x if x < -0.05 => "iv crush".to_string(),
        x if x > 0.05 => "iv expansion".to_string(),
        _ => "iv flat".to_string(),
    })
}

fn stock_move_bucket(obs: &TradeObservation) -> Option<String> {
    let chg = obs.exit.stock_change_during_trade_pct?;
    Some(match chg {
        x if x < -2.0 => "stock down".to_string(),
        x if x > 2.0 => "stock up".to_string(),
        _ => "stock flat".to_string(),
    })
}

fn vix_change_bucket(obs: &TradeObservation) -> Option<String> {
    let chg = obs.exit.vix_change_during_trade?;
    Some(match chg {
        x if x < -2.0 => "vix falling".to_string(),
        x if x > 2.0 => "vix rising".to_string(),
        _ => "vix stable".to_string(),
    })
}

fn drawdown_bucket(obs: &TradeObservation) -> Option<String> {
    let dd = obs.exit.max_drawdown_pct?;
    Some(match dd {
        x if x < 0.25 => "drawdown shallow".to_string(),
        x if x < 1.0 => "drawdown moderate".to_string(),
        _ => "drawdown deep".to_string(),
    })
}

/// The trajectory/exit dimensions.
pub const PATH_DIMENSIONS: &[Dimension] = &[
    Dimension { name: "exit_reason", bucket: exit_reason_bucket },
    Dimension { name: "trade_quality", bucket: trade_quality_bucket },
    Dimension { name: "risk_adjusted_return", bucket: risk_adjusted_bucket },
    Dimension { name: "iv_change", bucket: iv_change_bucket },
    Dimension { name: "stock_move", bucket: stock_move_bucket },
    Dimension { name: "vix_change", bucket: vix_change_bucket },
    Dimension { name: "max_drawdown", bucket: drawdown_bucket },
];

/// Run the trajectory/exit pass over the dataset.
pub fn detect_path_patterns(
    observations: &[TradeObservation],
    config: &LearningConfig,
) -> Vec<DetectedPattern> {
    let patterns = analyze_dimensions(observations, PATH_DIMENSIONS, "path", config);
    info!(
        observations = observations.len(),
        patterns = patterns.len(),
        "path-pattern detection complete"
    );
    patterns
}
