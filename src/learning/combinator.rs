// =============================================================================
// Pattern Combinator — multi-dimension interactions and composite scoring
// =============================================================================
//
// Pairs and triples of the base dimensions, bucketed jointly ("rsi neutral
// & macd_histogram positive"). Joint buckets thin out fast, so most only
// clear the sample floor on larger datasets; that is the point — a combo
// that still clears it carries real interaction signal.
//
// The combinator also produces per-opportunity composite scores on [0, 1]:
//   40% entry strength + 30% trajectory favorability + 30% exit quality.
// =============================================================================

use std::collections::HashMap;

use tracing::info;

use crate::config::LearningConfig;
use crate::learning::detector::ENTRY_DIMENSIONS;
use crate::learning::paths::PATH_DIMENSIONS;
use crate::learning::validator::two_sample_p_value;
use crate::learning::{ArmStats, DetectedPattern, Dimension, TradeObservation};

/// A named combination of base dimensions.
pub struct Combo {
    pub name: &'static str,
    pub parts: &'static [&'static str],
}

/// Two-way interactions.
pub const PAIR_COMBOS: &[Combo] = &[
    Combo { name: "rsi_x_momentum", parts: &["rsi_regime", "macd_histogram"] },
    Combo { name: "iv_entry_x_exit", parts: &["iv_rank_bucket", "exit_reason"] },
    Combo { name: "trend_x_greeks", parts: &["trend_direction", "delta_bucket"] },
    Combo { name: "breadth_x_stock", parts: &["market_breadth", "stock_move"] },
    Combo { name: "sector_x_exit_quality", parts: &["sector", "trade_quality"] },
    Combo { name: "vix_entry_x_exit", parts: &["vix_bucket", "exit_reason"] },
    Combo { name: "support_x_drawdown", parts: &["support_proximity", "max_drawdown"] },
];

/// Three-way interactions.
pub const TRIPLE_COMBOS: &[Combo] = &[
    Combo {
        name: "iv_entry_x_path_x_exit",
        parts: &["iv_rank_bucket", "max_drawdown", "exit_reason"],
    },
    Combo {
        name: "rsi_x_momentum_x_quality",
        parts: &["rsi_regime", "macd_histogram", "trade_quality"],
    },
    Combo {
        name: "trend_x_greeks_x_drawdown",
        parts: &["trend_direction", "delta_bucket", "max_drawdown"],
    },
];

fn find_dimension(name: &str) -> Option<&'static Dimension> {
    ENTRY_DIMENSIONS
        .iter()
        .chain(PATH_DIMENSIONS.iter())
        .find(|d| d.name == name)
}

/// Joint bucket label for one observation, `None` when any part is missing.
fn combo_label(obs: &TradeObservation, combo: &Combo) -> Option<String> {
    let mut parts = Vec::with_capacity(combo.parts.len());
    for name in combo.parts {
        let dim = find_dimension(name)?;
        parts.push((dim.bucket)(obs)?);
    }
    Some(parts.join(" & "))
}

/// Run all pair and triple combinations over the dataset.
pub fn detect_combo_patterns(
    observations: &[TradeObservation],
    config: &LearningConfig,
) -> Vec<DetectedPattern> {
    let mut baseline = ArmStats::default();
    for obs in observations {
        baseline.push(obs);
    }
    if baseline.n == 0 {
        return Vec::new();
    }

    let mut patterns = Vec::new();

    for combo in PAIR_COMBOS.iter().chain(TRIPLE_COMBOS.iter()) {
        let mut buckets: HashMap<String, ArmStats> = HashMap::new();
        for obs in observations {
            if let Some(label) = combo_label(obs, combo) {
                buckets.entry(label).or_default().push(obs);
            }
        }

        for (label, stats) in buckets {
            if stats.n < config.min_sample_size {
                continue;
            }
            let mut rest = ArmStats::default();
            for obs in observations {
                match combo_label(obs, combo) {
                    Some(l) if l == label => {}
                    _ => rest.push(obs),
                }
            }

            let p_value = two_sample_p_value(&stats, &rest);
            patterns.push(DetectedPattern {
                pattern_type: format!("combo:{}", combo.name),
                pattern_name: label.clone(),
                sample_size: stats.n,
                win_rate: stats.win_rate(),
                avg_roi: stats.avg_roi(),
                baseline_win_rate: baseline.win_rate(),
                baseline_roi: baseline.avg_roi(),
                p_value,
                confidence: crate::learning::pattern_confidence(
                    p_value,
                    stats.n,
                    config.min_sample_size,
                ),
                effect_size: stats.avg_roi() - baseline.avg_roi(),
                predicates: combo
                    .parts
                    .iter()
                    .zip(label.split(" & "))
                    .map(|(dim, part)| format!("{dim} = {part}"))
                    .collect(),
                min_samples: config.min_sample_size,
            });
        }
    }

    info!(
        observations = observations.len(),
        patterns = patterns.len(),
        "combo-pattern detection complete"
    );
    patterns
}

// =============================================================================
// Composite scoring
// =============================================================================

/// Weighted blend of the three component scores, clamped to [0, 1].
pub fn composite_score(
    entry_strength: f64,
    trajectory_favorability: f64,
    exit_quality_potential: f64,
) -> f64 {
    (0.4 * entry_strength + 0.3 * trajectory_favorability + 0.3 * exit_quality_potential)
        .clamp(0.0, 1.0)
}

/// Component score from the significant patterns matching a candidate's
/// bucket labels: 0.5 is neutral, above means the matched buckets win more
/// than baseline. Unmatched candidates stay neutral.
pub fn pattern_strength(
    patterns: &[DetectedPattern],
    type_prefix: &str,
    labels: &[String],
) -> f64 {
    let matched: Vec<&DetectedPattern> = patterns
        .iter()
        .filter(|p| p.is_significant())
        .filter(|p| p.pattern_type.starts_with(type_prefix))
        .filter(|p| labels.iter().any(|l| l == &p.pattern_name))
        .collect();

    if matched.is_empty() {
        return 0.5;
    }

    let avg_edge: f64 = matched
        .iter()
        .map(|p| p.win_rate - p.baseline_win_rate)
        .sum::<f64>()
        / matched.len() as f64;

    (0.5 + avg_edge).clamp(0.0, 1.0)
}
