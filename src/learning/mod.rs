// =============================================================================
// Learning Engine — mining completed trades for statistically solid patterns
// =============================================================================
//
// Four cooperating parts:
//   - `detector`   — buckets closed trades across entry-feature dimensions.
//   - `paths`      — the same analysis over trajectory/exit dimensions.
//   - `combinator` — two- and three-way dimension combinations plus the
//                    per-opportunity composite score.
//   - `validator`  — Welch's t / chi-square significance testing.
//   - `optimizer`  — turns validated patterns into versioned parameter
//                    proposals.
//
// The engine runs on demand over persisted data and never blocks trading;
// its consumers read persisted results.

pub mod combinator;
pub mod detector;
pub mod optimizer;
pub mod paths;
pub mod validator;

use serde::{Deserialize, Serialize};

use crate::config::LearningConfig;
use crate::snapshots::{EntrySnapshot, ExitSnapshot};
use crate::store::CompletedTrade;

/// Hard significance gates fixed by the pattern contract (the configurable
/// validator thresholds may be stricter, never looser).
pub const P_VALUE_GATE: f64 = 0.05;
pub const WIN_RATE_EFFECT_GATE: f64 = 0.005;

/// A statistically described bucket of trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    /// Dimension tag, e.g. "entry:delta_bucket" or "path:exit_reason".
    pub pattern_type: String,
    /// Human-readable bucket, e.g. "delta -0.20..-0.10".
    pub pattern_name: String,
    pub sample_size: usize,
    pub win_rate: f64,
    pub avg_roi: f64,
    pub baseline_win_rate: f64,
    pub baseline_roi: f64,
    pub p_value: f64,
    /// (1 - p_value) discounted by sample depth: full weight only once the
    /// bucket holds 4x the sample floor. Keeps barely-sampled patterns from
    /// auto-applying.
    pub confidence: f64,
    /// avg_roi - baseline_roi.
    pub effect_size: f64,
    /// Predicates describing the bucket.
    pub predicates: Vec<String>,
    /// Minimum samples the detector was configured with.
    pub min_samples: usize,
}

impl DetectedPattern {
    /// sample_size >= min_samples AND p < 0.05 AND the win rate moved at
    /// least half a point off baseline.
    pub fn is_significant(&self) -> bool {
        self.sample_size >= self.min_samples
            && self.p_value < P_VALUE_GATE
            && (self.win_rate - self.baseline_win_rate).abs() >= WIN_RATE_EFFECT_GATE
    }
}

/// One closed trade flattened for bucketing. Built only from trades whose
/// entry snapshot clears the configured data-quality floor.
#[derive(Debug, Clone)]
pub struct TradeObservation {
    pub win: bool,
    /// P&L as a fraction of entry premium.
    pub roi: f64,
    pub entry: EntrySnapshot,
    pub exit: ExitSnapshot,
}

impl TradeObservation {
    /// Build the learning dataset from completed trades, applying the
    /// data-quality floor.
    pub fn dataset(
        completed: &[CompletedTrade],
        config: &LearningConfig,
    ) -> Vec<TradeObservation> {
        completed
            .iter()
            .filter_map(|c| {
                let entry = c.entry.clone()?;
                let exit = c.exit.clone()?;
                if entry.data_quality_score < config.min_data_quality_for_learning {
                    return None;
                }
                let roi = exit.roi_pct.or(c.trade.profit_pct)?;
                let win = exit.win.unwrap_or(roi > 0.0);
                Some(TradeObservation {
                    win,
                    roi,
                    entry,
                    exit,
                })
            })
            .collect()
    }
}

/// A named way of assigning an observation to a bucket. `None` drops the
/// observation from this dimension (missing data).
pub struct Dimension {
    pub name: &'static str,
    pub bucket: fn(&TradeObservation) -> Option<String>,
}

/// Aggregate stats for one arm of a comparison.
#[derive(Debug, Clone, Default)]
pub struct ArmStats {
    pub n: usize,
    pub wins: usize,
    pub rois: Vec<f64>,
}

impl ArmStats {
    pub fn push(&mut self, obs: &TradeObservation) {
        self.n += 1;
        if obs.win {
            self.wins += 1;
        }
        self.rois.push(obs.roi);
    }

    pub fn win_rate(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.wins as f64 / self.n as f64
        }
    }

    pub fn avg_roi(&self) -> f64 {
        if self.rois.is_empty() {
            0.0
        } else {
            self.rois.iter().sum::<f64>() / self.rois.len() as f64
        }
    }
}

/// Confidence = (1 - p) weighted by sample depth relative to 4x the floor.
pub fn pattern_confidence(p_value: f64, n: usize, min_samples: usize) -> f64 {
    let depth = if min_samples == 0 {
        1.0
    } else {
        (n as f64 / (4 * min_samples) as f64).min(1.0)
    };
    ((1.0 - p_value) * depth).clamp(0.0, 1.0)
}

/// Bucket `observations` along each dimension and emit one pattern per
/// bucket clearing the sample floor. Shared by the entry detector and the
/// path analyzer.
pub fn analyze_dimensions(
    observations: &[TradeObservation],
    dimensions: &[Dimension],
    prefix: &str,
    config: &LearningConfig,
) -> Vec<DetectedPattern> {
    use std::collections::HashMap;

    let mut baseline = ArmStats::default();
    for obs in observations {
        baseline.push(obs);
    }
    if baseline.n == 0 {
        return Vec::new();
    }

    let mut patterns = Vec::new();

    for dim in dimensions {
        let mut buckets: HashMap<String, ArmStats> = HashMap::new();
        for obs in observations {
            if let Some(label) = (dim.bucket)(obs) {
                buckets.entry(label).or_default().push(obs);
            }
        }

        for (label, stats) in buckets {
            if stats.n < config.min_sample_size {
                continue;
            }
            // Complement arm: everything outside the bucket.
            let mut rest = ArmStats::default();
            for obs in observations {
                match (dim.bucket)(obs) {
                    Some(l) if l == label => {}
                    _ => rest.push(obs),
                }
            }

            let p_value = validator::two_sample_p_value(&stats, &rest);
            let win_rate = stats.win_rate();
            let avg_roi = stats.avg_roi();

            patterns.push(DetectedPattern {
                pattern_type: format!("{prefix}:{}", dim.name),
                pattern_name: label.clone(),
                sample_size: stats.n,
                win_rate,
                avg_roi,
                baseline_win_rate: baseline.win_rate(),
                baseline_roi: baseline.avg_roi(),
                p_value,
                confidence: pattern_confidence(p_value, stats.n, config.min_sample_size),
                effect_size: avg_roi - baseline.avg_roi(),
                predicates: vec![format!("{} = {label}", dim.name)],
                min_samples: config.min_sample_size,
            });
        }
    }

    patterns.sort_by(|a, b| {
        a.p_value
            .partial_cmp(&b.p_value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    patterns
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(sample: usize, p: f64, win: f64, base: f64) -> DetectedPattern {
        DetectedPattern {
            pattern_type: "entry:test".into(),
            pattern_name: "bucket".into(),
            sample_size: sample,
            win_rate: win,
            avg_roi: 0.1,
            baseline_win_rate: base,
            baseline_roi: 0.05,
            p_value: p,
            confidence: 1.0 - p,
            effect_size: 0.05,
            predicates: vec![],
            min_samples: 30,
        }
    }

    #[test]
    fn significance_requires_all_three_gates() {
        assert!(pattern(30, 0.01, 0.50, 0.65).is_significant());
        // Too few samples.
        assert!(!pattern(15, 0.01, 0.50, 0.65).is_significant());
        // p too high.
        assert!(!pattern(30, 0.20, 0.50, 0.65).is_significant());
        // Win rate barely moved.
        assert!(!pattern(30, 0.01, 0.651, 0.65).is_significant());
        // Effect gate is inclusive at exactly 0.005.
        assert!(pattern(30, 0.01, 0.655, 0.65).is_significant());
    }

    fn obs(win: bool, roi: f64, quality: f64) -> CompletedTrade {
        use crate::store::Trade;
        use crate::types::OpportunitySource;
        use chrono::NaiveDate;

        let d = NaiveDate::from_ymd_opt(2025, 8, 4).unwrap();
        let mut entry = EntrySnapshot::default();
        entry.data_quality_score = quality;
        let mut exit = ExitSnapshot::default();
        exit.roi_pct = Some(roi);
        exit.win = Some(win);

        CompletedTrade {
            trade: Trade {
                id: 1,
                symbol: "SPY".into(),
                strike: 450.0,
                expiration: d,
                contracts: 1,
                entry_premium: 0.4,
                entry_date: d,
                exit_date: Some(d),
                exit_premium: Some(0.2),
                exit_reason: Some(crate::types::ExitReason::ProfitTarget),
                profit_loss: Some(20.0),
                profit_pct: Some(roi),
                data_source: OpportunitySource::Screener,
                entry_snapshot_id: Some(1),
                exit_snapshot_id: Some(1),
            },
            entry: Some(entry),
            exit: Some(exit),
        }
    }

    #[test]
    fn dataset_applies_quality_floor() {
        let config = LearningConfig::default();
        let completed = vec![obs(true, 0.5, 0.9), obs(false, -1.0, 0.3)];
        let dataset = TradeObservation::dataset(&completed, &config);
        assert_eq!(dataset.len(), 1);
        assert!(dataset[0].win);
    }

    #[test]
    fn arm_stats_aggregation() {
        let config = LearningConfig::default();
        let completed = vec![obs(true, 0.5, 0.9), obs(false, -0.5, 0.9)];
        let dataset = TradeObservation::dataset(&completed, &config);

        let mut arm = ArmStats::default();
        for o in &dataset {
            arm.push(o);
        }
        assert_eq!(arm.n, 2);
        assert!((arm.win_rate() - 0.5).abs() < 1e-12);
        assert!(arm.avg_roi().abs() < 1e-12);
    }
}
