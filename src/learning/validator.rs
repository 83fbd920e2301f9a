// =============================================================================
// Statistical Validator — two-sample significance testing
// =============================================================================
//
// Every proposed pattern or parameter change faces three gates:
//   1. n >= min_sample_size per arm.
//   2. p < p_value_threshold, from Welch's t on ROI and the chi-square test
//      on win rates (the stronger of the two carries the pattern).
//   3. Absolute ROI effect >= min_effect_size (0.5 points by default).
//
// Patterns missing any gate are still reported, just never "significant".
// =============================================================================

use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

use crate::config::LearningConfig;
use crate::learning::{ArmStats, DetectedPattern};

/// Verdict on one pattern or proposed change.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub p_value: f64,
    pub roi_effect: f64,
    pub sample_ok: bool,
    pub p_ok: bool,
    pub effect_ok: bool,
}

impl Validation {
    pub fn passes(&self) -> bool {
        self.sample_ok && self.p_ok && self.effect_ok
    }
}

/// Welch's unequal-variance t-test. Returns the two-sided p-value.
///
/// Degenerate inputs (fewer than two samples per arm, or zero variance in
/// both arms) return 1.0 when the means agree and 0.0 when they clearly do
/// not — no pattern should ride on a test that cannot run.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 2 || b.len() < 2 {
        return 1.0;
    }

    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let var = |xs: &[f64], m: f64| {
        xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
    };

    let (m1, m2) = (mean(a), mean(b));
    let (v1, v2) = (var(a, m1), var(b, m2));
    let (n1, n2) = (a.len() as f64, b.len() as f64);

    let se_sq = v1 / n1 + v2 / n2;
    if se_sq <= 0.0 {
        return if (m1 - m2).abs() < 1e-12 { 1.0 } else { 0.0 };
    }

    let t = (m1 - m2) / se_sq.sqrt();

    // Welch-Satterthwaite degrees of freedom.
    let df = se_sq.powi(2)
        / ((v1 / n1).powi(2) / (n1 - 1.0) + (v2 / n2).powi(2) / (n2 - 1.0));
    if !df.is_finite() || df <= 0.0 {
        return 1.0;
    }

    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => 2.0 * (1.0 - dist.cdf(t.abs())),
        Err(_) => 1.0,
    }
}

/// Chi-square test (1 dof, no continuity correction) on a 2x2 win/loss
/// table. Returns the p-value.
pub fn chi_square_test(wins_a: usize, n_a: usize, wins_b: usize, n_b: usize) -> f64 {
    if n_a == 0 || n_b == 0 {
        return 1.0;
    }
    let (a, b) = (wins_a as f64, (n_a - wins_a) as f64);
    let (c, d) = (wins_b as f64, (n_b - wins_b) as f64);
    let n = a + b + c + d;

    let denom = (a + b) * (c + d) * (a + c) * (b + d);
    if denom == 0.0 {
        return 1.0;
    }

    let chi2 = n * (a * d - b * c).powi(2) / denom;
    match ChiSquared::new(1.0) {
        Ok(dist) => 1.0 - dist.cdf(chi2),
        Err(_) => 1.0,
    }
}

/// Combined two-sample p-value for a bucket-vs-rest comparison: the stronger
/// of Welch's t on ROI and chi-square on win rate.
pub fn two_sample_p_value(bucket: &ArmStats, rest: &ArmStats) -> f64 {
    let p_roi = welch_t_test(&bucket.rois, &rest.rois);
    let p_win = chi_square_test(bucket.wins, bucket.n, rest.wins, rest.n);
    p_roi.min(p_win)
}

/// Applies the configured gates to a bucket-vs-baseline comparison.
pub struct StatisticalValidator {
    config: LearningConfig,
}

impl StatisticalValidator {
    pub fn new(config: LearningConfig) -> Self {
        Self { config }
    }

    /// Validate a two-arm comparison (e.g. pattern bucket vs. the rest, or
    /// trades before vs. after a parameter change).
    pub fn validate(&self, arm_a: &ArmStats, arm_b: &ArmStats) -> Validation {
        let p_value = two_sample_p_value(arm_a, arm_b);
        let roi_effect = arm_a.avg_roi() - arm_b.avg_roi();

        Validation {
            p_value,
            roi_effect,
            sample_ok: arm_a.n >= self.config.min_sample_size
                && arm_b.n >= self.config.min_sample_size,
            p_ok: p_value < self.config.p_value_threshold,
            effect_ok: roi_effect.abs() >= self.config.min_effect_size,
        }
    }

    /// Re-check a detected pattern against the configured gates.
    pub fn validate_pattern(&self, pattern: &DetectedPattern) -> bool {
        pattern.sample_size >= self.config.min_sample_size
            && pattern.p_value < self.config.p_value_threshold
            && pattern.effect_size.abs() >= self.config.min_effect_size
            && pattern.is_significant()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::TradeObservation;
    use crate::snapshots::{EntrySnapshot, ExitSnapshot};

    fn obs(win: bool, roi: f64) -> TradeObservation {
        TradeObservation {
            win,
            roi,
            entry: EntrySnapshot::default(),
            exit: ExitSnapshot::default(),
        }
    }

    fn arm(wins: usize, losses: usize, win_roi: f64, loss_roi: f64) -> ArmStats {
        let mut stats = ArmStats::default();
        for i in 0..wins {
            // Small deterministic jitter keeps the variance nonzero.
            stats.push(&obs(true, win_roi + i as f64 * 1e-3));
        }
        for i in 0..losses {
            stats.push(&obs(false, loss_roi - i as f64 * 1e-3));
        }
        stats
    }

    #[test]
    fn welch_separates_distinct_means() {
        let a: Vec<f64> = (0..30).map(|i| 0.50 + i as f64 * 1e-3).collect();
        let b: Vec<f64> = (0..30).map(|i| -0.50 - i as f64 * 1e-3).collect();
        assert!(welch_t_test(&a, &b) < 0.001);
    }

    #[test]
    fn welch_same_distribution_not_significant() {
        let a: Vec<f64> = (0..30).map(|i| (i as f64 * 0.7).sin()).collect();
        assert!(welch_t_test(&a, &a) > 0.9);
    }

    #[test]
    fn welch_degenerate_inputs() {
        assert_eq!(welch_t_test(&[1.0], &[2.0, 3.0]), 1.0);
        // Identical constants: means agree, p = 1.
        assert_eq!(welch_t_test(&[1.0, 1.0], &[1.0, 1.0]), 1.0);
        // Distinct constants: unambiguously different.
        assert_eq!(welch_t_test(&[1.0, 1.0], &[2.0, 2.0]), 0.0);
    }

    #[test]
    fn chi_square_detects_lopsided_table() {
        // 28/30 vs 5/30 is overwhelming.
        assert!(chi_square_test(28, 30, 5, 30) < 0.001);
        // Identical rates are not.
        assert!(chi_square_test(15, 30, 15, 30) > 0.9);
        // Degenerate arms.
        assert_eq!(chi_square_test(0, 0, 15, 30), 1.0);
    }

    #[test]
    fn validator_gates_compose() {
        let validator = StatisticalValidator::new(LearningConfig::default());

        // 30 vs 30, clearly separated ROI distributions.
        let strong_a = arm(20, 10, 0.50, -2.0);
        let strong_b = arm(15, 15, 0.50, -2.0);
        let v = validator.validate(&strong_a, &strong_b);
        assert!(v.sample_ok);
        assert!(v.roi_effect.abs() > 0.005);

        // Too-small arms fail the sample gate no matter how clean the data.
        let small_a = arm(10, 5, 0.50, -2.0);
        let small_b = arm(7, 8, 0.50, -2.0);
        let v = validator.validate(&small_a, &small_b);
        assert!(!v.sample_ok);
        assert!(!v.passes());
    }

    #[test]
    fn uptrend_filter_experiment_reaches_significance_at_30_per_arm() {
        // Scenario: 30 trades with the default strategy (win rate ~0.65,
        // losers exit shallow on the time rule) vs 30 with
        // require_uptrend=false (win rate 0.50, losers ride to the -200%
        // stop). The ROI distributions separate cleanly.
        let baseline = arm(20, 10, 0.50, -0.25);
        let no_filter = arm(15, 15, 0.50, -2.0);

        let p = two_sample_p_value(&baseline, &no_filter);
        assert!(p < 0.05, "expected significance, got p = {p}");

        let validator = StatisticalValidator::new(LearningConfig::default());
        let v = validator.validate(&baseline, &no_filter);
        assert!(v.passes(), "expected all gates to pass: {v:?}");

        // The same observation at 15 per arm must NOT be significant.
        let small_base = arm(10, 5, 0.50, -0.25);
        let small_no_filter = arm(7, 8, 0.50, -2.0);
        assert!(!validator.validate(&small_base, &small_no_filter).passes());
    }
}
