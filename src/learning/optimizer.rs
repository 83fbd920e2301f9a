// =============================================================================
// Parameter Optimizer — from validated patterns to versioned config changes
// =============================================================================
//
// Translates significant patterns into concrete strategy adjustments.
// High-confidence proposals (> auto_apply_confidence) are applied
// immediately and recorded; the rest are recorded awaiting approval. Every
// change is versioned in the store so rollback is a single call.
// =============================================================================

use tracing::{info, warn};

use crate::config::{LearningConfig, StrategyConfig};
use crate::learning::DetectedPattern;
use crate::store::Store;

/// Win-rate deficit vs. baseline before a bucket is treated as harmful.
const HARMFUL_EDGE: f64 = 0.05;

/// A proposed change to the strategy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedAdjustment {
    pub parameter: String,
    pub current_value: String,
    pub proposed_value: String,
    pub rationale: String,
    pub confidence: f64,
    pub source_pattern: String,
    /// Confidence cleared the auto-apply bar.
    pub auto_apply: bool,
}

pub struct ParameterOptimizer {
    config: LearningConfig,
}

impl ParameterOptimizer {
    pub fn new(config: LearningConfig) -> Self {
        Self { config }
    }

    /// Derive proposals from significant patterns against the current
    /// strategy configuration.
    pub fn propose(
        &self,
        patterns: &[DetectedPattern],
        strategy: &StrategyConfig,
    ) -> Vec<ProposedAdjustment> {
        let mut proposals = Vec::new();

        for pattern in patterns.iter().filter(|p| p.is_significant()) {
            let edge = pattern.win_rate - pattern.baseline_win_rate;

            // Harmful sector -> add to the avoid list.
            if pattern.pattern_type == "entry:sector" && edge <= -HARMFUL_EDGE {
                let sector = pattern.pattern_name.clone();
                if !strategy.avoid_sectors.contains(&sector) {
                    proposals.push(self.adjustment(
                        "avoid_sectors",
                        format!("{:?}", strategy.avoid_sectors),
                        sector.clone(),
                        format!(
                            "{sector} win rate {:.0}% vs baseline {:.0}%",
                            pattern.win_rate * 100.0,
                            pattern.baseline_win_rate * 100.0
                        ),
                        pattern,
                    ));
                }
            }

            // OpEx weeks hurt -> skip them.
            if pattern.pattern_type == "entry:opex_week"
                && pattern.pattern_name == "opex week"
                && edge <= -HARMFUL_EDGE
                && !strategy.skip_opex_week
            {
                proposals.push(self.adjustment(
                    "skip_opex_week",
                    "false".to_string(),
                    "true".to_string(),
                    format!(
                        "opex-week entries win {:.0}% vs baseline {:.0}%",
                        pattern.win_rate * 100.0,
                        pattern.baseline_win_rate * 100.0
                    ),
                    pattern,
                ));
            }

            // Sub-week expirations hurt -> raise the DTE floor.
            if pattern.pattern_type == "entry:dte_bucket"
                && pattern.pattern_name == "dte 0..7"
                && edge <= -HARMFUL_EDGE
                && strategy.dte_min < 8
            {
                proposals.push(self.adjustment(
                    "dte_min",
                    strategy.dte_min.to_string(),
                    "8".to_string(),
                    "short-dated entries underperform".to_string(),
                    pattern,
                ));
            }

            // High-delta entries hurt -> widen the OTM cushion.
            if pattern.pattern_type == "entry:delta_bucket"
                && pattern.pattern_name == "delta 0.30+"
                && edge <= -HARMFUL_EDGE
            {
                let proposed = (strategy.otm_min + 0.01).min(strategy.otm_max);
                if proposed > strategy.otm_min {
                    proposals.push(self.adjustment(
                        "otm_min",
                        format!("{:.2}", strategy.otm_min),
                        format!("{proposed:.2}"),
                        "high-delta entries underperform, widening OTM floor".to_string(),
                        pattern,
                    ));
                }
            }
        }

        info!(
            significant = patterns.iter().filter(|p| p.is_significant()).count(),
            proposals = proposals.len(),
            "optimizer pass complete"
        );
        proposals
    }

    fn adjustment(
        &self,
        parameter: &str,
        current: String,
        proposed: String,
        rationale: String,
        pattern: &DetectedPattern,
    ) -> ProposedAdjustment {
        ProposedAdjustment {
            parameter: parameter.to_string(),
            current_value: current,
            proposed_value: proposed,
            rationale,
            confidence: pattern.confidence,
            source_pattern: format!("{} / {}", pattern.pattern_type, pattern.pattern_name),
            auto_apply: pattern.confidence > self.config.auto_apply_confidence,
        }
    }

    /// Record every proposal and apply the auto-apply ones to `strategy`.
    /// Returns the number applied.
    pub fn apply(
        &self,
        proposals: &[ProposedAdjustment],
        strategy: &mut StrategyConfig,
        store: &Store,
    ) -> anyhow::Result<usize> {
        let mut applied = 0;

        for proposal in proposals {
            store.record_parameter_change(
                &proposal.parameter,
                &proposal.current_value,
                &proposal.proposed_value,
                proposal.confidence,
                proposal.auto_apply,
                proposal.auto_apply, // auto-applied changes are self-approved
            )?;

            if !proposal.auto_apply {
                info!(
                    parameter = %proposal.parameter,
                    proposed = %proposal.proposed_value,
                    confidence = proposal.confidence,
                    "proposal recorded, awaiting approval"
                );
                continue;
            }

            match apply_to_strategy(proposal, strategy) {
                Ok(()) => {
                    applied += 1;
                    info!(
                        parameter = %proposal.parameter,
                        value = %proposal.proposed_value,
                        "parameter auto-applied"
                    );
                }
                Err(e) => warn!(
                    parameter = %proposal.parameter,
                    error = %e,
                    "failed to apply proposal"
                ),
            }
        }

        Ok(applied)
    }

    /// Roll the newest change for `parameter` back onto the strategy.
    pub fn rollback(
        &self,
        parameter: &str,
        strategy: &mut StrategyConfig,
        store: &Store,
    ) -> anyhow::Result<bool> {
        let Some(old_value) = store.rollback_parameter(parameter)? else {
            return Ok(false);
        };
        let proposal = ProposedAdjustment {
            parameter: parameter.to_string(),
            current_value: String::new(),
            proposed_value: old_value,
            rationale: "rollback".to_string(),
            confidence: 1.0,
            source_pattern: "rollback".to_string(),
            auto_apply: true,
        };
        apply_to_strategy(&proposal, strategy)?;
        info!(parameter, "parameter rolled back");
        Ok(true)
    }

    /// Plain-text weekly report of patterns and proposals.
    pub fn weekly_report(
        &self,
        patterns: &[DetectedPattern],
        proposals: &[ProposedAdjustment],
    ) -> String {
        let mut out = String::from("=== Weekly Learning Report ===\n\nSignificant patterns:\n");
        let significant: Vec<&DetectedPattern> =
            patterns.iter().filter(|p| p.is_significant()).collect();

        if significant.is_empty() {
            out.push_str("  (none)\n");
        }
        for p in &significant {
            out.push_str(&format!(
                "  [{}] {} — n={}, win {:.0}% vs {:.0}%, roi {:+.2} vs {:+.2}, p={:.4}\n",
                p.pattern_type,
                p.pattern_name,
                p.sample_size,
                p.win_rate * 100.0,
                p.baseline_win_rate * 100.0,
                p.avg_roi,
                p.baseline_roi,
                p.p_value,
            ));
        }

        out.push_str("\nProposed adjustments:\n");
        if proposals.is_empty() {
            out.push_str("  (none)\n");
        }
        for a in proposals {
            out.push_str(&format!(
                "  {} {} -> {} ({}; confidence {:.2}{})\n",
                a.parameter,
                a.current_value,
                a.proposed_value,
                a.rationale,
                a.confidence,
                if a.auto_apply { ", auto-applied" } else { "" },
            ));
        }
        out
    }
}

/// Apply one recognised proposal to the strategy config.
fn apply_to_strategy(
    proposal: &ProposedAdjustment,
    strategy: &mut StrategyConfig,
) -> anyhow::Result<()> {
    match proposal.parameter.as_str() {
        "avoid_sectors" => {
            if !strategy.avoid_sectors.contains(&proposal.proposed_value) {
                strategy.avoid_sectors.push(proposal.proposed_value.clone());
            }
            Ok(())
        }
        "skip_opex_week" => {
            strategy.skip_opex_week = proposal.proposed_value.parse()?;
            Ok(())
        }
        "dte_min" => {
            strategy.dte_min = proposal.proposed_value.parse()?;
            Ok(())
        }
        "otm_min" => {
            strategy.otm_min = proposal.proposed_value.parse()?;
            Ok(())
        }
        other => anyhow::bail!("unrecognised parameter: {other}"),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(
        pattern_type: &str,
        name: &str,
        win_rate: f64,
        baseline: f64,
        confidence: f64,
    ) -> DetectedPattern {
        DetectedPattern {
            pattern_type: pattern_type.into(),
            pattern_name: name.into(),
            sample_size: 40,
            win_rate,
            avg_roi: -0.2,
            baseline_win_rate: baseline,
            baseline_roi: 0.1,
            p_value: 0.01,
            confidence,
            effect_size: -0.3,
            predicates: vec![],
            min_samples: 30,
        }
    }

    #[test]
    fn harmful_sector_proposes_avoidance() {
        let optimizer = ParameterOptimizer::new(LearningConfig::default());
        let strategy = StrategyConfig::default();
        let patterns = vec![pattern("entry:sector", "Energy", 0.40, 0.65, 0.95)];

        let proposals = optimizer.propose(&patterns, &strategy);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].parameter, "avoid_sectors");
        assert_eq!(proposals[0].proposed_value, "Energy");
        assert!(proposals[0].auto_apply);
    }

    #[test]
    fn low_confidence_proposals_wait_for_approval() {
        let optimizer = ParameterOptimizer::new(LearningConfig::default());
        let strategy = StrategyConfig::default();
        let patterns = vec![pattern("entry:opex_week", "opex week", 0.45, 0.65, 0.80)];

        let proposals = optimizer.propose(&patterns, &strategy);
        assert_eq!(proposals.len(), 1);
        assert!(!proposals[0].auto_apply);
    }

    #[test]
    fn insignificant_patterns_propose_nothing() {
        let optimizer = ParameterOptimizer::new(LearningConfig::default());
        let strategy = StrategyConfig::default();
        let mut weak = pattern("entry:sector", "Energy", 0.40, 0.65, 0.95);
        weak.sample_size = 10; // below the floor
        assert!(optimizer.propose(&[weak], &strategy).is_empty());
    }

    #[test]
    fn apply_and_rollback_roundtrip() {
        let optimizer = ParameterOptimizer::new(LearningConfig::default());
        let store = Store::open_in_memory().unwrap();
        let mut strategy = StrategyConfig::default();

        let patterns = vec![pattern("entry:opex_week", "opex week", 0.45, 0.65, 0.95)];
        let proposals = optimizer.propose(&patterns, &strategy);
        let applied = optimizer.apply(&proposals, &mut strategy, &store).unwrap();

        assert_eq!(applied, 1);
        assert!(strategy.skip_opex_week);

        let rolled = optimizer
            .rollback("skip_opex_week", &mut strategy, &store)
            .unwrap();
        assert!(rolled);
        assert!(!strategy.skip_opex_week);
    }

    #[test]
    fn weekly_report_mentions_patterns_and_proposals() {
        let optimizer = ParameterOptimizer::new(LearningConfig::default());
        let strategy = StrategyConfig::default();
        let patterns = vec![pattern("entry:sector", "Energy", 0.40, 0.65, 0.95)];
        let proposals = optimizer.propose(&patterns, &strategy);

        let report = optimizer.weekly_report(&patterns, &proposals);
        assert!(report.contains("Energy"));
        assert!(report.contains("avoid_sectors"));
        assert!(report.contains("auto-applied"));
    }
}
