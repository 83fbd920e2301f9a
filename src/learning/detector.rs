// =============================================================================
// Pattern Detector — entry-feature dimensions
// =============================================================================
//
// Buckets the closed-trade dataset across ~19 entry dimensions and compares
// each bucket against the rest of the dataset. Buckets below the sample
// floor are skipped; everything else is emitted as a DetectedPattern (the
// significance flag is a property of the pattern, not an emission filter).
// =============================================================================

use tracing::info;

use crate::config::LearningConfig;
use crate::learning::{analyze_dimensions, DetectedPattern, Dimension, TradeObservation};

fn delta_bucket(obs: &TradeObservation) -> Option<String> {
    let d = obs.entry.delta?.abs();
    Some(match d {
        x if x < 0.10 => "delta 0.00..0.10".to_string(),
        x if x < 0.20 => "delta 0.10..0.20".to_string(),
        x if x < 0.30 => "delta 0.20..0.30".to_string(),
        _ => "delta 0.30+".to_string(),
    })
}

fn iv_rank_bucket(obs: &TradeObservation) -> Option<String> {
    let r = obs.entry.iv_rank?;
    Some(match r {
        x if x < 25.0 => "iv_rank 0..25".to_string(),
        x if x < 50.0 => "iv_rank 25..50".to_string(),
        x if x < 75.0 => "iv_rank 50..75".to_string(),
        _ => "iv_rank 75..100".to_string(),
    })
}

fn dte_bucket(obs: &TradeObservation) -> Option<String> {
    let dte = obs.entry.dte?;
    Some(match dte {
        x if x <= 7 => "dte 0..7".to_string(),
        x if x <= 14 => "dte 8..14".to_string(),
        x if x <= 30 => "dte 15..30".to_string(),
        _ => "dte 30+".to_string(),
    })
}

fn vix_bucket(obs: &TradeObservation) -> Option<String> {
    let vix = obs.entry.vix?;
    Some(match vix {
        x if x < 15.0 => "vix <15".to_string(),
        x if x < 20.0 => "vix 15..20".to_string(),
        x if x < 30.0 => "vix 20..30".to_string(),
        _ => "vix 30+".to_string(),
    })
}

fn trend_bucket(obs: &TradeObservation) -> Option<String> {
    obs.entry.trend_direction.map(|t| t.as_str().to_string())
}

fn day_of_week_bucket(obs: &TradeObservation) -> Option<String> {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    let dow = obs.entry.day_of_week? as usize;
    DAYS.get(dow).map(|d| (*d).to_string())
}

fn sector_bucket(obs: &TradeObservation) -> Option<String> {
    obs.entry.sector.clone()
}

fn rsi_bucket(obs: &TradeObservation) -> Option<String> {
    let rsi = obs.entry.rsi_14?;
    Some(match rsi {
        x if x < 30.0 => "rsi oversold".to_string(),
        x if x > 70.0 => "rsi overbought".to_string(),
        _ => "rsi neutral".to_string(),
    })
}

fn macd_histogram_bucket(obs: &TradeObservation) -> Option<String> {
    let h = obs.entry.macd_histogram?;
    Some(if h >= 0.0 {
        "macd_histogram positive".to_string()
    } else {
        "macd_histogram negative".to_string()
    })
}

fn adx_bucket(obs: &TradeObservation) -> Option<String> {
    let adx = obs.entry.adx?;
    Some(match adx {
        x if x < 20.0 => "adx weak".to_string(),
        x if x < 25.0 => "adx moderate".to_string(),
        _ => "adx strong".to_string(),
    })
}

fn bollinger_bucket(obs: &TradeObservation) -> Option<String> {
    let pos = obs.entry.bb_position?;
    Some(match pos {
        x if x < 0.2 => "bb lower".to_string(),
        x if x > 0.8 => "bb upper".to_string(),
        _ => "bb middle".to_string(),
    })
}

fn support_proximity_bucket(obs: &TradeObservation) -> Option<String> {
    let dist = obs.entry.distance_to_support_pct?;
    Some(match dist {
        x if x < 2.0 => "support near".to_string(),
        x if x < 5.0 => "support moderate".to_string(),
        _ => "support far".to_string(),
    })
}

fn atr_bucket(obs: &TradeObservation) -> Option<String> {
    let atr = obs.entry.atr_pct?;
    Some(match atr {
        x if x < 1.0 => "atr low".to_string(),
        x if x < 2.0 => "atr medium".to_string(),
        _ => "atr high".to_string(),
    })
}

fn vol_regime_bucket(obs: &TradeObservation) -> Option<String> {
    obs.entry.vol_regime.map(|r| format!("vol {r}"))
}

fn market_regime_bucket(obs: &TradeObservation) -> Option<String> {
    obs.entry.market_regime.map(|r| format!("market {r}"))
}

fn opex_bucket(obs: &TradeObservation) -> Option<String> {
    obs.entry
        .is_opex_week
        .map(|o| if o { "opex week" } else { "non-opex week" }.to_string())
}

fn fomc_bucket(obs: &TradeObservation) -> Option<String> {
    let days = obs.entry.days_to_fomc?;
    Some(match days {
        x if x <= 3 => "fomc <=3d".to_string(),
        x if x <= 10 => "fomc 4..10d".to_string(),
        _ => "fomc 10d+".to_string(),
    })
}

fn earnings_timing_bucket(obs: &TradeObservation) -> Option<String> {
    obs.entry
        .earnings_timing
        .map(|t| format!("earnings {t}"))
}

fn breadth_bucket(obs: &TradeObservation) -> Option<String> {
    let chg = obs.entry.spy_change_pct?;
    Some(match chg {
        x if x > 0.3 => "breadth advancing".to_string(),
        x if x < -0.3 => "breadth declining".to_string(),
        _ => "breadth flat".to_string(),
    })
}

/// The entry-feature dimensions.
pub const ENTRY_DIMENSIONS: &[Dimension] = &[
    Dimension { name: "delta_bucket", bucket: delta_bucket },
    Dimension { name: "iv_rank_bucket", bucket: iv_rank_bucket },
    Dimension { name: "dte_bucket", bucket: dte_bucket },
    Dimension { name: "vix_bucket", bucket: vix_bucket },
    Dimension { name: "trend_direction", bucket: trend_bucket },
    Dimension { name: "day_of_week", bucket: day_of_week_bucket },
    Dimension { name: "sector", bucket: sector_bucket },
    Dimension { name: "rsi_regime", bucket: rsi_bucket },
    Dimension { name: "macd_histogram", bucket: macd_histogram_bucket },
    Dimension { name: "adx_bucket", bucket: adx_bucket },
    Dimension { name: "bollinger_position", bucket: bollinger_bucket },
    Dimension { name: "support_proximity", bucket: support_proximity_bucket },
    Dimension { name: "atr_bucket", bucket: atr_bucket },
    Dimension { name: "vol_regime", bucket: vol_regime_bucket },
    Dimension { name: "market_regime", bucket: market_regime_bucket },
    Dimension { name: "opex_week", bucket: opex_bucket },
    Dimension { name: "fomc_proximity", bucket: fomc_bucket },
    Dimension { name: "earnings_timing", bucket: earnings_timing_bucket },
    Dimension { name: "market_breadth", bucket: breadth_bucket },
];

/// Run the entry-feature pass over the dataset.
pub fn detect_entry_patterns(
    observations: &[TradeObservation],
    config: &LearningConfig,
) -> Vec<DetectedPattern> {
    let patterns = analyze_dimensions(observations, ENTRY_DIMENSIONS, "entry", config);
    info!(
        observations = observations.len(),
        patterns = patterns.len(),
        significant = patterns.iter().filter(|p| p.is_significant()).count(),
        "entry-pattern detection complete"
    );
    patterns
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshots::{EntrySnapshot, ExitSnapshot};
    use crate::types::TrendDirection;

    fn obs(win: bool, roi: f64, trend: TrendDirection) -> TradeObservation {
        let mut entry = EntrySnapshot::default();
        entry.trend_direction = Some(trend);
        entry.delta = Some(-0.15);
        TradeObservation {
            win,
            roi,
            entry,
            exit: ExitSnapshot::default(),
        }
    }

    /// 30 uptrend trades (20 shallow winners) vs 30 downtrend trades
    /// (15 deep stop-outs) — the engineered version of the uptrend-filter
    /// experiment.
    fn engineered_dataset() -> Vec<TradeObservation> {
        let mut dataset = Vec::new();
        for i in 0..30 {
            let win = i < 20;
            let roi = if win { 0.50 + i as f64 * 1e-3 } else { -0.25 };
            dataset.push(obs(win, roi, TrendDirection::Uptrend));
        }
        for i in 0..30 {
            let win = i < 15;
            let roi = if win { 0.50 + i as f64 * 1e-3 } else { -2.0 };
            dataset.push(obs(win, roi, TrendDirection::Downtrend));
        }
        dataset
    }

    #[test]
    fn trend_dimension_detects_the_engineered_split() {
        let config = LearningConfig::default();
        let patterns = detect_entry_patterns(&engineered_dataset(), &config);

        let uptrend = patterns
            .iter()
            .find(|p| p.pattern_type == "entry:trend_direction" && p.pattern_name == "uptrend")
            .expect("uptrend pattern missing");

        assert_eq!(uptrend.sample_size, 30);
        assert!((uptrend.win_rate - 20.0 / 30.0).abs() < 1e-9);
        assert!(uptrend.p_value < 0.05, "p = {}", uptrend.p_value);
        assert!(uptrend.is_significant());
    }

    #[test]
    fn small_samples_never_reach_significance() {
        let config = LearningConfig::default();
        // Same shape, 15 trades per arm: below the sample floor, so the
        // trend dimension emits nothing at all.
        let mut dataset = Vec::new();
        for i in 0..15 {
            dataset.push(obs(i < 10, if i < 10 { 0.5 } else { -0.25 }, TrendDirection::Uptrend));
        }
        for i in 0..15 {
            dataset.push(obs(i < 7, if i < 7 { 0.5 } else { -2.0 }, TrendDirection::Downtrend));
        }
        let patterns = detect_entry_patterns(&dataset, &config);
        assert!(patterns
            .iter()
            .all(|p| p.pattern_type != "entry:trend_direction"));
    }

    #[test]
    fn missing_fields_drop_from_their_dimension_only() {
        let config = LearningConfig {
            min_sample_size: 5,
            ..LearningConfig::default()
        };
        // No iv_rank anywhere: that dimension emits nothing, delta does.
        let dataset: Vec<TradeObservation> = (0..10)
            .map(|i| obs(i % 2 == 0, if i % 2 == 0 { 0.4 } else { -0.4 }, TrendDirection::Uptrend))
            .collect();
        let patterns = detect_entry_patterns(&dataset, &config);
        assert!(patterns.iter().any(|p| p.pattern_type == "entry:delta_bucket"));
        assert!(patterns.iter().all(|p| p.pattern_type != "entry:iv_rank_bucket"));
    }

    #[test]
    fn empty_dataset_is_quiet() {
        let config = LearningConfig::default();
        assert!(detect_entry_patterns(&[], &config).is_empty());
    }
}
