// =============================================================================
// Support / Resistance Levels — swing-point detection
// =============================================================================
//
// A swing low is a bar whose low is the minimum of its `wing`-bar
// neighbourhood on both sides; swing highs mirror that with bar highs. The
// two most recent swing lows below spot become support_1/support_2 and the
// two most recent swing highs above spot become resistance_1/resistance_2.
// =============================================================================

use crate::broker::api::Bar;

/// Bars on each side a swing point must dominate.
const SWING_WING: usize = 2;

/// Detected support and resistance levels around the current price.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Levels {
    pub support_1: Option<f64>,
    pub support_2: Option<f64>,
    pub resistance_1: Option<f64>,
    pub resistance_2: Option<f64>,
}

impl Levels {
    /// Distance from `price` down to the nearest support, as a percentage of
    /// price. `None` without a detected support.
    pub fn distance_to_support_pct(&self, price: f64) -> Option<f64> {
        let support = self.support_1?;
        if price <= 0.0 {
            return None;
        }
        Some((price - support) / price * 100.0)
    }
}

/// Detect the nearest support/resistance levels from daily bars (oldest
/// first) around `spot`.
pub fn detect_levels(bars: &[Bar], spot: f64) -> Levels {
    if bars.len() < 2 * SWING_WING + 1 {
        return Levels::default();
    }

    let mut swing_lows: Vec<f64> = Vec::new();
    let mut swing_highs: Vec<f64> = Vec::new();

    for i in SWING_WING..bars.len() - SWING_WING {
        let low = bars[i].low;
        let high = bars[i].high;
        let window = &bars[i - SWING_WING..=i + SWING_WING];

        if window.iter().all(|b| low <= b.low) {
            swing_lows.push(low);
        }
        if window.iter().all(|b| high >= b.high) {
            swing_highs.push(high);
        }
    }

    // Nearest-first ordering relative to spot.
    let mut supports: Vec<f64> = swing_lows.into_iter().filter(|&l| l < spot).collect();
    supports.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    supports.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    let mut resistances: Vec<f64> = swing_highs.into_iter().filter(|&h| h > spot).collect();
    resistances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    resistances.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    Levels {
        support_1: supports.first().copied(),
        support_2: supports.get(1).copied(),
        resistance_1: resistances.first().copied(),
        resistance_2: resistances.get(1).copied(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(high: f64, low: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1_000.0,
        }
    }

    /// A zig-zag with obvious valleys at 90 and 94, peaks at 110 and 106.
    fn zigzag() -> Vec<Bar> {
        vec![
            bar(101.0, 99.0),
            bar(103.0, 100.0),
            bar(98.0, 90.0), // swing low 90
            bar(104.0, 101.0),
            bar(110.0, 105.0), // swing high 110
            bar(103.0, 100.0),
            bar(99.0, 94.0), // swing low 94
            bar(104.0, 101.0),
            bar(106.0, 103.0), // swing high 106
            bar(102.0, 100.0),
            bar(103.0, 101.0),
        ]
    }

    #[test]
    fn detects_nearest_supports_and_resistances() {
        let levels = detect_levels(&zigzag(), 100.0);
        assert_eq!(levels.support_1, Some(94.0));
        assert_eq!(levels.support_2, Some(90.0));
        assert_eq!(levels.resistance_1, Some(106.0));
        assert_eq!(levels.resistance_2, Some(110.0));
    }

    #[test]
    fn distance_to_support() {
        let levels = detect_levels(&zigzag(), 100.0);
        let dist = levels.distance_to_support_pct(100.0).unwrap();
        assert!((dist - 6.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_bars_yields_empty_levels() {
        let bars = vec![bar(101.0, 99.0); 3];
        let levels = detect_levels(&bars, 100.0);
        assert_eq!(levels, Levels::default());
        assert!(levels.distance_to_support_pct(100.0).is_none());
    }

    #[test]
    fn all_levels_respect_spot_side() {
        let levels = detect_levels(&zigzag(), 100.0);
        for s in [levels.support_1, levels.support_2].into_iter().flatten() {
            assert!(s < 100.0);
        }
        for r in [levels.resistance_1, levels.resistance_2]
            .into_iter()
            .flatten()
        {
            assert!(r > 100.0);
        }
    }
}
