// =============================================================================
// Bollinger Bands
// =============================================================================
//
// A middle band (SMA), an upper band (SMA + k*σ), and a lower band
// (SMA - k*σ). The snapshot also records the normalised band position:
//   position = (price - lower) / (upper - lower)
// 0 sits on the lower band, 1 on the upper; values can exceed the range when
// price breaks out of the bands.
// =============================================================================

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Where the latest close sits between the bands (0 = lower, 1 = upper).
    pub position: f64,
}

/// Calculate Bollinger Bands over the trailing `period` closes.
///
/// Returns `None` when:
/// - `period` is zero or there are fewer than `period` closes.
/// - The middle band is zero (degenerate input).
/// - Any value is non-finite.
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    if middle == 0.0 || !middle.is_finite() {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;

    let last = *closes.last()?;
    let band_span = upper - lower;
    // A flat series collapses the bands; report the midpoint.
    let position = if band_span > 0.0 {
        (last - lower) / band_span
    } else {
        0.5
    };

    (upper.is_finite() && lower.is_finite() && position.is_finite()).then_some(BollingerBands {
        upper,
        middle,
        lower,
        position,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic_shape() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        // Latest close (20.0) is near the top of a rising window.
        assert!(bb.position > 0.5);
    }

    #[test]
    fn bollinger_insufficient_data() {
        assert!(calculate_bollinger(&[1.0, 2.0, 3.0], 20, 2.0).is_none());
        assert!(calculate_bollinger(&[1.0, 2.0, 3.0], 0, 2.0).is_none());
    }

    #[test]
    fn bollinger_flat_market_midpoint() {
        let closes = vec![100.0; 20];
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!((bb.upper - bb.lower).abs() < 1e-10);
        assert!((bb.position - 0.5).abs() < 1e-10);
    }

    #[test]
    fn bollinger_position_at_band_extremes() {
        // A close sitting exactly on the lower band scores 0.
        let mut closes = vec![100.0, 102.0, 98.0, 101.0, 99.0, 103.0, 97.0, 100.0, 102.0, 98.0];
        closes.push(80.0); // hard sell-off in the window
        let bb = calculate_bollinger(&closes, 11, 2.0).unwrap();
        assert!(bb.position < 0.2, "sell-off close should sit low, got {}", bb.position);
    }
}
