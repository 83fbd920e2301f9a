// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// The trend classifier compares the latest close against SMA-20 and SMA-50:
// above both => uptrend, below both => downtrend, otherwise sideways.
// =============================================================================

/// SMA over the most recent `period` closes.
///
/// Returns `None` when `period` is zero, there are fewer than `period`
/// closes, or the result is non-finite.
pub fn latest_sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let sma = window.iter().sum::<f64>() / period as f64;
    sma.is_finite().then_some(sma)
}

/// Current price relative to an SMA, as a percentage. Positive means price
/// is above the average.
pub fn price_vs_sma_pct(price: f64, sma: f64) -> Option<f64> {
    if sma == 0.0 {
        return None;
    }
    let pct = (price - sma) / sma * 100.0;
    pct.is_finite().then_some(pct)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_basic() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(latest_sma(&closes, 5), Some(3.0));
        // Only the trailing window counts.
        assert_eq!(latest_sma(&closes, 2), Some(4.5));
    }

    #[test]
    fn sma_insufficient_data() {
        assert_eq!(latest_sma(&[1.0, 2.0], 5), None);
        assert_eq!(latest_sma(&[], 1), None);
        assert_eq!(latest_sma(&[1.0], 0), None);
    }

    #[test]
    fn sma_nan_propagates_to_none() {
        let closes = vec![1.0, f64::NAN, 3.0];
        assert_eq!(latest_sma(&closes, 3), None);
    }

    #[test]
    fn price_vs_sma() {
        assert!((price_vs_sma_pct(110.0, 100.0).unwrap() - 10.0).abs() < 1e-12);
        assert!((price_vs_sma_pct(95.0, 100.0).unwrap() - -5.0).abs() < 1e-12);
        assert_eq!(price_vs_sma_pct(100.0, 0.0), None);
    }
}
