// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line  = EMA(12) - EMA(26)
// Signal     = EMA(9) of the MACD line
// Histogram  = MACD - Signal
//
// The entry snapshot records all three; the learning engine buckets trades by
// the sign and magnitude of the histogram.
// =============================================================================

use crate::indicators::ema::calculate_ema;

/// The three MACD components for the most recent close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdReading {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the latest MACD reading with the standard (12, 26, 9) parameters.
pub fn latest_macd(closes: &[f64]) -> Option<MacdReading> {
    macd_with_params(closes, 12, 26, 9)
}

/// Compute the latest MACD reading with explicit parameters.
///
/// Returns `None` when there is not enough history for the slow EMA plus the
/// signal EMA (slow + signal - 1 closes minimum).
pub fn macd_with_params(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<MacdReading> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return None;
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    if slow_ema.is_empty() {
        return None;
    }

    // Align the two series on their tails: both end at the latest close.
    let n = slow_ema.len().min(fast_ema.len());
    if n == 0 {
        return None;
    }
    let fast_tail = &fast_ema[fast_ema.len() - n..];
    let slow_tail = &slow_ema[slow_ema.len() - n..];

    let macd_line: Vec<f64> = fast_tail
        .iter()
        .zip(slow_tail.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_series = calculate_ema(&macd_line, signal);
    let signal_val = *signal_series.last()?;
    let macd_val = *macd_line.last()?;
    let histogram = macd_val - signal_val;

    if !macd_val.is_finite() || !signal_val.is_finite() {
        return None;
    }

    Some(MacdReading {
        macd: macd_val,
        signal: signal_val,
        histogram,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(latest_macd(&closes).is_none());
    }

    #[test]
    fn macd_degenerate_params() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!(macd_with_params(&closes, 0, 26, 9).is_none());
        assert!(macd_with_params(&closes, 12, 0, 9).is_none());
        assert!(macd_with_params(&closes, 12, 26, 0).is_none());
        // Fast must be faster than slow.
        assert!(macd_with_params(&closes, 26, 12, 9).is_none());
    }

    #[test]
    fn macd_positive_in_steady_uptrend() {
        let closes: Vec<f64> = (1..=120).map(|x| 100.0 + x as f64).collect();
        let reading = latest_macd(&closes).unwrap();
        // Fast EMA above slow EMA while rising.
        assert!(reading.macd > 0.0);
        assert!(
            (reading.histogram - (reading.macd - reading.signal)).abs() < 1e-10
        );
    }

    #[test]
    fn macd_negative_in_steady_downtrend() {
        let closes: Vec<f64> = (1..=120).map(|x| 400.0 - x as f64).collect();
        let reading = latest_macd(&closes).unwrap();
        assert!(reading.macd < 0.0);
    }

    #[test]
    fn macd_flat_market_near_zero() {
        let closes = vec![100.0; 120];
        let reading = latest_macd(&closes).unwrap();
        assert!(reading.macd.abs() < 1e-9);
        assert!(reading.signal.abs() < 1e-9);
        assert!(reading.histogram.abs() < 1e-9);
    }
}
