// =============================================================================
// Request Pacer — minimum-gap spacing between bursty broker calls
// =============================================================================
//
// The gateway throttles rapid-fire requests. Two call classes need spacing:
//   - Per-expiration qualification batches: >= 200 ms apart.
//   - Stock screening (quote/history sweeps): >= 100 ms apart.
//
// A `Pacer` tracks the last send time and sleeps the remainder of the gap
// before letting the next call through.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

/// Minimum gap between contract-qualification batches.
pub const QUALIFY_BATCH_GAP: Duration = Duration::from_millis(200);
/// Minimum gap between per-symbol screening calls.
pub const SCREEN_CALL_GAP: Duration = Duration::from_millis(100);

/// Enforces a minimum interval between consecutive calls.
pub struct Pacer {
    min_gap: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_call: Mutex::new(None),
        }
    }

    /// Sleep until at least `min_gap` has passed since the previous `pace`
    /// call, then stamp the current time. The first call never sleeps.
    pub async fn pace(&self) {
        let wait = {
            let mut last = self.last_call.lock();
            let now = Instant::now();
            let wait = match *last {
                Some(prev) => {
                    let elapsed = now.duration_since(prev);
                    self.min_gap.checked_sub(elapsed).unwrap_or(Duration::ZERO)
                }
                None => Duration::ZERO,
            };
            // Stamp the slot we are about to occupy so concurrent callers
            // queue behind us rather than racing into the same gap.
            *last = Some(now + wait);
            wait
        };

        if !wait.is_zero() {
            trace!(wait_ms = wait.as_millis() as u64, "pacing broker call");
            tokio::time::sleep(wait).await;
        }
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("min_gap_ms", &self.min_gap.as_millis())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_call_is_immediate() {
        let pacer = Pacer::new(Duration::from_millis(200));
        let start = Instant::now();
        pacer.pace().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn second_call_waits_out_the_gap() {
        let pacer = Pacer::new(Duration::from_millis(100));
        let start = Instant::now();
        pacer.pace().await;
        pacer.pace().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn gap_already_elapsed_means_no_sleep() {
        let pacer = Pacer::new(Duration::from_millis(30));
        pacer.pace().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let start = Instant::now();
        pacer.pace().await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
