//! Retry policy shared by the poller, classifier, and substrate adapters:
//! bounded exponential backoff with full jitter. Rate-limit signals consume
//! the advertised sleep period instead of a retry slot.

use rand::Rng;
use std::time::Duration;

pub const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    cap_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: BASE_DELAY_MS,
            cap_ms: MAX_DELAY_MS,
        }
    }
}

impl Backoff {
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self { base_ms, cap_ms }
    }

    /// Full-jitter delay for a zero-based attempt number: uniform in
    /// [0, min(cap, base * 2^attempt)].
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self
            .base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.cap_ms);
        let jittered = rand::thread_rng().gen_range(0..=ceiling);
        Duration::from_millis(jittered)
    }
}

/// Jitter a poll interval by +/- 10% so many repos do not tick in lockstep.
pub fn jittered_interval(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms == 0 {
        return base;
    }
    let spread = base_ms / 10;
    let jittered = rand::thread_rng().gen_range(base_ms.saturating_sub(spread)..=base_ms + spread);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_bounded_by_cap() {
        let backoff = Backoff::default();
        for attempt in 0..20 {
            assert!(backoff.delay(attempt) <= Duration::from_millis(MAX_DELAY_MS));
        }
    }

    #[test]
    fn delay_ceiling_grows_with_attempts() {
        let backoff = Backoff::new(1_000, 60_000);
        // Statistical bound: with full jitter the sample is within [0, ceiling].
        for _ in 0..50 {
            assert!(backoff.delay(0) <= Duration::from_millis(1_000));
            assert!(backoff.delay(2) <= Duration::from_millis(4_000));
        }
    }

    #[test]
    fn jittered_interval_stays_within_ten_percent() {
        let base = Duration::from_secs(300);
        for _ in 0..50 {
            let d = jittered_interval(base);
            assert!(d >= Duration::from_secs(270) && d <= Duration::from_secs(330));
        }
    }
}
