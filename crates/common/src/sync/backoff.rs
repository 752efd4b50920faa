use std::time::Duration;

use rand::Rng;

/// Exponential backoff with random jitter
///
/// Attempt `n` (1-based) waits `base * 2^(n-1)` plus up to `base` of jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let scaled = self.base.saturating_mul(1 << exp);
        let base_ms = self.base.as_millis() as u64;
        let jitter = if base_ms > 0 {
            rand::rng().random_range(0..base_ms)
        } else {
            0
        };
        scaled.saturating_add(Duration::from_millis(jitter))
    }
}
