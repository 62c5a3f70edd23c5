//! Exponential backoff with a ceiling
//!
//! `delay = min(base * 2^retry_count, cap)`, where `retry_count` is
//! zero-based: the first retry waits `base`.

use std::time::Duration;

/// Default base delay (1s)
pub const DEFAULT_BASE: Duration = Duration::from_millis(1000);

/// Default delay ceiling (15s)
pub const DEFAULT_CAP: Duration = Duration::from_millis(15_000);

/// Compute the delay for a zero-based retry count
///
/// Saturates instead of overflowing, so very large counts yield `cap`.
pub fn delay_for(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    let exp = base_ms.saturating_mul(factor);
    Duration::from_millis(exp).min(cap)
}

/// Same as [`delay_for`], with negative counts treated as zero
pub fn delay_for_signed(retry_count: i64, base: Duration, cap: Duration) -> Duration {
    let count = retry_count.clamp(0, u32::MAX as i64) as u32;
    delay_for(count, base, cap)
}

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            cap: DEFAULT_CAP,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the retry with the given zero-based count
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        delay_for(retry_count, self.base, self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_retry_uses_base() {
        assert_eq!(Backoff::default().delay_for(0), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_growth() {
        let backoff = Backoff::default();
        let delays: Vec<u128> = (0..5).map(|n| backoff.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 15_000]);
    }

    #[test]
    fn test_monotonic_and_capped() {
        let backoff = Backoff::default();
        for n in 0..200 {
            let current = backoff.delay_for(n);
            let next = backoff.delay_for(n + 1);
            assert!(current <= next, "delay_for({}) > delay_for({})", n, n + 1);
            assert!(next <= DEFAULT_CAP);
        }
        assert_eq!(backoff.delay_for(u32::MAX), DEFAULT_CAP);
    }

    #[test]
    fn test_negative_count_treated_as_zero() {
        assert_eq!(
            delay_for_signed(-3, DEFAULT_BASE, DEFAULT_CAP),
            Duration::from_millis(1000)
        );
        assert_eq!(
            delay_for_signed(2, DEFAULT_BASE, DEFAULT_CAP),
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn test_custom_parameters() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(1));
    }
}
