//! Circuit breaker policy over per-room recovery state
//!
//! Trips on either an absolute attempt cap or too many attempts inside a
//! sliding window. The coordinator owns what happens after a trip (locking
//! the room); this module only decides.

use crate::tracker::RecoveryState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why the breaker tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TripReason {
    /// `attempt_count >= max_attempts`
    MaxAttempts,
    /// `rate_limit` attempts inside `rate_window`
    RateLimit,
}

/// Trip thresholds for one error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub max_attempts: u32,
    pub rate_limit: usize,
    pub rate_window: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            rate_limit: 5,
            rate_window: Duration::from_secs(60),
        }
    }
}

impl BreakerPolicy {
    /// Decide whether the breaker should trip for this state at `now`
    pub fn should_trip(&self, state: &RecoveryState, now: u64) -> Option<TripReason> {
        if state.attempt_count >= self.max_attempts {
            return Some(TripReason::MaxAttempts);
        }
        if state.attempts_within(now, self.rate_window) >= self.rate_limit {
            return Some(TripReason::RateLimit);
        }
        None
    }

    pub fn trips(&self, state: &RecoveryState, now: u64) -> bool {
        self.should_trip(state, now).is_some()
    }
}
