//! Per-room recovery state
//!
//! A `RecoveryState` is created lazily on the first counted error for a
//! room and lives for the rest of the coordinator's lifetime. Only the
//! coordinator mutates it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Recovery phase of a room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryPhase {
    /// No retry pending
    #[default]
    Idle,
    /// A retry has been scheduled and has not fired yet
    Recovering,
    /// The breaker tripped; recovery is suppressed until the lock expires
    Locked,
}

/// Mutable recovery bookkeeping for one room
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryState {
    /// Attempts since the last reset
    pub attempt_count: u32,

    /// Unix ms of the most recent attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<u64>,

    /// Unix ms of recent attempts, oldest first
    pub recent_attempts: VecDeque<u64>,

    /// Recovery is suppressed while `now < locked_until`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<u64>,

    pub phase: RecoveryPhase,
}

impl RecoveryState {
    /// Record an attempt at `now`, evicting the oldest timestamps beyond `history_cap`
    pub fn track_attempt(&mut self, now: u64, history_cap: usize) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.recent_attempts.push_back(now);
        while self.recent_attempts.len() > history_cap {
            self.recent_attempts.pop_front();
        }
        self.attempt_count
    }

    /// Number of attempts strictly inside `window` before `now`
    pub fn attempts_within(&self, now: u64, window: Duration) -> usize {
        let window_ms = window.as_millis() as u64;
        self.recent_attempts
            .iter()
            .filter(|&&ts| now.saturating_sub(ts) < window_ms)
            .count()
    }

    pub fn is_locked(&self, now: u64) -> bool {
        self.locked_until.map(|until| now < until).unwrap_or(false)
    }

    /// A lock was set and has run out
    pub fn lock_expired(&self, now: u64) -> bool {
        self.locked_until.map(|until| now >= until).unwrap_or(false)
    }

    /// Whether `quiet_period` has elapsed since the last attempt
    pub fn is_quiet(&self, now: u64, quiet_period: Duration) -> bool {
        match self.last_attempt_at {
            Some(last) => now.saturating_sub(last) >= quiet_period.as_millis() as u64,
            None => false,
        }
    }

    /// Zero the counter after an error-free quiet period
    ///
    /// Timestamps stay so the rate window still sees them.
    pub fn reset_counter(&mut self) -> u32 {
        let previous = self.attempt_count;
        self.attempt_count = 0;
        if self.phase != RecoveryPhase::Locked {
            self.phase = RecoveryPhase::Idle;
        }
        previous
    }

    /// Lock the room until `until`
    pub fn lock(&mut self, until: u64) {
        self.locked_until = Some(until);
        self.phase = RecoveryPhase::Locked;
    }

    /// Leave an expired lock: back to `Idle` with a fresh counter and window
    pub fn unlock(&mut self) {
        self.locked_until = None;
        self.attempt_count = 0;
        self.recent_attempts.clear();
        self.phase = RecoveryPhase::Idle;
    }

    /// Effective phase at `now`
    pub fn phase_at(&self, now: u64) -> RecoveryPhase {
        if self.is_locked(now) {
            RecoveryPhase::Locked
        } else if self.phase == RecoveryPhase::Locked {
            RecoveryPhase::Idle
        } else {
            self.phase
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_attempt_increments() {
        let mut state = RecoveryState::default();
        assert_eq!(state.track_attempt(1_000, 10), 1);
        assert_eq!(state.track_attempt(2_000, 10), 2);
        assert_eq!(state.last_attempt_at, Some(2_000));
        assert_eq!(state.recent_attempts, VecDeque::from(vec![1_000, 2_000]));
    }

    #[test]
    fn test_track_attempt_evicts_oldest() {
        let mut state = RecoveryState::default();
        for i in 0..12u64 {
            state.track_attempt(i * 100, 10);
        }
        assert_eq!(state.attempt_count, 12);
        assert_eq!(state.recent_attempts.len(), 10);
        assert_eq!(state.recent_attempts.front(), Some(&200));
        assert_eq!(state.recent_attempts.back(), Some(&1_100));
    }

    #[test]
    fn test_attempts_within_window() {
        let mut state = RecoveryState::default();
        state.track_attempt(0, 10);
        state.track_attempt(30_000, 10);
        state.track_attempt(59_000, 10);
        assert_eq!(state.attempts_within(60_000, Duration::from_secs(60)), 2);
        assert_eq!(state.attempts_within(59_500, Duration::from_secs(60)), 3);
    }

    #[test]
    fn test_lock_and_phase() {
        let mut state = RecoveryState::default();
        state.lock(10_000);
        assert!(state.is_locked(9_999));
        assert_eq!(state.phase_at(9_999), RecoveryPhase::Locked);
        assert!(!state.is_locked(10_000));
        assert!(state.lock_expired(10_000));
        assert_eq!(state.phase_at(10_000), RecoveryPhase::Idle);
    }

    #[test]
    fn test_unlock_clears_window() {
        let mut state = RecoveryState::default();
        for t in 0..5 {
            state.track_attempt(t, 10);
        }
        state.lock(30_000);
        state.unlock();
        assert_eq!(state.attempt_count, 0);
        assert!(state.recent_attempts.is_empty());
        assert!(state.locked_until.is_none());
        assert_eq!(state.phase, RecoveryPhase::Idle);
    }

    #[test]
    fn test_quiet_period() {
        let mut state = RecoveryState::default();
        assert!(!state.is_quiet(100_000, Duration::from_secs(30)));

        state.track_attempt(1_000, 10);
        assert!(!state.is_quiet(30_999, Duration::from_secs(30)));
        assert!(state.is_quiet(31_000, Duration::from_secs(30)));
    }

    #[test]
    fn test_reset_counter_keeps_timestamps() {
        let mut state = RecoveryState::default();
        state.track_attempt(1_000, 10);
        state.track_attempt(2_000, 10);
        state.phase = RecoveryPhase::Recovering;

        assert_eq!(state.reset_counter(), 2);
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.recent_attempts.len(), 2);
        assert_eq!(state.phase, RecoveryPhase::Idle);
    }
}
