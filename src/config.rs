//! Configuration for the recovery coordinator and reconnector
//!
//! Configuration is passed programmatically; every field has a default so
//! partial JSON documents deserialize cleanly.

use crate::backoff::Backoff;
use crate::breaker::BreakerPolicy;
use crate::error::{RecoveryError, Result};
use crate::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry limits for one error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPolicy {
    /// The breaker trips once the attempt count reaches this value
    pub max_attempts: u32,

    /// Attempts up to and including this count retry without user notice
    pub silent_attempts: u32,
}

impl CategoryPolicy {
    pub const fn new(max_attempts: u32, silent_attempts: u32) -> Self {
        Self {
            max_attempts,
            silent_attempts,
        }
    }

    /// Policy for backend transient data-access failures
    pub const fn transient() -> Self {
        Self::new(5, 3)
    }

    /// Policy for lost transport connections
    pub const fn transport() -> Self {
        Self::new(3, 1)
    }
}

/// Recovery coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryConfig {
    /// Backoff base delay in milliseconds
    pub backoff_base_ms: u64,

    /// Backoff ceiling in milliseconds
    pub backoff_cap_ms: u64,

    /// Rate-limit window in milliseconds
    pub rate_window_ms: u64,

    /// Attempts within the window that trip the breaker
    pub rate_limit: usize,

    /// How long a tripped room stays locked, in milliseconds
    pub lock_ms: u64,

    /// Error-free time after which the attempt counter resets, in milliseconds
    pub quiet_period_ms: u64,

    /// Maximum attempt timestamps kept per room
    pub history_cap: usize,

    /// Limits for `TransientDataAccess`
    pub transient: CategoryPolicy,

    /// Limits for `TransportLost`
    pub transport: CategoryPolicy,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1000,
            backoff_cap_ms: 15_000,
            rate_window_ms: 60_000,
            rate_limit: 5,
            lock_ms: 30_000,
            quiet_period_ms: 30_000,
            history_cap: 10,
            transient: CategoryPolicy::transient(),
            transport: CategoryPolicy::transport(),
        }
    }
}

impl RecoveryConfig {
    /// Parse a config from JSON, then validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the coordinator relies on
    pub fn validate(&self) -> Result<()> {
        if self.backoff_base_ms == 0 {
            return Err(RecoveryError::Config(
                "backoffBaseMs must be greater than zero".to_string(),
            ));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(RecoveryError::Config(format!(
                "backoffCapMs ({}) must be >= backoffBaseMs ({})",
                self.backoff_cap_ms, self.backoff_base_ms
            )));
        }
        if self.rate_limit == 0 {
            return Err(RecoveryError::Config(
                "rateLimit must be greater than zero".to_string(),
            ));
        }
        if self.history_cap < self.rate_limit {
            return Err(RecoveryError::Config(format!(
                "historyCap ({}) must be >= rateLimit ({}) or the rate breaker can never trip",
                self.history_cap, self.rate_limit
            )));
        }
        for (name, policy) in [("transient", &self.transient), ("transport", &self.transport)] {
            if policy.max_attempts == 0 {
                return Err(RecoveryError::Config(format!(
                    "{}.maxAttempts must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }

    /// Breaker policy for a retryable category
    ///
    /// Returns `None` for categories that are never retried.
    pub fn breaker_for(&self, category: ErrorCategory) -> Option<BreakerPolicy> {
        let policy = self.policy_for(category)?;
        Some(BreakerPolicy {
            max_attempts: policy.max_attempts,
            rate_limit: self.rate_limit,
            rate_window: Duration::from_millis(self.rate_window_ms),
        })
    }

    pub fn policy_for(&self, category: ErrorCategory) -> Option<CategoryPolicy> {
        match category {
            ErrorCategory::TransientDataAccess => Some(self.transient),
            ErrorCategory::TransportLost => Some(self.transport),
            _ => None,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

/// Whole-channel reconnector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    /// Delay after the first attempt, in milliseconds
    pub initial_delay_ms: u64,

    /// Delay ceiling, in milliseconds
    pub max_delay_ms: u64,

    /// Growth factor applied to the delay after each attempt
    pub multiplier: f64,

    /// Upper bound of the jitter added after each attempt, in milliseconds
    pub jitter_ms: u64,

    /// Attempts before giving up and locking out
    pub max_retries: u32,

    /// Lockout after a persistent failure, in milliseconds
    pub failure_lockout_ms: u64,

    /// Lockout after repeated reconnect errors, in milliseconds
    pub error_lockout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 1.5,
            jitter_ms: 1000,
            max_retries: 5,
            failure_lockout_ms: 60_000,
            error_lockout_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(RecoveryError::Config(
                "maxRetries must be greater than zero".to_string(),
            ));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(RecoveryError::Config(format!(
                "multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(RecoveryError::Config(format!(
                "maxDelayMs ({}) must be >= initialDelayMs ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }
}
