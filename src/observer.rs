//! Recovery observers — a sink for every coordinator state transition
//!
//! Observers see derived values only and never own recovery state.
//! `LogObserver` turns events into tracing records; `MemoryObserver` keeps a
//! bounded history that can be exported as JSON for debugging.

use crate::breaker::TripReason;
use crate::error::{RecoveryError, Result};
use crate::types::{ErrorCategory, NotificationCode, RoomKey};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Why a scheduled retry did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AbandonReason {
    /// The room was locked by the breaker after the retry was scheduled
    Locked,
    /// The channel was not connected when the retry fired
    Disconnected,
    /// No request has been tracked for the room
    NoRequest,
    /// A reconnect retry found the channel already connected
    AlreadyConnected,
}

/// A recovery state transition
///
/// `at` is the coordinator clock time in Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum RecoveryEvent {
    #[serde(rename_all = "camelCase")]
    AttemptTracked {
        room: RoomKey,
        category: ErrorCategory,
        attempt: u32,
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    BreakerTripped {
        room: RoomKey,
        reason: TripReason,
        attempt: u32,
        locked_until: u64,
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    BreakerReset {
        room: RoomKey,
        previous_count: u32,
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    LockExpired { room: RoomKey, at: u64 },
    #[serde(rename_all = "camelCase")]
    RetryScheduled {
        room: RoomKey,
        category: ErrorCategory,
        attempt: u32,
        delay_ms: u64,
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    RetryFired {
        room: RoomKey,
        category: ErrorCategory,
        succeeded: bool,
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    RetryAbandoned {
        room: RoomKey,
        reason: AbandonReason,
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    ReconnectRequested {
        room: RoomKey,
        succeeded: bool,
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    Surfaced {
        room: RoomKey,
        code: NotificationCode,
        silent: bool,
        at: u64,
    },
}

impl RecoveryEvent {
    /// Room the event belongs to
    pub fn room(&self) -> &RoomKey {
        match self {
            Self::AttemptTracked { room, .. }
            | Self::BreakerTripped { room, .. }
            | Self::BreakerReset { room, .. }
            | Self::LockExpired { room, .. }
            | Self::RetryScheduled { room, .. }
            | Self::RetryFired { room, .. }
            | Self::RetryAbandoned { room, .. }
            | Self::ReconnectRequested { room, .. }
            | Self::Surfaced { room, .. } => room,
        }
    }
}

/// Sink for recovery transitions
///
/// Called synchronously from the coordinator; implementations must not block.
pub trait RecoveryObserver: Send + Sync {
    fn on_event(&self, event: &RecoveryEvent);
}

/// Observer that logs every transition via `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl RecoveryObserver for LogObserver {
    fn on_event(&self, event: &RecoveryEvent) {
        match event {
            RecoveryEvent::AttemptTracked {
                room,
                category,
                attempt,
                ..
            } => {
                tracing::debug!(room = %room, category = %category, attempt, "Recovery attempt tracked");
            }
            RecoveryEvent::BreakerTripped {
                room,
                reason,
                attempt,
                locked_until,
                ..
            } => {
                tracing::warn!(
                    room = %room,
                    reason = ?reason,
                    attempt,
                    locked_until,
                    "Circuit breaker tripped"
                );
            }
            RecoveryEvent::BreakerReset {
                room,
                previous_count,
                ..
            } => {
                tracing::info!(room = %room, previous_count, "Recovery counter reset");
            }
            RecoveryEvent::LockExpired { room, .. } => {
                tracing::info!(room = %room, "Recovery lock expired");
            }
            RecoveryEvent::RetryScheduled {
                room,
                attempt,
                delay_ms,
                ..
            } => {
                tracing::debug!(room = %room, attempt, delay_ms, "Retry scheduled");
            }
            RecoveryEvent::RetryFired {
                room, succeeded, ..
            } => {
                if *succeeded {
                    tracing::info!(room = %room, "Retry sent");
                } else {
                    tracing::warn!(room = %room, "Retry failed");
                }
            }
            RecoveryEvent::RetryAbandoned { room, reason, .. } => {
                tracing::warn!(room = %room, reason = ?reason, "Retry abandoned");
            }
            RecoveryEvent::ReconnectRequested {
                room, succeeded, ..
            } => {
                tracing::info!(room = %room, succeeded, "Reconnect requested");
            }
            RecoveryEvent::Surfaced {
                room, code, silent, ..
            } => {
                tracing::debug!(room = %room, code = %code, silent, "Decision surfaced");
            }
        }
    }
}

/// Bounded in-memory observer for debugging and tests
///
/// Keeps the last `max_events` transitions. Clones share the buffer.
#[derive(Clone)]
pub struct MemoryObserver {
    events: Arc<RwLock<VecDeque<RecoveryEvent>>>,
    max_events: usize,
}

impl MemoryObserver {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::new())),
            max_events,
        }
    }

    /// Retained events, oldest first
    pub fn events(&self) -> Vec<RecoveryEvent> {
        match self.events.read() {
            Ok(events) => events.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Retained events for one room
    pub fn events_for(&self, room: &RoomKey) -> Vec<RecoveryEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.room() == room)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the retained events as a JSON array
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.events())?)
    }

    pub fn clear(&self) -> Result<()> {
        let mut events = self.events.write().map_err(|e| {
            RecoveryError::Config(format!("Failed to acquire observer lock: {}", e))
        })?;
        events.clear();
        Ok(())
    }
}

impl Default for MemoryObserver {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RecoveryObserver for MemoryObserver {
    fn on_event(&self, event: &RecoveryEvent) {
        let mut events = match self.events.write() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push_back(event.clone());
        while self.max_events > 0 && events.len() > self.max_events {
            events.pop_front();
        }
    }
}

/// Forwards every event to several observers
#[derive(Default, Clone)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn RecoveryObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl RecoveryObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }
}

impl RecoveryObserver for FanoutObserver {
    fn on_event(&self, event: &RecoveryEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
