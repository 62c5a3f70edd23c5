//! Whole-channel reconnector
//!
//! Independent of room keys: watches raw transport errors and drives a
//! bounded reconnect loop with growing delays. After the loop gives up, or
//! after the backend reports a persistent failure, reconnects are locked out
//! for a while so a broken backend is not hammered.
//!
//! Progress is published as [`ReconnectEvent`]s on a broadcast channel.

use crate::channel::Channel;
use crate::classify::{classify, ABNORMAL_CLOSURE};
use crate::clock::{Clock, SystemClock};
use crate::config::ReconnectConfig;
use crate::error::Result;
use crate::scheduler::{ScheduleHandle, Scheduler, TokioScheduler};
use crate::types::{ErrorCategory, RawError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// Error codes that mark a persistent backend failure
pub const PERSISTENT_FAILURE_CODES: &[&str] = &[
    "TRANSIENT_DATA_PERSISTENT",
    "RECONNECT_FAILED",
    "MAX_RECONNECT_ATTEMPTS",
];

const EVENT_CAPACITY: usize = 64;

/// Reconnect progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum ReconnectEvent {
    /// A reconnect loop started
    Reconnecting,
    /// The channel is connected again
    Reconnected,
    /// The loop gave up after `retries` attempts
    Failed { retries: u32 },
    /// A start was refused because of a lockout
    #[serde(rename_all = "camelCase")]
    Blocked { unlock_in_ms: u64 },
}

/// Snapshot of the reconnect loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectStatus {
    pub active: bool,
    pub retry_count: u32,
    pub delay: Duration,
    pub locked_until: Option<u64>,
    pub persistent_failure: bool,
}

struct LoopState {
    active: bool,
    retry_count: u32,
    delay: Duration,
    lock_until: u64,
    persistent_failure: bool,
    pending: Option<ScheduleHandle>,
    /// Bumped on reset so in-flight attempts from an older loop stand down
    generation: u64,
}

impl LoopState {
    fn new(config: &ReconnectConfig) -> Self {
        Self {
            active: false,
            retry_count: 0,
            delay: config.initial_delay(),
            lock_until: 0,
            persistent_failure: false,
            pending: None,
            generation: 0,
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.cancel();
        }
    }

    /// Cancel the loop and clear lockout and counters
    fn reset(&mut self, config: &ReconnectConfig) {
        self.cancel_pending();
        self.active = false;
        self.retry_count = 0;
        self.delay = config.initial_delay();
        self.lock_until = 0;
        self.persistent_failure = false;
        self.generation += 1;
    }
}

struct Inner {
    config: ReconnectConfig,
    channel: Arc<dyn Channel>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    state: Mutex<LoopState>,
    events: broadcast::Sender<ReconnectEvent>,
}

/// Supervisor for whole-connection reconnects
///
/// Cheap to clone; clones share the loop.
#[derive(Clone)]
pub struct Reconnector {
    inner: Arc<Inner>,
}

impl Reconnector {
    /// Reconnector on the tokio runtime and wall clock
    pub fn new(channel: impl Channel + 'static, config: ReconnectConfig) -> Result<Self> {
        Self::with_runtime(channel, config, TokioScheduler, SystemClock)
    }

    /// Reconnector with explicit scheduler and clock
    pub fn with_runtime(
        channel: impl Channel + 'static,
        config: ReconnectConfig,
        scheduler: impl Scheduler + 'static,
        clock: impl Clock + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LoopState::new(&config)),
                config,
                channel: Arc::new(channel),
                scheduler: Arc::new(scheduler),
                clock: Arc::new(clock),
                events,
            }),
        })
    }

    /// Subscribe to reconnect events
    pub fn subscribe(&self) -> broadcast::Receiver<ReconnectEvent> {
        self.inner.events.subscribe()
    }

    /// Reconnect events as a stream; lagged events are skipped
    pub fn event_stream(&self) -> impl Stream<Item = ReconnectEvent> {
        BroadcastStream::new(self.subscribe()).filter_map(|event| event.ok())
    }

    pub fn status(&self) -> ReconnectStatus {
        let now = self.inner.clock.now_millis();
        let state = self.state();
        ReconnectStatus {
            active: state.active,
            retry_count: state.retry_count,
            delay: state.delay,
            locked_until: (state.lock_until > now).then_some(state.lock_until),
            persistent_failure: state.persistent_failure,
        }
    }

    pub fn is_locked_out(&self) -> bool {
        self.state().lock_until > self.inner.clock.now_millis()
    }

    /// Feed a raw transport error
    ///
    /// Returns `true` when the error started a reconnect loop.
    pub async fn on_error(&self, error: &RawError) -> bool {
        let now = self.inner.clock.now_millis();
        {
            let mut state = self.state();
            if now < state.lock_until {
                tracing::debug!(
                    unlock_in_ms = state.lock_until - now,
                    "Reconnect locked out, ignoring error"
                );
                return false;
            }

            if is_persistent_failure(error) {
                state.persistent_failure = true;
                state.lock_until = now.saturating_add(self.inner.config.failure_lockout_ms);
                tracing::warn!(
                    lockout_ms = self.inner.config.failure_lockout_ms,
                    "Persistent failure reported, locking out reconnects"
                );
                return false;
            }

            let wanted = if is_lost_connection(error) {
                true
            } else if classify(error) == ErrorCategory::TransientDataAccess {
                if state.persistent_failure {
                    tracing::debug!("Skipping reconnect after a persistent failure");
                }
                !state.persistent_failure
            } else {
                false
            };
            if !wanted {
                return false;
            }
        }

        self.start().await
    }

    /// Start a reconnect loop
    ///
    /// No-op while a loop is running. Runs the first attempt before
    /// returning. Returns `true` if a loop was started.
    pub async fn start(&self) -> bool {
        let now = self.inner.clock.now_millis();
        let generation = {
            let mut state = self.state();
            if state.active {
                return false;
            }
            if now < state.lock_until {
                let unlock_in_ms = state.lock_until - now;
                tracing::info!(unlock_in_ms, "Reconnect blocked by lockout");
                self.emit(ReconnectEvent::Blocked { unlock_in_ms });
                return false;
            }

            state.active = true;
            state.retry_count = 0;
            state.delay = self.inner.config.initial_delay();
            state.generation
        };

        self.emit(ReconnectEvent::Reconnecting);
        self.attempt(generation).await;
        true
    }

    /// Report that the channel is connected
    ///
    /// Cancels any pending attempt, clears lockout and counters, and emits
    /// `Reconnected`.
    pub fn on_connected(&self) {
        self.state().reset(&self.inner.config);
        tracing::info!("Channel reconnected");
        self.emit(ReconnectEvent::Reconnected);
    }

    /// Clear all reconnect state without emitting an event
    pub fn force_reset(&self) {
        self.state().reset(&self.inner.config);
        tracing::info!("Reconnector state reset");
    }

    async fn attempt(&self, generation: u64) {
        let max_retries = self.inner.config.max_retries;
        let attempt = {
            let mut state = self.state();
            if state.generation != generation || !state.active {
                return;
            }
            state.pending = None;

            if state.retry_count >= max_retries {
                state.active = false;
                state.persistent_failure = true;
                state.lock_until = self
                    .inner
                    .clock
                    .now_millis()
                    .saturating_add(self.inner.config.failure_lockout_ms);
                tracing::error!(retries = max_retries, "Reconnect failed, giving up");
                drop(state);
                self.emit(ReconnectEvent::Failed {
                    retries: max_retries,
                });
                return;
            }
            state.retry_count + 1
        };

        tracing::info!(attempt, max_retries, "Attempting reconnect");
        let result = self.inner.channel.reconnect().await;

        let mut state = self.state();
        if state.generation != generation {
            return;
        }

        if let Err(e) = result {
            tracing::warn!(
                attempt,
                channel = self.inner.channel.name(),
                error = %e,
                "Reconnect attempt failed"
            );
            if state.retry_count > 2 {
                state.lock_until = self
                    .inner
                    .clock
                    .now_millis()
                    .saturating_add(self.inner.config.error_lockout_ms);
            }
        } else {
            drop(state);
            self.on_connected();
            return;
        }

        state.retry_count += 1;
        state.delay = next_delay(&self.inner.config, state.delay, state.retry_count);
        let delay = state.delay;
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Next reconnect scheduled");

        state.pending = Some(self.schedule_attempt(delay, generation));
    }

    fn schedule_attempt(&self, delay: Duration, generation: u64) -> ScheduleHandle {
        let reconnector = self.clone();
        self.inner.scheduler.schedule(
            delay,
            Box::pin(async move {
                reconnector.attempt(generation).await;
            }),
        )
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ReconnectEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

/// Delay before the next attempt: `min(previous * multiplier + jitter, max_delay)`
///
/// Jitter is deterministic per retry count and below `jitter_ms`.
pub fn next_delay(config: &ReconnectConfig, previous: Duration, retry_count: u32) -> Duration {
    let jitter = if config.jitter_ms > 0 {
        (retry_count as u64 * 7 + 3) % config.jitter_ms
    } else {
        0
    };
    let grown = (previous.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(grown.saturating_add(jitter).min(config.max_delay_ms))
}

/// Whether an error reports a persistent backend failure
pub fn is_persistent_failure(error: &RawError) -> bool {
    error
        .payload()
        .and_then(|p| p.code.as_ref())
        .and_then(|code| code.as_str())
        .map(|code| PERSISTENT_FAILURE_CODES.contains(&code))
        .unwrap_or(false)
}

/// Whether an error means the connection itself is gone
pub fn is_lost_connection(error: &RawError) -> bool {
    match error {
        RawError::Missing => false,
        RawError::Text(text) => text.contains("Lost connection") || text.contains("Connection closed"),
        RawError::Structured(payload) => {
            payload
                .message
                .as_deref()
                .map(|m| m.contains("Lost connection") || m.contains("Connection closed"))
                .unwrap_or(false)
                || payload.kind.as_deref() == Some("close")
                || error.numeric_code() == Some(ABNORMAL_CLOSURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::clock::ManualClock;
    use crate::scheduler::ManualScheduler;
    use crate::types::{ErrorCode, ErrorPayload};

    fn setup() -> (Reconnector, MemoryChannel, ManualScheduler, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let scheduler = ManualScheduler::new(clock.clone());
        let channel = MemoryChannel::disconnected();
        let reconnector = Reconnector::with_runtime(
            channel.clone(),
            ReconnectConfig::default(),
            scheduler.clone(),
            clock.clone(),
        )
        .unwrap();
        (reconnector, channel, scheduler, clock)
    }

    fn drain(rx: &mut broadcast::Receiver<ReconnectEvent>) -> Vec<ReconnectEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn coded(code: &str) -> RawError {
        RawError::from(ErrorPayload {
            code: Some(ErrorCode::Text(code.to_string())),
            ..Default::default()
        })
    }

    #[test]
    fn test_next_delay_grows_and_caps() {
        let config = ReconnectConfig::default();
        let first = next_delay(&config, Duration::from_millis(1000), 1);
        assert_eq!(first, Duration::from_millis(1510));

        let capped = next_delay(&config, Duration::from_millis(25_000), 4);
        assert_eq!(capped, Duration::from_millis(30_000));
    }

    #[test]
    fn test_next_delay_without_jitter() {
        let config = ReconnectConfig {
            jitter_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            next_delay(&config, Duration::from_millis(2000), 3),
            Duration::from_millis(3000)
        );
    }

    #[test]
    fn test_lost_connection_detection() {
        assert!(is_lost_connection(&RawError::from("Whoops! Lost connection")));
        assert!(is_lost_connection(&RawError::code(1006)));
        assert!(is_lost_connection(&RawError::from(ErrorPayload {
            kind: Some("close".to_string()),
            ..Default::default()
        })));
        assert!(!is_lost_connection(&RawError::code(1000)));
        assert!(!is_lost_connection(&RawError::Missing));
    }

    #[test]
    fn test_persistent_failure_detection() {
        assert!(is_persistent_failure(&coded("MAX_RECONNECT_ATTEMPTS")));
        assert!(is_persistent_failure(&coded("TRANSIENT_DATA_PERSISTENT")));
        assert!(!is_persistent_failure(&coded("SERVER_ERROR")));
        assert!(!is_persistent_failure(&RawError::from("RECONNECT_FAILED")));
    }

    #[tokio::test]
    async fn test_lost_connection_reconnects() {
        let (reconnector, channel, _scheduler, _clock) = setup();
        let mut rx = reconnector.subscribe();

        assert!(reconnector.on_error(&RawError::from("Lost connection")).await);
        assert!(channel.is_connected());
        assert_eq!(channel.reconnect_count(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![ReconnectEvent::Reconnecting, ReconnectEvent::Reconnected]
        );
        assert!(!reconnector.status().active);
    }

    #[tokio::test]
    async fn test_unrelated_error_does_not_start() {
        let (reconnector, channel, _scheduler, _clock) = setup();
        assert!(!reconnector.on_error(&RawError::from("Room is full")).await);
        assert_eq!(channel.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (reconnector, channel, scheduler, clock) = setup();
        let mut rx = reconnector.subscribe();
        channel.fail_next_reconnects(100);

        assert!(reconnector.on_error(&RawError::code(1006)).await);
        scheduler.advance(Duration::from_secs(60)).await;

        assert_eq!(channel.reconnect_count(), 5);
        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&ReconnectEvent::Reconnecting));
        assert_eq!(events.last(), Some(&ReconnectEvent::Failed { retries: 5 }));

        let status = reconnector.status();
        assert!(!status.active);
        assert!(status.persistent_failure);
        assert!(status.locked_until.unwrap() > clock.now_millis());

        // Locked out: errors are ignored and explicit starts are blocked
        assert!(!reconnector.on_error(&RawError::code(1006)).await);
        assert!(!reconnector.start().await);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ReconnectEvent::Blocked { .. }]
        ));
        assert_eq!(channel.reconnect_count(), 5);
    }

    #[tokio::test]
    async fn test_repeated_failures_lock_out_errors() {
        let (reconnector, channel, scheduler, _clock) = setup();
        channel.fail_next_reconnects(4);

        reconnector.on_error(&RawError::code(1006)).await;
        // Attempts 2..4 fail; the fourth failure sets the 30s error lockout
        for _ in 0..3 {
            let next = scheduler.due_times()[0];
            scheduler
                .advance(Duration::from_millis(next - scheduler.clock().now_millis()))
                .await;
        }
        assert_eq!(channel.reconnect_count(), 4);
        assert!(reconnector.is_locked_out());
        assert!(reconnector.status().active);

        // The loop itself keeps going and the fifth attempt succeeds
        scheduler.advance(Duration::from_secs(10)).await;
        assert!(channel.is_connected());
        assert!(!reconnector.is_locked_out());
    }

    #[tokio::test]
    async fn test_persistent_code_locks_out() {
        let (reconnector, channel, _scheduler, clock) = setup();

        assert!(!reconnector.on_error(&coded("MAX_RECONNECT_ATTEMPTS")).await);
        assert!(reconnector.is_locked_out());
        assert!(!reconnector.on_error(&RawError::code(1006)).await);

        clock.advance(Duration::from_millis(60_000));
        assert!(!reconnector.is_locked_out());

        // Transient data errors stay suppressed until a successful connect
        let lazy = RawError::from("failed to lazily initialize a collection of role: X");
        assert!(!reconnector.on_error(&lazy).await);
        assert!(reconnector.on_error(&RawError::code(1006)).await);
        assert_eq!(channel.reconnect_count(), 1);

        assert!(!reconnector.status().persistent_failure);
    }

    #[tokio::test]
    async fn test_huge_lockout_saturates() {
        let clock = ManualClock::new(1_000_000);
        let reconnector = Reconnector::with_runtime(
            MemoryChannel::disconnected(),
            ReconnectConfig {
                failure_lockout_ms: u64::MAX,
                ..Default::default()
            },
            ManualScheduler::new(clock.clone()),
            clock.clone(),
        )
        .unwrap();

        assert!(!reconnector.on_error(&coded("RECONNECT_FAILED")).await);
        assert!(reconnector.is_locked_out());
        assert_eq!(reconnector.status().locked_until, Some(u64::MAX));
    }

    #[tokio::test]
    async fn test_start_is_noop_while_running() {
        let (reconnector, channel, scheduler, _clock) = setup();
        channel.fail_next_reconnects(1);

        assert!(reconnector.start().await);
        assert!(reconnector.status().active);
        assert!(!reconnector.start().await);
        assert_eq!(channel.reconnect_count(), 1);
        assert_eq!(scheduler.pending(), 1);
    }

    #[tokio::test]
    async fn test_on_connected_cancels_pending_attempt() {
        let (reconnector, channel, scheduler, _clock) = setup();
        let mut rx = reconnector.subscribe();
        channel.fail_next_reconnects(1);

        reconnector.start().await;
        assert_eq!(scheduler.pending(), 1);

        reconnector.on_connected();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(reconnector.status().retry_count, 0);
        assert_eq!(
            drain(&mut rx),
            vec![ReconnectEvent::Reconnecting, ReconnectEvent::Reconnected]
        );

        scheduler.advance(Duration::from_secs(30)).await;
        assert_eq!(channel.reconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_force_reset_is_silent() {
        let (reconnector, _channel, _scheduler, _clock) = setup();
        let mut rx = reconnector.subscribe();

        reconnector.on_error(&coded("RECONNECT_FAILED")).await;
        assert!(reconnector.is_locked_out());

        reconnector.force_reset();
        assert!(!reconnector.is_locked_out());
        assert_eq!(reconnector.status().delay, Duration::from_millis(1000));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_event_stream() {
        let (reconnector, _channel, _scheduler, _clock) = setup();
        let stream = reconnector.event_stream();
        tokio::pin!(stream);

        reconnector.start().await;
        assert_eq!(stream.next().await, Some(ReconnectEvent::Reconnecting));
        assert_eq!(stream.next().await, Some(ReconnectEvent::Reconnected));
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&ReconnectEvent::Blocked { unlock_in_ms: 1500 }).unwrap();
        assert_eq!(json, r#"{"event":"blocked","unlockInMs":1500}"#);
    }
}
