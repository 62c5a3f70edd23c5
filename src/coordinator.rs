//! Recovery coordinator — classify, consult the breaker, schedule, notify
//!
//! One coordinator owns the `RoomKey → RecoveryState` map for a channel.
//! Every error for a room goes through [`RecoveryCoordinator::handle_error`],
//! which always resolves to a [`RecoveryOutcome`] and never fails.
//!
//! ## Per-room state machine
//!
//! ```text
//! Idle ──retryable error──▶ Recovering ──retry fires──▶ Idle
//!   │                           │
//!   └──────breaker trips────────┴──▶ Locked ──lock expires──▶ Idle
//! ```
//!
//! Scheduled retries re-check the lock and channel liveness when they fire,
//! not when they are scheduled; a stale retry becomes a no-op.

use crate::backoff::Backoff;
use crate::channel::Channel;
use crate::classify::{is_abnormal_closure, ErrorClassifier};
use crate::clock::{Clock, SystemClock};
use crate::config::RecoveryConfig;
use crate::error::Result;
use crate::notify::{LogNotifier, Notifier};
use crate::observer::{AbandonReason, LogObserver, RecoveryEvent, RecoveryObserver};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::tracker::{RecoveryPhase, RecoveryState};
use crate::types::{
    ErrorCategory, Notification, NotificationCode, RawError, RecoveryOutcome, RetryDecision,
    RoomKey, RoomRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Message for errors on a locked room
pub const MSG_PERSISTENT_FAILURE: &str = "persistent failure";

/// Message when the transport breaker trips
pub const MSG_CANNOT_RECONNECT: &str = "cannot reconnect";

const MSG_TRANSIENT_GIVE_UP: &str = "persistent failure loading data, please retry later";
const MSG_GENERIC: &str = "an error occurred in the chat";
const MSG_SERVER: &str = "server error";
const MSG_SESSION_EXPIRED: &str = "session expired, reconnecting";
const MSG_RECONNECT_FAILED: &str = "unable to reconnect to the chat service";

struct Inner {
    config: RecoveryConfig,
    backoff: Backoff,
    classifier: ErrorClassifier,
    channel: Arc<dyn Channel>,
    notifier: Arc<dyn Notifier>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn RecoveryObserver>,

    /// Recovery state per room (created lazily, never removed)
    rooms: RwLock<HashMap<RoomKey, RecoveryState>>,

    /// Last request issued per room, replayed by retries
    requests: RwLock<HashMap<RoomKey, RoomRequest>>,

    /// Room of the most recent tracked request
    last_room: RwLock<Option<RoomKey>>,
}

/// Per-room error recovery coordinator
///
/// Cheap to clone; clones share state. Scheduled retries hold a clone.
#[derive(Clone)]
pub struct RecoveryCoordinator {
    inner: Arc<Inner>,
}

/// Builder for [`RecoveryCoordinator`]
pub struct RecoveryCoordinatorBuilder {
    channel: Arc<dyn Channel>,
    config: RecoveryConfig,
    classifier: ErrorClassifier,
    notifier: Arc<dyn Notifier>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn RecoveryObserver>,
}

impl RecoveryCoordinatorBuilder {
    pub fn config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn observer(mut self, observer: impl RecoveryObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Validate the config and build the coordinator
    pub fn build(self) -> Result<RecoveryCoordinator> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    fn assemble(self) -> RecoveryCoordinator {
        RecoveryCoordinator {
            inner: Arc::new(Inner {
                backoff: self.config.backoff(),
                config: self.config,
                classifier: self.classifier,
                channel: self.channel,
                notifier: self.notifier,
                scheduler: self.scheduler,
                clock: self.clock,
                observer: self.observer,
                rooms: RwLock::new(HashMap::new()),
                requests: RwLock::new(HashMap::new()),
                last_room: RwLock::new(None),
            }),
        }
    }
}

/// Result of tracking an attempt under the room lock
enum Tracked {
    Retry { attempt: u32, delay: Duration },
    Tripped { attempt: u32 },
}

impl RecoveryCoordinator {
    /// Coordinator with default config and collaborators
    ///
    /// Uses `TokioScheduler`, so it must run inside a tokio runtime.
    pub fn new(channel: impl Channel + 'static) -> Self {
        Self::builder(channel).assemble()
    }

    pub fn builder(channel: impl Channel + 'static) -> RecoveryCoordinatorBuilder {
        RecoveryCoordinatorBuilder {
            channel: Arc::new(channel),
            config: RecoveryConfig::default(),
            classifier: ErrorClassifier::default(),
            notifier: Arc::new(LogNotifier),
            scheduler: Arc::new(TokioScheduler),
            clock: Arc::new(SystemClock),
            observer: Arc::new(LogObserver),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    /// Remember the last request issued for a room and return its key
    pub async fn track_request(&self, request: RoomRequest) -> RoomKey {
        let key = request.room_key();
        self.inner
            .requests
            .write()
            .await
            .insert(key.clone(), request);
        *self.inner.last_room.write().await = Some(key.clone());
        key
    }

    /// Last request tracked for a room
    pub async fn last_request(&self, room: &RoomKey) -> Option<RoomRequest> {
        self.inner.requests.read().await.get(room).cloned()
    }

    /// Snapshot of a room's recovery state
    pub async fn state(&self, room: &RoomKey) -> Option<RecoveryState> {
        self.inner.rooms.read().await.get(room).cloned()
    }

    /// Effective phase of a room right now
    pub async fn phase(&self, room: &RoomKey) -> RecoveryPhase {
        let now = self.now();
        self.inner
            .rooms
            .read()
            .await
            .get(room)
            .map(|state| state.phase_at(now))
            .unwrap_or_default()
    }

    /// Rooms with recovery state, sorted
    pub async fn rooms(&self) -> Vec<RoomKey> {
        let mut rooms: Vec<RoomKey> = self.inner.rooms.read().await.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Handle an error for the room of the most recent tracked request
    ///
    /// Falls back to the global room when no request has been tracked.
    pub async fn handle_error_for_last_request(&self, error: &RawError) -> RecoveryOutcome {
        let room = self
            .inner
            .last_room
            .read()
            .await
            .clone()
            .unwrap_or_else(RoomKey::global);
        self.handle_error(error, &room).await
    }

    /// Classify an error and drive recovery for a room
    pub async fn handle_error(&self, error: &RawError, room: &RoomKey) -> RecoveryOutcome {
        let now = self.now();
        // Classification is pure; doing it before the lock check only fills in the outcome.
        let category = self.inner.classifier.classify(error);

        if let Some(attempt) = self.locked_attempt(room, now).await {
            let code = give_up_code(category);
            self.surface(room, code, MSG_PERSISTENT_FAILURE, false, now)
                .await;
            return RecoveryOutcome {
                room: room.clone(),
                category,
                decision: RetryDecision::GiveUp(MSG_PERSISTENT_FAILURE.to_string()),
                attempt,
                retry_delay: None,
            };
        }

        match category {
            ErrorCategory::TransientDataAccess | ErrorCategory::TransportLost => {
                self.handle_retryable(error, room, category, now).await
            }
            ErrorCategory::SessionExpired => self.handle_session_expired(room, now).await,
            ErrorCategory::ServerRejected | ErrorCategory::Unknown => {
                self.handle_unretryable(error, room, category, now).await
            }
        }
    }

    /// Signal that a retry for the room succeeded
    ///
    /// Marks the room idle and restarts the quiet-period timer. The counter
    /// is only zeroed once the quiet period passes with no new attempt.
    pub async fn record_success(&self, room: &RoomKey) {
        {
            let mut rooms = self.inner.rooms.write().await;
            if let Some(state) = rooms.get_mut(room) {
                if state.phase == RecoveryPhase::Recovering {
                    state.phase = RecoveryPhase::Idle;
                }
            }
        }
        self.schedule_quiet_check(room.clone());
    }

    /// Attempt count if the room is locked; clears an expired lock
    async fn locked_attempt(&self, room: &RoomKey, now: u64) -> Option<u32> {
        let mut rooms = self.inner.rooms.write().await;
        let state = rooms.get_mut(room)?;

        if state.is_locked(now) {
            return Some(state.attempt_count);
        }
        if state.lock_expired(now) {
            state.unlock();
            self.emit(RecoveryEvent::LockExpired {
                room: room.clone(),
                at: now,
            });
        }
        None
    }

    async fn handle_retryable(
        &self,
        error: &RawError,
        room: &RoomKey,
        category: ErrorCategory,
        now: u64,
    ) -> RecoveryOutcome {
        let config = &self.inner.config;
        let (policy, breaker) = match (config.policy_for(category), config.breaker_for(category)) {
            (Some(policy), Some(breaker)) => (policy, breaker),
            _ => return self.handle_unretryable(error, room, category, now).await,
        };

        let tracked = {
            let mut rooms = self.inner.rooms.write().await;
            let state = rooms.entry(room.clone()).or_default();

            if state.attempt_count > 0 && state.is_quiet(now, config.quiet_period()) {
                let previous_count = state.reset_counter();
                self.emit(RecoveryEvent::BreakerReset {
                    room: room.clone(),
                    previous_count,
                    at: now,
                });
            }

            let attempt = state.track_attempt(now, config.history_cap);
            self.emit(RecoveryEvent::AttemptTracked {
                room: room.clone(),
                category,
                attempt,
                at: now,
            });

            match breaker.should_trip(state, now) {
                Some(reason) => {
                    let locked_until = now.saturating_add(config.lock_ms);
                    state.lock(locked_until);
                    self.emit(RecoveryEvent::BreakerTripped {
                        room: room.clone(),
                        reason,
                        attempt,
                        locked_until,
                        at: now,
                    });
                    Tracked::Tripped { attempt }
                }
                None => {
                    state.phase = RecoveryPhase::Recovering;
                    Tracked::Retry {
                        attempt,
                        delay: self.inner.backoff.delay_for(attempt.saturating_sub(1)),
                    }
                }
            }
        };

        let (attempt, delay) = match tracked {
            Tracked::Tripped { attempt } => {
                let message = match category {
                    ErrorCategory::TransportLost => MSG_CANNOT_RECONNECT,
                    _ => MSG_TRANSIENT_GIVE_UP,
                };
                self.surface(room, give_up_code(category), message, false, now)
                    .await;
                return RecoveryOutcome {
                    room: room.clone(),
                    category,
                    decision: RetryDecision::GiveUp(message.to_string()),
                    attempt,
                    retry_delay: None,
                };
            }
            Tracked::Retry { attempt, delay } => (attempt, delay),
        };

        self.schedule_retry(room.clone(), category, attempt, delay, now);

        let retry_code = match category {
            ErrorCategory::TransportLost => NotificationCode::ConnectionLost,
            _ => NotificationCode::TransientDataRetry,
        };

        let decision = if category == ErrorCategory::TransportLost
            && attempt == 1
            && is_abnormal_closure(error)
        {
            RetryDecision::Ignore
        } else if attempt <= policy.silent_attempts {
            let message = retry_message(category, attempt, policy.max_attempts);
            self.surface(room, retry_code, &message, true, now).await;
            RetryDecision::RetrySilently
        } else {
            let message = retry_message(category, attempt, policy.max_attempts);
            self.surface(room, retry_code, &message, false, now).await;
            RetryDecision::RetryWithNotice(message)
        };

        RecoveryOutcome {
            room: room.clone(),
            category,
            decision,
            attempt,
            retry_delay: Some(delay),
        }
    }

    async fn handle_session_expired(&self, room: &RoomKey, now: u64) -> RecoveryOutcome {
        let attempt = self.attempt_count(room).await;

        self.surface(
            room,
            NotificationCode::SessionExpired,
            MSG_SESSION_EXPIRED,
            true,
            now,
        )
        .await;

        let succeeded = match self.inner.channel.reconnect().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(room = %room, error = %e, "Reconnect after session expiry failed");
                self.surface(
                    room,
                    NotificationCode::ReconnectFailed,
                    MSG_RECONNECT_FAILED,
                    false,
                    self.now(),
                )
                .await;
                false
            }
        };
        self.emit(RecoveryEvent::ReconnectRequested {
            room: room.clone(),
            succeeded,
            at: self.now(),
        });

        RecoveryOutcome {
            room: room.clone(),
            category: ErrorCategory::SessionExpired,
            decision: RetryDecision::Reconnect,
            attempt,
            retry_delay: None,
        }
    }

    async fn handle_unretryable(
        &self,
        error: &RawError,
        room: &RoomKey,
        category: ErrorCategory,
        now: u64,
    ) -> RecoveryOutcome {
        let attempt = self.attempt_count(room).await;
        let text = error
            .text()
            .map(|t| t.into_owned())
            .filter(|t| !t.is_empty());

        let (code, decision) = match category {
            ErrorCategory::ServerRejected => {
                let message = text.unwrap_or_else(|| MSG_SERVER.to_string());
                (NotificationCode::ServerError, RetryDecision::GiveUp(message))
            }
            _ => {
                let message = text.unwrap_or_else(|| MSG_GENERIC.to_string());
                (
                    NotificationCode::UnknownError,
                    RetryDecision::RetryWithNotice(message),
                )
            }
        };

        if let Some(message) = decision.message() {
            self.surface(room, code, message, false, now).await;
        }

        RecoveryOutcome {
            room: room.clone(),
            category,
            decision,
            attempt,
            retry_delay: None,
        }
    }

    fn schedule_retry(
        &self,
        room: RoomKey,
        category: ErrorCategory,
        attempt: u32,
        delay: Duration,
        now: u64,
    ) {
        self.emit(RecoveryEvent::RetryScheduled {
            room: room.clone(),
            category,
            attempt,
            delay_ms: delay.as_millis() as u64,
            at: now,
        });

        let coordinator = self.clone();
        self.inner.scheduler.schedule(
            delay,
            Box::pin(async move {
                coordinator.fire_retry(room, category).await;
            }),
        );
    }

    /// Run a scheduled retry, re-checking preconditions at fire time
    ///
    /// Returns `false` when the retry was abandoned or the channel call failed.
    async fn fire_retry(&self, room: RoomKey, category: ErrorCategory) -> bool {
        let now = self.now();

        let locked = self
            .inner
            .rooms
            .read()
            .await
            .get(&room)
            .map(|state| state.is_locked(now))
            .unwrap_or(false);
        if locked {
            self.abandon(&room, AbandonReason::Locked, now);
            return false;
        }

        let connected = self.inner.channel.is_connected();
        let result = match category {
            ErrorCategory::TransportLost => {
                if connected {
                    self.abandon(&room, AbandonReason::AlreadyConnected, now);
                    self.finish_recovering(&room).await;
                    return false;
                }
                self.inner.channel.reconnect().await
            }
            _ => {
                if !connected {
                    self.abandon(&room, AbandonReason::Disconnected, now);
                    self.finish_recovering(&room).await;
                    return false;
                }
                let request = match self.last_request(&room).await {
                    Some(request) => request,
                    None => {
                        self.abandon(&room, AbandonReason::NoRequest, now);
                        self.finish_recovering(&room).await;
                        return false;
                    }
                };
                self.inner.channel.resend(&request).await
            }
        };

        let succeeded = match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    room = %room,
                    category = %category,
                    channel = self.inner.channel.name(),
                    error = %e,
                    "Scheduled retry failed"
                );
                false
            }
        };

        self.finish_recovering(&room).await;
        self.emit(RecoveryEvent::RetryFired {
            room: room.clone(),
            category,
            succeeded,
            at: self.now(),
        });

        if succeeded {
            self.schedule_quiet_check(room);
        }
        succeeded
    }

    async fn finish_recovering(&self, room: &RoomKey) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(state) = rooms.get_mut(room) {
            if state.phase == RecoveryPhase::Recovering {
                state.phase = RecoveryPhase::Idle;
            }
        }
    }

    fn schedule_quiet_check(&self, room: RoomKey) {
        let coordinator = self.clone();
        self.inner.scheduler.schedule(
            self.inner.config.quiet_period(),
            Box::pin(async move {
                coordinator.reset_if_quiet(&room).await;
            }),
        );
    }

    /// Zero the room's counter if no attempt happened during the quiet period
    async fn reset_if_quiet(&self, room: &RoomKey) -> bool {
        let now = self.now();
        let mut rooms = self.inner.rooms.write().await;
        let state = match rooms.get_mut(room) {
            Some(state) => state,
            None => return false,
        };

        if state.is_locked(now)
            || state.attempt_count == 0
            || !state.is_quiet(now, self.inner.config.quiet_period())
        {
            return false;
        }

        let previous_count = state.reset_counter();
        self.emit(RecoveryEvent::BreakerReset {
            room: room.clone(),
            previous_count,
            at: now,
        });
        true
    }

    async fn attempt_count(&self, room: &RoomKey) -> u32 {
        self.inner
            .rooms
            .read()
            .await
            .get(room)
            .map(|state| state.attempt_count)
            .unwrap_or(0)
    }

    fn abandon(&self, room: &RoomKey, reason: AbandonReason, now: u64) {
        self.emit(RecoveryEvent::RetryAbandoned {
            room: room.clone(),
            reason,
            at: now,
        });
    }

    async fn surface(
        &self,
        room: &RoomKey,
        code: NotificationCode,
        message: &str,
        silent: bool,
        now: u64,
    ) {
        let notification = Notification::error(code, message, silent);
        if let Err(e) = self.inner.notifier.notify(notification).await {
            tracing::warn!(room = %room, code = %code, error = %e, "Failed to notify user");
        }
        self.emit(RecoveryEvent::Surfaced {
            room: room.clone(),
            code,
            silent,
            at: now,
        });
    }

    fn emit(&self, event: RecoveryEvent) {
        self.inner.observer.on_event(&event);
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_millis()
    }
}

fn give_up_code(category: ErrorCategory) -> NotificationCode {
    match category {
        ErrorCategory::TransportLost => NotificationCode::ReconnectFailed,
        _ => NotificationCode::TransientDataPersistent,
    }
}

fn retry_message(category: ErrorCategory, attempt: u32, max_attempts: u32) -> String {
    match category {
        ErrorCategory::TransportLost => format!(
            "connection lost, reconnecting ({}/{})",
            attempt, max_attempts
        ),
        _ => format!(
            "temporary data loading error, retrying ({}/{})",
            attempt, max_attempts
        ),
    }
}
