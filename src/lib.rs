//! # a3s-recovery
//!
//! Error classification and per-room recovery for pub/sub chat channels.
//!
//! ## Overview
//!
//! `a3s-recovery` sits between a STOMP/WebSocket chat client and the user.
//! Every error the channel reports is classified, counted against the room
//! it belongs to, and turned into a decision: retry silently, retry with a
//! notice, reconnect, give up, or ignore. A per-room circuit breaker stops
//! retry storms when the backend keeps failing.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_recovery::{MemoryChannel, RawError, RecoveryCoordinator, RoomRequest};
//!
//! # async fn example() {
//! let coordinator = RecoveryCoordinator::new(MemoryChannel::connected());
//!
//! // Remember what to replay for the room
//! let room = coordinator
//!     .track_request(RoomRequest::scoped("GUILD", 7))
//!     .await;
//!
//! // Feed errors as they arrive
//! let outcome = coordinator
//!     .handle_error(&RawError::from("could not initialize proxy - no Session"), &room)
//!     .await;
//!
//! println!("{:?} after {} attempts", outcome.decision, outcome.attempt);
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **ErrorClassifier** — ordered rules mapping raw errors to categories
//! - **RecoveryCoordinator** — per-room state machine, breaker, retries
//! - **Reconnector** — whole-channel reconnect loop with lockouts
//! - **Channel** / **Notifier** — the transport and user-facing seams
//! - **Scheduler** / **Clock** — time sources, swappable for tests

pub mod backoff;
pub mod breaker;
pub mod channel;
pub mod classify;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notify;
pub mod observer;
pub mod reconnect;
pub mod scheduler;
pub mod tracker;
pub mod types;

// Re-export core types
pub use backoff::{delay_for, Backoff};
pub use breaker::{BreakerPolicy, TripReason};
pub use channel::{Channel, MemoryChannel};
pub use classify::{classify, extract_room_id, ClassificationRule, ErrorClassifier, Matcher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CategoryPolicy, ReconnectConfig, RecoveryConfig};
pub use coordinator::{RecoveryCoordinator, RecoveryCoordinatorBuilder};
pub use error::{RecoveryError, Result};
pub use notify::{LogNotifier, MemoryNotifier, Notifier};
pub use observer::{
    AbandonReason, FanoutObserver, LogObserver, MemoryObserver, RecoveryEvent, RecoveryObserver,
};
pub use reconnect::{ReconnectEvent, ReconnectStatus, Reconnector};
pub use scheduler::{ManualScheduler, ScheduleHandle, ScheduledTask, Scheduler, TokioScheduler};
pub use tracker::{RecoveryPhase, RecoveryState};
pub use types::{
    ErrorCategory, ErrorCode, ErrorPayload, Notification, NotificationCode, NotificationKind,
    RawError, RecoveryOutcome, RetryDecision, RoomKey, RoomRequest,
};
