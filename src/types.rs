//! Core recovery types for the a3s-recovery system
//!
//! Wire-facing types use camelCase JSON serialization to match the chat
//! backend's STOMP payloads.

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// Category assigned to a classified error
///
/// Exactly one category per error. Classification is a pure function of
/// the error's message and code content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// Backend lazy-load/session-bound data access failure; usually self-heals
    TransientDataAccess,
    /// Session expired or unauthorized; needs a full reconnect
    SessionExpired,
    /// Connection dropped, timed out, or closed
    TransportLost,
    /// Generic server-side error the client cannot reason about
    ServerRejected,
    /// Anything unmatched, including missing payloads
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientDataAccess => "transient_data_access",
            Self::SessionExpired => "session_expired",
            Self::TransportLost => "transport_lost",
            Self::ServerRejected => "server_rejected",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Error code carried by a structured error payload
///
/// WebSocket close codes arrive as numbers; backend codes are often strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl ErrorCode {
    /// Numeric value of the code, parsing numeric strings
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// String value of the code, if it is textual
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

/// A structured error or error frame received from the channel
///
/// Every field is optional; backends send any subset of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,

    /// Frame or event type (e.g. `"close"` for socket close events)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Extra context attached by the backend (e.g. `{"roomId": 42}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A raw error value as delivered by the transport channel
#[derive(Debug, Clone, PartialEq)]
pub enum RawError {
    /// No payload at all (null/undefined)
    Missing,
    /// A plain string error
    Text(String),
    /// A structured error object
    Structured(ErrorPayload),
}

impl RawError {
    /// Create a structured error from a message
    pub fn message(message: impl Into<String>) -> Self {
        Self::Structured(ErrorPayload {
            message: Some(message.into()),
            ..Default::default()
        })
    }

    /// Create a structured error carrying only a numeric code
    pub fn code(code: i64) -> Self {
        Self::Structured(ErrorPayload {
            code: Some(ErrorCode::Number(code)),
            ..Default::default()
        })
    }

    /// Convert an arbitrary JSON value into a raw error
    ///
    /// Never fails: fields with unexpected JSON types are dropped and
    /// non-object scalars become `Text`. A STOMP frame object whose `body`
    /// is the only meaningful field is unwrapped via [`RawError::from_frame_body`].
    pub fn from_value(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Missing,
            Value::String(s) => Self::Text(s),
            Value::Object(map) => {
                let string_field = |key: &str| {
                    map.get(key)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };

                let code = match map.get("code") {
                    Some(Value::Number(n)) => n.as_i64().map(ErrorCode::Number),
                    Some(Value::String(s)) => Some(ErrorCode::Text(s.clone())),
                    _ => None,
                };

                let payload = ErrorPayload {
                    message: string_field("message"),
                    error: string_field("error"),
                    code,
                    kind: string_field("type"),
                    data: map.get("data").filter(|d| !d.is_null()).cloned(),
                };

                if payload.message.is_none() && payload.error.is_none() {
                    if let Some(body) = map.get("body").and_then(Value::as_str) {
                        return Self::from_frame_body(body);
                    }
                }

                Self::Structured(payload)
            }
            other => Self::Text(other.to_string()),
        }
    }

    /// Parse a STOMP frame body, falling back to plain text when it is not JSON
    pub fn from_frame_body(body: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) if !map.contains_key("body") => {
                Self::from_value(serde_json::Value::Object(map))
            }
            Ok(serde_json::Value::String(s)) => Self::Text(s),
            _ => Self::Text(body.to_string()),
        }
    }

    /// Structured payload, if any
    pub fn payload(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Structured(payload) => Some(payload),
            _ => None,
        }
    }

    /// Text used for substring matching
    ///
    /// `message`, else `error`, else the JSON rendering of the payload.
    /// Empty strings are skipped. `Missing` has no text.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Missing => None,
            Self::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Self::Structured(payload) => payload
                .message
                .as_deref()
                .filter(|m| !m.is_empty())
                .or_else(|| payload.error.as_deref().filter(|e| !e.is_empty()))
                .map(Cow::Borrowed)
                .or_else(|| serde_json::to_string(payload).ok().map(Cow::Owned)),
        }
    }

    /// Numeric code of a structured payload
    pub fn numeric_code(&self) -> Option<i64> {
        self.payload()?.code.as_ref()?.as_i64()
    }
}

impl From<&str> for RawError {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for RawError {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<ErrorPayload> for RawError {
    fn from(payload: ErrorPayload) -> Self {
        Self::Structured(payload)
    }
}

impl<T: Into<RawError>> From<Option<T>> for RawError {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Missing)
    }
}

/// The last subscribe/request description issued for a room
///
/// Replayed verbatim by scheduled retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    /// Room kind (e.g. "GLOBAL", "GUILD", "FIGHT")
    #[serde(rename = "type")]
    pub kind: String,

    /// Scope identifier for scoped rooms
    #[serde(
        default,
        deserialize_with = "deserialize_group_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub group_id: Option<String>,
}

impl RoomRequest {
    /// Request for an unscoped room
    pub fn global(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            group_id: None,
        }
    }

    /// Request for a room scoped to a group id
    pub fn scoped(kind: impl Into<String>, group_id: impl ToString) -> Self {
        Self {
            kind: kind.into(),
            group_id: Some(group_id.to_string()),
        }
    }

    /// Room key derived from this request
    pub fn room_key(&self) -> RoomKey {
        RoomKey::from_request(self)
    }
}

fn deserialize_group_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Opaque identifier for a logical subscription scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    /// Create a room key from a raw string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The shared global room key
    pub fn global() -> Self {
        Self("global".to_string())
    }

    /// `{kind}.{groupId}` (kind lowercased) for scoped rooms, `global` otherwise
    pub fn from_request(request: &RoomRequest) -> Self {
        match request.group_id.as_deref() {
            Some(id) => Self(format!("{}.{}", request.kind.to_lowercase(), id)),
            None => Self::global(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RoomKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What the caller should do about a handled error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "action", content = "message")]
pub enum RetryDecision {
    /// A retry was scheduled; nothing to show the user
    RetrySilently,
    /// A retry was scheduled or is advisable; show the message
    RetryWithNotice(String),
    /// A full reconnect was triggered
    Reconnect,
    /// Recovery is over for now; show the message
    GiveUp(String),
    /// Treat as noise
    Ignore,
}

impl RetryDecision {
    /// Whether this decision is terminal for the current failure streak
    pub fn is_give_up(&self) -> bool {
        matches!(self, Self::GiveUp(_))
    }

    /// User-facing message attached to the decision
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::RetryWithNotice(m) | Self::GiveUp(m) => Some(m),
            _ => None,
        }
    }
}

/// Result of `RecoveryCoordinator::handle_error`
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    /// Room the error was handled for
    pub room: RoomKey,

    /// Category assigned by the classifier
    pub category: ErrorCategory,

    /// Decision returned to the caller
    pub decision: RetryDecision,

    /// Attempt count for the room after handling
    pub attempt: u32,

    /// Delay before the scheduled retry fires, when one was scheduled
    pub retry_delay: Option<Duration>,
}

/// Notification kind; only errors are surfaced today
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Error,
}

/// Machine-readable code attached to every notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationCode {
    TransientDataRetry,
    TransientDataPersistent,
    SessionExpired,
    ConnectionLost,
    ReconnectFailed,
    ServerError,
    UnknownError,
}

impl NotificationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientDataRetry => "TRANSIENT_DATA_RETRY",
            Self::TransientDataPersistent => "TRANSIENT_DATA_PERSISTENT",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::ReconnectFailed => "RECONNECT_FAILED",
            Self::ServerError => "SERVER_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for NotificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured message handed to the user notifier
///
/// Rendering, localization, and display policy belong to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub code: NotificationCode,
    pub silent: bool,
}

impl Notification {
    /// Create an error notification
    pub fn error(code: NotificationCode, message: impl Into<String>, silent: bool) -> Self {
        Self {
            kind: NotificationKind::Error,
            message: message.into(),
            code,
            silent,
        }
    }
}
