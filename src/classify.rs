//! Error classification — map raw error payloads onto recovery categories
//!
//! Rules are data: an ordered list of `(category, matcher)` pairs where the
//! first match wins. The default rule set recognizes the chat backend's
//! failure vocabulary; callers can extend or replace it without touching
//! the coordinator.
//!
//! Matching is case-sensitive substring matching on [`RawError::text`] plus
//! numeric code lists. Classification never consults external state.

use crate::types::{ErrorCategory, RawError};
use regex::Regex;
use std::sync::OnceLock;

/// WebSocket close codes that signal a lost transport even without text
pub const TRANSPORT_CLOSE_CODES: &[i64] = &[1000, 1001, 1006, 1011, 1012, 1013];

/// Abnormal closure; treated as a transient blip on first occurrence
pub const ABNORMAL_CLOSURE: i64 = 1006;

/// A single matching predicate over a raw error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Substring of the error text (`message`, else `error`, else JSON)
    TextContains(&'static str),
    /// Substring of the `error` field only
    ErrorFieldContains(&'static str),
    /// Exact value of the `error` field
    ErrorFieldEquals(&'static str),
    /// Numeric `code` is one of the listed values
    CodeIn(&'static [i64]),
    /// Substring of a textual `code` (`ACCESS_DENIED`, `SEND_FAILED`)
    CodeContains(&'static str),
}

impl Matcher {
    /// Evaluate the predicate against an error
    pub fn matches(&self, error: &RawError) -> bool {
        match self {
            Self::TextContains(fragment) => error
                .text()
                .map(|text| text.contains(fragment))
                .unwrap_or(false),
            Self::ErrorFieldContains(fragment) => error_field(error)
                .map(|field| field.contains(fragment))
                .unwrap_or(false),
            Self::ErrorFieldEquals(value) => error_field(error)
                .map(|field| field == *value)
                .unwrap_or(false),
            Self::CodeIn(codes) => error
                .numeric_code()
                .map(|code| codes.contains(&code))
                .unwrap_or(false),
            Self::CodeContains(fragment) => error
                .payload()
                .and_then(|p| p.code.as_ref())
                .and_then(|code| code.as_str())
                .map(|code| code.contains(fragment))
                .unwrap_or(false),
        }
    }
}

fn error_field(error: &RawError) -> Option<&str> {
    error.payload()?.error.as_deref()
}

/// A prioritized classification rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRule {
    pub category: ErrorCategory,
    pub matcher: Matcher,
}

impl ClassificationRule {
    pub const fn new(category: ErrorCategory, matcher: Matcher) -> Self {
        Self { category, matcher }
    }
}

/// The default rule set, in priority order
///
/// Lazy-load failures are checked first: their messages mention "Session"
/// and would otherwise read as expiry.
pub fn default_rules() -> Vec<ClassificationRule> {
    use ErrorCategory::*;
    use Matcher::*;

    vec![
        // Backend lazy-initialization failures
        ClassificationRule::new(
            TransientDataAccess,
            TextContains("failed to lazily initialize a collection"),
        ),
        ClassificationRule::new(TransientDataAccess, TextContains("LazyInitializationException")),
        ClassificationRule::new(TransientDataAccess, TextContains("could not initialize proxy")),
        // Expiry / auth
        ClassificationRule::new(SessionExpired, TextContains("expired")),
        ClassificationRule::new(SessionExpired, TextContains("invalid session")),
        ClassificationRule::new(SessionExpired, TextContains("Unauthorized")),
        ClassificationRule::new(SessionExpired, TextContains("authentication")),
        ClassificationRule::new(SessionExpired, TextContains("401")),
        ClassificationRule::new(SessionExpired, CodeIn(&[401])),
        // Transport
        ClassificationRule::new(TransportLost, CodeIn(TRANSPORT_CLOSE_CODES)),
        ClassificationRule::new(TransportLost, TextContains("WebSocket")),
        ClassificationRule::new(TransportLost, TextContains("Connection closed")),
        ClassificationRule::new(TransportLost, TextContains("Lost connection")),
        ClassificationRule::new(TransportLost, TextContains("Connection refused")),
        ClassificationRule::new(TransportLost, TextContains("Failed to connect")),
        ClassificationRule::new(TransportLost, TextContains("socket closed")),
        ClassificationRule::new(TransportLost, TextContains("connect")),
        ClassificationRule::new(TransportLost, TextContains("network")),
        ClassificationRule::new(TransportLost, TextContains("timeout")),
        ClassificationRule::new(TransportLost, TextContains("timed out")),
        // Generic server errors
        ClassificationRule::new(ServerRejected, ErrorFieldEquals("INTERNAL_SERVER_ERROR")),
        ClassificationRule::new(ServerRejected, ErrorFieldContains("Error")),
        ClassificationRule::new(ServerRejected, TextContains("INTERNAL_SERVER_ERROR")),
        ClassificationRule::new(ServerRejected, TextContains("Internal Server Error")),
        ClassificationRule::new(ServerRejected, CodeIn(&[500])),
        ClassificationRule::new(ServerRejected, CodeContains("ERROR")),
        ClassificationRule::new(ServerRejected, CodeContains("FAILED")),
        ClassificationRule::new(ServerRejected, CodeContains("DENIED")),
    ]
}

/// Classifier over an ordered rule list
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl ErrorClassifier {
    /// Create a classifier from rules (evaluated in order)
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Add a rule that takes precedence over every existing rule
    pub fn with_priority_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Add a rule evaluated after every existing rule
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Assign exactly one category to an error
    pub fn classify(&self, error: &RawError) -> ErrorCategory {
        if matches!(error, RawError::Missing) {
            return ErrorCategory::Unknown;
        }

        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(error))
            .map(|rule| rule.category)
            .unwrap_or(ErrorCategory::Unknown)
    }
}

/// Classify with the default rule set
pub fn classify(error: &RawError) -> ErrorCategory {
    static CLASSIFIER: OnceLock<ErrorClassifier> = OnceLock::new();
    CLASSIFIER.get_or_init(ErrorClassifier::default).classify(error)
}

/// Whether the error is a WebSocket abnormal closure (code 1006)
pub fn is_abnormal_closure(error: &RawError) -> bool {
    error.numeric_code() == Some(ABNORMAL_CLOSURE)
}

/// Try to recover a room id from an error payload
///
/// Some backend errors still carry useful context: either `data.roomId`
/// (number or numeric string) or a `roomId: 42` fragment in the message.
pub fn extract_room_id(error: &RawError) -> Option<u64> {
    static ROOM_ID: OnceLock<Option<Regex>> = OnceLock::new();

    if let Some(id) = error
        .payload()
        .and_then(|p| p.data.as_ref())
        .and_then(|data| data.get("roomId"))
        .and_then(|id| match id {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    {
        return Some(id);
    }

    let text = error.text()?;
    let regex = ROOM_ID
        .get_or_init(|| Regex::new(r"(?i)roomId[:\s]+(\d+)").ok())
        .as_ref()?;
    regex
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCode, ErrorPayload};

    #[test]
    fn test_classify_lazy_init_text() {
        let err = RawError::from("failed to lazily initialize a collection of role: X");
        assert_eq!(classify(&err), ErrorCategory::TransientDataAccess);
    }

    #[test]
    fn test_classify_lazy_init_beats_session_marker() {
        let err = RawError::message("could not initialize proxy - no Session");
        assert_eq!(classify(&err), ErrorCategory::TransientDataAccess);
    }

    #[test]
    fn test_classify_session_expired() {
        assert_eq!(
            classify(&RawError::from("Unauthorized: expired")),
            ErrorCategory::SessionExpired
        );
        assert_eq!(
            classify(&RawError::message("invalid session token")),
            ErrorCategory::SessionExpired
        );
        assert_eq!(classify(&RawError::code(401)), ErrorCategory::SessionExpired);
    }

    #[test]
    fn test_classify_close_codes_without_text() {
        for code in TRANSPORT_CLOSE_CODES {
            assert_eq!(
                classify(&RawError::code(*code)),
                ErrorCategory::TransportLost,
                "code {}",
                code
            );
        }
        assert_eq!(classify(&RawError::code(4000)), ErrorCategory::Unknown);
    }

    #[test]
    fn test_classify_transport_text() {
        assert_eq!(
            classify(&RawError::from("Whoops! Lost connection to ws://host")),
            ErrorCategory::TransportLost
        );
        assert_eq!(
            classify(&RawError::message("request timeout")),
            ErrorCategory::TransportLost
        );
    }

    #[test]
    fn test_classify_connect_failures() {
        for text in [
            "Connection refused",
            "Failed to connect",
            "socket closed by peer",
            "Request timed out",
            "STOMP client is not connected",
        ] {
            assert_eq!(
                classify(&RawError::from(text)),
                ErrorCategory::TransportLost,
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_classify_status_401_in_text() {
        assert_eq!(
            classify(&RawError::from("Request failed with status 401")),
            ErrorCategory::SessionExpired
        );
    }

    #[test]
    fn test_classify_textual_server_codes() {
        for code in ["ACCESS_DENIED", "SEND_FAILED", "ROOM_ERROR"] {
            let err = RawError::from_value(serde_json::json!({ "code": code }));
            assert_eq!(classify(&err), ErrorCategory::ServerRejected, "{}", code);
        }
        // Numeric codes never match textual fragments
        assert!(!Matcher::CodeContains("ERROR").matches(&RawError::code(500)));
        assert_eq!(
            classify(&RawError::from_value(serde_json::json!({"code": "OK"}))),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_classify_case_sensitive() {
        // "LOST CONNECTION" does not match "Lost connection" or "connection"
        assert_eq!(
            classify(&RawError::from("LOST CONNECTION")),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_classify_server_rejected() {
        let err = RawError::from(ErrorPayload {
            error: Some("INTERNAL_SERVER_ERROR".to_string()),
            message: Some("Room is full".to_string()),
            ..Default::default()
        });
        assert_eq!(classify(&err), ErrorCategory::ServerRejected);

        let typed = RawError::from(ErrorPayload {
            error: Some("IllegalStateError".to_string()),
            ..Default::default()
        });
        assert_eq!(classify(&typed), ErrorCategory::ServerRejected);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify(&RawError::from("something odd")), ErrorCategory::Unknown);
        assert_eq!(classify(&RawError::Missing), ErrorCategory::Unknown);
        assert_eq!(
            classify(&RawError::from(ErrorPayload::default())),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_classify_is_deterministic() {
        let inputs = vec![
            RawError::from("LazyInitializationException"),
            RawError::code(1006),
            RawError::Missing,
            RawError::message("Unauthorized"),
            RawError::from("nothing"),
        ];
        for input in &inputs {
            let first = classify(input);
            for _ in 0..10 {
                assert_eq!(classify(input), first);
            }
        }
    }

    #[test]
    fn test_priority_rule_overrides_defaults() {
        let classifier = ErrorClassifier::default().with_priority_rule(ClassificationRule::new(
            ErrorCategory::ServerRejected,
            Matcher::TextContains("Room is full"),
        ));
        let err = RawError::from("Room is full (connection kept)");
        assert_eq!(classifier.classify(&err), ErrorCategory::ServerRejected);
        assert_eq!(classify(&err), ErrorCategory::TransportLost);
    }

    #[test]
    fn test_appended_rule_only_catches_leftovers() {
        let classifier = ErrorClassifier::default().with_rule(ClassificationRule::new(
            ErrorCategory::ServerRejected,
            Matcher::TextContains("quota"),
        ));
        assert_eq!(
            classifier.classify(&RawError::from("quota exceeded")),
            ErrorCategory::ServerRejected
        );
        assert_eq!(
            classifier.classify(&RawError::from("quota exceeded, token expired")),
            ErrorCategory::SessionExpired
        );
    }

    #[test]
    fn test_is_abnormal_closure() {
        assert!(is_abnormal_closure(&RawError::code(1006)));
        assert!(is_abnormal_closure(&RawError::from(ErrorPayload {
            code: Some(ErrorCode::Text("1006".to_string())),
            ..Default::default()
        })));
        assert!(!is_abnormal_closure(&RawError::code(1000)));
        assert!(!is_abnormal_closure(&RawError::from("1006")));
    }

    #[test]
    fn test_extract_room_id_from_data() {
        let err = RawError::from_value(serde_json::json!({
            "message": "failed",
            "data": {"roomId": 42}
        }));
        assert_eq!(extract_room_id(&err), Some(42));

        let string_id = RawError::from_value(serde_json::json!({"data": {"roomId": "17"}}));
        assert_eq!(extract_room_id(&string_id), Some(17));
    }

    #[test]
    fn test_extract_room_id_from_message() {
        let err = RawError::message("Cannot load messages for roomId: 128");
        assert_eq!(extract_room_id(&err), Some(128));

        let lower = RawError::from("ROOMID 9 unavailable");
        assert_eq!(extract_room_id(&lower), Some(9));
    }

    #[test]
    fn test_extract_room_id_absent() {
        assert_eq!(extract_room_id(&RawError::Missing), None);
        assert_eq!(extract_room_id(&RawError::from("no id here")), None);
    }
}
