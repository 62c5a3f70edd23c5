//! Error types for a3s-recovery

use thiserror::Error;

/// Errors raised by recovery collaborators and configuration
///
/// The coordinator itself never returns these to its caller; they surface
/// from channel, notifier, and config operations and are folded into
/// observer events and log records.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The transport channel is not connected
    #[error("Channel is not connected")]
    Disconnected,

    /// Transport channel failure (send, subscribe, reconnect)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;
