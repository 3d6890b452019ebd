use std::time::Duration;

use thiserror::Error;

/// Generic text shown when the server could not be reached at all.
pub const UNREACHABLE_MESSAGE: &str =
    "Unable to reach the notification service. Check your connection and try again.";

// ── SyncError ───────────────────────────────────────────────────────

/// Every failure the sync engine can report.
///
/// Errors never cross the public API as panics: REST operations return
/// them, the store records their `Display` text in its error slot, and
/// the connection manager hands them to its `on_error` listeners.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The server answered and refused. `message` is shown verbatim.
    #[error("{message}")]
    Rejected {
        status: Option<u16>,
        message: String,
    },

    /// No response at all (DNS, refused connection, dropped socket).
    /// The inner detail is for logs only.
    #[error("{}", UNREACHABLE_MESSAGE)]
    Unreachable(String),

    /// Push-channel failure.
    #[error("transport: {0}")]
    Transport(String),

    /// No connect acknowledgement within the configured timeout.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// Missing or invalid configuration. Never retried.
    #[error("configuration: {0}")]
    Config(String),

    /// Payload did not match the expected shape.
    #[error("decode: {0}")]
    Decode(String),

    /// A newer snapshot request (or a reset) replaced this one before its
    /// response arrived. Nothing was applied.
    #[error("superseded by a newer request")]
    Superseded,
}

impl SyncError {
    pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        SyncError::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Transport-level failures are retried by the connection manager;
    /// everything else surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Timeout(_) | SyncError::Unreachable(_)
        )
    }

    /// Text for the presentation layer's error slot.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SyncError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            SyncError::rejected(Some(status.as_u16()), e.to_string())
        } else {
            SyncError::Unreachable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}
