//! Error types for the CDP core
//!
//! One flat enum. Callers branch on three questions:
//! - worth retrying? (`CommandTimeout`, `ConnectionLost`)
//! - rejected by the browser? (`CommandFailed`, code and message verbatim)
//! - not a usable frame? (`InvalidFrame`)

use std::time::Duration;

use thiserror::Error;

use crate::cdp::protocol::RequestId;

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected CDP result: {0}")]
    Dom(#[from] devtools_dom::DomError),

    #[error("CDP protocol error: {code} - {message}")]
    CommandFailed { code: i64, message: String },

    #[error("Request {id} timed out after {timeout:?}")]
    CommandTimeout { id: RequestId, timeout: Duration },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Connection closed")]
    Closed,

    #[error("Invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("Request id {0} is already pending")]
    DuplicateRequestId(RequestId),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CDPError {
    pub fn connection_lost(reason: impl ToString) -> Self {
        Self::ConnectionLost {
            reason: reason.to_string(),
        }
    }

    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Timeouts and lost connections may succeed on a second attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CommandTimeout { .. } | Self::ConnectionLost { .. }
        )
    }

    /// Remote error code of a rejected command
    pub fn protocol_code(&self) -> Option<i64> {
        match self {
            Self::CommandFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;
