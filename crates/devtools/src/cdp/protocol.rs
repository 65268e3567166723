//! CDP Protocol Types
//!
//! These are the fundamental types for CDP communication.
//! Keep them minimal - add domain-specific types only when needed.
//!
//! Inbound frames are classified explicitly by which keys are present
//! (`id` vs `method`), not by trial deserialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CDPError, Result};

pub use devtools_dom::types::{FrameId, RemoteObjectId, SessionId, TargetId};

/// Request ID - monotonically increasing, wraps before leaving the int32 range
pub type RequestId = u64;

/// CDP Request sent to browser
///
/// `id` is assigned by the CommandManager when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CDPRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<SessionId>,
}

impl CDPRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: None,
            session_id: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_session(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }
}

/// CDP Response from browser
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ProtocolError>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl CDPResponse {
    /// Turn an error response into `CommandFailed`, code and message verbatim
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(CDPError::CommandFailed {
                code: error.code,
                message: error.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Error object of a failed command
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

/// Unified CDP Message (request, response, or event)
#[derive(Debug, Clone, PartialEq)]
pub enum CDPMessage {
    /// Carries both `id` and `method`; browsers never send these to a client
    Command(CDPRequest),
    Response(CDPResponse),
    Event(CDPEvent),
}

/// Every key any message kind may carry
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProtocolError>,
    #[serde(rename = "sessionId", default)]
    session_id: Option<SessionId>,
}

impl CDPMessage {
    /// Parse and classify one inbound text frame
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;

        match (envelope.id, envelope.method) {
            (Some(id), Some(method)) => Ok(Self::Command(CDPRequest {
                id: Some(id),
                method,
                params: envelope.params,
                session_id: envelope.session_id,
            })),
            (Some(id), None) => Ok(Self::Response(CDPResponse {
                id,
                result: envelope.result,
                error: envelope.error,
                session_id: envelope.session_id,
            })),
            (None, Some(method)) => Ok(Self::Event(CDPEvent {
                method,
                params: envelope.params,
                session_id: envelope.session_id,
            })),
            (None, None) => Err(CDPError::MalformedMessage(
                "frame has neither id nor method".to_string(),
            )),
        }
    }
}
