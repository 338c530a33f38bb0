//! Push channel wire protocol.
//!
//! Every frame is a JSON object tagged by `type`. A session always starts with
//! an `open` frame carrying the server-assigned session id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Query parameter selecting the transport.
pub const QUERY_TRANSPORT: &str = "transport";
/// Query parameter carrying the session id on polling requests.
pub const QUERY_SID: &str = "sid";

/// Transport names as they appear on the wire.
pub const TRANSPORT_WEBSOCKET: &str = "websocket";
pub const TRANSPORT_POLLING: &str = "polling";

/// A single frame on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    /// Handshake; first frame of every session.
    Open { sid: String },
    /// Server-initiated named event.
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
    /// Keep-alive.
    Ping,
    /// Server is closing the session.
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl PushFrame {
    /// Build an event frame.
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        PushFrame::Event {
            event: event.into(),
            data,
        }
    }

    /// Short name of the frame kind, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            PushFrame::Open { .. } => "open",
            PushFrame::Event { .. } => "event",
            PushFrame::Ping => "ping",
            PushFrame::Close { .. } => "close",
        }
    }

    /// Decode one frame from its JSON text.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a polling response body (a JSON array of frames).
    pub fn decode_batch(text: &str) -> Result<Vec<Self>, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode to JSON text.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Extract the session id from a handshake frame.
    pub fn into_sid(self) -> Result<String, ProtocolError> {
        match self {
            PushFrame::Open { sid } => Ok(sid),
            other => Err(ProtocolError::UnexpectedFrame(other.kind())),
        }
    }
}
