//! Client error types.

use attendance_shared::ProtocolError;
use thiserror::Error;

/// Errors returned synchronously by the bridge API.
///
/// Transport trouble never shows up here; it is reported through connection
/// state and the disconnect signal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("event name must not be empty")]
    EmptyEventName,
    #[error("handle {0} does not belong to this bridge")]
    UnknownHandle(uuid::Uuid),
    #[error("no Tokio runtime available to drive the push connection")]
    RuntimeUnavailable,
}

/// Failure of a single handshake or of an established session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("no transport could connect")]
    Exhausted,
}

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid url: {reason}")]
    InvalidUrl { key: &'static str, reason: String },
    #[error("{key}: expected a number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key}: unknown transport {value:?}")]
    UnknownTransport { key: &'static str, value: String },
    #[error("{key}: at least one transport is required")]
    NoTransports { key: &'static str },
}
