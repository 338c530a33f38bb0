//! Shared error types.

use thiserror::Error;

/// Failure to decode or encode a push frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected open frame, got {0}")]
    UnexpectedFrame(&'static str),
}
