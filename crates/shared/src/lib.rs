//! Shared types for the attendance push channel: wire frames, event names and
//! protocol errors used by both the admin client and the push server.

pub mod error;
pub mod events;
pub mod protocol;

pub use error::*;
pub use protocol::*;
