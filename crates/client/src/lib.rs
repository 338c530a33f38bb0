//! Attendance admin client - realtime bridge
//!
//! Owns the single push-channel connection of an admin session and fans the
//! backend's named events out to the views that asked for them.

pub mod config;
pub mod error;
pub mod logging;
pub mod realtime;

pub use config::{RealtimeConfig, ReconnectConfig};
pub use error::{BridgeError, ConfigError, TransportError};
pub use realtime::{
    ConnectionHandle, ConnectionState, InboundEvent, RealtimeBridge, Subscription,
};
