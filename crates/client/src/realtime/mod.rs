//! Realtime updates from the attendance backend's push channel.
//!
//! This module provides:
//! - One push connection per admin session, shared by every view
//! - Named event fan-out to the latest registered callback
//! - Bounded auto-reconnect with connect/disconnect signals
//! - WebSocket transport with HTTP long-polling fallback
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────┐ ┌──────────┐ ┌──────────┐
//!   │  View A  │ │  View B  │ │  View C  │
//!   └────┬─────┘ └────┬─────┘ └────┬─────┘
//!        │ acquire / release        │
//!        ▼            ▼             ▼
//!   ┌──────────────────────────────────────┐
//!   │            RealtimeBridge            │
//!   │   HandlerRegistry (name -> latest)   │
//!   └──────────────────┬───────────────────┘
//!                      │ one per session
//!                      ▼
//!   ┌──────────────────────────────────────┐
//!   │  Connection supervisor (Tokio task)  │
//!   │  Negotiator: websocket -> polling    │
//!   └──────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let bridge = RealtimeBridge::new(RealtimeConfig::from_env()?);
//! let handle = bridge.acquire(
//!     Subscription::new()
//!         .on_disconnect(|| tracing::warn!("live updates paused"))
//!         .on_event(events::LEAVE_CREATED, |payload| println!("{payload}")),
//! )?;
//! // ... when the view goes away
//! bridge.release(handle);
//! ```

mod bridge;
mod connection;
pub mod hooks;
mod registry;
#[cfg(test)]
mod testing;
pub mod transport;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub use bridge::{ConnectionHandle, RealtimeBridge};
pub use connection::ConnectionState;
pub use hooks::{use_connection_state, use_realtime_events, RealtimeProvider};
pub use registry::{HandleId, Subscription};
pub use transport::TransportKind;

/// An event as seen by views: name, untouched payload and arrival time.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub name: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}
