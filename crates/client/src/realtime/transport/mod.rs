//! Push transports and handshake negotiation.
//!
//! A [`Transport`] knows how to open one session with the push endpoint. The
//! [`Negotiator`] tries the configured transports in preference order and
//! hands the first session that completes its handshake to the connection
//! supervisor.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attendance_shared::{PushFrame, QUERY_SID, QUERY_TRANSPORT, TRANSPORT_POLLING, TRANSPORT_WEBSOCKET};
use url::Url;

use crate::config::RealtimeConfig;
use crate::error::TransportError;

mod polling;
mod websocket;

pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

/// Wire transports the bridge can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSocket,
    Polling,
}

impl TransportKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => TRANSPORT_WEBSOCKET,
            TransportKind::Polling => TRANSPORT_POLLING,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            TRANSPORT_WEBSOCKET | "ws" => Some(TransportKind::WebSocket),
            TRANSPORT_POLLING | "long-polling" => Some(TransportKind::Polling),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where and how to reach the push server.
#[derive(Debug, Clone)]
pub struct PushEndpoint {
    pub url: Url,
    pub bearer_token: Option<String>,
}

impl PushEndpoint {
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            url: config.push_url.clone(),
            bearer_token: config.bearer_token.clone(),
        }
    }

    /// URL for `kind`, with the matching scheme and query parameters.
    pub fn url_for(&self, kind: TransportKind, sid: Option<&str>) -> Result<Url, TransportError> {
        let mut url = self.url.clone();
        let scheme = match (kind, url.scheme()) {
            (TransportKind::WebSocket, "http" | "ws") => "ws",
            (TransportKind::WebSocket, "https" | "wss") => "wss",
            (TransportKind::Polling, "ws" | "http") => "http",
            (TransportKind::Polling, "wss" | "https") => "https",
            (_, other) => {
                return Err(TransportError::Endpoint(format!(
                    "unsupported scheme {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::Endpoint(format!("cannot switch {} to {}", url, scheme)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(QUERY_TRANSPORT, kind.name());
            if let Some(sid) = sid {
                query.append_pair(QUERY_SID, sid);
            }
        }
        Ok(url)
    }
}

/// One way of opening a push session.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Connect and complete the `open` handshake.
    async fn handshake(&self, endpoint: &PushEndpoint) -> Result<Box<dyn PushSession>, TransportError>;
}

/// An established push session.
#[async_trait]
pub trait PushSession: Send {
    /// Session id assigned by the server during the handshake.
    fn sid(&self) -> &str;

    /// Next inbound frame. `None` once the session has ended.
    ///
    /// `Err(TransportError::Protocol(_))` reports one undecodable frame and
    /// leaves the session usable; any other error ends it.
    async fn next_frame(&mut self) -> Option<Result<PushFrame, TransportError>>;

    async fn close(&mut self);
}

/// Build the transports listed in `config`, in preference order.
pub fn default_transports(config: &RealtimeConfig) -> Vec<Arc<dyn Transport>> {
    config
        .transports
        .iter()
        .map(|kind| -> Arc<dyn Transport> {
            match kind {
                TransportKind::WebSocket => Arc::new(WebSocketTransport::new()),
                TransportKind::Polling => Arc::new(PollingTransport::new(config.heartbeat_timeout)),
            }
        })
        .collect()
}

/// Tries transports in order until one completes its handshake.
pub struct Negotiator {
    transports: Vec<Arc<dyn Transport>>,
    handshake_timeout: Duration,
}

impl Negotiator {
    pub fn new(transports: Vec<Arc<dyn Transport>>, handshake_timeout: Duration) -> Self {
        Self {
            transports,
            handshake_timeout,
        }
    }

    pub async fn open(&self, endpoint: &PushEndpoint) -> Result<Box<dyn PushSession>, TransportError> {
        let mut last_error = TransportError::Exhausted;

        for transport in &self.transports {
            let kind = transport.kind();
            match tokio::time::timeout(self.handshake_timeout, transport.handshake(endpoint)).await {
                Ok(Ok(session)) => {
                    tracing::info!(transport = %kind, sid = session.sid(), "push handshake complete");
                    return Ok(session);
                }
                Ok(Err(e)) => {
                    tracing::warn!(transport = %kind, error = %e, "push handshake failed");
                    last_error = e;
                }
                Err(_) => {
                    tracing::warn!(transport = %kind, timeout = ?self.handshake_timeout, "push handshake timed out");
                    last_error = TransportError::Timeout(self.handshake_timeout);
                }
            }
        }

        Err(last_error)
    }
}
