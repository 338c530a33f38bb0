//! Push channel configuration from environment variables.

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::realtime::transport::TransportKind;

pub const ENV_PUSH_URL: &str = "ATTENDANCE_PUSH_URL";
pub const ENV_TRANSPORTS: &str = "ATTENDANCE_PUSH_TRANSPORTS";
pub const ENV_RECONNECT_ATTEMPTS: &str = "ATTENDANCE_PUSH_RECONNECT_ATTEMPTS";
pub const ENV_RECONNECT_DELAY_MS: &str = "ATTENDANCE_PUSH_RECONNECT_DELAY_MS";
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "ATTENDANCE_PUSH_HANDSHAKE_TIMEOUT_MS";
pub const ENV_HEARTBEAT_TIMEOUT_MS: &str = "ATTENDANCE_PUSH_HEARTBEAT_TIMEOUT_MS";
pub const ENV_TOKEN: &str = "ATTENDANCE_PUSH_TOKEN";

const DEFAULT_PUSH_URL: &str = "http://localhost:5000/realtime";
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 60_000;

/// Retry policy for the push connection.
///
/// The delay between attempts is fixed. After `max_attempts` failed retries
/// the connection parks in `Failed` until a new `acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.delay
    }

    /// Whether retry number `attempt` (1-based) is still allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

/// Everything the bridge needs to reach the push endpoint.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Push endpoint; `http(s)` and `ws(s)` schemes are both accepted.
    pub push_url: Url,
    /// Transports in preference order.
    pub transports: Vec<TransportKind>,
    pub reconnect: ReconnectConfig,
    /// Upper bound for a single transport handshake.
    pub handshake_timeout: Duration,
    /// A live session silent for this long is treated as lost. Also bounds
    /// each long-poll request, so it must exceed the server's poll hold time.
    pub heartbeat_timeout: Duration,
    /// Bearer credential attached to every handshake and poll.
    pub bearer_token: Option<String>,
}

impl RealtimeConfig {
    /// Config with defaults for everything but the endpoint.
    pub fn new(push_url: Url) -> Self {
        Self {
            push_url,
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            reconnect: ReconnectConfig::default(),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            bearer_token: None,
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ATTENDANCE_PUSH_URL` (default: "http://localhost:5000/realtime")
    /// - `ATTENDANCE_PUSH_TRANSPORTS`: comma separated, preferred first (default: "websocket,polling")
    /// - `ATTENDANCE_PUSH_RECONNECT_ATTEMPTS` (default: 5)
    /// - `ATTENDANCE_PUSH_RECONNECT_DELAY_MS` (default: 1000)
    /// - `ATTENDANCE_PUSH_HANDSHAKE_TIMEOUT_MS` (default: 10000)
    /// - `ATTENDANCE_PUSH_HEARTBEAT_TIMEOUT_MS`: longest silence before reconnecting (default: 60000)
    /// - `ATTENDANCE_PUSH_TOKEN`: optional bearer credential
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_url = lookup(ENV_PUSH_URL).unwrap_or_else(|| DEFAULT_PUSH_URL.to_string());
        let push_url = Url::parse(raw_url.trim()).map_err(|e| ConfigError::InvalidUrl {
            key: ENV_PUSH_URL,
            reason: e.to_string(),
        })?;
        if !matches!(push_url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                key: ENV_PUSH_URL,
                reason: format!("unsupported scheme {}", push_url.scheme()),
            });
        }

        let mut config = Self::new(push_url);

        if let Some(raw) = lookup(ENV_TRANSPORTS) {
            config.transports = parse_transports(&raw)?;
        }
        if let Some(raw) = lookup(ENV_RECONNECT_ATTEMPTS) {
            config.reconnect.max_attempts = parse_number(ENV_RECONNECT_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RECONNECT_DELAY_MS) {
            config.reconnect.delay =
                Duration::from_millis(parse_number(ENV_RECONNECT_DELAY_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_HANDSHAKE_TIMEOUT_MS) {
            config.handshake_timeout =
                Duration::from_millis(parse_number(ENV_HANDSHAKE_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_HEARTBEAT_TIMEOUT_MS) {
            let millis: u64 = parse_number(ENV_HEARTBEAT_TIMEOUT_MS, &raw)?;
            if millis == 0 {
                return Err(ConfigError::InvalidNumber {
                    key: ENV_HEARTBEAT_TIMEOUT_MS,
                    value: raw,
                });
            }
            config.heartbeat_timeout = Duration::from_millis(millis);
        }
        config.bearer_token = lookup(ENV_TOKEN).filter(|t| !t.trim().is_empty());

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}

fn parse_transports(raw: &str) -> Result<Vec<TransportKind>, ConfigError> {
    let mut kinds = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind = TransportKind::from_name(name).ok_or_else(|| ConfigError::UnknownTransport {
            key: ENV_TRANSPORTS,
            value: name.to_string(),
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(ConfigError::NoTransports {
            key: ENV_TRANSPORTS,
        });
    }
    Ok(kinds)
}
