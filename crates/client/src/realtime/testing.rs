//! In-memory push server for the bridge and hook tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use attendance_shared::PushFrame;
use serde_json::Value;
use tokio::sync::mpsc;

use super::transport::{PushEndpoint, PushSession, Transport, TransportKind};
use super::{ConnectionState, RealtimeBridge};
use crate::config::{RealtimeConfig, ReconnectConfig};
use crate::error::TransportError;

pub(crate) type Inbound = Result<PushFrame, TransportError>;

/// Counts handshakes and lets tests inject frames into, or cut, the live
/// session.
#[derive(Default)]
pub(crate) struct Scripted {
    handshakes: AtomicUsize,
    refuse: AtomicBool,
    handshake_delay: Mutex<Duration>,
    close_delay: Mutex<Duration>,
    closed: Arc<AtomicUsize>,
    live: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
}

impl Scripted {
    pub(crate) fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn slow_handshake(&self, delay: Duration) {
        *self.handshake_delay.lock().unwrap() = delay;
    }

    pub(crate) fn slow_close(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = delay;
    }

    pub(crate) fn send(&self, frame: Inbound) {
        let live = self.live.lock().unwrap();
        live.as_ref().expect("no live session").send(frame).unwrap();
    }

    pub(crate) fn push(&self, event: &str, data: Value) {
        self.send(Ok(PushFrame::event(event, data)));
    }

    pub(crate) fn cut(&self) {
        self.live.lock().unwrap().take();
    }
}

struct ScriptedSession {
    sid: String,
    frames: mpsc::UnboundedReceiver<Inbound>,
    close_delay: Duration,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl PushSession for ScriptedSession {
    fn sid(&self) -> &str {
        &self.sid
    }

    async fn next_frame(&mut self) -> Option<Inbound> {
        self.frames.recv().await
    }

    async fn close(&mut self) {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for Scripted {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn handshake(&self, _: &PushEndpoint) -> Result<Box<dyn PushSession>, TransportError> {
        let n = self.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.handshake_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.live.lock().unwrap() = Some(tx);
        Ok(Box::new(ScriptedSession {
            sid: format!("s{}", n),
            frames: rx,
            close_delay: *self.close_delay.lock().unwrap(),
            closed: self.closed.clone(),
        }))
    }
}

/// Two quick retries, generous heartbeat.
pub(crate) fn config() -> RealtimeConfig {
    let mut config = RealtimeConfig::new("http://push.test/realtime".parse().unwrap());
    config.reconnect = ReconnectConfig {
        max_attempts: 2,
        delay: Duration::from_millis(10),
    };
    config.handshake_timeout = Duration::from_secs(1);
    config.heartbeat_timeout = Duration::from_secs(5);
    config
}

pub(crate) fn bridge_with(transport: &Arc<Scripted>) -> RealtimeBridge {
    bridge_with_config(transport, config())
}

pub(crate) fn bridge_with_config(transport: &Arc<Scripted>, config: RealtimeConfig) -> RealtimeBridge {
    RealtimeBridge::with_transports(config, vec![transport.clone() as Arc<dyn Transport>])
}

pub(crate) async fn wait_until(bridge: &RealtimeBridge, pred: impl Fn(&ConnectionState) -> bool) {
    let mut rx = bridge.watch_state();
    let reached = matches!(
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| pred(s))).await,
        Ok(Ok(_))
    );
    assert!(reached, "state not reached, last: {:?}", bridge.state());
}
