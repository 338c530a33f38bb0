//! The session's push connection: state machine and supervisor task.

use std::sync::Arc;
use std::time::Duration;

use attendance_shared::PushFrame;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::registry::{HandlerRegistry, Lifecycle};
use super::transport::{Negotiator, PushEndpoint, PushSession};
use crate::config::ReconnectConfig;
use crate::error::TransportError;

/// Connection state of the push channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { sid: String },
    Reconnecting { attempt: u32 },
    /// Retries exhausted; parked until the next `acquire`.
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }

    pub fn sid(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { sid } => Some(sid),
            _ => None,
        }
    }
}

/// Owner-side handle of the supervisor task.
pub(crate) struct Connection {
    shutdown: watch::Sender<bool>,
    rearm: watch::Sender<u64>,
    epoch: u64,
    task: JoinHandle<()>,
}

/// Per-connection timings taken from the config.
#[derive(Debug, Clone)]
pub(crate) struct SupervisorConfig {
    pub(crate) reconnect: ReconnectConfig,
    /// Longest silence tolerated from a live session.
    pub(crate) heartbeat_timeout: Duration,
}

impl Connection {
    pub(crate) fn spawn(
        runtime: &tokio::runtime::Handle,
        endpoint: PushEndpoint,
        negotiator: Arc<Negotiator>,
        config: SupervisorConfig,
        registry: Arc<HandlerRegistry>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (rearm, rearm_rx) = watch::channel(0u64);
        let epoch = registry.begin_epoch();

        let supervisor = Supervisor {
            endpoint,
            negotiator,
            config,
            registry,
            state,
            shutdown: shutdown_rx,
            rearm: rearm_rx,
            epoch,
        };
        let task = runtime.spawn(supervisor.run());

        Self {
            shutdown,
            rearm,
            epoch,
            task,
        }
    }

    /// Ask for a handshake attempt that starts after this call.
    ///
    /// Absorbed by the retry cycle in progress; a connection parked in
    /// `Failed`, or about to park, starts a fresh cycle.
    pub(crate) fn rearm(&self) {
        self.rearm.send_modify(|generation| *generation += 1);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Stop the supervisor; it closes the live session on its way out but
    /// no longer touches state or signals.
    pub(crate) fn shutdown(self) {
        let _ = self.shutdown.send(true);
    }
}

enum PumpExit {
    Shutdown,
    Lost(String),
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop {
            return;
        }
        // Owner dropped without an explicit shutdown.
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

struct Supervisor {
    endpoint: PushEndpoint,
    negotiator: Arc<Negotiator>,
    config: SupervisorConfig,
    registry: Arc<HandlerRegistry>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Receiver<bool>,
    rearm: watch::Receiver<u64>,
    epoch: u64,
}

impl Supervisor {
    fn set_state(&self, next: ConnectionState) {
        // After shutdown the bridge owns the state again.
        if *self.shutdown.borrow() {
            return;
        }
        tracing::debug!(state = ?next, "push connection state");
        self.state.send_replace(next);
    }

    fn announce(&self, signal: Lifecycle) {
        if *self.shutdown.borrow() {
            return;
        }
        self.registry.announce(self.epoch, signal);
    }

    async fn run(mut self) {
        // 0 is a fresh handshake; 1.. are retries.
        let mut attempt: u32 = 0;

        loop {
            self.set_state(if attempt == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting { attempt }
            });
            // Re-arm requests up to here are served by this attempt.
            let _ = self.rearm.borrow_and_update();

            let opened = tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                opened = self.negotiator.open(&self.endpoint) => opened,
            };

            match opened {
                Ok(mut session) => {
                    attempt = 0;
                    let sid = session.sid().to_string();
                    tracing::info!(%sid, "push channel connected");
                    self.set_state(ConnectionState::Connected { sid: sid.clone() });
                    self.announce(Lifecycle::Connected);

                    let exit = self.pump(session.as_mut()).await;
                    session.close().await;
                    self.set_state(ConnectionState::Disconnected);
                    self.announce(Lifecycle::Disconnected);

                    match exit {
                        PumpExit::Shutdown => {
                            tracing::info!(%sid, "push channel closed");
                            return;
                        }
                        PumpExit::Lost(reason) => {
                            tracing::warn!(%sid, %reason, "push channel lost");
                            attempt = 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "push connection attempt failed");
                    attempt += 1;
                }
            }

            if !self.config.reconnect.allows(attempt) {
                let reason = format!(
                    "gave up after {} reconnect attempts",
                    self.config.reconnect.max_attempts
                );
                tracing::error!(%reason, "push connection failed");
                self.set_state(ConnectionState::Failed { reason });
                self.announce(Lifecycle::Disconnected);

                // Returns at once if a request came in during the last attempt.
                tokio::select! {
                    _ = shutdown_requested(&mut self.shutdown) => break,
                    changed = self.rearm.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                tracing::info!("push connection re-armed");
                attempt = 0;
                continue;
            }

            let delay = self.config.reconnect.delay_for_attempt(attempt);
            tracing::info!(attempt, delay = ?delay, "reconnecting push channel");
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!("push supervisor stopped");
    }

    /// Deliver frames in arrival order until the session ends or goes
    /// silent for longer than the heartbeat timeout.
    async fn pump(&mut self, session: &mut dyn PushSession) -> PumpExit {
        let heartbeat = self.config.heartbeat_timeout;
        loop {
            let frame = tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => return PumpExit::Shutdown,
                frame = tokio::time::timeout(heartbeat, session.next_frame()) => match frame {
                    Ok(frame) => frame,
                    Err(_) => {
                        return PumpExit::Lost(format!("no frames within {:?}", heartbeat))
                    }
                },
            };

            match frame {
                Some(Ok(PushFrame::Event { event, data })) => {
                    if !self.registry.dispatch(&event, &data) {
                        tracing::trace!(%event, "no handler registered, event dropped");
                    }
                }
                Some(Ok(PushFrame::Ping)) => tracing::trace!("push keep-alive"),
                Some(Ok(PushFrame::Open { sid })) => {
                    tracing::debug!(%sid, "ignoring repeated open frame")
                }
                Some(Ok(PushFrame::Close { reason })) => {
                    return PumpExit::Lost(reason.unwrap_or_else(|| "closed by server".to_string()))
                }
                Some(Err(TransportError::Protocol(e))) => {
                    tracing::warn!(error = %e, "dropping malformed push frame")
                }
                Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                None => return PumpExit::Lost("stream ended".to_string()),
            }
        }
    }
}
