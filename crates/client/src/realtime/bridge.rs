//! Session-scoped bridge between views and the push connection.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use attendance_shared::events;
use tokio::sync::watch;
use uuid::Uuid;

use super::connection::{Connection, ConnectionState, SupervisorConfig};
use super::registry::{self, HandleId, HandlerRegistry, Subscription};
use super::transport::{default_transports, Negotiator, PushEndpoint, Transport};
use crate::config::RealtimeConfig;
use crate::error::BridgeError;

/// Multiplexes one push connection across every view of an admin session.
///
/// Clones share the session. Create one per application session and pass it
/// to the views that need live updates (see [`RealtimeProvider`]).
///
/// [`RealtimeProvider`]: super::hooks::RealtimeProvider
#[derive(Clone)]
pub struct RealtimeBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    endpoint: PushEndpoint,
    supervisor: SupervisorConfig,
    negotiator: Arc<Negotiator>,
    registry: Arc<HandlerRegistry>,
    state: Arc<watch::Sender<ConnectionState>>,
    connection: Mutex<Option<Connection>>,
}

/// Scope of one [`RealtimeBridge::acquire`] call.
///
/// Dropping the handle releases it.
#[must_use = "dropping a ConnectionHandle releases its subscriptions"]
pub struct ConnectionHandle {
    id: HandleId,
    registry: Weak<HandlerRegistry>,
}

impl ConnectionHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionHandle").field(&self.id).finish()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.unbind(self.id) {
                tracing::debug!(handle = %self.id, "realtime handle released");
            }
        }
    }
}

impl RealtimeBridge {
    /// Bridge using the transports listed in `config`.
    pub fn new(config: RealtimeConfig) -> Self {
        let transports = default_transports(&config);
        Self::with_transports(config, transports)
    }

    /// Bridge negotiating over `transports`, in order.
    pub fn with_transports(config: RealtimeConfig, transports: Vec<Arc<dyn Transport>>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(BridgeInner {
                endpoint: PushEndpoint::from_config(&config),
                supervisor: SupervisorConfig {
                    reconnect: config.reconnect.clone(),
                    heartbeat_timeout: config.heartbeat_timeout,
                },
                negotiator: Arc::new(Negotiator::new(transports, config.handshake_timeout)),
                registry: Arc::new(HandlerRegistry::new()),
                state: Arc::new(state),
                connection: Mutex::new(None),
            }),
        }
    }

    /// Register `subscription` and make sure the session connection exists.
    ///
    /// Returns immediately; the handshake runs in the background. If the
    /// connection gave up after exhausting its retries, this starts a fresh
    /// handshake cycle.
    pub fn acquire(&self, subscription: Subscription) -> Result<ConnectionHandle, BridgeError> {
        subscription.validate()?;
        let runtime = current_runtime()?;

        let id = Uuid::new_v4();
        tracing::debug!(handle = %id, ?subscription, "realtime handle acquired");
        for name in subscription.event_names().filter(|name| !events::is_known(name)) {
            tracing::debug!(handle = %id, event = name, "subscribing to an uncatalogued event");
        }
        self.inner.registry.bind(id, subscription);
        self.ensure_connection(&runtime);

        Ok(ConnectionHandle {
            id,
            registry: Arc::downgrade(&self.inner.registry),
        })
    }

    /// Replace everything `handle` registered with `subscription`.
    pub fn rebind(
        &self,
        handle: &ConnectionHandle,
        subscription: Subscription,
    ) -> Result<(), BridgeError> {
        subscription.validate()?;
        let owned = handle
            .registry
            .upgrade()
            .is_some_and(|registry| Arc::ptr_eq(&registry, &self.inner.registry));
        if !owned || !self.inner.registry.is_bound(handle.id) {
            return Err(BridgeError::UnknownHandle(handle.id));
        }
        let runtime = current_runtime()?;

        tracing::debug!(handle = %handle.id, ?subscription, "realtime handle rebound");
        self.inner.registry.bind(handle.id, subscription);
        self.ensure_connection(&runtime);
        Ok(())
    }

    /// Remove the subscriptions owned by `handle`. The connection stays up.
    pub fn release(&self, handle: ConnectionHandle) {
        drop(handle);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Server-assigned id of the live session, if connected.
    pub fn connection_id(&self) -> Option<String> {
        self.inner.state.borrow().sid().map(str::to_string)
    }

    pub fn live_handles(&self) -> usize {
        self.inner.registry.live_handles()
    }

    /// Tear the session connection down. Subscribers get `on_disconnect`
    /// before this returns if the channel was connected. A later `acquire`
    /// opens a new connection; the old session finishes closing on its own.
    pub fn shutdown(&self) {
        let owed = {
            let mut slot = self.connection_slot();
            let Some(connection) = slot.take() else {
                return;
            };
            tracing::info!(url = %self.inner.endpoint.url, "shutting down push connection");
            let epoch = connection.epoch();
            connection.shutdown();
            self.inner.state.send_replace(ConnectionState::Disconnected);
            self.inner.registry.end_epoch(epoch)
        };
        // Outside the slot lock: callbacks may acquire again.
        registry::fire(owed);
    }

    fn connection_slot(&self) -> MutexGuard<'_, Option<Connection>> {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connection(&self, runtime: &tokio::runtime::Handle) {
        let mut slot = self.connection_slot();
        match slot.as_ref() {
            Some(connection) if !connection.is_finished() => {
                if self.inner.state.borrow().is_failed() {
                    tracing::info!("push connection failed earlier, retrying handshake");
                }
                connection.rearm();
            }
            _ => {
                tracing::info!(url = %self.inner.endpoint.url, "opening push connection");
                *slot = Some(Connection::spawn(
                    runtime,
                    self.inner.endpoint.clone(),
                    self.inner.negotiator.clone(),
                    self.inner.supervisor.clone(),
                    self.inner.registry.clone(),
                    self.inner.state.clone(),
                ));
            }
        }
    }
}

fn current_runtime() -> Result<tokio::runtime::Handle, BridgeError> {
    tokio::runtime::Handle::try_current().map_err(|_| BridgeError::RuntimeUnavailable)
}

impl PartialEq for RealtimeBridge {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RealtimeBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeBridge")
            .field("url", &self.inner.endpoint.url.as_str())
            .field("state", &*self.inner.state.borrow())
            .field("live_handles", &self.live_handles())
            .finish()
    }
}
