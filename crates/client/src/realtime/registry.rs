//! Event-name to callback slots shared by every handle of a session.
//!
//! Each event name maps to the registrations made for it, newest last. The
//! newest registration is the delivery target; releasing it promotes the
//! previous one. Delivery clones the target out under the lock and calls it
//! after the lock is gone, so callbacks may re-enter the bridge.
//!
//! Lifecycle signals are scoped to an epoch, one per spawned connection. A
//! supervisor that outlives its epoch (still closing after `shutdown`) can no
//! longer reach subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use uuid::Uuid;

use crate::error::BridgeError;

pub(crate) type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub(crate) type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;

/// Identity of a [`ConnectionHandle`](super::ConnectionHandle).
pub type HandleId = Uuid;

/// Connection lifecycle signal delivered to `on_connect` / `on_disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Connected,
    Disconnected,
}

/// What a view asks the bridge for: lifecycle listeners plus named event
/// handlers.
///
/// ```rust,ignore
/// let subscription = Subscription::new()
///     .on_connect(|| tracing::info!("live"))
///     .on_event(events::ATTENDANCE_CHECK_IN, |payload| refresh_dashboard(payload));
/// let handle = bridge.acquire(subscription)?;
/// ```
#[derive(Clone, Default)]
pub struct Subscription {
    pub(crate) on_connect: Option<LifecycleCallback>,
    pub(crate) on_disconnect: Option<LifecycleCallback>,
    pub(crate) handlers: Vec<(String, EventCallback)>,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle events named `name`. A second call for the same name replaces
    /// the first.
    pub fn on_event(
        mut self,
        name: impl Into<String>,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        let callback: EventCallback = Arc::new(callback);
        match self.handlers.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = callback,
            None => self.handlers.push((name, callback)),
        }
        self
    }

    pub fn on_connect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    pub fn on_disconnect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        if self.event_names().any(|name| name.trim().is_empty()) {
            return Err(BridgeError::EmptyEventName);
        }
        Ok(())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("events", &self.event_names().collect::<Vec<_>>())
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

struct Registration {
    owner: HandleId,
    callback: EventCallback,
}

struct Listener {
    owner: HandleId,
    on_connect: Option<LifecycleCallback>,
    on_disconnect: Option<LifecycleCallback>,
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<String, Vec<Registration>>,
    /// One entry per live handle, in registration order.
    listeners: Vec<Listener>,
    epoch: u64,
    /// Last signal announced in the current epoch.
    announced: Option<Lifecycle>,
}

impl RegistryState {
    fn remove_owner(&mut self, owner: HandleId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.owner != owner);
        self.slots.retain(|_, registrations| {
            registrations.retain(|r| r.owner != owner);
            !registrations.is_empty()
        });
        self.listeners.len() != before
    }

    fn lifecycle_callbacks(&self, signal: Lifecycle) -> Vec<LifecycleCallback> {
        self.listeners
            .iter()
            .filter_map(|l| match signal {
                Lifecycle::Connected => l.on_connect.clone(),
                Lifecycle::Disconnected => l.on_disconnect.clone(),
            })
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    state: Mutex<RegistryState>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace everything `owner` had registered with `subscription`.
    pub(crate) fn bind(&self, owner: HandleId, subscription: Subscription) {
        let mut state = self.lock();
        state.remove_owner(owner);
        for (name, callback) in subscription.handlers {
            state
                .slots
                .entry(name)
                .or_default()
                .push(Registration { owner, callback });
        }
        state.listeners.push(Listener {
            owner,
            on_connect: subscription.on_connect,
            on_disconnect: subscription.on_disconnect,
        });
    }

    /// Drop every registration of `owner`. Returns whether it was live.
    pub(crate) fn unbind(&self, owner: HandleId) -> bool {
        self.lock().remove_owner(owner)
    }

    pub(crate) fn is_bound(&self, owner: HandleId) -> bool {
        self.lock().listeners.iter().any(|l| l.owner == owner)
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.lock().listeners.len()
    }

    pub(crate) fn current(&self, name: &str) -> Option<EventCallback> {
        self.lock()
            .slots
            .get(name)
            .and_then(|registrations| registrations.last())
            .map(|r| r.callback.clone())
    }

    /// Deliver one event to the current callback for `name`.
    ///
    /// Returns `false` when nothing is registered; the event is dropped.
    pub(crate) fn dispatch(&self, name: &str, payload: &Value) -> bool {
        match self.current(name) {
            Some(callback) => {
                callback(payload);
                true
            }
            None => false,
        }
    }

    /// Start a new lifecycle epoch and retire the previous one.
    pub(crate) fn begin_epoch(&self) -> u64 {
        let mut state = self.lock();
        state.epoch += 1;
        state.announced = None;
        state.epoch
    }

    /// Invoke the lifecycle callback of every live handle.
    ///
    /// Dropped when `epoch` is stale or `signal` repeats the last one.
    pub(crate) fn announce(&self, epoch: u64, signal: Lifecycle) -> bool {
        let callbacks = {
            let mut state = self.lock();
            if state.epoch != epoch || state.announced == Some(signal) {
                return false;
            }
            state.announced = Some(signal);
            state.lifecycle_callbacks(signal)
        };
        fire(callbacks);
        true
    }

    /// Retire `epoch`. Returns the `on_disconnect` callbacks owed to
    /// subscribers if the epoch was last announced as connected; the caller
    /// fires them once it holds no locks.
    pub(crate) fn end_epoch(&self, epoch: u64) -> Vec<LifecycleCallback> {
        let mut state = self.lock();
        if state.epoch != epoch {
            return Vec::new();
        }
        state.epoch += 1;
        match state.announced.take() {
            Some(Lifecycle::Connected) => state.lifecycle_callbacks(Lifecycle::Disconnected),
            _ => Vec::new(),
        }
    }
}

pub(crate) fn fire(callbacks: Vec<LifecycleCallback>) {
    for callback in callbacks {
        callback();
    }
}
