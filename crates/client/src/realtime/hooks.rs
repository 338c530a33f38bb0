//! Dioxus hooks over the session bridge.
//!
//! Bridge callbacks run on the Tokio supervisor task, so the hooks forward
//! events over a channel and apply them on the Dioxus side, where signals and
//! view closures live.

use std::cell::RefCell;
use std::rc::Rc;

use dioxus::prelude::*;
use futures_channel::mpsc::unbounded;
use futures_util::StreamExt;
use serde_json::Value;

use super::{ConnectionHandle, ConnectionState, InboundEvent, RealtimeBridge, Subscription};

type ViewCallback = Rc<RefCell<Box<dyn FnMut(InboundEvent)>>>;

/// Makes `bridge` available to every descendant and shuts the connection
/// down when the provider unmounts (application teardown).
#[component]
pub fn RealtimeProvider(bridge: RealtimeBridge, children: Element) -> Element {
    let bridge = use_context_provider(|| bridge);
    use_drop(move || bridge.shutdown());
    children
}

/// Hook to follow the push connection state (reactive).
pub fn use_connection_state() -> Signal<ConnectionState> {
    let bridge = use_context::<RealtimeBridge>();
    let mut state = use_signal(|| bridge.state());

    use_hook(move || {
        let mut changes = bridge.watch_state();
        spawn(async move {
            while changes.changed().await.is_ok() {
                let current = changes.borrow_and_update().clone();
                state.set(current);
            }
        });
    });

    state
}

/// Hook to receive named push events in a component.
///
/// Subscribes on first render and releases on unmount. `on_event` may capture
/// fresh state on every render; the latest closure is the one invoked.
///
/// # Returns
/// The connection state (reactive), for rendering a "live" indicator.
pub fn use_realtime_events(
    events: &[&str],
    on_event: impl FnMut(InboundEvent) + 'static,
) -> Signal<ConnectionState> {
    let bridge = use_context::<RealtimeBridge>();

    let latest: ViewCallback = use_hook(|| {
        Rc::new(RefCell::new(
            Box::new(|_: InboundEvent| {}) as Box<dyn FnMut(InboundEvent)>
        ))
    });
    *latest.borrow_mut() = Box::new(on_event);

    let handle: Rc<RefCell<Option<ConnectionHandle>>> = use_hook(|| {
        let (tx, mut rx) = unbounded::<InboundEvent>();

        let mut subscription = Subscription::new();
        for name in events {
            let tx = tx.clone();
            let name = name.to_string();
            subscription = subscription.on_event(name.clone(), move |payload: &Value| {
                let _ = tx.unbounded_send(InboundEvent::new(name.clone(), payload.clone()));
            });
        }

        let latest = latest.clone();
        spawn(async move {
            while let Some(event) = rx.next().await {
                let mut callback = latest.borrow_mut();
                (*callback)(event);
            }
        });

        let acquired = match bridge.acquire(subscription) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "realtime subscription rejected");
                None
            }
        };
        Rc::new(RefCell::new(acquired))
    });

    let releasing = bridge.clone();
    use_drop(move || {
        if let Some(handle) = handle.borrow_mut().take() {
            releasing.release(handle);
        }
    });

    use_connection_state()
}
