//! End-to-end bridge tests against an in-process axum push server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use attendance_client::{
    ConnectionState, RealtimeBridge, RealtimeConfig, ReconnectConfig, Subscription,
};
use attendance_client::realtime::TransportKind;
use attendance_shared::{events, PushFrame};
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;

#[derive(Clone, Default)]
struct Server {
    connections: Arc<AtomicUsize>,
    polls: Arc<AtomicUsize>,
    authorization: Arc<Mutex<Vec<String>>>,
}

impl Server {
    fn record_auth(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            self.authorization.lock().unwrap().push(value.to_string());
        }
    }
}

/// First connection sends two events and hangs up; later ones stay open.
async fn websocket_endpoint(
    State(server): State<Server>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    server.record_auth(&headers);
    let n = server.connections.fetch_add(1, Ordering::SeqCst) + 1;
    ws.on_upgrade(move |mut socket| async move {
        let mut frames = vec![PushFrame::Open {
            sid: format!("ws-{}", n),
        }];
        if n == 1 {
            frames.push(PushFrame::event(
                events::ATTENDANCE_CHECK_IN,
                json!({"employee_id": 42, "at": "08:58"}),
            ));
            frames.push(PushFrame::Ping);
            frames.push(PushFrame::event(
                events::ATTENDANCE_CHECK_OUT,
                json!({"employee_id": 42, "at": "17:03"}),
            ));
        }
        for frame in frames {
            let text = frame.encode().unwrap();
            if socket.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        if n == 1 {
            return;
        }
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

/// Refuses websocket upgrades so the client falls back to polling.
async fn polling_endpoint(
    State(server): State<Server>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if query.get("transport").map(String::as_str) != Some("polling") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    server.record_auth(&headers);

    let frames = match query.get("sid") {
        None => vec![
            PushFrame::Open {
                sid: "poll-1".to_string(),
            },
            PushFrame::event(events::EMPLOYEE_REGISTERED, json!({"employee_id": 7})),
        ],
        Some(_) if server.polls.fetch_add(1, Ordering::SeqCst) == 0 => vec![PushFrame::event(
            events::LEAVE_CREATED,
            json!({"leave_id": 3, "days": 2}),
        )],
        Some(_) => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Vec::new()
        }
    };
    Json(frames).into_response()
}

async fn serve(app: Router) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

fn config(addr: SocketAddr) -> anyhow::Result<RealtimeConfig> {
    let mut config = RealtimeConfig::new(format!("http://{}/realtime", addr).parse()?);
    config.reconnect = ReconnectConfig {
        max_attempts: 3,
        delay: Duration::from_millis(20),
    };
    config.handshake_timeout = Duration::from_secs(2);
    config.bearer_token = Some("t0ken".to_string());
    Ok(config)
}

fn recorder(
    names: &[&'static str],
) -> (Subscription, mpsc::UnboundedReceiver<(&'static str, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut subscription = Subscription::new();
    for &name in names {
        let tx = tx.clone();
        subscription = subscription.on_event(name, move |payload: &Value| {
            let _ = tx.send((name, payload.clone()));
        });
    }
    (subscription, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<(&'static str, Value)>) -> (&'static str, Value) {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no delivery")
        .expect("recorder closed")
}

async fn wait_for_sid(bridge: &RealtimeBridge, sid: &str) -> bool {
    let mut rx = bridge.watch_state();
    let reached = matches!(
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.sid() == Some(sid))).await,
        Ok(Ok(_))
    );
    reached
}

#[tokio::test]
async fn websocket_delivers_in_order_and_reconnects() -> anyhow::Result<()> {
    let server = Server::default();
    let app = Router::new()
        .route("/realtime", get(websocket_endpoint))
        .with_state(server.clone());
    let addr = serve(app).await?;

    let bridge = RealtimeBridge::new(config(addr)?);
    let (subscription, mut rx) =
        recorder(&[events::ATTENDANCE_CHECK_IN, events::ATTENDANCE_CHECK_OUT]);
    let _handle = bridge.acquire(subscription)?;

    assert_eq!(
        next(&mut rx).await,
        (
            events::ATTENDANCE_CHECK_IN,
            json!({"employee_id": 42, "at": "08:58"})
        )
    );
    assert_eq!(
        next(&mut rx).await,
        (
            events::ATTENDANCE_CHECK_OUT,
            json!({"employee_id": 42, "at": "17:03"})
        )
    );

    assert!(wait_for_sid(&bridge, "ws-2").await, "state: {:?}", bridge.state());
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
    assert!(server
        .authorization
        .lock()
        .unwrap()
        .iter()
        .all(|v| v == "Bearer t0ken"));

    bridge.shutdown();
    assert_eq!(bridge.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn falls_back_to_polling_when_upgrade_is_refused() -> anyhow::Result<()> {
    let server = Server::default();
    let app = Router::new()
        .route("/realtime", get(polling_endpoint))
        .with_state(server.clone());
    let addr = serve(app).await?;

    let bridge = RealtimeBridge::new(config(addr)?);
    let (subscription, mut rx) = recorder(&[events::EMPLOYEE_REGISTERED, events::LEAVE_CREATED]);
    let _handle = bridge.acquire(subscription)?;

    assert_eq!(
        next(&mut rx).await,
        (events::EMPLOYEE_REGISTERED, json!({"employee_id": 7}))
    );
    assert_eq!(
        next(&mut rx).await,
        (events::LEAVE_CREATED, json!({"leave_id": 3, "days": 2}))
    );
    assert_eq!(bridge.connection_id().as_deref(), Some("poll-1"));
    assert!(server.polls.load(Ordering::SeqCst) >= 1);
    assert!(!server.authorization.lock().unwrap().is_empty());
    assert!(server
        .authorization
        .lock()
        .unwrap()
        .iter()
        .all(|v| v == "Bearer t0ken"));

    bridge.shutdown();
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_ends_in_failed_state() -> anyhow::Result<()> {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };
    let mut config = config(addr)?;
    config.transports = vec![TransportKind::WebSocket];
    config.reconnect.max_attempts = 1;

    let bridge = RealtimeBridge::new(config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = bridge.acquire(Subscription::new().on_disconnect(move || {
        let _ = tx.send(());
    }))?;

    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("disconnect signal");
    assert!(bridge.state().is_failed());
    Ok(())
}
