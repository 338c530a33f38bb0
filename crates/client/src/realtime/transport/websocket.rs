//! WebSocket transport using tokio-tungstenite.

use async_trait::async_trait;
use attendance_shared::PushFrame;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{PushEndpoint, PushSession, Transport, TransportKind};
use crate::error::TransportError;

/// Preferred transport: one full-duplex socket per session.
#[derive(Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn handshake(&self, endpoint: &PushEndpoint) -> Result<Box<dyn PushSession>, TransportError> {
        let url = endpoint.url_for(TransportKind::WebSocket, None)?;
        let mut request = url.as_str().into_client_request()?;
        if let Some(token) = &endpoint.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Endpoint(format!("bad bearer token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        tracing::debug!(%url, "opening websocket");
        let (mut stream, _response) = connect_async(request).await?;

        let sid = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break PushFrame::decode(&text)?.into_sid()?,
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .unwrap_or_else(|| "closed during handshake".to_string());
                    return Err(TransportError::Closed(reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(TransportError::Closed(
                        "stream ended during handshake".to_string(),
                    ))
                }
            }
        };

        Ok(Box::new(WebSocketSession { sid, stream }))
    }
}

struct WebSocketSession {
    sid: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushSession for WebSocketSession {
    fn sid(&self) -> &str {
        &self.sid
    }

    async fn next_frame(&mut self) -> Option<Result<PushFrame, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    tracing::trace!(sid = %self.sid, frame = %text.as_str(), "websocket frame");
                    return Some(PushFrame::decode(&text).map_err(TransportError::from));
                }
                Ok(Message::Close(frame)) => {
                    return Some(Ok(PushFrame::Close {
                        reason: frame.map(|f| f.reason.as_str().to_string()),
                    }))
                }
                // Pong replies are queued by tungstenite; binary frames are not part of the protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(sid = %self.sid, error = %e, "websocket close failed");
        }
    }
}
