//! HTTP long-polling fallback using reqwest.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use attendance_shared::PushFrame;
use url::Url;

use super::{PushEndpoint, PushSession, Transport, TransportKind};
use crate::error::TransportError;

/// Fallback transport for networks that refuse WebSocket upgrades.
///
/// The handshake GET returns a JSON array whose first frame is `open`. Each
/// later GET carries the session id and returns whatever frames the server
/// queued, possibly none.
#[derive(Debug, Clone, Default)]
pub struct PollingTransport {
    client: reqwest::Client,
}

impl PollingTransport {
    /// Transport whose requests give up after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to a polling client without timeout");
                reqwest::Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

async fn poll(
    client: &reqwest::Client,
    url: &Url,
    bearer_token: Option<&str>,
) -> Result<Vec<PushFrame>, TransportError> {
    let mut request = client.get(url.clone());
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }
    let body = request.send().await?.error_for_status()?.text().await?;
    Ok(PushFrame::decode_batch(&body)?)
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn handshake(&self, endpoint: &PushEndpoint) -> Result<Box<dyn PushSession>, TransportError> {
        let url = endpoint.url_for(TransportKind::Polling, None)?;
        tracing::debug!(%url, "opening polling session");

        let mut pending: VecDeque<PushFrame> =
            poll(&self.client, &url, endpoint.bearer_token.as_deref())
                .await?
                .into();
        let sid = pending
            .pop_front()
            .ok_or_else(|| TransportError::Closed("empty handshake response".to_string()))?
            .into_sid()?;
        let poll_url = endpoint.url_for(TransportKind::Polling, Some(&sid))?;

        Ok(Box::new(PollingSession {
            client: self.client.clone(),
            bearer_token: endpoint.bearer_token.clone(),
            sid,
            poll_url,
            pending,
            closed: false,
        }))
    }
}

struct PollingSession {
    client: reqwest::Client,
    bearer_token: Option<String>,
    sid: String,
    poll_url: Url,
    pending: VecDeque<PushFrame>,
    closed: bool,
}

#[async_trait]
impl PushSession for PollingSession {
    fn sid(&self) -> &str {
        &self.sid
    }

    async fn next_frame(&mut self) -> Option<Result<PushFrame, TransportError>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if self.closed {
                return None;
            }
            match poll(&self.client, &self.poll_url, self.bearer_token.as_deref()).await {
                Ok(frames) => self.pending.extend(frames),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }
}
