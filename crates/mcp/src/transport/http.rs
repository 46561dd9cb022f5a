//! Streamable HTTP transport.
//!
//! Every outbound frame is one POST. The response is either a JSON body
//! (one frame or a batch), an SSE stream of frames, or `202 Accepted`
//! with no body for notifications. Transient failures (connect errors,
//! timeouts, 429, 5xx) are retried with exponential backoff.

use super::sse::SseParser;
use super::{INBOUND_BUFFER, Transport};
use crate::jsonrpc::Frame;
use async_trait::async_trait;
use futures::StreamExt;
use rago_config::{ServerDescriptor, TransportConfig, TransportSpec};
use rago_core::error::TransportError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

pub struct HttpTransport {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
    max_retries: u32,
    backoff: Duration,
    session_id: Mutex<Option<String>>,
    inbound: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl HttpTransport {
    pub fn new(descriptor: ServerDescriptor, config: &TransportConfig) -> Result<Self, TransportError> {
        let TransportSpec::Http { url, headers } = descriptor.transport else {
            return Err(TransportError::Protocol {
                server: descriptor.name,
                message: "descriptor is not an http server".into(),
            });
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TransportError::Io {
                server: descriptor.name.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            name: descriptor.name,
            url,
            headers,
            client,
            max_retries: config.http_max_retries,
            backoff: Duration::from_millis(config.http_backoff_ms),
            session_id: Mutex::new(None),
            inbound: Mutex::new(None),
        })
    }

    /// Override the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// The session id the server assigned, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn inbound(&self) -> Option<mpsc::Sender<Frame>> {
        self.inbound
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn io_error(&self, message: impl Into<String>) -> TransportError {
        TransportError::Io {
            server: self.name.clone(),
            message: message.into(),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn post_once(&self, body: &str) -> Result<reqwest::Response, TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body.to_string());
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                self.io_error(format!("request timed out: {e}"))
            } else {
                self.io_error(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                server: self.name.clone(),
                status: status.as_u16(),
                message,
            });
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self.session_id.lock().unwrap_or_else(|p| p.into_inner());
            if slot.as_deref() != Some(session) {
                debug!(server = %self.name, session, "HTTP session established");
                *slot = Some(session.to_string());
            }
        }

        Ok(response)
    }

    async fn post_with_retry(&self, body: &str) -> Result<reqwest::Response, TransportError> {
        let mut attempt = 0;
        loop {
            match self.post_once(body).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff_for(attempt);
                    attempt += 1;
                    warn!(
                        server = %self.name,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient HTTP failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn deliver_json(&self, text: &str, tx: &mpsc::Sender<Frame>) -> Result<(), TransportError> {
        let value: Value = serde_json::from_str(text).map_err(|e| TransportError::Protocol {
            server: self.name.clone(),
            message: format!("invalid JSON body: {e}"),
        })?;
        let frames = match value {
            Value::Array(batch) => batch,
            single => vec![single],
        };
        for raw in frames {
            match Frame::from_value(raw) {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        return Err(TransportError::Closed {
                            server: self.name.clone(),
                        });
                    }
                }
                Err(reason) => warn!(server = %self.name, %reason, "Invalid frame in HTTP body"),
            }
        }
        Ok(())
    }
}

/// Drain an SSE response body into the inbound channel.
async fn pump_sse(server: String, response: reqwest::Response, tx: mpsc::Sender<Frame>) {
    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();

    let deliver = |data: &str| match Frame::decode(data) {
        Ok(frame) => Some(frame),
        Err(reason) => {
            warn!(server = %server, %reason, "Invalid frame in SSE event");
            None
        }
    };

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(server = %server, error = %e, "SSE stream interrupted");
                return;
            }
        };
        for event in parser.feed(&bytes) {
            if let Some(frame) = deliver(&event.data)
                && tx.send(frame).await.is_err()
            {
                return;
            }
        }
    }
    if let Some(event) = parser.finish()
        && let Some(frame) = deliver(&event.data)
    {
        let _ = tx.send(frame).await;
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn open(&self) -> Result<mpsc::Receiver<Frame>, TransportError> {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let mut slot = self.inbound.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return Err(TransportError::Protocol {
                server: self.name.clone(),
                message: "transport already open".into(),
            });
        }
        *slot = Some(tx);
        debug!(server = %self.name, url = %self.url, "HTTP transport opened");
        Ok(rx)
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.inbound().ok_or_else(|| TransportError::NotOpen {
            server: self.name.clone(),
        })?;

        let response = self.post_with_retry(&frame.encode()).await?;
        if response.status() == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_sse {
            tokio::spawn(pump_sse(self.name.clone(), response, tx));
            return Ok(());
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.io_error(format!("failed to read body: {e}")))?;
        if text.trim().is_empty() {
            return Ok(());
        }
        self.deliver_json(&text, &tx).await
    }

    async fn close(&self) {
        let had_channel = self
            .inbound
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .is_some();

        // Best effort: tell the server the session is over.
        let session = self
            .session_id
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(session) = session {
            let _ = self
                .client
                .delete(&self.url)
                .header(SESSION_HEADER, session)
                .send()
                .await;
        }
        if had_channel {
            debug!(server = %self.name, "HTTP transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockHttpServer;
    use serde_json::json;

    fn descriptor(url: &str) -> ServerDescriptor {
        ServerDescriptor::http("remote", url)
    }

    fn fast_config(max_retries: u32) -> TransportConfig {
        TransportConfig {
            request_timeout_secs: 5,
            http_max_retries: max_retries,
            http_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn json_response_is_delivered() {
        let server = MockHttpServer::start().await;
        let transport = HttpTransport::new(descriptor(&server.url()), &fast_config(2)).unwrap();
        let mut rx = transport.open().await.unwrap();

        transport
            .send(Frame::request(1, "tools/list", json!({})))
            .await
            .unwrap();
        let frame = rx.recv().await.unwrap();
        let Frame::Response { result: Ok(result), .. } = frame else {
            panic!("expected result");
        };
        assert_eq!(result["tools"][0]["name"], "answer");
    }

    #[tokio::test]
    async fn transient_503_is_retried() {
        let server = MockHttpServer::start().await.failing_calls(1);
        let transport = HttpTransport::new(descriptor(&server.url()), &fast_config(2)).unwrap();
        let mut rx = transport.open().await.unwrap();

        transport
            .send(Frame::request(
                2,
                "tools/call",
                json!({"name": "answer", "arguments": {}}),
            ))
            .await
            .unwrap();
        let Frame::Response { result: Ok(result), .. } = rx.recv().await.unwrap() else {
            panic!("expected result");
        };
        assert_eq!(result, json!({"success": true, "data": 42}));
        assert_eq!(server.call_attempts(), 2);
    }

    #[tokio::test]
    async fn retries_exhaust() {
        let server = MockHttpServer::start().await.failing_calls(10);
        let transport = HttpTransport::new(descriptor(&server.url()), &fast_config(2)).unwrap();
        let _rx = transport.open().await.unwrap();

        let err = transport
            .send(Frame::request(3, "tools/call", json!({"name": "answer"})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Http { status: 503, .. }));
        assert_eq!(server.call_attempts(), 3);
    }

    #[tokio::test]
    async fn notification_ack_and_session_echo() {
        let server = MockHttpServer::start().await;
        let transport = HttpTransport::new(descriptor(&server.url()), &fast_config(0)).unwrap();
        let mut rx = transport.open().await.unwrap();

        transport
            .send(Frame::request(1, "initialize", json!({})))
            .await
            .unwrap();
        rx.recv().await.unwrap();
        assert_eq!(transport.session_id().as_deref(), Some("session-abc"));

        transport
            .send(Frame::notification("notifications/initialized", json!({})))
            .await
            .unwrap();
        assert!(server.saw_session_on_notification());
    }

    #[tokio::test]
    async fn sse_response_is_streamed() {
        let server = MockHttpServer::start().await;
        let transport = HttpTransport::new(descriptor(&server.url()), &fast_config(0)).unwrap();
        let mut rx = transport.open().await.unwrap();

        transport
            .send(Frame::request(9, "ping", json!({})))
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Frame::Response { result: Ok(_), .. }));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockHttpServer::start().await;
        let transport =
            HttpTransport::new(descriptor(&format!("{}/missing", server.base())), &fast_config(3))
                .unwrap();
        let _rx = transport.open().await.unwrap();
        let err = transport
            .send(Frame::request(1, "initialize", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Http { status: 404, .. }));
    }

    #[test]
    fn backoff_doubles() {
        let transport = HttpTransport::new(descriptor("http://127.0.0.1:1/mcp"), &fast_config(5))
            .unwrap()
            .with_backoff(Duration::from_millis(100));
        assert_eq!(transport.backoff_for(0), Duration::from_millis(100));
        assert_eq!(transport.backoff_for(3), Duration::from_millis(800));
    }
}
