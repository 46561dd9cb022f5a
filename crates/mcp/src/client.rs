//! JSON-RPC client over a [`Transport`]: request/response correlation,
//! timeouts, server-initiated requests, and the protocol handshake.

use crate::jsonrpc::{Frame, METHOD_NOT_FOUND, numeric_id};
use crate::transport::Transport;
use rago_core::error::TransportError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

pub const PROTOCOL_VERSION: &str = "2025-03-26";

type Pending = HashMap<u64, oneshot::Sender<Result<Value, TransportError>>>;

/// Things the server told us outside of a request/response pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotice {
    /// `notifications/tools/list_changed`
    ToolsChanged,
    /// Any other notification
    Notification { method: String, params: Value },
    /// The inbound channel ended; pending requests have been failed.
    Closed,
}

/// What `initialize` returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub capabilities: Value,
    pub instructions: Option<String>,
}

/// One entry of `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

pub struct RpcClient {
    server: String,
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicU64,
    timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl RpcClient {
    /// Open `transport` and start the inbound dispatch loop.
    pub async fn connect(
        server: impl Into<String>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ServerNotice>), TransportError> {
        let server = server.into();
        let inbound = transport.open().await?;
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let client = Arc::new(Self {
            server,
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            timeout,
            closed: Arc::new(AtomicBool::new(false)),
        });

        tokio::spawn(dispatch_loop(Arc::clone(&client), inbound, notice_tx));
        Ok((client, notice_rx))
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response, bounded by the client timeout.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.request_with_timeout(method, params, self.timeout).await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed {
                server: self.server.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
            // Closing sets the flag before draining under this lock, so a
            // close that raced the check above is seen here.
            if self.is_closed() {
                pending.remove(&id);
                return Err(TransportError::Closed {
                    server: self.server.clone(),
                });
            }
        }

        debug!(server = %self.server, id, method, "Sending request");
        if let Err(err) = self.transport.send(Frame::request(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed {
                server: self.server.clone(),
            }),
            Err(_) => {
                // Retire the id; a late response is dropped by the dispatcher.
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        self.transport
            .send(Frame::notification(method, params))
            .await
    }

    /// `initialize` followed by `notifications/initialized`.
    pub async fn initialize(&self) -> Result<ServerInfo, TransportError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {}
        });
        let result = self.request("initialize", params).await?;

        let info = ServerInfo {
            name: str_at(&result, &["serverInfo", "name"]).unwrap_or(&self.server).to_string(),
            version: str_at(&result, &["serverInfo", "version"]).unwrap_or_default().to_string(),
            protocol_version: str_at(&result, &["protocolVersion"])
                .unwrap_or(PROTOCOL_VERSION)
                .to_string(),
            capabilities: result.get("capabilities").cloned().unwrap_or(Value::Null),
            instructions: str_at(&result, &["instructions"]).map(str::to_string),
        };

        self.notify("notifications/initialized", json!({})).await?;
        debug!(
            server = %self.server,
            remote = %info.name,
            version = %info.version,
            protocol = %info.protocol_version,
            "Handshake complete"
        );
        Ok(info)
    }

    /// `tools/list`, following `nextCursor` pages.
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>, TransportError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({"cursor": c}),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page = result
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| TransportError::Protocol {
                    server: self.server.clone(),
                    message: "tools/list result has no 'tools' array".into(),
                })?;
            for raw in page {
                match serde_json::from_value::<RemoteTool>(raw.clone()) {
                    Ok(tool) => tools.push(tool),
                    Err(e) => warn!(server = %self.server, error = %e, "Skipping malformed tool entry"),
                }
            }
            match str_at(&result, &["nextCursor"]) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// `tools/call`; returns the raw result object.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let params = json!({"name": name, "arguments": arguments});
        self.request_with_timeout("tools/call", params, timeout.unwrap_or(self.timeout))
            .await
    }

    pub async fn ping(&self) -> Result<(), TransportError> {
        self.request("ping", json!({})).await.map(|_| ())
    }

    /// Close the transport and fail everything still pending.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.close().await;
        fail_all_pending(&self.server, &self.pending).await;
    }
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_str)
}

async fn fail_all_pending(server: &str, pending: &Mutex<Pending>) {
    let mut pending = pending.lock().await;
    if !pending.is_empty() {
        debug!(server, count = pending.len(), "Failing pending requests");
    }
    for (_, sender) in pending.drain() {
        let _ = sender.send(Err(TransportError::Closed {
            server: server.to_string(),
        }));
    }
}

async fn dispatch_loop(
    client: Arc<RpcClient>,
    mut inbound: mpsc::Receiver<Frame>,
    notices: mpsc::UnboundedSender<ServerNotice>,
) {
    let server = client.server.clone();
    while let Some(frame) = inbound.recv().await {
        match frame {
            Frame::Response { id, result } => {
                let Some(key) = numeric_id(&id) else {
                    debug!(server = %server, ?id, "Response with non-numeric id");
                    continue;
                };
                let waiter = client.pending.lock().await.remove(&key);
                match waiter {
                    Some(tx) => {
                        let outcome = result.map_err(|e| TransportError::Rpc {
                            server: server.clone(),
                            code: e.code,
                            message: e.message,
                        });
                        let _ = tx.send(outcome);
                    }
                    None => debug!(server = %server, id = key, "Response for unknown or retired request"),
                }
            }
            Frame::Request { id, method, .. } => {
                let reply = match method.as_str() {
                    "ping" => Frame::result(id, json!({})),
                    other => {
                        warn!(server = %server, method = other, "Server sent unsupported request");
                        Frame::error(
                            id,
                            METHOD_NOT_FOUND,
                            format!("client does not implement method '{other}'"),
                        )
                    }
                };
                if let Err(e) = client.transport.send(reply).await {
                    warn!(server = %server, error = %e, "Failed to answer server request");
                }
            }
            Frame::Notification { method, params } => {
                debug!(server = %server, method = %method, "Notification from server");
                let notice = if method == "notifications/tools/list_changed" {
                    ServerNotice::ToolsChanged
                } else {
                    ServerNotice::Notification { method, params }
                };
                let _ = notices.send(notice);
            }
        }
    }

    client.closed.store(true, Ordering::SeqCst);
    fail_all_pending(&server, &client.pending).await;
    let _ = notices.send(ServerNotice::Closed);
    debug!(server = %server, "Inbound stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// In-process transport: outbound frames are answered by `respond`.
    struct LoopbackTransport {
        inbound: StdMutex<Option<mpsc::Sender<Frame>>>,
        sent: StdMutex<Vec<Frame>>,
        respond: fn(&Frame) -> Vec<Frame>,
    }

    impl LoopbackTransport {
        fn new(respond: fn(&Frame) -> Vec<Frame>) -> Arc<Self> {
            Arc::new(Self {
                inbound: StdMutex::new(None),
                sent: StdMutex::new(Vec::new()),
                respond,
            })
        }

        async fn inject(&self, frame: Frame) {
            let tx = self.inbound.lock().unwrap().clone().unwrap();
            tx.send(frame).await.unwrap();
        }

        fn hang_up(&self) {
            self.inbound.lock().unwrap().take();
        }

        fn sent(&self) -> Vec<Frame> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        fn kind(&self) -> &'static str {
            "loopback"
        }
        async fn open(&self) -> Result<mpsc::Receiver<Frame>, TransportError> {
            let (tx, rx) = mpsc::channel(16);
            *self.inbound.lock().unwrap() = Some(tx);
            Ok(rx)
        }
        async fn send(&self, frame: Frame) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(frame.clone());
            let replies = (self.respond)(&frame);
            let tx = self.inbound.lock().unwrap().clone();
            if let Some(tx) = tx {
                for reply in replies {
                    let _ = tx.send(reply).await;
                }
            }
            Ok(())
        }
        async fn close(&self) {
            self.hang_up();
        }
    }

    fn clock_server(frame: &Frame) -> Vec<Frame> {
        let Frame::Request { id, method, .. } = frame else {
            return vec![];
        };
        let result = match method.as_str() {
            "initialize" => json!({
                "protocolVersion": "2025-03-26",
                "serverInfo": {"name": "clock", "version": "1.0"},
                "capabilities": {"tools": {}}
            }),
            "tools/list" => json!({"tools": [{"name": "now", "description": "time"}]}),
            "tools/call" => json!({"content": [{"type": "text", "text": "2024-01-01T00:00:00Z"}]}),
            _ => return vec![Frame::error(id.clone(), METHOD_NOT_FOUND, "nope")],
        };
        vec![Frame::result(id.clone(), result)]
    }

    fn silent(_: &Frame) -> Vec<Frame> {
        vec![]
    }

    #[tokio::test]
    async fn handshake_sends_initialized() {
        let transport = LoopbackTransport::new(clock_server);
        let (client, _notices) =
            RpcClient::connect("clock", transport.clone(), Duration::from_secs(5))
                .await
                .unwrap();

        let info = client.initialize().await.unwrap();
        assert_eq!(info.name, "clock");
        assert_eq!(info.protocol_version, PROTOCOL_VERSION);

        let sent = transport.sent();
        assert_eq!(sent[0].method(), Some("initialize"));
        assert_eq!(sent[1].method(), Some("notifications/initialized"));
        assert!(matches!(sent[1], Frame::Notification { .. }));
    }

    #[tokio::test]
    async fn ids_increase_monotonically() {
        let transport = LoopbackTransport::new(clock_server);
        let (client, _n) = RpcClient::connect("clock", transport.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        client.list_tools().await.unwrap();
        client.call_tool("now", Value::Null, None).await.unwrap();

        let ids: Vec<u64> = transport
            .sent()
            .iter()
            .filter_map(|f| match f {
                Frame::Request { id, .. } => numeric_id(id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, [1, 2]);
    }

    #[tokio::test]
    async fn list_tools_defaults_missing_schema() {
        let transport = LoopbackTransport::new(clock_server);
        let (client, _n) = RpcClient::connect("clock", transport, Duration::from_secs(5))
            .await
            .unwrap();
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].input_schema["type"], "object");
    }

    #[tokio::test]
    async fn rpc_errors_surface() {
        let transport = LoopbackTransport::new(clock_server);
        let (client, _n) = RpcClient::connect("clock", transport, Duration::from_secs(5))
            .await
            .unwrap();
        let err = client.request("resources/list", json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::Rpc { code: METHOD_NOT_FOUND, .. }));
    }

    #[tokio::test]
    async fn timeout_retires_request() {
        let transport = LoopbackTransport::new(silent);
        let (client, _n) = RpcClient::connect("mute", transport, Duration::from_millis(50))
            .await
            .unwrap();
        let err = client.request("tools/list", json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { timeout_ms: 50, .. }));
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn close_fails_pending_requests() {
        let transport = LoopbackTransport::new(silent);
        let (client, mut notices) =
            RpcClient::connect("mute", transport.clone(), Duration::from_secs(30))
                .await
                .unwrap();

        let waiter = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request("tools/list", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.hang_up();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Closed { .. }));
        assert_eq!(notices.recv().await, Some(ServerNotice::Closed));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn requests_racing_a_hang_up_fail_fast() {
        let transport = LoopbackTransport::new(silent);
        let (client, _n) = RpcClient::connect("mute", transport.clone(), Duration::from_secs(30))
            .await
            .unwrap();

        let waiters: Vec<_> = (0..32)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.request("tools/list", json!({})).await })
            })
            .collect();
        transport.hang_up();

        for waiter in waiters {
            let result = tokio::time::timeout(Duration::from_secs(2), waiter)
                .await
                .expect("request waited past the hang-up")
                .unwrap();
            assert!(matches!(result, Err(TransportError::Closed { .. })));
        }
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn answers_server_ping_and_rejects_unknown() {
        let transport = LoopbackTransport::new(silent);
        let (_client, _n) = RpcClient::connect("srv", transport.clone(), Duration::from_secs(5))
            .await
            .unwrap();

        transport
            .inject(Frame::Request {
                id: json!("s1"),
                method: "ping".into(),
                params: Value::Null,
            })
            .await;
        transport
            .inject(Frame::Request {
                id: json!("s2"),
                method: "sampling/createMessage".into(),
                params: Value::Null,
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sent = transport.sent();
        assert_eq!(sent[0], Frame::result(json!("s1"), json!({})));
        assert!(matches!(
            &sent[1],
            Frame::Response { result: Err(e), .. } if e.code == METHOD_NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn tools_changed_notice() {
        let transport = LoopbackTransport::new(silent);
        let (_client, mut notices) =
            RpcClient::connect("srv", transport.clone(), Duration::from_secs(5))
                .await
                .unwrap();
        transport
            .inject(Frame::notification("notifications/tools/list_changed", Value::Null))
            .await;
        assert_eq!(notices.recv().await, Some(ServerNotice::ToolsChanged));
    }
}
