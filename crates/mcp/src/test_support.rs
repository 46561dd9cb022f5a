//! Mock protocol servers for unit tests: an axum endpoint and sh scripts.

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct MockState {
    call_attempts: AtomicUsize,
    failures_left: AtomicUsize,
    session_on_notification: AtomicBool,
}

/// An HTTP protocol server on `127.0.0.1:0` exposing one tool, `answer`,
/// whose result is `{"success": true, "data": 42}`.
pub struct MockHttpServer {
    addr: std::net::SocketAddr,
    state: Arc<MockState>,
}

impl MockHttpServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/mcp", post(handle))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    /// Answer the next `n` `tools/call` requests with 503.
    pub fn failing_calls(self, n: usize) -> Self {
        self.state.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self) -> String {
        format!("{}/mcp", self.base())
    }

    pub fn call_attempts(&self) -> usize {
        self.state.call_attempts.load(Ordering::SeqCst)
    }

    pub fn saw_session_on_notification(&self) -> bool {
        self.state.session_on_notification.load(Ordering::SeqCst)
    }
}

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

async fn handle(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let frame: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let id = frame.get("id").cloned().unwrap_or(Value::Null);
    let method = frame.get("method").and_then(Value::as_str).unwrap_or_default();

    match method {
        "initialize" => (
            [("Mcp-Session-Id", "session-abc")],
            axum::Json(rpc_result(
                &id,
                json!({
                    "protocolVersion": "2025-03-26",
                    "serverInfo": {"name": "remote", "version": "0.1.0"},
                    "capabilities": {"tools": {}}
                }),
            )),
        )
            .into_response(),
        m if m.starts_with("notifications/") => {
            if headers.contains_key("mcp-session-id") {
                state.session_on_notification.store(true, Ordering::SeqCst);
            }
            StatusCode::ACCEPTED.into_response()
        }
        "tools/list" => axum::Json(rpc_result(
            &id,
            json!({"tools": [{
                "name": "answer",
                "description": "The answer to everything",
                "inputSchema": {"type": "object", "properties": {}}
            }]}),
        ))
        .into_response(),
        "tools/call" => {
            state.call_attempts.fetch_add(1, Ordering::SeqCst);
            let failing = state
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
            }
            axum::Json(rpc_result(&id, json!({"success": true, "data": 42}))).into_response()
        }
        "ping" => {
            let event = format!("event: message\ndata: {}\n\n", rpc_result(&id, json!({})));
            ([(header::CONTENT_TYPE, "text/event-stream")], event).into_response()
        }
        other => axum::Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("unknown method {other}")}
        }))
        .into_response(),
    }
}

/// A stdio server with one tool, `now`, returning `2024-01-01T00:00:00Z`.
/// Each start appends a line to `$MOCK_START_LOG` when set.
pub const CLOCK_SCRIPT: &str = r#"#!/bin/sh
[ -n "$MOCK_START_LOG" ] && echo start >> "$MOCK_START_LOG"
echo "clock server starting" >&2
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","serverInfo":{"name":"clock","version":"1.0.0"},"capabilities":{"tools":{"listChanged":true}}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"now","description":"Current time in UTC","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id"
      [ -n "$MOCK_EXIT_AFTER_LIST" ] && exit 1 ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"2024-01-01T00:00:00Z"}]}}\n' "$id" ;;
    *'"method":"ping"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;

/// Write `script` into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    path
}
