//! Normalization of `tools/call` results into [`ToolOutput`].
//!
//! Three result shapes are understood, checked in order:
//!
//! 1. A `content` array of typed items. Text items are joined with `\n`;
//!    `isError: true` turns the text into an execution error.
//! 2. A `{success, data}` envelope. `success: false` is an error whose
//!    reason is the `error` field when present.
//! 3. Anything else is returned as-is.

use rago_core::error::{ToolError, TransportError};
use rago_core::tool::ToolOutput;
use serde_json::Value;

pub fn normalize_result(tool: &str, result: Value) -> Result<ToolOutput, ToolError> {
    if let Some(items) = result.get("content").and_then(Value::as_array) {
        let text = items
            .iter()
            .filter_map(render_item)
            .collect::<Vec<_>>()
            .join("\n");
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_error {
            return Err(ToolError::execution(tool, text));
        }
        return Ok(ToolOutput {
            text,
            data: result.get("structuredContent").cloned(),
        });
    }

    if let Some(success) = result.get("success").and_then(Value::as_bool) {
        if !success {
            let reason = match result.get("error") {
                Some(Value::String(s)) => s.clone(),
                Some(other) if !other.is_null() => other.to_string(),
                _ => "tool reported failure".to_string(),
            };
            return Err(ToolError::execution(tool, reason));
        }
        let data = result.get("data").cloned().unwrap_or(Value::Null);
        return Ok(ToolOutput::json(data));
    }

    Ok(ToolOutput::json(result))
}

fn render_item(item: &Value) -> Option<String> {
    match item.get("type").and_then(Value::as_str) {
        Some("text") => item.get("text").and_then(Value::as_str).map(str::to_string),
        Some("resource") => item
            .pointer("/resource/text")
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(other) => {
            let mime = item
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            Some(format!("[{other}: {mime}]"))
        }
        None => None,
    }
}

/// Classify a transport failure seen while calling `tool` on `server`.
pub fn tool_error(tool: &str, server: &str, err: TransportError) -> ToolError {
    match err {
        TransportError::Rpc { message, code, .. } => {
            ToolError::execution(tool, format!("{message} (code {code})"))
        }
        TransportError::NotOpen { .. } => ToolError::ProviderOffline {
            tool: tool.to_string(),
            provider: server.to_string(),
        },
        TransportError::Timeout { timeout_ms, .. } => ToolError::Timeout {
            tool: tool.to_string(),
            timeout_ms,
        },
        other => ToolError::Transport {
            tool: tool.to_string(),
            source: other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn joins_text_content() {
        let out = normalize_result(
            "mcp_clock_now",
            json!({"content": [
                {"type": "text", "text": "2024-01-01"},
                {"type": "text", "text": "UTC"}
            ]}),
        )
        .unwrap();
        assert_eq!(out.text, "2024-01-01\nUTC");
    }

    #[test]
    fn is_error_content_becomes_execution_error() {
        let err = normalize_result(
            "mcp_fs_read",
            json!({"content": [{"type": "text", "text": "no such file"}], "isError": true}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Execution { ref reason, .. } if reason == "no such file"));
    }

    #[test]
    fn success_envelope_unwraps_data() {
        let out = normalize_result("mcp_remote_answer", json!({"success": true, "data": 42})).unwrap();
        assert_eq!(out.data, Some(json!(42)));
        assert_eq!(out.text, "42");
    }

    #[test]
    fn failed_envelope_uses_error_field() {
        let err =
            normalize_result("t", json!({"success": false, "error": "quota exceeded"})).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn other_shapes_pass_through() {
        let out = normalize_result("t", json!({"rows": [1, 2]})).unwrap();
        assert_eq!(out.data, Some(json!({"rows": [1, 2]})));
    }

    #[test]
    fn non_text_items_are_described() {
        let out = normalize_result(
            "t",
            json!({"content": [{"type": "image", "mimeType": "image/png", "data": "..."}]}),
        )
        .unwrap();
        assert_eq!(out.text, "[image: image/png]");
    }

    #[test]
    fn transport_errors_classified() {
        let offline = tool_error("t", "fs", TransportError::NotOpen { server: "fs".into() });
        assert!(matches!(offline, ToolError::ProviderOffline { .. }));

        let rpc = tool_error(
            "t",
            "fs",
            TransportError::Rpc {
                server: "fs".into(),
                code: -32602,
                message: "bad params".into(),
            },
        );
        assert!(matches!(rpc, ToolError::Execution { .. }));

        let closed = tool_error("t", "fs", TransportError::Closed { server: "fs".into() });
        assert!(closed.is_retriable());
    }
}
