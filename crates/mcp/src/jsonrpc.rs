//! JSON-RPC 2.0 framing.
//!
//! Outgoing request ids are `u64`. Incoming ids are kept as raw JSON so
//! server-initiated requests with string ids can be answered verbatim.

use serde::Serialize;
use serde_json::{Map, Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// Method not found.
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// One JSON-RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: Value,
        result: Result<Value, RpcError>,
    },
}

// Field order fixes the wire layout: `{"jsonrpc":"2.0","id":..,...}`.
#[derive(Serialize)]
struct WireRequest<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    method: &'a str,
    params: &'a Value,
}

#[derive(Serialize)]
struct WireNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
}

#[derive(Serialize)]
struct WireResult<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    result: &'a Value,
}

#[derive(Serialize)]
struct WireError<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    error: Value,
}

impl Frame {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id: Value::from(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn result(id: Value, result: Value) -> Self {
        Self::Response {
            id,
            result: Ok(result),
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self::Response {
            id,
            result: Err(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    /// Serialize to a single line of JSON (no trailing newline).
    pub fn encode(&self) -> String {
        let encoded = match self {
            Self::Request { id, method, params } => serde_json::to_string(&WireRequest {
                jsonrpc: JSONRPC_VERSION,
                id,
                method,
                params,
            }),
            Self::Notification { method, params } => serde_json::to_string(&WireNotification {
                jsonrpc: JSONRPC_VERSION,
                method,
                params,
            }),
            Self::Response { id, result: Ok(result) } => serde_json::to_string(&WireResult {
                jsonrpc: JSONRPC_VERSION,
                id,
                result,
            }),
            Self::Response { id, result: Err(err) } => {
                let mut error = json!({"code": err.code, "message": err.message});
                if let Some(data) = &err.data {
                    error["data"] = data.clone();
                }
                serde_json::to_string(&WireError {
                    jsonrpc: JSONRPC_VERSION,
                    id,
                    error,
                })
            }
        };
        // Serializing a tree of `Value`s cannot fail.
        encoded.unwrap_or_default()
    }

    /// Interpret a parsed JSON value as a frame.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut map) = value else {
            return Err("frame is not a JSON object".into());
        };

        let id = map.remove("id").filter(|id| !id.is_null());
        let method = match map.remove("method") {
            Some(Value::String(method)) => Some(method),
            Some(_) => return Err("'method' must be a string".into()),
            None => None,
        };
        let params = map.remove("params").unwrap_or(Value::Null);

        match (id, method) {
            (Some(id), Some(method)) => Ok(Self::Request { id, method, params }),
            (None, Some(method)) => Ok(Self::Notification { method, params }),
            (Some(id), None) => Ok(Self::Response {
                id,
                result: parse_outcome(&mut map)?,
            }),
            (None, None) => Err("frame has neither 'id' nor 'method'".into()),
        }
    }

    /// Parse one line of JSON.
    pub fn decode(line: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
        Self::from_value(value)
    }
}

fn parse_outcome(map: &mut Map<String, Value>) -> Result<Result<Value, RpcError>, String> {
    if let Some(error) = map.remove("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Ok(Err(RpcError {
            code,
            message,
            data: error.get("data").cloned(),
        }));
    }
    Ok(Ok(map.remove("result").unwrap_or(Value::Null)))
}

/// The numeric value of a response id. String ids are accepted when they
/// parse as a number.
pub fn numeric_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
