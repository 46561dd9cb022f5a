//! Error types for the rago domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; every error maps onto a
//! stable [`ErrorKind`] tag that the engine puts on `error` events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The stable kind tag carried by every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Transport,
    ToolNotFound,
    ToolInvalidArgs,
    ToolExecution,
    RateLimited,
    Cancelled,
    Llm,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Transport => "transport",
            Self::ToolNotFound => "tool_not_found",
            Self::ToolInvalidArgs => "tool_invalid_args",
            Self::ToolExecution => "tool_execution",
            Self::RateLimited => "rate_limited",
            Self::Cancelled => "cancelled",
            Self::Llm => "llm",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The top-level error type for all rago operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- LLM errors ---
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Session / plan store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Tool(e) => e.kind(),
            Self::Transport(_) => ErrorKind::Transport,
            Self::Llm(_) => ErrorKind::Llm,
            Self::Config { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Memory(_) | Self::Store(_) | Self::Serialization(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of one tool call. None of these are fatal to a run; the engine
/// turns them into observations for the LLM.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArgs { tool: String, reason: String },

    #[error("Tool execution failed: {tool}: {reason}")]
    Execution { tool: String, reason: String },

    #[error("Rate limited: {tool}, retry after {retry_after_ms}ms")]
    RateLimited { tool: String, retry_after_ms: u64 },

    #[error("Provider offline: {tool} (provider {provider})")]
    ProviderOffline { tool: String, provider: String },

    #[error("Transport failure calling {tool}: {source}")]
    Transport {
        tool: String,
        #[source]
        source: TransportError,
    },

    #[error("Tool timed out: {tool} after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("Tool call cancelled: {tool}")]
    Cancelled { tool: String },
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::ToolNotFound,
            Self::InvalidArgs { .. } => ErrorKind::ToolInvalidArgs,
            Self::Execution { .. } | Self::ProviderOffline { .. } => ErrorKind::ToolExecution,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transport { .. } | Self::Timeout { .. } => ErrorKind::Transport,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Transport-level failures may succeed if the call is repeated.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    pub fn execution(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_args(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

/// Failures talking to an external tool server.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection to '{server}' closed")]
    Closed { server: String },

    #[error("transport for '{server}' is not open")]
    NotOpen { server: String },

    #[error("request '{method}' to '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("protocol violation from '{server}': {message}")]
    Protocol { server: String, message: String },

    #[error("failed to spawn '{server}': {message}")]
    Spawn { server: String, message: String },

    #[error("HTTP {status} from '{server}': {message}")]
    Http {
        server: String,
        status: u16,
        message: String,
    },

    #[error("'{server}' returned JSON-RPC error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("I/O error on '{server}': {message}")]
    Io { server: String, message: String },

    #[error("no server named '{server}' is registered")]
    UnknownServer { server: String },
}

impl TransportError {
    /// Whether the HTTP retry policy should try again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Io { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Generation request failed: {0}")]
    Request(String),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Capability not supported: {0}")]
    Unsupported(String),

    #[error("Generation timed out after {0}ms")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Memory extraction failed: {0}")]
    Extraction(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid transition for {subject}: {from} -> {to}")]
    InvalidTransition {
        subject: String,
        from: String,
        to: String,
    },

    #[error("Compaction failed: {0}")]
    Compaction(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Clone, Error)]
#[error("Retrieval failed: {0}")]
pub struct RetrievalError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_kinds() {
        assert_eq!(ToolError::NotFound("x".into()).kind(), ErrorKind::ToolNotFound);
        assert_eq!(
            ToolError::RateLimited {
                tool: "x".into(),
                retry_after_ms: 10
            }
            .kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ToolError::Timeout {
                tool: "x".into(),
                timeout_ms: 5
            }
            .kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn top_level_error_delegates_kind() {
        let err = Error::from(ToolError::invalid_args("mcp_fs_ls", "missing 'path'"));
        assert_eq!(err.kind(), ErrorKind::ToolInvalidArgs);
        assert!(err.to_string().contains("missing 'path'"));
        assert_eq!(Error::Cancelled.kind().as_str(), "cancelled");
    }

    #[test]
    fn transient_transport_errors() {
        let unavailable = TransportError::Http {
            server: "s".into(),
            status: 503,
            message: "busy".into(),
        };
        let not_found = TransportError::Http {
            server: "s".into(),
            status: 404,
            message: "nope".into(),
        };
        assert!(unavailable.is_transient());
        assert!(!not_found.is_transient());
        assert!(!TransportError::Closed { server: "s".into() }.is_transient());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ToolInvalidArgs).unwrap();
        assert_eq!(json, r#""tool_invalid_args""#);
    }
}
