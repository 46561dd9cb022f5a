//! Domain event system: decoupled communication between bounded contexts.
//!
//! The server manager, the registry, and the engine publish here. This
//! bus is process-wide and lossy for slow subscribers; the ordered,
//! per-run event stream lives in the agent crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Lifecycle state of a protocol server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Failed,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide notifications, distinct from the per-run `RunEvent` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A protocol server changed lifecycle state
    ServerStateChanged {
        server: String,
        from: ServerState,
        to: ServerState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A line a server wrote to its diagnostic stream
    ServerDiagnostic {
        server: String,
        line: String,
        timestamp: DateTime<Utc>,
    },

    ToolExecuted {
        tool: String,
        success: bool,
        duration_ms: u64,
        cached: bool,
        timestamp: DateTime<Utc>,
    },

    /// A memory was stored or retrieved
    MemoryAccessed {
        /// `retrieve`, `store`, `update` or `delete`
        operation: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A run reached its outcome
    RunFinished {
        run_id: String,
        session_id: String,
        status: String,
        rounds: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Every subscriber sees every event; a subscriber that lags past the
/// channel capacity loses the oldest ones.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
