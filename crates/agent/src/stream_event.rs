//! Run-level streaming events.
//!
//! `RunEvent` is what a caller of [`crate::Engine::run`] observes. Every
//! event serializes to one flat JSON object:
//! `{type, round?, call_id?, tool_name?, tool_args?, content?, error?}`.
//!
//! - `start`: run id and goal
//! - `thinking`: top of a round
//! - `partial`: LLM text for the round
//! - `tool_call`: a tool is being dispatched
//! - `tool_result`: the tool returned
//! - `handoff`: the run switched agent profile
//! - `complete`: terminal, final answer
//! - `error`: a tool failure (recoverable) or the terminal failure

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Start {
        run_id: String,
        content: String,
    },

    Thinking {
        round: u32,
    },

    Partial {
        round: u32,
        content: String,
    },

    ToolCall {
        round: u32,
        call_id: String,
        tool_name: String,
        tool_args: Value,
    },

    ToolResult {
        round: u32,
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(default = "default_true")]
        success: bool,
    },

    Handoff {
        round: u32,
        from: String,
        /// Target profile id
        content: String,
    },

    Complete {
        content: String,
        /// Set when the round cap ended the run
        #[serde(default)]
        partial: bool,
        rounds: u32,
    },

    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        kind: String,
        error: String,
        recoverable: bool,
    },
}

fn default_true() -> bool {
    true
}

impl RunEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Thinking { .. } => "thinking",
            Self::Partial { .. } => "partial",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Handoff { .. } => "handoff",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// `complete`, or an `error` nothing can recover from.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Complete { .. } => true,
            Self::Error { recoverable, .. } => !recoverable,
            _ => false,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Consumer half of a run's event channel. Ends after the terminal event.
pub struct EventStream {
    rx: mpsc::Receiver<RunEvent>,
}

impl EventStream {
    /// Next event, or `None` once the run has closed the channel.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> ReceiverStream<RunEvent> {
        ReceiverStream::new(self.rx)
    }
}

/// Producer half. Sends wait for buffer space, so a slow consumer slows
/// the run down instead of losing events.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<RunEvent>,
}

impl EventSink {
    pub(crate) async fn emit(&self, event: RunEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Event stream consumer dropped");
        }
    }
}

pub(crate) fn channel(buffer: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (EventSink { tx }, EventStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_serializes_flat() {
        let event = RunEvent::ToolCall {
            round: 1,
            call_id: "call_1".into(),
            tool_name: "mcp_clock_now".into(),
            tool_args: json!({}),
        };
        assert_eq!(
            event.to_json(),
            json!({
                "type": "tool_call",
                "round": 1,
                "call_id": "call_1",
                "tool_name": "mcp_clock_now",
                "tool_args": {}
            })
        );
    }

    #[test]
    fn error_omits_absent_fields() {
        let event = RunEvent::Error {
            round: None,
            call_id: None,
            tool_name: None,
            kind: "cancelled".into(),
            error: "Run cancelled".into(),
            recoverable: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(!json.contains("call_id"));
        assert!(event.is_terminal());
    }

    #[test]
    fn terminal_events() {
        let complete = RunEvent::Complete {
            content: "done".into(),
            partial: false,
            rounds: 1,
        };
        assert!(complete.is_terminal());
        assert!(!RunEvent::Thinking { round: 1 }.is_terminal());
        let recoverable = RunEvent::Error {
            round: Some(1),
            call_id: Some("c".into()),
            tool_name: Some("t".into()),
            kind: "tool_not_found".into(),
            error: "Tool not found: t".into(),
            recoverable: true,
        };
        assert!(!recoverable.is_terminal());
        assert_eq!(recoverable.event_type(), "error");
    }

    #[test]
    fn deserializes_by_tag() {
        let event: RunEvent = serde_json::from_str(r#"{"type":"partial","round":2,"content":"hi"}"#).unwrap();
        assert_eq!(
            event,
            RunEvent::Partial {
                round: 2,
                content: "hi".into()
            }
        );
    }

    #[tokio::test]
    async fn stream_closes_when_sink_drops() {
        let (sink, stream) = channel(2);
        sink.emit(RunEvent::Thinking { round: 1 }).await;
        sink.emit(RunEvent::Thinking { round: 2 }).await;
        drop(sink);
        assert_eq!(stream.collect().await.len(), 2);
    }
}
