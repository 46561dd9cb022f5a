//! Tool doubles for registry tests.

use async_trait::async_trait;
use rago_core::error::ToolError;
use rago_core::schema::{PropertySchema, ToolSchema, ValidatedArgs};
use rago_core::tool::{Tool, ToolOutput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Echoes `text` (or a fixed reply) and counts invocations.
pub struct CountingTool {
    name: String,
    reply: Option<String>,
    calls: AtomicUsize,
}

impl CountingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = Some(reply.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echo the input text"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::object()
            .property("text", PropertySchema::string("Text to echo"))
            .require("text")
    }

    async fn call(&self, args: ValidatedArgs) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = match &self.reply {
            Some(reply) => reply.clone(),
            None => args.str("text").unwrap_or_default().to_string(),
        };
        Ok(ToolOutput::text(text))
    }
}

/// Sleeps for a fixed time before answering.
pub struct SleepTool {
    delay: Duration,
}

impl SleepTool {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "local_sleep"
    }

    fn description(&self) -> &str {
        "Sleep, then answer"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::object()
    }

    async fn call(&self, _args: ValidatedArgs) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(ToolOutput::text("awake"))
    }
}
