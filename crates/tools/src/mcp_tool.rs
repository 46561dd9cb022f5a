//! A tool served by a protocol server, addressed as `mcp_<server>_<tool>`.

use crate::naming;
use async_trait::async_trait;
use rago_core::error::ToolError;
use rago_core::schema::{ToolSchema, ValidatedArgs};
use rago_core::tool::{Tool, ToolOutput};
use rago_mcp::{RemoteTool, ServerManager, normalize_result, tool_error};
use std::sync::Arc;
use std::time::Duration;

pub struct McpTool {
    name: String,
    server: String,
    remote_name: String,
    description: String,
    schema: ToolSchema,
    servers: Arc<ServerManager>,
    timeout: Option<Duration>,
}

impl McpTool {
    pub fn new(server: &str, remote: &RemoteTool, servers: Arc<ServerManager>) -> Self {
        let description = if remote.description.is_empty() {
            format!("{} (from server {server})", remote.name)
        } else {
            remote.description.clone()
        };
        Self {
            name: naming::mcp_tool_name(server, &remote.name),
            server: server.to_string(),
            remote_name: remote.name.clone(),
            description,
            schema: ToolSchema::from_value(remote.input_schema.clone()),
            servers,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn call(&self, args: ValidatedArgs) -> Result<ToolOutput, ToolError> {
        let result = self
            .servers
            .call(&self.server, &self.remote_name, args.into_value(), self.timeout)
            .await
            .map_err(|e| tool_error(&self.name, &self.server, e))?;
        normalize_result(&self.name, result)
    }
}
