//! Tool trait: the abstraction over agent capabilities.
//!
//! Every provider (protocol servers, skills, retrieval) exposes its
//! capabilities as `Tool`s. The federation registry owns the routing
//! table; this module only defines the seam and the descriptors.

use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::schema::{ToolSchema, ValidatedArgs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Federated name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    #[serde(default)]
    pub arguments: Value,
}

/// The value a tool produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text form handed back to the LLM as the observation
    pub text: String,

    /// Structured payload, if the provider returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    /// Wrap a JSON value; strings are rendered unquoted.
    pub fn json(value: Value) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            text,
            data: Some(value),
        }
    }
}

/// Which kind of provider backs a federated tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Mcp,
    Skill,
    Rag,
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mcp => "mcp",
            Self::Skill => "skill",
            Self::Rag => "rag",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token-bucket parameters for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

/// Public description of a federated tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
    pub provider: ProviderKind,

    /// Server name, skill id, or "rag"
    pub provider_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,

    #[serde(default)]
    pub cacheable: bool,

    /// False while the owning provider is offline
    #[serde(default = "default_true")]
    pub available: bool,

    /// Hidden from the LLM catalog but still callable
    #[serde(default)]
    pub hidden: bool,
}

fn default_true() -> bool {
    true
}

impl ToolInfo {
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.to_value(),
        }
    }
}

/// The core Tool trait.
///
/// Implementations receive arguments that already passed
/// [`ToolSchema::validate`] against [`Tool::schema`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The federated name of this tool (e.g., "mcp_fs_ls", "rag_query").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// Input schema for this tool's arguments.
    fn schema(&self) -> ToolSchema;

    /// Execute the tool.
    async fn call(&self, args: ValidatedArgs) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.schema().to_value(),
        }
    }
}
