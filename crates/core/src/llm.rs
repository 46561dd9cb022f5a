//! Collaborator capabilities: generation, embedding, and retrieval.
//!
//! The runtime never talks to an LLM vendor directly. Backends implement
//! these traits and are injected into the engine, the memory service, and
//! the `rag_*` tools.

use crate::error::{LlmError, RetrievalError};
use crate::message::{Message, MessageToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

/// Per-request generation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
            stop: Vec::new(),
        }
    }
}

impl GenerateOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A tool call proposed by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedToolCall {
    /// Provider-assigned id; the engine generates one when empty
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub arguments: Value,
}

impl From<GeneratedToolCall> for MessageToolCall {
    fn from(call: GeneratedToolCall) -> Self {
        Self {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

/// The result of `generate_with_tools`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<GeneratedToolCall>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(calls: Vec<GeneratedToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls: calls,
        }
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationChunk {
    /// Partial content delta
    #[serde(default)]
    pub delta: String,

    /// Completed tool calls (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<GeneratedToolCall>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

/// The result of `generate_structured`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredGeneration {
    /// Raw model text
    pub raw: String,

    /// The parsed JSON value
    pub parsed: Value,
}

/// Stream receiver type shared by the streaming methods.
pub type ChunkStream = mpsc::Receiver<std::result::Result<GenerationChunk, LlmError>>;

/// Text generation over a chat-style LLM.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Plain prompt completion.
    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> std::result::Result<String, LlmError>;

    /// Chat completion with function-call descriptors.
    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: &GenerateOptions,
    ) -> std::result::Result<Generation, LlmError>;

    /// Generate JSON conforming to `schema`.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        opts: &GenerateOptions,
    ) -> std::result::Result<StructuredGeneration, LlmError>;

    /// Stream a plain completion.
    ///
    /// Default implementation calls `generate()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> std::result::Result<ChunkStream, LlmError> {
        let text = self.generate(prompt, opts).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(Ok(GenerationChunk {
                delta: text,
                tool_calls: Vec::new(),
                done: true,
            }))
            .await;
        Ok(rx)
    }

    /// Stream a chat completion with tools.
    ///
    /// Default implementation calls `generate_with_tools()` and wraps the result as a single chunk.
    async fn stream_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: &GenerateOptions,
    ) -> std::result::Result<ChunkStream, LlmError> {
        let generation = self.generate_with_tools(messages, tools, opts).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(Ok(GenerationChunk {
                delta: generation.text,
                tool_calls: generation.tool_calls,
                done: true,
            }))
            .await;
        Ok(rx)
    }
}

/// Text embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, LlmError>;
}

/// A query against the document-retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub query: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn default_top_k() -> usize {
    5
}

/// One source cited by a retrieval answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSource {
    pub content: String,

    #[serde(default)]
    pub score: f32,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalAnswer {
    pub answer: String,

    #[serde(default)]
    pub sources: Vec<RetrievalSource>,
}

/// Content handed to the retrieval pipeline for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IngestSource {
    Text(String),
    Path(std::path::PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,

    #[serde(default)]
    pub chunks: usize,
}

/// The opaque document-retrieval pipeline.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn query(
        &self,
        query: RetrievalQuery,
    ) -> std::result::Result<RetrievalAnswer, RetrievalError>;

    async fn ingest(
        &self,
        source: IngestSource,
        metadata: serde_json::Map<String, Value>,
    ) -> std::result::Result<IngestReport, RetrievalError>;
}
