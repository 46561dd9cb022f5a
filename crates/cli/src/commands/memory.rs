//! `rago memory`: Memory queries.

use async_trait::async_trait;
use rago_config::AppConfig;
use rago_core::error::LlmError;
use rago_core::llm::{GenerateOptions, Generation, Generator, StructuredGeneration, ToolDefinition};
use rago_core::memory::MemoryScope;
use rago_core::message::Message;
use rago_memory::MemoryService;
use serde_json::Value;
use std::sync::Arc;

/// Stands in for an LLM; searching memory never asks for one.
struct NoGenerator;

#[async_trait]
impl Generator for NoGenerator {
    fn name(&self) -> &str {
        "none"
    }

    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<String, LlmError> {
        Err(unavailable())
    }

    async fn generate_with_tools(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
        _opts: &GenerateOptions,
    ) -> Result<Generation, LlmError> {
        Err(unavailable())
    }

    async fn generate_structured(
        &self,
        _prompt: &str,
        _schema: &Value,
        _opts: &GenerateOptions,
    ) -> Result<StructuredGeneration, LlmError> {
        Err(unavailable())
    }
}

fn unavailable() -> LlmError {
    LlmError::Unsupported("the CLI has no LLM provider".into())
}

pub async fn search(config: &AppConfig, query: &str, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let service = MemoryService::from_config(&config.memory, Arc::new(NoGenerator))
        .await
        .map_err(|e| format!("Failed to open memory: {e}"))?;

    println!("Searching memories for: \"{query}\"");
    println!();

    let hits = service.search(query, MemoryScope::Any, limit).await?;
    if hits.is_empty() {
        println!("  No memories found.");
    }
    for (i, hit) in hits.iter().enumerate() {
        let memory = &hit.memory;
        let content: String = memory.content.chars().take(80).collect();
        println!(
            "  {:>2}. [{}] [score: {:.2}, importance: {:.2}] {content}",
            i + 1,
            memory.memory_type,
            hit.score,
            memory.importance
        );
        if !memory.metadata.tags.is_empty() {
            println!("      tags: {}", memory.metadata.tags.join(", "));
        }
        if let Some(session) = &memory.session_id {
            println!("      session: {session}");
        }
    }
    Ok(())
}
