//! Deterministic collaborator doubles for tests.

use crate::error::LlmError;
use crate::llm::{
    Embedder, GenerateOptions, GeneratedToolCall, Generation, Generator, StructuredGeneration,
    ToolDefinition,
};
use crate::message::Message;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply to `generate_with_tools`.
#[derive(Debug, Clone)]
pub enum Turn {
    Reply(Generation),
    Fail(String),
    /// Sleep, then reply
    Slow(Duration, Generation),
}

impl Turn {
    pub fn text(text: &str) -> Self {
        Self::Reply(Generation::text(text))
    }

    /// A single tool call with a fixed id.
    pub fn call(id: &str, name: &str, arguments: Value) -> Self {
        Self::Reply(Generation::calls(vec![GeneratedToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }]))
    }

    pub fn calls(calls: Vec<(&str, &str, Value)>) -> Self {
        Self::Reply(Generation::calls(
            calls
                .into_iter()
                .map(|(id, name, arguments)| GeneratedToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                })
                .collect(),
        ))
    }
}

/// Replays scripted turns in order. `generate_structured` and `generate`
/// pop their own queues. Every request is recorded for assertions.
#[derive(Default)]
pub struct ScriptedGenerator {
    turns: Mutex<VecDeque<Turn>>,
    repeat: Option<Turn>,
    structured: Mutex<VecDeque<Value>>,
    texts: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<Message>>>,
    catalogs: Mutex<Vec<Vec<String>>>,
    prompts: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl ScriptedGenerator {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Self::default()
        }
    }

    /// Answer every turn with `turn`.
    pub fn repeating(turn: Turn) -> Self {
        Self {
            repeat: Some(turn),
            ..Self::default()
        }
    }

    pub fn with_structured(self, values: Vec<Value>) -> Self {
        *lock(&self.structured) = values.into();
        self
    }

    pub fn with_texts(self, texts: Vec<&str>) -> Self {
        *lock(&self.texts) = texts.into_iter().map(String::from).collect();
        self
    }

    /// Message lists seen by `generate_with_tools`, one per call.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).clone()
    }

    /// Tool names offered on each `generate_with_tools` call.
    pub fn catalogs(&self) -> Vec<Vec<String>> {
        lock(&self.catalogs).clone()
    }

    /// Prompts seen by `generate` and `generate_structured`.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn turns_taken(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _opts: &GenerateOptions) -> Result<String, LlmError> {
        lock(&self.prompts).push(prompt.to_string());
        lock(&self.texts)
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("no scripted text left".into()))
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        _opts: &GenerateOptions,
    ) -> Result<Generation, LlmError> {
        lock(&self.requests).push(messages.to_vec());
        lock(&self.catalogs).push(tools.iter().map(|t| t.name.clone()).collect());
        let turn = lock(&self.turns).pop_front().or_else(|| self.repeat.clone());
        match turn {
            Some(Turn::Reply(generation)) => Ok(generation),
            Some(Turn::Fail(message)) => Err(LlmError::Request(message)),
            Some(Turn::Slow(delay, generation)) => {
                tokio::time::sleep(delay).await;
                Ok(generation)
            }
            None => Err(LlmError::InvalidResponse("no scripted turn left".into())),
        }
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        _schema: &Value,
        _opts: &GenerateOptions,
    ) -> Result<StructuredGeneration, LlmError> {
        lock(&self.prompts).push(prompt.to_string());
        let parsed = lock(&self.structured)
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("no scripted structured value left".into()))?;
        Ok(StructuredGeneration {
            raw: parsed.to_string(),
            parsed,
        })
    }
}

/// Bag-of-words embedder: each lowercased word hashes into one of
/// `dims` buckets. Texts sharing words have positive cosine similarity.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vector = vec![0.0; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
        {
            let bucket = (fnv1a(&word.to_lowercase()) % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }
}
