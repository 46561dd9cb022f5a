//! Memory Service: retrieval before a run, curated write-back after it.
//!
//! Retrieval searches three partitions (entities, the run's session,
//! global) and renders the merged hits as a Markdown block for the
//! prompt. Write-back asks the LLM, in structured mode, which facts of
//! a finished run are worth keeping.

use crate::in_memory::{InMemoryEntityStore, InMemoryMemoryStore};
use chrono::Utc;
use rago_config::MemoryConfig;
use rago_core::error::MemoryError;
use rago_core::llm::{Embedder, GenerateOptions, Generator};
use rago_core::memory::{
    Entity, EntityStore, Memory, MemoryQuery, MemoryScope, MemoryStore, MemoryType, ScoredMemory,
};
use rago_core::{DomainEvent, EventBus};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Characters of execution log handed to the extractor.
const EXTRACTION_LOG_CHARS: usize = 4000;

/// Retrieved memories and their rendered prompt block.
#[derive(Debug, Clone, Default)]
pub struct Retrieved {
    /// Empty when nothing matched
    pub context: String,
    pub memories: Vec<ScoredMemory>,
}

impl Retrieved {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct Extraction {
    #[serde(default)]
    should_store: bool,
    #[serde(default)]
    memories: Vec<ExtractedMemory>,
}

#[derive(Debug, Deserialize)]
struct ExtractedMemory {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    importance: Option<f32>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
}

/// Entities may be plain names or `{name, type, description}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractedEntity {
    Name(String),
    Record {
        name: String,
        #[serde(rename = "type", default)]
        entity_type: Option<String>,
        #[serde(default)]
        description: String,
    },
}

impl ExtractedEntity {
    fn into_entity(self) -> Option<Entity> {
        let (name, entity_type, description) = match self {
            Self::Name(name) => (name, None, String::new()),
            Self::Record {
                name,
                entity_type,
                description,
            } => (name, entity_type, description),
        };
        let name = name.trim().to_string();
        if name.is_empty() {
            return None;
        }
        let mut entity = Entity::new(name, entity_type.unwrap_or_else(|| "unknown".into()));
        entity.description = description;
        Some(entity)
    }
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "should_store": {"type": "boolean"},
            "memories": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {"type": "string", "enum": ["fact", "skill", "pattern", "context", "preference", "entity"]},
                        "content": {"type": "string"},
                        "importance": {"type": "number"},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "entities": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["type", "content"]
                }
            }
        },
        "required": ["should_store"]
    })
}

/// The last `max` characters of `text`, on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Render hits as `[index] [type] (score, importance) content`.
pub fn render_context(memories: &[ScoredMemory]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Relevant memories\n");
    for (i, hit) in memories.iter().enumerate() {
        out.push_str(&format!(
            "[{}] [{}] ({:.2}, {:.2}) {}\n",
            i + 1,
            hit.memory.memory_type,
            hit.score,
            hit.memory.importance,
            hit.memory.content.trim()
        ));
    }
    out
}

pub struct MemoryService {
    store: Arc<dyn MemoryStore>,
    entities: Arc<dyn EntityStore>,
    generator: Arc<dyn Generator>,
    embedder: Option<Arc<dyn Embedder>>,
    events: Option<Arc<EventBus>>,
    limit: usize,
    min_score: f32,
    entity_limit: usize,
}

impl MemoryService {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        entities: Arc<dyn EntityStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let defaults = MemoryConfig::default();
        Self {
            store,
            entities,
            generator,
            embedder: None,
            events: None,
            limit: defaults.limit,
            min_score: defaults.min_score,
            entity_limit: defaults.entity_limit,
        }
    }

    /// Ephemeral service over in-memory stores.
    pub fn in_memory(generator: Arc<dyn Generator>) -> Self {
        Self::new(
            Arc::new(InMemoryMemoryStore::new()),
            Arc::new(InMemoryEntityStore::new()),
            generator,
        )
    }

    /// Build the configured backend.
    pub async fn from_config(config: &MemoryConfig, generator: Arc<dyn Generator>) -> Result<Self, MemoryError> {
        let service = match config.backend.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let path = config.db_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| MemoryError::Storage(format!("create {}: {e}", parent.display())))?;
                }
                let store = crate::sqlite::SqliteMemoryStore::new(&path.display().to_string()).await?;
                let entities = store.entity_store().await?;
                Self::new(Arc::new(store), Arc::new(entities), generator)
            }
            "memory" => Self::in_memory(generator),
            other => return Err(MemoryError::Storage(format!("unknown memory backend '{other}'"))),
        };
        Ok(service.with_config(config))
    }

    pub fn with_config(mut self, config: &MemoryConfig) -> Self {
        self.limit = config.limit.max(1);
        self.min_score = config.min_score;
        self.entity_limit = config.entity_limit;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn entities(&self) -> &Arc<dyn EntityStore> {
        &self.entities
    }

    /// Embed `text`; `None` without an embedder or when embedding fails,
    /// which sends searches down the substring path.
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "Embedding failed; falling back to substring match");
                None
            }
        }
    }

    fn publish(&self, operation: &str, count: usize) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::MemoryAccessed {
                operation: operation.to_string(),
                count,
                timestamp: Utc::now(),
            });
        }
    }

    async fn search_scope(
        &self,
        text: &str,
        embedding: &Option<Vec<f32>>,
        scope: MemoryScope,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = MemoryQuery::text(text)
            .with_embedding(embedding.clone())
            .with_scope(scope)
            .with_limit(limit)
            .with_min_score(self.min_score);
        self.store.search(&query).await
    }

    /// Top memories for `query`, rendered for the prompt.
    pub async fn retrieve(&self, query: &str, session_id: Option<&str>) -> Result<Retrieved, MemoryError> {
        let embedding = self.embed(query).await;

        let mut hits = self
            .search_scope(query, &embedding, MemoryScope::Entity, self.entity_limit)
            .await?;
        if let Some(session) = session_id {
            let session_hits = self
                .search_scope(query, &embedding, MemoryScope::Session(session.to_string()), (self.limit / 2).max(1))
                .await?;
            hits.extend(session_hits);
        }
        let remaining = self.limit.saturating_sub(hits.len());
        hits.extend(self.search_scope(query, &embedding, MemoryScope::Global, remaining).await?);

        let mut seen = HashSet::new();
        hits.retain(|hit| seen.insert(hit.memory.id.clone()));
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(self.limit);

        let ids: Vec<String> = hits.iter().map(|h| h.memory.id.clone()).collect();
        self.store.touch(&ids).await?;
        for hit in &mut hits {
            hit.memory.access_count += 1;
        }

        debug!(count = hits.len(), session = session_id.unwrap_or("-"), "Retrieved memories");
        self.publish("retrieve", hits.len());
        Ok(Retrieved {
            context: render_context(&hits),
            memories: hits,
        })
    }

    /// Ask the LLM which facts of a finished run to keep, and persist them.
    /// Context memories stay bound to `session_id`; everything else is global.
    pub async fn store_if_worthwhile(
        &self,
        goal: &str,
        result: &str,
        execution_log: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<Memory>, MemoryError> {
        let prompt = format!(
            "You curate an assistant's long-term memory. Decide whether this completed task \
             revealed anything worth remembering for future tasks: facts about the user, \
             preferences, reusable skills or patterns, or context for this conversation. \
             Do not store transient details.\n\n\
             Goal:\n{goal}\n\nResult:\n{result}\n\nExecution log (most recent part):\n{}\n\n\
             Respond with should_store and, if true, the memories to keep. Importance is \
             between 0 and 1.",
            tail(execution_log, EXTRACTION_LOG_CHARS)
        );
        let generation = self
            .generator
            .generate_structured(&prompt, &extraction_schema(), &GenerateOptions::default().with_temperature(0.0))
            .await
            .map_err(|e| MemoryError::Extraction(e.to_string()))?;
        let extraction: Extraction = serde_json::from_value(generation.parsed)
            .map_err(|e| MemoryError::Extraction(format!("unexpected shape: {e}")))?;

        if !extraction.should_store {
            debug!("Extractor found nothing worth storing");
            return Ok(Vec::new());
        }

        let mut stored = Vec::new();
        for item in extraction.memories {
            let content = item.content.trim();
            if content.is_empty() {
                continue;
            }
            let memory_type = MemoryType::parse(&item.kind).unwrap_or(MemoryType::Fact);
            let mut memory = Memory::new(memory_type, content).with_importance(item.importance.unwrap_or(0.5));
            if memory_type == MemoryType::Context
                && let Some(session) = session_id
            {
                memory = memory.with_session(session);
            }
            memory.embedding = self.embed(content).await;
            memory.metadata.tags = item.tags;

            for entity in item.entities.into_iter().filter_map(ExtractedEntity::into_entity) {
                memory.metadata.entities.push(entity.name.clone());
                self.entities.upsert(entity).await?;
            }

            self.store.upsert(memory.clone()).await?;
            stored.push(memory);
        }

        info!(count = stored.len(), "Stored memories from run");
        self.publish("store", stored.len());
        Ok(stored)
    }

    /// Merge `instruction` into an existing memory via the LLM.
    pub async fn update(&self, id: &str, instruction: &str) -> Result<Memory, MemoryError> {
        let mut memory = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;

        let prompt = format!(
            "Rewrite this memory so it incorporates the instruction. Reply with only the \
             updated memory text.\n\nMemory:\n{}\n\nInstruction:\n{instruction}",
            memory.content
        );
        let merged = self
            .generator
            .generate(&prompt, &GenerateOptions::default().with_temperature(0.0))
            .await
            .map_err(|e| MemoryError::Extraction(e.to_string()))?;
        let merged = merged.trim();

        if !merged.is_empty() && merged != memory.content {
            memory.content = merged.to_string();
            memory.embedding = self.embed(merged).await;
        }
        memory.last_accessed = Utc::now();
        self.store.upsert(memory.clone()).await?;
        self.publish("update", 1);
        Ok(memory)
    }

    /// Persist a memory as-is, embedding it first if needed.
    pub async fn add(&self, mut memory: Memory) -> Result<Memory, MemoryError> {
        if memory.embedding.is_none() {
            memory.embedding = self.embed(&memory.content).await;
        }
        self.store.upsert(memory.clone()).await?;
        self.publish("store", 1);
        Ok(memory)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Memory>, MemoryError> {
        self.store.get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            self.publish("delete", 1);
        }
        Ok(deleted)
    }

    /// Memories of one session, or all memories.
    pub async fn list(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<Memory>, MemoryError> {
        let scope = match session_id {
            Some(id) => MemoryScope::Session(id.to_string()),
            None => MemoryScope::Any,
        };
        self.store.list(&scope, limit).await
    }

    /// Search one partition without touching access counters.
    pub async fn search(&self, text: &str, scope: MemoryScope, limit: usize) -> Result<Vec<ScoredMemory>, MemoryError> {
        let embedding = self.embed(text).await;
        self.search_scope(text, &embedding, scope, limit).await
    }
}
