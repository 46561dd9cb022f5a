//! Memory domain types and storage traits.
//!
//! Memories are durable facts curated by the LLM after each run and
//! retrieved before the next one. Entity records (people, projects,
//! places a memory mentions) live in a separate store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::error::MemoryError;

/// What kind of fact a memory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Fact,
    Skill,
    Pattern,
    Context,
    Preference,
    Entity,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Skill => "skill",
            Self::Pattern => "pattern",
            Self::Context => "context",
            Self::Preference => "preference",
            Self::Entity => "entity",
        }
    }

    /// Parse a type name; unknown names are `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fact" => Some(Self::Fact),
            "skill" => Some(Self::Skill),
            "pattern" => Some(Self::Pattern),
            "context" => Some(Self::Context),
            "preference" => Some(Self::Preference),
            "entity" => Some(Self::Entity),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tags and linked entity names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
}

/// A single durable memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique ID; writes are idempotent on it
    pub id: String,

    /// Owning session, `None` for global memories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub memory_type: MemoryType,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// In [0, 1]
    pub importance: f32,

    #[serde(default)]
    pub access_count: u64,

    pub last_accessed: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub metadata: MemoryMetadata,
}

impl Memory {
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: None,
            memory_type,
            content: content.into(),
            embedding: None,
            importance: 0.5,
            access_count: 0,
            last_accessed: now,
            created_at: now,
            metadata: MemoryMetadata::default(),
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Which partition of the memory table a search covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum MemoryScope {
    /// Memories with no session that are not entity memories
    Global,
    /// Memories bound to one session, excluding entity memories
    Session(String),
    /// Entity memories regardless of session
    Entity,
    #[default]
    Any,
}

impl MemoryScope {
    pub fn matches(&self, memory: &Memory) -> bool {
        match self {
            Self::Global => memory.session_id.is_none() && memory.memory_type != MemoryType::Entity,
            Self::Session(id) => {
                memory.session_id.as_deref() == Some(id.as_str())
                    && memory.memory_type != MemoryType::Entity
            }
            Self::Entity => memory.memory_type == MemoryType::Entity,
            Self::Any => true,
        }
    }
}

/// A query for searching memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// The search text (used for substring fallback)
    pub text: String,

    /// Query embedding; when absent, search falls back to substring match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default)]
    pub scope: MemoryScope,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum relevance score threshold
    #[serde(default)]
    pub min_score: f32,
}

fn default_limit() -> usize {
    5
}

impl MemoryQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            embedding: None,
            scope: MemoryScope::Any,
            limit: default_limit(),
            min_score: 0.0,
        }
    }

    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_scope(mut self, scope: MemoryScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }
}

/// A memory with its relevance score for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f32,
}

/// A named thing memories mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique, compared case-insensitively
    pub name: String,

    pub entity_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub mention_count: u64,

    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: String::new(),
            mention_count: 1,
            updated_at: Utc::now(),
        }
    }

    /// The case-insensitive lookup key.
    pub fn key(name: &str) -> String {
        name.trim().to_lowercase()
    }
}

/// Durable storage for memories.
///
/// Implementations: SQLite, in-memory (for testing).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Insert or replace the memory with `memory.id`.
    async fn upsert(&self, memory: Memory) -> std::result::Result<(), MemoryError>;

    async fn get(&self, id: &str) -> std::result::Result<Option<Memory>, MemoryError>;

    /// Delete a memory by ID.
    async fn delete(&self, id: &str) -> std::result::Result<bool, MemoryError>;

    /// Memories in `scope`, newest first.
    async fn list(
        &self,
        scope: &MemoryScope,
        limit: usize,
    ) -> std::result::Result<Vec<Memory>, MemoryError>;

    /// Score memories in the query's scope, best first.
    async fn search(
        &self,
        query: &MemoryQuery,
    ) -> std::result::Result<Vec<ScoredMemory>, MemoryError>;

    /// Bump the access counter and last-accessed time of each id.
    async fn touch(&self, ids: &[String]) -> std::result::Result<(), MemoryError>;

    async fn count(&self) -> std::result::Result<usize, MemoryError>;
}

/// Storage for entity records.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert, or merge into the existing record with the same key and
    /// bump its mention count.
    async fn upsert(&self, entity: Entity) -> std::result::Result<Entity, MemoryError>;

    async fn get(&self, name: &str) -> std::result::Result<Option<Entity>, MemoryError>;

    /// Most-mentioned first.
    async fn list(&self, limit: usize) -> std::result::Result<Vec<Entity>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_partitions() {
        let global = Memory::new(MemoryType::Fact, "sky is blue");
        let session = Memory::new(MemoryType::Context, "working on parser").with_session("s1");
        let entity = Memory::new(MemoryType::Entity, "Alice is a user").with_session("s1");

        assert!(MemoryScope::Global.matches(&global));
        assert!(!MemoryScope::Global.matches(&session));
        assert!(!MemoryScope::Global.matches(&entity));

        assert!(MemoryScope::Session("s1".into()).matches(&session));
        assert!(!MemoryScope::Session("s2".into()).matches(&session));
        assert!(!MemoryScope::Session("s1".into()).matches(&entity));

        assert!(MemoryScope::Entity.matches(&entity));
        assert!(MemoryScope::Any.matches(&global));
    }

    #[test]
    fn importance_is_clamped() {
        assert_eq!(Memory::new(MemoryType::Fact, "x").with_importance(1.7).importance, 1.0);
        assert_eq!(Memory::new(MemoryType::Fact, "x").with_importance(-3.0).importance, 0.0);
    }

    #[test]
    fn memory_type_parse() {
        assert_eq!(MemoryType::parse("Preference"), Some(MemoryType::Preference));
        assert_eq!(MemoryType::parse("rumour"), None);
    }

    #[test]
    fn memory_serialization() {
        let memory = Memory::new(MemoryType::Fact, "User's name is Alice").with_importance(0.9);
        let json = serde_json::to_string(&memory).unwrap();
        assert!(json.contains(r#""memory_type":"fact""#));
        let back: Memory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, memory);
    }

    #[test]
    fn entity_key_is_case_insensitive() {
        assert_eq!(Entity::key("  Alice "), Entity::key("alice"));
    }
}
