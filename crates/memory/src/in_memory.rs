//! In-memory backends: useful for testing and ephemeral sessions.

use crate::vector;
use async_trait::async_trait;
use chrono::Utc;
use rago_core::error::MemoryError;
use rago_core::memory::{Entity, EntityStore, Memory, MemoryQuery, MemoryScope, MemoryStore, ScoredMemory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Memories keyed by id.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    memories: Arc<RwLock<HashMap<String, Memory>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, memory: Memory) -> Result<(), MemoryError> {
        self.memories.write().await.insert(memory.id.clone(), memory);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Memory>, MemoryError> {
        Ok(self.memories.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        Ok(self.memories.write().await.remove(id).is_some())
    }

    async fn list(&self, scope: &MemoryScope, limit: usize) -> Result<Vec<Memory>, MemoryError> {
        let memories = self.memories.read().await;
        let mut listed: Vec<Memory> = memories.values().filter(|m| scope.matches(m)).cloned().collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        listed.truncate(limit);
        Ok(listed)
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<ScoredMemory>, MemoryError> {
        let memories = self.memories.read().await;
        Ok(vector::rank(memories.values().cloned(), query))
    }

    async fn touch(&self, ids: &[String]) -> Result<(), MemoryError> {
        let now = Utc::now();
        let mut memories = self.memories.write().await;
        for id in ids {
            if let Some(memory) = memories.get_mut(id) {
                memory.access_count += 1;
                memory.last_accessed = now;
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.memories.read().await.len())
    }
}

/// Entities keyed by their case-insensitive name.
#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: Arc<RwLock<HashMap<String, Entity>>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Fold a new sighting into an existing record.
pub(crate) fn merge_entity(existing: &mut Entity, incoming: Entity) {
    existing.mention_count += 1;
    if !incoming.description.is_empty() {
        existing.description = incoming.description;
    }
    if existing.entity_type.is_empty() || existing.entity_type == "unknown" {
        existing.entity_type = incoming.entity_type;
    }
    existing.updated_at = Utc::now();
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn upsert(&self, entity: Entity) -> Result<Entity, MemoryError> {
        let mut entities = self.entities.write().await;
        let key = Entity::key(&entity.name);
        match entities.get_mut(&key) {
            Some(existing) => {
                merge_entity(existing, entity);
                Ok(existing.clone())
            }
            None => {
                entities.insert(key, entity.clone());
                Ok(entity)
            }
        }
    }

    async fn get(&self, name: &str) -> Result<Option<Entity>, MemoryError> {
        Ok(self.entities.read().await.get(&Entity::key(name)).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Entity>, MemoryError> {
        let mut listed: Vec<Entity> = self.entities.read().await.values().cloned().collect();
        listed.sort_by(|a, b| b.mention_count.cmp(&a.mention_count).then_with(|| a.name.cmp(&b.name)));
        listed.truncate(limit);
        Ok(listed)
    }
}
