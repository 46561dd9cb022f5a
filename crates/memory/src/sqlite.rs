//! SQLite memory and entity stores.
//!
//! One database file with two tables:
//! - `memories`: memory records, embeddings as little-endian f32 blobs
//! - `entities`: entity records keyed by lowercased name
//!
//! Similarity is computed in-process over the rows of the requested scope.

use crate::in_memory::merge_entity;
use crate::vector;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rago_core::error::MemoryError;
use rago_core::memory::{
    Entity, EntityStore, Memory, MemoryMetadata, MemoryQuery, MemoryScope, MemoryStore,
    MemoryType, ScoredMemory,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// Open a pool with WAL journaling. In-memory databases get a single
/// connection so every query sees the same database.
pub(crate) async fn open_pool(path: &str) -> Result<SqlitePool, MemoryError> {
    let url = if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite://{path}")
    };
    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let pool = if path.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(4)
    };
    pool.connect_with(options)
        .await
        .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))
}

/// Serialize timestamps with a fixed precision so text order is time order.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// WHERE clause and optional bind for a scope.
fn scope_clause(scope: &MemoryScope) -> (&'static str, Option<&str>) {
    match scope {
        MemoryScope::Global => ("session_id IS NULL AND memory_type != 'entity'", None),
        MemoryScope::Session(id) => ("session_id = ? AND memory_type != 'entity'", Some(id.as_str())),
        MemoryScope::Entity => ("memory_type = 'entity'", None),
        MemoryScope::Any => ("1 = 1", None),
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, MemoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| MemoryError::QueryFailed(format!("{name} column: {e}")))
}

pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    /// Open (or create) the database at `path`. Pass `":memory:"` for an
    /// ephemeral database.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let pool = open_pool(path).await?;
        let store = Self::from_pool(pool).await?;
        info!("SQLite memory store initialized at {path}");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// An entity store over the same database.
    pub async fn entity_store(&self) -> Result<SqliteEntityStore, MemoryError> {
        SqliteEntityStore::from_pool(self.pool.clone()).await
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id            TEXT PRIMARY KEY,
                session_id    TEXT,
                memory_type   TEXT NOT NULL,
                content       TEXT NOT NULL,
                embedding     BLOB,
                importance    REAL NOT NULL DEFAULT 0.5,
                access_count  INTEGER NOT NULL DEFAULT 0,
                last_accessed TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                metadata      TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("memories table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::MigrationFailed(format!("session index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at DESC)")
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::MigrationFailed(format!("created_at index: {e}")))?;

        debug!("SQLite memory migrations complete");
        Ok(())
    }

    fn row_to_memory(row: &SqliteRow) -> Result<Memory, MemoryError> {
        let raw_type: String = column(row, "memory_type")?;
        let memory_type = MemoryType::parse(&raw_type)
            .ok_or_else(|| MemoryError::QueryFailed(format!("unknown memory type '{raw_type}'")))?;
        let embedding: Option<Vec<u8>> = column(row, "embedding")?;
        let metadata: String = column(row, "metadata")?;
        let access_count: i64 = column(row, "access_count")?;
        let importance: f64 = column(row, "importance")?;
        let last_accessed: String = column(row, "last_accessed")?;
        let created_at: String = column(row, "created_at")?;

        Ok(Memory {
            id: column(row, "id")?,
            session_id: column(row, "session_id")?,
            memory_type,
            content: column(row, "content")?,
            embedding: embedding.as_deref().map(blob_to_embedding),
            importance: importance as f32,
            access_count: access_count.max(0) as u64,
            last_accessed: parse_timestamp(&last_accessed),
            created_at: parse_timestamp(&created_at),
            metadata: serde_json::from_str::<MemoryMetadata>(&metadata).unwrap_or_default(),
        })
    }

    async fn scoped_rows(&self, scope: &MemoryScope, limit: Option<usize>) -> Result<Vec<Memory>, MemoryError> {
        let (clause, bind) = scope_clause(scope);
        let sql = match limit {
            Some(_) => format!("SELECT * FROM memories WHERE {clause} ORDER BY created_at DESC LIMIT ?"),
            None => format!("SELECT * FROM memories WHERE {clause}"),
        };
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        if let Some(limit) = limit {
            query = query.bind(limit as i64);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("scope scan: {e}")))?;
        rows.iter().map(Self::row_to_memory).collect()
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert(&self, memory: Memory) -> Result<(), MemoryError> {
        let metadata = serde_json::to_string(&memory.metadata)
            .map_err(|e| MemoryError::Storage(format!("Metadata serialization: {e}")))?;
        let embedding = memory.embedding.as_deref().map(embedding_to_blob);

        sqlx::query(
            r#"
            INSERT INTO memories (id, session_id, memory_type, content, embedding, importance,
                                  access_count, last_accessed, created_at, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                memory_type = excluded.memory_type,
                content = excluded.content,
                embedding = excluded.embedding,
                importance = excluded.importance,
                access_count = excluded.access_count,
                last_accessed = excluded.last_accessed,
                metadata = excluded.metadata
            "#,
        )
        .bind(&memory.id)
        .bind(&memory.session_id)
        .bind(memory.memory_type.as_str())
        .bind(&memory.content)
        .bind(embedding.as_deref())
        .bind(memory.importance as f64)
        .bind(memory.access_count as i64)
        .bind(timestamp(&memory.last_accessed))
        .bind(timestamp(&memory.created_at))
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT failed: {e}")))?;

        debug!(memory = %memory.id, "Stored memory");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Memory>, MemoryError> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET by ID: {e}")))?;

        row.as_ref().map(Self::row_to_memory).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, scope: &MemoryScope, limit: usize) -> Result<Vec<Memory>, MemoryError> {
        self.scoped_rows(scope, Some(limit)).await
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<ScoredMemory>, MemoryError> {
        let rows = self.scoped_rows(&query.scope, None).await?;
        Ok(vector::rank(rows, query))
    }

    async fn touch(&self, ids: &[String]) -> Result<(), MemoryError> {
        let now = timestamp(&Utc::now());
        for id in ids {
            sqlx::query(
                "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
            )
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("UPDATE access failed: {e}")))?;
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM memories")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = column(&row, "cnt")?;
        Ok(cnt as usize)
    }
}

pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                key           TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                entity_type   TEXT NOT NULL,
                description   TEXT NOT NULL DEFAULT '',
                mention_count INTEGER NOT NULL DEFAULT 1,
                updated_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("entities table: {e}")))?;
        Ok(Self { pool })
    }

    fn row_to_entity(row: &SqliteRow) -> Result<Entity, MemoryError> {
        let mention_count: i64 = column(row, "mention_count")?;
        let updated_at: String = column(row, "updated_at")?;
        Ok(Entity {
            name: column(row, "name")?,
            entity_type: column(row, "entity_type")?,
            description: column(row, "description")?,
            mention_count: mention_count.max(0) as u64,
            updated_at: parse_timestamp(&updated_at),
        })
    }

    async fn write(&self, key: &str, entity: &Entity) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            INSERT INTO entities (key, name, entity_type, description, mention_count, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(key) DO UPDATE SET
                entity_type = excluded.entity_type,
                description = excluded.description,
                mention_count = excluded.mention_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&entity.name)
        .bind(&entity.entity_type)
        .bind(&entity.description)
        .bind(entity.mention_count as i64)
        .bind(timestamp(&entity.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("entity upsert failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn upsert(&self, entity: Entity) -> Result<Entity, MemoryError> {
        let key = Entity::key(&entity.name);
        let merged = match self.get(&entity.name).await? {
            Some(mut existing) => {
                merge_entity(&mut existing, entity);
                existing
            }
            None => entity,
        };
        self.write(&key, &merged).await?;
        Ok(merged)
    }

    async fn get(&self, name: &str) -> Result<Option<Entity>, MemoryError> {
        let row = sqlx::query("SELECT * FROM entities WHERE key = ?1")
            .bind(Entity::key(name))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("entity lookup: {e}")))?;
        row.as_ref().map(Self::row_to_entity).transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<Entity>, MemoryError> {
        let rows = sqlx::query("SELECT * FROM entities ORDER BY mention_count DESC, name ASC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("entity list: {e}")))?;
        rows.iter().map(Self::row_to_entity).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteMemoryStore {
        SqliteMemoryStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn roundtrip_preserves_content_and_embedding() {
        let store = test_store().await;
        let mut memory = Memory::new(MemoryType::Preference, "User prefers dark mode")
            .with_importance(0.7)
            .with_embedding(vec![0.25, -1.5, 3.0])
            .with_session("s1");
        memory.metadata.tags = vec!["ui".into()];
        memory.metadata.entities = vec!["User".into()];
        store.upsert(memory.clone()).await.unwrap();

        let back = store.get(&memory.id).await.unwrap().unwrap();
        assert_eq!(back.content, memory.content);
        assert_eq!(back.embedding, memory.embedding);
        assert_eq!(back.session_id.as_deref(), Some("s1"));
        assert_eq!(back.metadata, memory.metadata);
        assert_eq!(back.memory_type, MemoryType::Preference);
        assert!((back.importance - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn upsert_twice_leaves_one_row() {
        let store = test_store().await;
        let mut memory = Memory::new(MemoryType::Fact, "v1");
        store.upsert(memory.clone()).await.unwrap();
        memory.content = "v2".into();
        store.upsert(memory.clone()).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(&memory.id).await.unwrap().unwrap().content, "v2");
    }

    #[tokio::test]
    async fn search_by_scope_and_embedding() {
        let store = test_store().await;
        store
            .upsert(Memory::new(MemoryType::Fact, "global").with_embedding(vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(Memory::new(MemoryType::Context, "session").with_embedding(vec![1.0, 0.0]).with_session("s1"))
            .await
            .unwrap();
        store
            .upsert(Memory::new(MemoryType::Entity, "Alice is the user").with_embedding(vec![0.9, 0.1]))
            .await
            .unwrap();

        let base = MemoryQuery::text("q").with_embedding(Some(vec![1.0, 0.0]));
        let global = store.search(&base.clone().with_scope(MemoryScope::Global)).await.unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].memory.content, "global");

        let session = store
            .search(&base.clone().with_scope(MemoryScope::Session("s1".into())))
            .await
            .unwrap();
        assert_eq!(session[0].memory.content, "session");

        let entity = store.search(&base.with_scope(MemoryScope::Entity)).await.unwrap();
        assert_eq!(entity[0].memory.content, "Alice is the user");
    }

    #[tokio::test]
    async fn touch_bumps_access_count() {
        let store = test_store().await;
        let memory = Memory::new(MemoryType::Fact, "x");
        store.upsert(memory.clone()).await.unwrap();
        store.touch(&[memory.id.clone()]).await.unwrap();
        store.touch(&[memory.id.clone()]).await.unwrap();
        assert_eq!(store.get(&memory.id).await.unwrap().unwrap().access_count, 2);
    }

    #[tokio::test]
    async fn list_newest_first() {
        let store = test_store().await;
        let mut old = Memory::new(MemoryType::Fact, "old");
        old.created_at = Utc::now() - chrono::Duration::hours(1);
        store.upsert(old).await.unwrap();
        store.upsert(Memory::new(MemoryType::Fact, "new")).await.unwrap();

        let listed = store.list(&MemoryScope::Any, 10).await.unwrap();
        let contents: Vec<&str> = listed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["new", "old"]);
        assert!(store.delete("missing").await.is_ok_and(|deleted| !deleted));
    }

    #[tokio::test]
    async fn entities_share_the_database() {
        let store = test_store().await;
        let entities = store.entity_store().await.unwrap();
        entities.upsert(Entity::new("Rago", "project")).await.unwrap();
        let merged = entities.upsert(Entity::new("rago", "project")).await.unwrap();

        assert_eq!(merged.mention_count, 2);
        assert_eq!(entities.list(5).await.unwrap().len(), 1);
        assert!(entities.get("RAGO").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let path = path.to_str().unwrap();
        let memory = Memory::new(MemoryType::Fact, "durable");
        {
            let store = SqliteMemoryStore::new(path).await.unwrap();
            store.upsert(memory.clone()).await.unwrap();
        }
        let reopened = SqliteMemoryStore::new(path).await.unwrap();
        assert_eq!(reopened.get(&memory.id).await.unwrap().unwrap().content, "durable");
    }
}
