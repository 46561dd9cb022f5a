//! SQLite session and plan backends.
//!
//! Tables:
//! - `sessions`, `messages` (append-only, ordered by `seq`), `compactions`
//! - `plans`, `plan_steps` (ordered by `position`)
//!
//! Step and status updates are read-modify-write through the core state
//! machine, serialized by a per-store write lock.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rago_core::error::StoreError;
use rago_core::message::Message;
use rago_core::plan::{Plan, PlanStatus, PlanStore, Step, StepStatus, StepUpdate};
use rago_core::session::{Compaction, Session, SessionBackend};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Open a pool with WAL journaling. In-memory databases get a single
/// connection so every query sees the same database.
pub async fn open_pool(path: &str) -> Result<SqlitePool, StoreError> {
    let url = if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite://{path}")
    };
    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
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
        .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Storage(format!("{name} column: {e}")))
}

fn storage(context: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Storage(format!("{context}: {e}"))
}

fn migration(context: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::MigrationFailed(format!("{context}: {e}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Storage(format!("encode: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Storage(format!("decode: {e}")))
}

pub struct SqliteSessionBackend {
    pool: SqlitePool,
}

impl SqliteSessionBackend {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let pool = open_pool(path).await?;
        let backend = Self::from_pool(pool).await?;
        info!("SQLite session store initialized at {path}");
        Ok(backend)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// A plan store over the same database.
    pub async fn plan_store(&self) -> Result<SqlitePlanStore, StoreError> {
        SqlitePlanStore::from_pool(self.pool.clone()).await
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id         TEXT PRIMARY KEY,
                agent_id   TEXT NOT NULL,
                summary    TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(migration("sessions table"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role       TEXT NOT NULL,
                payload    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(migration("messages table"))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, seq)")
            .execute(&self.pool)
            .await
            .map_err(migration("messages index"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS compactions (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                summary    TEXT NOT NULL,
                upto       INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(migration("compactions table"))?;

        debug!("SQLite session migrations complete");
        Ok(())
    }

    fn row_to_session(row: &SqliteRow) -> Result<Session, StoreError> {
        let created_at: String = column(row, "created_at")?;
        let updated_at: String = column(row, "updated_at")?;
        Ok(Session {
            id: column(row, "id")?,
            agent_id: column(row, "agent_id")?,
            summary: column(row, "summary")?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    async fn require(&self, id: &str) -> Result<(), StoreError> {
        let found = sqlx::query("SELECT 1 FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("session lookup"))?;
        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "session",
                id: id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl SessionBackend for SqliteSessionBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, agent_id, summary, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.agent_id)
        .bind(&session.summary)
        .bind(timestamp(&session.created_at))
        .bind(timestamp(&session.updated_at))
        .execute(&self.pool)
        .await
        .map_err(storage("create session"))?;
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get session"))?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY updated_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list sessions"))?;
        rows.iter().map(Self::row_to_session).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        for sql in [
            "DELETE FROM messages WHERE session_id = ?",
            "DELETE FROM compactions WHERE session_id = ?",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(storage("delete session data"))?;
        }
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage("delete session"))?;
        tx.commit().await.map_err(storage("commit"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn append(&self, id: &str, message: Message) -> Result<(), StoreError> {
        self.require(id).await?;
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        sqlx::query("INSERT INTO messages (session_id, role, payload) VALUES (?, ?, ?)")
            .bind(id)
            .bind(message.role.as_str())
            .bind(to_json(&message)?)
            .execute(&mut *tx)
            .await
            .map_err(storage("append message"))?;
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(timestamp(&Utc::now()))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage("touch session"))?;
        tx.commit().await.map_err(storage("commit"))?;
        Ok(())
    }

    async fn messages(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        self.require(id).await?;
        let rows = sqlx::query("SELECT payload FROM messages WHERE session_id = ? ORDER BY seq ASC")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("read messages"))?;
        rows.iter()
            .map(|row| {
                let payload: String = column(row, "payload")?;
                from_json(&payload)
            })
            .collect()
    }

    async fn save_compaction(&self, id: &str, compaction: Compaction) -> Result<(), StoreError> {
        self.require(id).await?;
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        sqlx::query("INSERT INTO compactions (session_id, summary, upto, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(&compaction.summary)
            .bind(compaction.upto as i64)
            .bind(timestamp(&compaction.created_at))
            .execute(&mut *tx)
            .await
            .map_err(storage("save compaction"))?;
        sqlx::query("UPDATE sessions SET summary = ?, updated_at = ? WHERE id = ?")
            .bind(&compaction.summary)
            .bind(timestamp(&Utc::now()))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage("update summary"))?;
        tx.commit().await.map_err(storage("commit"))?;
        Ok(())
    }

    async fn latest_compaction(&self, id: &str) -> Result<Option<Compaction>, StoreError> {
        let row = sqlx::query(
            "SELECT summary, upto, created_at FROM compactions WHERE session_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("latest compaction"))?;
        row.map(|row| {
            let upto: i64 = column(&row, "upto")?;
            let created_at: String = column(&row, "created_at")?;
            Ok(Compaction {
                summary: column(&row, "summary")?,
                upto: upto.max(0) as usize,
                created_at: parse_timestamp(&created_at),
            })
        })
        .transpose()
    }
}

pub struct SqlitePlanStore {
    pool: SqlitePool,
    writes: Mutex<()>,
}

impl SqlitePlanStore {
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let pool = open_pool(path).await?;
        let store = Self::from_pool(pool).await?;
        info!("SQLite plan store initialized at {path}");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            writes: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plans (
                id         TEXT PRIMARY KEY,
                goal       TEXT NOT NULL,
                session_id TEXT,
                status     TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(migration("plans table"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plan_steps (
                plan_id     TEXT NOT NULL,
                position    INTEGER NOT NULL,
                id          TEXT NOT NULL,
                description TEXT NOT NULL,
                tool        TEXT,
                args        TEXT NOT NULL,
                status      TEXT NOT NULL,
                result      TEXT,
                error       TEXT,
                PRIMARY KEY (plan_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(migration("plan_steps table"))?;

        debug!("SQLite plan migrations complete");
        Ok(())
    }

    fn row_to_step(row: &SqliteRow) -> Result<Step, StoreError> {
        let raw_status: String = column(row, "status")?;
        let args: String = column(row, "args")?;
        let result: Option<String> = column(row, "result")?;
        Ok(Step {
            id: column(row, "id")?,
            description: column(row, "description")?,
            tool: column(row, "tool")?,
            args: from_json(&args)?,
            status: StepStatus::parse(&raw_status)
                .ok_or_else(|| StoreError::Storage(format!("unknown step status '{raw_status}'")))?,
            result: result.as_deref().map(from_json).transpose()?,
            error: column(row, "error")?,
        })
    }

    async fn load(&self, id: &str) -> Result<Option<Plan>, StoreError> {
        let Some(row) = sqlx::query("SELECT * FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("get plan"))?
        else {
            return Ok(None);
        };

        let steps = sqlx::query("SELECT * FROM plan_steps WHERE plan_id = ? ORDER BY position ASC")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("get plan steps"))?
            .iter()
            .map(Self::row_to_step)
            .collect::<Result<Vec<_>, _>>()?;

        let raw_status: String = column(&row, "status")?;
        let created_at: String = column(&row, "created_at")?;
        let updated_at: String = column(&row, "updated_at")?;
        Ok(Some(Plan {
            id: column(&row, "id")?,
            goal: column(&row, "goal")?,
            session_id: column(&row, "session_id")?,
            steps,
            status: PlanStatus::parse(&raw_status)
                .ok_or_else(|| StoreError::Storage(format!("unknown plan status '{raw_status}'")))?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        }))
    }

    async fn require(&self, id: &str) -> Result<Plan, StoreError> {
        self.load(id).await?.ok_or_else(|| StoreError::NotFound {
            kind: "plan",
            id: id.to_string(),
        })
    }

    async fn insert_step<'c, E>(executor: E, plan_id: &str, position: usize, step: &Step) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO plan_steps (plan_id, position, id, description, tool, args, status, result, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(plan_id)
        .bind(position as i64)
        .bind(&step.id)
        .bind(&step.description)
        .bind(&step.tool)
        .bind(to_json(&step.args)?)
        .bind(step.status.as_str())
        .bind(step.result.as_ref().map(to_json).transpose()?)
        .bind(&step.error)
        .execute(executor)
        .await
        .map_err(storage("insert step"))?;
        Ok(())
    }

    async fn touch(&self, plan_id: &str, updated_at: &DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE plans SET updated_at = ? WHERE id = ?")
            .bind(timestamp(updated_at))
            .bind(plan_id)
            .execute(&self.pool)
            .await
            .map_err(storage("touch plan"))?;
        Ok(())
    }
}

#[async_trait]
impl PlanStore for SqlitePlanStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create(&self, plan: Plan) -> Result<Plan, StoreError> {
        let _guard = self.writes.lock().await;
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        sqlx::query(
            "INSERT INTO plans (id, goal, session_id, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&plan.id)
        .bind(&plan.goal)
        .bind(&plan.session_id)
        .bind(plan.status.as_str())
        .bind(timestamp(&plan.created_at))
        .bind(timestamp(&plan.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(storage("create plan"))?;
        for (position, step) in plan.steps.iter().enumerate() {
            Self::insert_step(&mut *tx, &plan.id, position, step).await?;
        }
        tx.commit().await.map_err(storage("commit"))?;
        Ok(plan)
    }

    async fn get(&self, id: &str) -> Result<Option<Plan>, StoreError> {
        self.load(id).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<Plan>, StoreError> {
        let ids: Vec<String> = sqlx::query("SELECT id FROM plans ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list plans"))?
            .iter()
            .map(|row| column(row, "id"))
            .collect::<Result<_, _>>()?;
        let mut plans = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(plan) = self.load(&id).await? {
                plans.push(plan);
            }
        }
        Ok(plans)
    }

    async fn update_step(&self, plan_id: &str, step_id: &str, update: StepUpdate) -> Result<Step, StoreError> {
        let _guard = self.writes.lock().await;
        let mut plan = self.require(plan_id).await?;
        let step = plan.apply_step_update(step_id, update)?;
        sqlx::query("UPDATE plan_steps SET status = ?, result = ?, error = ? WHERE plan_id = ? AND id = ?")
            .bind(step.status.as_str())
            .bind(step.result.as_ref().map(to_json).transpose()?)
            .bind(&step.error)
            .bind(plan_id)
            .bind(step_id)
            .execute(&self.pool)
            .await
            .map_err(storage("update step"))?;
        self.touch(plan_id, &plan.updated_at).await?;
        Ok(step)
    }

    async fn set_status(&self, plan_id: &str, status: PlanStatus) -> Result<(), StoreError> {
        let _guard = self.writes.lock().await;
        let mut plan = self.require(plan_id).await?;
        plan.apply_status(status)?;
        sqlx::query("UPDATE plans SET status = ?, updated_at = ? WHERE id = ?")
            .bind(plan.status.as_str())
            .bind(timestamp(&plan.updated_at))
            .bind(plan_id)
            .execute(&self.pool)
            .await
            .map_err(storage("set plan status"))?;
        Ok(())
    }

    async fn append_step(&self, plan_id: &str, step: Step) -> Result<Step, StoreError> {
        let _guard = self.writes.lock().await;
        let plan = self.require(plan_id).await?;
        Self::insert_step(&self.pool, plan_id, plan.steps.len(), &step).await?;
        self.touch(plan_id, &Utc::now()).await?;
        Ok(step)
    }
}
