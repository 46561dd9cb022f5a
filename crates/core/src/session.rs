//! Session domain types and the storage seam.
//!
//! A session's message log only grows. Compaction is recorded next to the
//! log as `{summary, upto}` and applied when the context is read, so the
//! raw messages stay on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::error::StoreError;
use crate::message::Message;

/// A conversation that outlives individual runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Latest compaction summary, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Session {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            created_at: now,
            updated_at: now,
            summary: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// A compaction record: `summary` replaces raw messages `[0, upto)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compaction {
    pub summary: String,
    pub upto: usize,
    pub created_at: DateTime<Utc>,
}

impl Compaction {
    pub fn new(summary: impl Into<String>, upto: usize) -> Self {
        Self {
            summary: summary.into(),
            upto,
            created_at: Utc::now(),
        }
    }

    /// Apply this compaction to a raw log: the summary message followed by
    /// every message from `upto` on, in original order.
    pub fn project(&self, raw: Vec<Message>) -> Vec<Message> {
        let mut out = Vec::with_capacity(raw.len().saturating_sub(self.upto) + 1);
        out.push(Message::summary(format!(
            "Summary of the earlier conversation:\n{}",
            self.summary
        )));
        out.extend(raw.into_iter().skip(self.upto));
        out
    }
}

/// Durable storage for sessions, their message logs, and compactions.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self, session: Session) -> std::result::Result<Session, StoreError>;

    async fn get(&self, id: &str) -> std::result::Result<Option<Session>, StoreError>;

    /// Most recently updated first.
    async fn list(&self, limit: usize) -> std::result::Result<Vec<Session>, StoreError>;

    /// Delete the session, its messages, and its compactions.
    async fn delete(&self, id: &str) -> std::result::Result<bool, StoreError>;

    /// Append to the log. Fails with `NotFound` for an unknown session.
    async fn append(&self, id: &str, message: Message) -> std::result::Result<(), StoreError>;

    /// The raw log in append order.
    async fn messages(&self, id: &str) -> std::result::Result<Vec<Message>, StoreError>;

    /// Record a compaction; the latest one is used for projection.
    async fn save_compaction(
        &self,
        id: &str,
        compaction: Compaction,
    ) -> std::result::Result<(), StoreError>;

    async fn latest_compaction(
        &self,
        id: &str,
    ) -> std::result::Result<Option<Compaction>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_keeps_suffix_order() {
        let raw: Vec<Message> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        let projected = Compaction::new("talked about m0..m2", 3).project(raw.clone());

        assert_eq!(projected.len(), 3);
        assert!(projected[0].has_flag("summary"));
        assert!(projected[0].content.contains("talked about"));
        let suffix: Vec<&str> = projected[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(suffix, ["m3", "m4"]);
        assert_eq!(projected[1].id, raw[3].id);
    }

    #[test]
    fn projection_past_end_is_summary_only() {
        let raw = vec![Message::user("only")];
        let projected = Compaction::new("s", 10).project(raw);
        assert_eq!(projected.len(), 1);
    }
}
