//! In-memory session and plan backends.
//!
//! Each record sits behind its own short-held mutex; the outer map lock is
//! only held long enough to find or insert the record.

use async_trait::async_trait;
use chrono::Utc;
use rago_core::error::StoreError;
use rago_core::message::Message;
use rago_core::plan::{Plan, PlanStatus, PlanStore, Step, StepUpdate};
use rago_core::session::{Compaction, Session, SessionBackend};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

struct SessionRecord {
    session: Session,
    messages: Vec<Message>,
    compactions: Vec<Compaction>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Default)]
pub struct InMemorySessionBackend {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionRecord>>>>,
}

impl InMemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: &str) -> Result<Arc<Mutex<SessionRecord>>, StoreError> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "session",
                id: id.to_string(),
            })
    }
}

#[async_trait]
impl SessionBackend for InMemorySessionBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Storage(format!("session {} already exists", session.id)));
        }
        sessions.insert(
            session.id.clone(),
            Arc::new(Mutex::new(SessionRecord {
                session: session.clone(),
                messages: Vec::new(),
                compactions: Vec::new(),
            })),
        );
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.record(id).ok().map(|r| lock(&r).session.clone()))
    }

    async fn list(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        let records: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        let mut sessions: Vec<Session> = records.iter().map(|r| lock(r).session.clone()).collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)
            .is_some())
    }

    async fn append(&self, id: &str, message: Message) -> Result<(), StoreError> {
        let record = self.record(id)?;
        let mut record = lock(&record);
        record.messages.push(message);
        record.session.updated_at = Utc::now();
        Ok(())
    }

    async fn messages(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        let record = self.record(id)?;
        let messages = lock(&record).messages.clone();
        Ok(messages)
    }

    async fn save_compaction(&self, id: &str, compaction: Compaction) -> Result<(), StoreError> {
        let record = self.record(id)?;
        let mut record = lock(&record);
        record.session.summary = Some(compaction.summary.clone());
        record.session.updated_at = Utc::now();
        record.compactions.push(compaction);
        Ok(())
    }

    async fn latest_compaction(&self, id: &str) -> Result<Option<Compaction>, StoreError> {
        let record = self.record(id)?;
        let latest = lock(&record).compactions.last().cloned();
        Ok(latest)
    }
}

#[derive(Default)]
pub struct InMemoryPlanStore {
    plans: RwLock<HashMap<String, Arc<Mutex<Plan>>>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn plan(&self, id: &str) -> Result<Arc<Mutex<Plan>>, StoreError> {
        self.plans
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "plan",
                id: id.to_string(),
            })
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, plan: Plan) -> Result<Plan, StoreError> {
        self.plans
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(plan.id.clone(), Arc::new(Mutex::new(plan.clone())));
        Ok(plan)
    }

    async fn get(&self, id: &str) -> Result<Option<Plan>, StoreError> {
        Ok(self.plan(id).ok().map(|p| lock(&p).clone()))
    }

    async fn list(&self, limit: usize) -> Result<Vec<Plan>, StoreError> {
        let records: Vec<_> = self
            .plans
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        let mut plans: Vec<Plan> = records.iter().map(|p| lock(p).clone()).collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        plans.truncate(limit);
        Ok(plans)
    }

    async fn update_step(&self, plan_id: &str, step_id: &str, update: StepUpdate) -> Result<Step, StoreError> {
        let plan = self.plan(plan_id)?;
        let mut plan = lock(&plan);
        plan.apply_step_update(step_id, update)
    }

    async fn set_status(&self, plan_id: &str, status: PlanStatus) -> Result<(), StoreError> {
        let plan = self.plan(plan_id)?;
        let mut plan = lock(&plan);
        plan.apply_status(status)
    }

    async fn append_step(&self, plan_id: &str, step: Step) -> Result<Step, StoreError> {
        let plan = self.plan(plan_id)?;
        let mut plan = lock(&plan);
        plan.steps.push(step.clone());
        plan.updated_at = Utc::now();
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rago_core::plan::StepStatus;

    #[tokio::test]
    async fn append_requires_session() {
        let backend = InMemorySessionBackend::new();
        let err = backend.append("nope", Message::user("hi")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "session", .. }));

        let session = backend.create(Session::new("default")).await.unwrap();
        backend.append(&session.id, Message::user("a")).await.unwrap();
        backend.append(&session.id, Message::assistant("b")).await.unwrap();
        let contents: Vec<String> = backend
            .messages(&session.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["a", "b"]);
    }

    #[tokio::test]
    async fn compaction_records_summary() {
        let backend = InMemorySessionBackend::new();
        let session = backend.create(Session::new("default")).await.unwrap();
        backend.save_compaction(&session.id, Compaction::new("first", 2)).await.unwrap();
        backend.save_compaction(&session.id, Compaction::new("second", 4)).await.unwrap();

        assert_eq!(backend.latest_compaction(&session.id).await.unwrap().unwrap().upto, 4);
        assert_eq!(backend.get(&session.id).await.unwrap().unwrap().summary.as_deref(), Some("second"));
        assert!(backend.delete(&session.id).await.unwrap());
        assert!(backend.get(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn plan_steps_follow_state_machine() {
        let store = InMemoryPlanStore::new();
        let plan = store.create(Plan::new("tidy")).await.unwrap();
        let step = store
            .append_step(&plan.id, Step::new("ls", Some("mcp_fs_ls".into()), serde_json::json!({})))
            .await
            .unwrap();

        store.update_step(&plan.id, &step.id, StepUpdate::running()).await.unwrap();
        store.update_step(&plan.id, &step.id, StepUpdate::failed("boom")).await.unwrap();
        let err = store.update_step(&plan.id, &step.id, StepUpdate::running()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let stored = store.get(&plan.id).await.unwrap().unwrap();
        assert_eq!(stored.steps[0].status, StepStatus::Failed);
        assert_eq!(stored.steps[0].error.as_deref(), Some("boom"));
        assert!(store.set_status("missing", PlanStatus::Failed).await.is_err());
    }
}
