//! Plans, steps, and the step state machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// pending → running → completed | failed | skipped, plus pending → skipped.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Skipped) | (Running, Completed) | (Running, Failed) | (Running, Skipped)
        )
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,

    /// Federated tool name, if the step calls one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Argument template
    #[serde(default)]
    pub args: Value,

    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Step {
    pub fn new(description: impl Into<String>, tool: Option<String>, args: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            tool,
            args,
            status: StepStatus::Pending,
            result: None,
            error: None,
        }
    }
}

/// A requested change to a step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepUpdate {
    pub status: StepStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl StepUpdate {
    pub fn running() -> Self {
        Self {
            status: StepStatus::Running,
            result: None,
            error: None,
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: StepStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: StepStatus::Skipped,
            result: None,
            error: None,
        }
    }
}

/// The decomposition of a goal into steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub steps: Vec<Step>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            session_id: None,
            steps: Vec::new(),
            status: PlanStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Apply `update` to step `step_id`, enforcing the state machine.
    pub fn apply_step_update(
        &mut self,
        step_id: &str,
        update: StepUpdate,
    ) -> std::result::Result<Step, StoreError> {
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "step",
                id: step_id.to_string(),
            })?;

        if !step.status.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                subject: format!("step {step_id}"),
                from: step.status.as_str().into(),
                to: update.status.as_str().into(),
            });
        }

        step.status = update.status;
        if update.result.is_some() {
            step.result = update.result;
        }
        if update.error.is_some() {
            step.error = update.error;
        }
        self.updated_at = Utc::now();
        Ok(step.clone())
    }

    /// Set the plan status. Terminal statuses are final.
    pub fn apply_status(&mut self, status: PlanStatus) -> std::result::Result<(), StoreError> {
        if self.status.is_terminal() && self.status != status {
            return Err(StoreError::InvalidTransition {
                subject: format!("plan {}", self.id),
                from: self.status.as_str().into(),
                to: status.as_str().into(),
            });
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Durable storage for plans.
#[async_trait]
pub trait PlanStore: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self, plan: Plan) -> std::result::Result<Plan, StoreError>;

    async fn get(&self, id: &str) -> std::result::Result<Option<Plan>, StoreError>;

    /// Most recent first.
    async fn list(&self, limit: usize) -> std::result::Result<Vec<Plan>, StoreError>;

    async fn update_step(
        &self,
        plan_id: &str,
        step_id: &str,
        update: StepUpdate,
    ) -> std::result::Result<Step, StoreError>;

    async fn set_status(
        &self,
        plan_id: &str,
        status: PlanStatus,
    ) -> std::result::Result<(), StoreError>;

    async fn append_step(&self, plan_id: &str, step: Step) -> std::result::Result<Step, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with_step() -> (Plan, String) {
        let step = Step::new("list files", Some("mcp_fs_ls".into()), serde_json::json!({"path": "/"}));
        let id = step.id.clone();
        (Plan::new("tidy up").with_steps(vec![step]), id)
    }

    #[test]
    fn step_advances_monotonically() {
        let (mut plan, id) = plan_with_step();
        plan.apply_step_update(&id, StepUpdate::running()).unwrap();
        let step = plan
            .apply_step_update(&id, StepUpdate::completed(serde_json::json!("ok")))
            .unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.result, Some(serde_json::json!("ok")));

        let err = plan.apply_step_update(&id, StepUpdate::running()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn pending_can_be_skipped_but_not_completed() {
        let (mut plan, id) = plan_with_step();
        assert!(plan
            .apply_step_update(&id, StepUpdate::completed(Value::Null))
            .is_err());
        plan.apply_step_update(&id, StepUpdate::skipped()).unwrap();
        assert_eq!(plan.steps[0].status, StepStatus::Skipped);
    }

    #[test]
    fn unknown_step_is_not_found() {
        let (mut plan, _) = plan_with_step();
        let err = plan.apply_step_update("nope", StepUpdate::running()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "step", .. }));
    }

    #[test]
    fn terminal_plan_status_is_final() {
        let mut plan = Plan::new("g");
        plan.apply_status(PlanStatus::Running).unwrap();
        plan.apply_status(PlanStatus::Failed).unwrap();
        assert!(plan.apply_status(PlanStatus::Completed).is_err());
        assert!(plan.apply_status(PlanStatus::Failed).is_ok());
    }

    #[test]
    fn every_terminal_status_is_closed() {
        use StepStatus::*;
        for from in [Completed, Failed, Skipped] {
            for to in [Pending, Running, Completed, Failed, Skipped] {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
            }
        }
    }
}
