//! The execution engine: a ReAct round loop over the federated registry.
//!
//! Each run is a spawned task that owns its working message list and
//! writes [`RunEvent`]s into a bounded channel. The task suspends only on
//! LLM requests, tool calls, and memory or store I/O; every one of those
//! races the run's [`CancellationToken`].

use crate::prompt::{self, PromptParts, TRANSFER_TOOL};
use crate::router::{RouteMatch, SemanticRouter};
use crate::stream_event::{self, EventSink, EventStream, RunEvent};
use chrono::Utc;
use rago_config::EngineConfig;
use rago_core::agent::{AgentProfile, whitelist_allows};
use rago_core::error::{Error, LlmError, ToolError};
use rago_core::event::{DomainEvent, EventBus};
use rago_core::llm::{GenerateOptions, Generation, Generator, ToolDefinition};
use rago_core::message::{Message, MessageToolCall};
use rago_core::plan::{Plan, PlanStatus, PlanStore, Step, StepUpdate};
use rago_core::tool::ToolOutput;
use rago_core::ErrorKind;
use rago_memory::MemoryService;
use rago_store::SessionManager;
use rago_tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub goal: String,
    /// Continue this session; a new one is created when absent or unknown
    pub session_id: Option<String>,
    /// Agent profile id; `default` when absent
    pub profile: Option<String>,
    pub cancel: Option<CancellationToken>,
}

impl RunRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    /// The round cap ended the run before a final answer
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub session_id: String,
    pub plan_id: String,
    pub status: RunStatus,
    pub answer: String,
    pub rounds: u32,
    pub tool_calls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A run in flight.
pub struct RunHandle {
    pub events: EventStream,
    pub cancel: CancellationToken,
    pub outcome: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Drain the event stream, then wait for the outcome.
    pub async fn finish(self) -> Result<(Vec<RunEvent>, RunOutcome), Error> {
        let events = self.events.collect().await;
        let outcome = self
            .outcome
            .await
            .map_err(|e| Error::Internal(format!("run task failed: {e}")))?;
        Ok((events, outcome))
    }
}

pub struct Engine {
    generator: Arc<dyn Generator>,
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
    plans: Arc<dyn PlanStore>,
    events: Arc<EventBus>,
    memory: Option<Arc<MemoryService>>,
    router: Option<Arc<SemanticRouter>>,
    profiles: Vec<AgentProfile>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        generator: Arc<dyn Generator>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
        plans: Arc<dyn PlanStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            generator,
            registry,
            sessions,
            plans,
            events,
            memory: None,
            router: None,
            profiles: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_router(mut self, router: Arc<SemanticRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Profiles available to runs and handoffs. A profile named `default`
    /// replaces the built-in one.
    pub fn with_profiles(mut self, profiles: Vec<AgentProfile>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profile(&self, id: &str) -> Option<AgentProfile> {
        self.profiles
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .or_else(|| (id == "default").then(AgentProfile::default_profile))
    }

    /// Every known profile, the built-in default included.
    fn all_profiles(&self) -> Vec<AgentProfile> {
        let mut all = self.profiles.clone();
        if !all.iter().any(|p| p.id == "default") {
            all.insert(0, AgentProfile::default_profile());
        }
        all
    }

    /// Start a run. Events arrive on the returned handle's stream.
    pub fn run(self: &Arc<Self>, request: RunRequest) -> RunHandle {
        self.spawn(request, None)
    }

    /// Replay a stored plan step by step.
    pub fn execute_plan(self: &Arc<Self>, plan: Plan) -> RunHandle {
        let mut request = RunRequest::new(plan.goal.clone());
        request.session_id = plan.session_id.clone();
        self.spawn(request, Some(plan))
    }

    fn spawn(self: &Arc<Self>, mut request: RunRequest, plan: Option<Plan>) -> RunHandle {
        let cancel = request.cancel.take().unwrap_or_default();
        let (sink, events) = stream_event::channel(self.config.event_buffer);
        let engine = Arc::clone(self);
        let token = cancel.clone();
        let outcome = tokio::spawn(async move { engine.drive(request, plan, sink, token).await });
        RunHandle {
            events,
            cancel,
            outcome,
        }
    }

    /// Ask the LLM for a plan and store it without executing anything.
    pub async fn plan(&self, goal: &str, session_id: Option<&str>) -> Result<Plan, Error> {
        let catalog = self.registry.definitions(&[]);
        let generation = self
            .generator
            .generate_structured(
                &prompt::plan_prompt(goal, &catalog),
                &prompt::plan_schema(),
                &GenerateOptions::default().with_temperature(0.2),
            )
            .await?;
        let draft: PlanDraft = serde_json::from_value(generation.parsed)?;
        let steps: Vec<Step> = draft
            .steps
            .into_iter()
            .filter(|s| !s.description.trim().is_empty())
            .map(|s| {
                let tool = s.tool.filter(|t| !t.trim().is_empty());
                Step::new(s.description, tool, s.args.unwrap_or_else(|| json!({})))
            })
            .collect();
        if steps.is_empty() {
            return Err(LlmError::InvalidResponse("plan has no steps".into()).into());
        }

        let plan = Plan::new(goal)
            .with_session(session_id.map(String::from))
            .with_steps(steps);
        let plan = self.plans.create(plan).await?;
        info!(plan_id = %plan.id, steps = plan.steps.len(), "Plan created");
        Ok(plan)
    }

    async fn drive(
        self: Arc<Self>,
        request: RunRequest,
        plan: Option<Plan>,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let run_id = Uuid::new_v4().to_string();
        sink.emit(RunEvent::Start {
            run_id: run_id.clone(),
            content: request.goal.clone(),
        })
        .await;
        info!(run_id = %run_id, goal = %request.goal, "Run started");

        let steps = plan.as_ref().map(|p| p.steps.clone());
        let mut run = match Run::prepare(Arc::clone(&self), run_id.clone(), &request, plan, sink.clone(), cancel).await {
            Ok(run) => run,
            Err(halt) => {
                let error = halt.into_error();
                sink.emit(terminal_error(None, None, &error)).await;
                warn!(run_id = %run_id, "Run failed before the first round: {error}");
                let outcome = RunOutcome {
                    run_id,
                    session_id: request.session_id.unwrap_or_default(),
                    plan_id: String::new(),
                    status: if matches!(error, Error::Cancelled) {
                        RunStatus::Cancelled
                    } else {
                        RunStatus::Failed
                    },
                    answer: String::new(),
                    rounds: 0,
                    tool_calls: 0,
                    error: Some(error.to_string()),
                };
                self.publish_finished(&outcome);
                return outcome;
            }
        };

        let result = match steps {
            None => run.react().await,
            Some(steps) => run.replay(steps).await,
        };
        let outcome = run.finish(result).await;
        self.publish_finished(&outcome);
        info!(
            run_id = %outcome.run_id,
            status = outcome.status.as_str(),
            rounds = outcome.rounds,
            tool_calls = outcome.tool_calls,
            "Run finished"
        );
        outcome
    }

    fn publish_finished(&self, outcome: &RunOutcome) {
        self.events.publish(DomainEvent::RunFinished {
            run_id: outcome.run_id.clone(),
            session_id: outcome.session_id.clone(),
            status: outcome.status.as_str().into(),
            rounds: outcome.rounds,
            timestamp: Utc::now(),
        });
    }
}

#[derive(Deserialize)]
struct PlanDraft {
    #[serde(default)]
    steps: Vec<StepDraft>,
}

#[derive(Deserialize)]
struct StepDraft {
    #[serde(default)]
    description: String,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<Value>,
}

/// Why a run stopped early.
enum Halt {
    Cancelled,
    Fatal(Error),
}

impl Halt {
    fn into_error(self) -> Error {
        match self {
            Self::Cancelled => Error::Cancelled,
            Self::Fatal(e) => e,
        }
    }
}

impl From<Error> for Halt {
    fn from(e: Error) -> Self {
        Self::Fatal(e)
    }
}

struct Finish {
    answer: String,
    partial: bool,
    /// A plan step failed; the run still answers but the plan is failed
    step_failed: bool,
}

/// Race `fut` against cancellation.
async fn guarded<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Halt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Halt::Cancelled),
        out = fut => Ok(out),
    }
}

fn terminal_error(round: Option<u32>, call: Option<&MessageToolCall>, error: &Error) -> RunEvent {
    RunEvent::Error {
        round,
        call_id: call.map(|c| c.id.clone()),
        tool_name: call.map(|c| c.name.clone()),
        kind: error.kind().as_str().into(),
        error: error.to_string(),
        recoverable: false,
    }
}

fn call_id(id: String) -> String {
    if id.is_empty() {
        format!("call_{}", &Uuid::new_v4().simple().to_string()[..12])
    } else {
        id
    }
}

/// Per-run state. Lives inside the spawned task only.
struct Run {
    engine: Arc<Engine>,
    sink: EventSink,
    cancel: CancellationToken,
    run_id: String,
    session_id: String,
    plan_id: String,
    goal: String,
    profile: AgentProfile,
    route: Option<RouteMatch>,
    memory_block: String,
    messages: Vec<Message>,
    goal_index: usize,
    round: u32,
    tool_calls: u32,
    handoffs: u32,
    last_text: String,
    log: String,
    /// The call in flight when the run was cancelled
    interrupted: Option<MessageToolCall>,
    deadline: Instant,
    round_deadline: Instant,
}

impl Run {
    async fn prepare(
        engine: Arc<Engine>,
        run_id: String,
        request: &RunRequest,
        plan: Option<Plan>,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<Self, Halt> {
        let profile_id = request.profile.as_deref().unwrap_or("default");
        let profile = engine.profile(profile_id).ok_or_else(|| Error::Config {
            message: format!("unknown agent profile '{profile_id}'"),
        })?;

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        guarded(&cancel, engine.sessions.get_or_create(&session_id, &profile.id))
            .await?
            .map_err(Error::from)?;

        let plan = match plan {
            Some(plan) => plan,
            None => {
                let plan = Plan::new(&request.goal).with_session(Some(session_id.clone()));
                guarded(&cancel, engine.plans.create(plan)).await?.map_err(Error::from)?
            }
        };
        guarded(&cancel, engine.plans.set_status(&plan.id, PlanStatus::Running))
            .await?
            .map_err(Error::from)?;

        let route = match &engine.router {
            Some(router) => guarded(&cancel, router.route(&request.goal)).await?,
            None => None,
        };
        if let Some(route) = &route {
            info!(run_id = %run_id, intent = %route.intent, score = route.score, "Goal routed");
        }

        let memory_block = match &engine.memory {
            Some(memory) => match guarded(&cancel, memory.retrieve(&request.goal, Some(&session_id))).await? {
                Ok(retrieved) => retrieved.context,
                Err(e) => {
                    warn!(run_id = %run_id, "Memory retrieval failed: {e}");
                    String::new()
                }
            },
            None => String::new(),
        };

        let history = guarded(&cancel, engine.sessions.context(&session_id))
            .await?
            .map_err(Error::from)?;
        guarded(&cancel, engine.sessions.append(&session_id, Message::user(&request.goal)))
            .await?
            .map_err(Error::from)?;

        let now = Instant::now();
        let config = &engine.config;
        let budget = Duration::from_secs(config.round_timeout_secs)
            .saturating_mul(config.round_cap.max(1))
            .min(Duration::from_secs(config.run_ceiling_secs));

        let mut run = Self {
            engine,
            sink,
            cancel,
            run_id,
            session_id,
            plan_id: plan.id,
            goal: request.goal.clone(),
            profile,
            route,
            memory_block,
            messages: Vec::new(),
            goal_index: 0,
            round: 0,
            tool_calls: 0,
            handoffs: 0,
            last_text: String::new(),
            log: String::new(),
            interrupted: None,
            deadline: now + budget,
            round_deadline: now + budget,
        };
        run.messages = prompt::initial_messages(run.system_prompt(), history, &request.goal);
        run.goal_index = run.messages.len() - 1;
        Ok(run)
    }

    fn system_prompt(&self) -> String {
        let targets = if self.engine.profiles.is_empty() {
            Vec::new()
        } else {
            self.engine.all_profiles()
        };
        prompt::system_prompt(&PromptParts {
            profile: &self.profile,
            route: self.route.as_ref(),
            memory: &self.memory_block,
            handoff_targets: &targets,
        })
    }

    fn can_hand_off(&self) -> bool {
        !self.engine.profiles.is_empty() && self.handoffs < self.engine.config.handoff_cap
    }

    /// The profile whitelist and the routed intent's subset both apply to
    /// dispatch, not only to the offered catalog.
    fn allows(&self, tool: &str) -> bool {
        self.profile.allows(tool)
            && self
                .route
                .as_ref()
                .is_none_or(|route| whitelist_allows(&route.tools, tool))
    }

    /// Descriptors offered this round: the profile whitelist, narrowed by
    /// the routed intent, or just `only` when a plan step pins the tool.
    fn catalog(&self, only: Option<&str>) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .engine
            .registry
            .definitions(&self.profile.tools)
            .into_iter()
            .filter(|def| match &self.route {
                Some(route) => whitelist_allows(&route.tools, &def.name),
                None => true,
            })
            .collect();
        if let Some(only) = only {
            tools.retain(|def| def.name == only);
            return tools;
        }
        if self.can_hand_off() {
            tools.push(prompt::handoff_tool(&self.engine.all_profiles(), &self.profile.id));
        }
        tools
    }

    async fn begin_round(&mut self) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        let now = Instant::now();
        if now >= self.deadline {
            return Err(Halt::Fatal(Error::Internal("run exceeded its time ceiling".into())));
        }
        self.round += 1;
        self.round_deadline = (now + Duration::from_secs(self.engine.config.round_timeout_secs)).min(self.deadline);
        debug!(run_id = %self.run_id, round = self.round, "Round started");
        self.sink.emit(RunEvent::Thinking { round: self.round }).await;
        Ok(())
    }

    /// One LLM decision, retried once on a shorter history.
    async fn decide(&mut self, tools: &[ToolDefinition]) -> Result<Generation, Halt> {
        let first = self.generate(&self.messages, tools).await;
        match first {
            Err(Halt::Fatal(Error::Llm(e))) => {
                warn!(run_id = %self.run_id, round = self.round, "LLM call failed, retrying with truncated history: {e}");
                // A timed-out first attempt used up the round; the retry gets its own.
                self.round_deadline =
                    (Instant::now() + Duration::from_secs(self.engine.config.round_timeout_secs)).min(self.deadline);
                let shorter =
                    prompt::truncate_for_retry(&self.messages, self.goal_index, self.engine.config.llm_retry_history);
                self.generate(&shorter, tools).await
            }
            other => other,
        }
    }

    async fn generate(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Generation, Halt> {
        let opts = GenerateOptions::default();
        let work = async {
            let mut chunks = self.engine.generator.stream_with_tools(messages, tools, &opts).await?;
            let mut generation = Generation::default();
            while let Some(chunk) = chunks.recv().await {
                let chunk = chunk?;
                if !chunk.delta.is_empty() {
                    self.sink
                        .emit(RunEvent::Partial {
                            round: self.round,
                            content: chunk.delta.clone(),
                        })
                        .await;
                    generation.text.push_str(&chunk.delta);
                }
                generation.tool_calls.extend(chunk.tool_calls);
                if chunk.done {
                    break;
                }
            }
            Ok::<_, LlmError>(generation)
        };

        let budget = self.round_deadline.saturating_duration_since(Instant::now());
        match guarded(&self.cancel, tokio::time::timeout_at(self.round_deadline, work)).await? {
            Ok(Ok(generation)) => Ok(generation),
            Ok(Err(e)) => Err(Halt::Fatal(e.into())),
            Err(_) => Err(Halt::Fatal(LlmError::Timeout(budget.as_millis() as u64).into())),
        }
    }

    async fn react(&mut self) -> Result<Finish, Halt> {
        let cap = self.engine.config.round_cap;
        loop {
            if self.round >= cap {
                warn!(run_id = %self.run_id, rounds = self.round, "Round cap reached");
                return Ok(self.partial_finish());
            }
            self.begin_round().await?;

            let tools = self.catalog(None);
            let generation = self.decide(&tools).await?;
            if generation.tool_calls.is_empty() {
                return Ok(Finish {
                    answer: generation.text,
                    partial: false,
                    step_failed: false,
                });
            }
            self.act(generation).await?;
        }
    }

    fn partial_finish(&self) -> Finish {
        let answer = if self.last_text.trim().is_empty() {
            format!(
                "Stopped after {} rounds without a final answer.",
                self.engine.config.round_cap
            )
        } else {
            self.last_text.clone()
        };
        Finish {
            answer,
            partial: true,
            step_failed: false,
        }
    }

    /// Run the round's tool calls in order. After a failure the remaining
    /// calls are skipped; their observations say so.
    async fn act(&mut self, generation: Generation) -> Result<(), Halt> {
        if !generation.text.trim().is_empty() {
            self.last_text = generation.text.clone();
        }
        let calls: Vec<MessageToolCall> = generation
            .tool_calls
            .into_iter()
            .map(|c| MessageToolCall {
                id: call_id(c.id),
                name: c.name,
                arguments: c.arguments,
            })
            .collect();
        self.push(Message::assistant_tool_calls(generation.text, calls.clone())).await;

        let mut failed = false;
        for call in calls {
            if failed {
                self.skip(&call).await;
                continue;
            }
            if call.name == TRANSFER_TOOL {
                let observation = self.hand_off(&call).await;
                self.push(Message::tool_result(&call.id, observation)).await;
                continue;
            }
            if self.dispatch(&call, None).await?.is_err() {
                failed = true;
            }
        }
        Ok(())
    }

    /// Dispatch one call through the registry and record its observation.
    /// The inner result is the tool's; the outer one stops the run.
    async fn dispatch(
        &mut self,
        call: &MessageToolCall,
        step_id: Option<&str>,
    ) -> Result<Result<ToolOutput, ToolError>, Halt> {
        self.tool_calls += 1;
        self.sink
            .emit(RunEvent::ToolCall {
                round: self.round,
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                tool_args: call.arguments.clone(),
            })
            .await;

        let step_id = match step_id {
            Some(id) => Some(id.to_string()),
            None => self.record_step(call).await,
        };
        if let Some(step) = &step_id {
            self.update_step(step, StepUpdate::running()).await;
        }

        let result = if !self.allows(&call.name) {
            debug!(run_id = %self.run_id, profile = %self.profile.id, tool = %call.name, "Tool outside the active whitelist");
            Err(ToolError::NotFound(call.name.clone()))
        } else {
            let limit = Duration::from_secs(self.engine.config.tool_timeout_secs)
                .min(self.round_deadline.saturating_duration_since(Instant::now()));
            let registry = Arc::clone(&self.engine.registry);
            let pending = tokio::time::timeout(limit, registry.call(&call.name, call.arguments.clone()));
            match guarded(&self.cancel, pending).await {
                Err(halt) => {
                    if let Some(step) = &step_id {
                        self.update_step(step, StepUpdate::failed("cancelled")).await;
                    }
                    self.record(Message::tool_result(&call.id, "Cancelled")).await;
                    self.interrupted = Some(call.clone());
                    return Err(halt);
                }
                Ok(Err(_)) => Err(ToolError::Timeout {
                    tool: call.name.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }),
                Ok(Ok(result)) => result,
            }
        };

        match &result {
            Ok(output) => {
                debug!(run_id = %self.run_id, tool = %call.name, "Tool call succeeded");
                self.sink
                    .emit(RunEvent::ToolResult {
                        round: self.round,
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        content: output.text.clone(),
                        success: true,
                    })
                    .await;
                if let Some(step) = &step_id {
                    let value = output.data.clone().unwrap_or_else(|| Value::String(output.text.clone()));
                    self.update_step(step, StepUpdate::completed(value)).await;
                }
                self.log.push_str(&format!(
                    "round {}: {}({}) -> {}\n",
                    self.round, call.name, call.arguments, output.text
                ));
                self.push(Message::tool_result(&call.id, &output.text)).await;
            }
            Err(e) => {
                warn!(run_id = %self.run_id, tool = %call.name, "Tool call failed: {e}");
                let event = if e.kind() == ErrorKind::Transport {
                    RunEvent::ToolResult {
                        round: self.round,
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        content: e.to_string(),
                        success: false,
                    }
                } else {
                    RunEvent::Error {
                        round: Some(self.round),
                        call_id: Some(call.id.clone()),
                        tool_name: Some(call.name.clone()),
                        kind: e.kind().as_str().into(),
                        error: e.to_string(),
                        recoverable: true,
                    }
                };
                self.sink.emit(event).await;
                if let Some(step) = &step_id {
                    self.update_step(step, StepUpdate::failed(e.to_string())).await;
                }
                self.log.push_str(&format!(
                    "round {}: {}({}) failed: {e}\n",
                    self.round, call.name, call.arguments
                ));
                self.push(Message::tool_result(&call.id, format!("Error: {e}"))).await;
            }
        }
        Ok(result)
    }

    async fn skip(&mut self, call: &MessageToolCall) {
        if let Some(step) = self.record_step(call).await {
            self.update_step(&step, StepUpdate::skipped()).await;
        }
        self.push(Message::tool_result(
            &call.id,
            "Skipped: an earlier tool call in this round failed.",
        ))
        .await;
    }

    async fn hand_off(&mut self, call: &MessageToolCall) -> String {
        let target = call
            .arguments
            .get("agent")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !self.can_hand_off() {
            return format!(
                "Handoff refused: the limit of {} handoffs per run is reached.",
                self.engine.config.handoff_cap
            );
        }
        let Some(profile) = self.engine.profile(&target) else {
            return format!("Handoff refused: unknown agent '{target}'.");
        };
        if profile.id == self.profile.id {
            return format!("You already are agent '{target}'.");
        }

        self.handoffs += 1;
        let from = std::mem::replace(&mut self.profile, profile);
        info!(run_id = %self.run_id, from = %from.id, to = %target, "Handoff");
        self.sink
            .emit(RunEvent::Handoff {
                round: self.round,
                from: from.id,
                content: target.clone(),
            })
            .await;
        let system = self.system_prompt();
        prompt::swap_system(&mut self.messages, system);
        format!("Transferred to agent '{target}'.")
    }

    /// Drive the loop through a stored plan: one round per step, with the
    /// step's tool as the only one offered, then one round for the answer.
    async fn replay(&mut self, steps: Vec<Step>) -> Result<Finish, Halt> {
        let cap = self.engine.config.round_cap;
        let total = steps.len();
        let mut failure: Option<ToolError> = None;
        let mut stopped = false;

        for (index, step) in steps.iter().enumerate() {
            if step.status.is_terminal() {
                continue;
            }
            if failure.is_some() || stopped || self.round >= cap {
                stopped = failure.is_none();
                self.update_step(&step.id, StepUpdate::skipped()).await;
                continue;
            }
            self.begin_round().await?;
            self.messages
                .push(Message::user(prompt::step_instruction(index, total, step)));

            match &step.tool {
                Some(tool) => {
                    let tools = self.catalog(Some(tool));
                    let generation = self.decide(&tools).await?;
                    if !generation.text.trim().is_empty() {
                        self.last_text = generation.text.clone();
                    }
                    let proposed = generation.tool_calls.into_iter().find(|c| &c.name == tool);
                    let call = match proposed {
                        Some(c) => MessageToolCall {
                            id: call_id(c.id),
                            name: c.name,
                            arguments: c.arguments,
                        },
                        None => MessageToolCall {
                            id: call_id(String::new()),
                            name: tool.clone(),
                            arguments: step.args.clone(),
                        },
                    };
                    self.push(Message::assistant_tool_calls(generation.text, vec![call.clone()]))
                        .await;
                    if let Err(e) = self.dispatch(&call, Some(&step.id)).await? {
                        failure = Some(e);
                    }
                }
                None => {
                    self.update_step(&step.id, StepUpdate::running()).await;
                    let generation = self.decide(&[]).await?;
                    self.last_text = generation.text.clone();
                    self.update_step(&step.id, StepUpdate::completed(Value::String(generation.text.clone())))
                        .await;
                    self.push(Message::assistant(generation.text)).await;
                }
            }
        }

        let step_failed = failure.is_some();
        if let Some(error) = &failure {
            warn!(run_id = %self.run_id, "Plan step failed, later steps skipped: {error}");
        }
        if stopped || self.round >= cap {
            return Ok(Finish {
                step_failed,
                ..self.partial_finish()
            });
        }

        self.begin_round().await?;
        let instruction = if step_failed {
            prompt::FAILED_STEP_INSTRUCTION
        } else {
            prompt::FINAL_INSTRUCTION
        };
        self.messages.push(Message::user(instruction));
        let generation = self.decide(&[]).await?;
        Ok(Finish {
            answer: generation.text,
            partial: false,
            step_failed,
        })
    }

    async fn finish(mut self, result: Result<Finish, Halt>) -> RunOutcome {
        let (status, answer, error) = match result {
            Ok(finish) => {
                let mut message = Message::assistant(&finish.answer);
                if finish.partial {
                    message = message.with_flag("partial");
                }
                self.record(message).await;
                let plan_status = if finish.step_failed {
                    PlanStatus::Failed
                } else {
                    PlanStatus::Completed
                };
                self.set_plan_status(plan_status).await;
                self.sink
                    .emit(RunEvent::Complete {
                        content: finish.answer.clone(),
                        partial: finish.partial,
                        rounds: self.round,
                    })
                    .await;
                self.write_back(&finish.answer).await;
                let status = if finish.partial {
                    RunStatus::Partial
                } else {
                    RunStatus::Completed
                };
                (status, finish.answer, None)
            }
            Err(halt) => {
                let error = halt.into_error();
                let status = if matches!(error, Error::Cancelled) {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                warn!(run_id = %self.run_id, status = status.as_str(), "Run stopped: {error}");
                self.record(Message::assistant(&self.last_text).with_flag("incomplete"))
                    .await;
                self.set_plan_status(PlanStatus::Failed).await;
                let interrupted = self.interrupted.take();
                self.sink
                    .emit(terminal_error(Some(self.round), interrupted.as_ref(), &error))
                    .await;
                (status, self.last_text.clone(), Some(error.to_string()))
            }
        };

        RunOutcome {
            run_id: self.run_id,
            session_id: self.session_id,
            plan_id: self.plan_id,
            status,
            answer,
            rounds: self.round,
            tool_calls: self.tool_calls,
            error,
        }
    }

    async fn write_back(&self, answer: &str) {
        let Some(memory) = &self.engine.memory else {
            return;
        };
        match memory
            .store_if_worthwhile(&self.goal, answer, &self.log, Some(&self.session_id))
            .await
        {
            Ok(stored) if !stored.is_empty() => {
                debug!(run_id = %self.run_id, count = stored.len(), "Stored memories from run");
            }
            Ok(_) => {}
            Err(e) => warn!(run_id = %self.run_id, "Memory write-back failed: {e}"),
        }
    }

    /// Append to the working list and the session log.
    async fn push(&mut self, message: Message) {
        self.record(message.clone()).await;
        self.messages.push(message);
    }

    async fn record(&self, message: Message) {
        if let Err(e) = self.engine.sessions.append(&self.session_id, message).await {
            warn!(run_id = %self.run_id, session = %self.session_id, "Session append failed: {e}");
        }
    }

    async fn record_step(&self, call: &MessageToolCall) -> Option<String> {
        let step = Step::new(format!("Call {}", call.name), Some(call.name.clone()), call.arguments.clone());
        match self.engine.plans.append_step(&self.plan_id, step).await {
            Ok(step) => Some(step.id),
            Err(e) => {
                warn!(run_id = %self.run_id, plan = %self.plan_id, "Recording plan step failed: {e}");
                None
            }
        }
    }

    async fn update_step(&self, step_id: &str, update: StepUpdate) {
        if let Err(e) = self.engine.plans.update_step(&self.plan_id, step_id, update).await {
            warn!(run_id = %self.run_id, plan = %self.plan_id, "Plan step update failed: {e}");
        }
    }

    async fn set_plan_status(&self, status: PlanStatus) {
        if let Err(e) = self.engine.plans.set_status(&self.plan_id, status).await {
            warn!(run_id = %self.run_id, plan = %self.plan_id, "Plan status update failed: {e}");
        }
    }
}
