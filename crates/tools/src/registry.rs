//! Tool Federation Registry.
//!
//! One routing table for every provider. Imports and removals take the
//! write lock; `call` clones its route out under the read lock and drops
//! it before dispatching, so provider calls never block each other.
//!
//! `call` pipeline: resolve (with on-demand server start), validate,
//! cache lookup, rate limit, dispatch under the global concurrency
//! ceiling, record statistics.

use crate::cache::{ResultCache, cache_key};
use crate::mcp_tool::McpTool;
use crate::naming;
use crate::rate_limit::TokenBucket;
use crate::skills::{Skill, SkillLoader, SkillTool};
use chrono::Utc;
use rago_config::RegistryConfig;
use rago_core::agent::whitelist_allows;
use rago_core::error::ToolError;
use rago_core::llm::ToolDefinition;
use rago_core::tool::{ProviderKind, RateLimit, Tool, ToolCall, ToolInfo, ToolOutput};
use rago_core::{DomainEvent, EventBus};
use rago_mcp::{InstanceObserver, RemoteTool, ServerManager};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const DEFAULT_MAX_CONCURRENT: usize = 8;
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

struct Route {
    info: ToolInfo,
    handle: Arc<dyn Tool>,
}

/// Usage counters for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub total_duration_ms: u64,
}

pub struct ToolRegistry {
    routes: RwLock<HashMap<String, Route>>,
    servers: OnceLock<Arc<ServerManager>>,
    cache: ResultCache,
    cacheable: HashSet<String>,
    rate_limits: HashMap<String, RateLimit>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    stats: Mutex<HashMap<String, ToolStats>>,
    permits: Semaphore,
    events: Arc<EventBus>,
    tool_timeout: Duration,
    skill_dirs: Vec<PathBuf>,
}

impl ToolRegistry {
    pub fn new(config: &RegistryConfig, events: Arc<EventBus>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            servers: OnceLock::new(),
            cache: ResultCache::new(Duration::from_secs(config.cache_ttl_secs)),
            cacheable: config.cacheable.iter().cloned().collect(),
            rate_limits: config.rate_limits.clone(),
            buckets: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            permits: Semaphore::new(DEFAULT_MAX_CONCURRENT),
            events,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            skill_dirs: Vec::new(),
        }
    }

    /// Ceiling on concurrent outstanding tool requests.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.permits = Semaphore::new(max.max(1));
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_skill_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.skill_dirs = dirs;
        self
    }

    /// Follow a server manager: import catalogs of servers that reach
    /// `running`, mark them offline when they leave it, and start servers
    /// on demand.
    pub fn attach_servers(self: &Arc<Self>, servers: Arc<ServerManager>) {
        if self.servers.set(Arc::clone(&servers)).is_err() {
            warn!("Registry is already attached to a server manager");
            return;
        }
        let observer: Weak<dyn InstanceObserver> = Arc::downgrade(self) as Weak<Self>;
        servers.add_observer(observer);
        for name in servers.names() {
            if servers.state(&name) == Some(rago_core::ServerState::Running) {
                self.import_server(&name, &servers.tools(&name));
            }
        }
    }

    fn read_routes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Route>> {
        self.routes.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_routes(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Route>> {
        self.routes.write().unwrap_or_else(|p| p.into_inner())
    }

    fn make_info(&self, tool: &dyn Tool, provider: ProviderKind, provider_id: &str) -> ToolInfo {
        let name = tool.name().to_string();
        ToolInfo {
            rate_limit: self.rate_limits.get(&name).copied(),
            cacheable: self.cacheable.contains(&name),
            name,
            description: tool.description().to_string(),
            input_schema: tool.schema(),
            provider,
            provider_id: provider_id.to_string(),
            available: true,
            hidden: false,
        }
    }

    /// Insert a route; the later registration wins. Returns the provider
    /// of the displaced route, if any.
    fn insert(&self, routes: &mut HashMap<String, Route>, route: Route) -> Option<ToolInfo> {
        let name = route.info.name.clone();
        let owner = format!("{}:{}", route.info.provider, route.info.provider_id);
        let displaced = routes.insert(name.clone(), route).map(|old| old.info);
        if let Some(old) = &displaced {
            let previous = format!("{}:{}", old.provider, old.provider_id);
            if previous != owner {
                warn!(tool = %name, displaced = %previous, winner = %owner, "Tool name collision; later registration wins");
            }
        }
        displaced
    }

    /// Register a first-party tool.
    pub fn register_tool(&self, tool: Arc<dyn Tool>, provider: ProviderKind) -> Option<ToolInfo> {
        let provider_id = match provider {
            ProviderKind::Rag => "rag".to_string(),
            _ => tool.name().to_string(),
        };
        let info = self.make_info(tool.as_ref(), provider, &provider_id);
        debug!(tool = %info.name, provider = %provider, "Registered tool");
        let mut routes = self.write_routes();
        self.insert(&mut routes, Route { info, handle: tool })
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.write_routes().remove(name).is_some()
    }

    /// Replace the catalog of one protocol server.
    pub fn import_server(&self, server: &str, tools: &[RemoteTool]) -> usize {
        let Some(servers) = self.servers.get().cloned() else {
            warn!(server, "Cannot import server tools without a server manager");
            return 0;
        };
        let mut routes = self.write_routes();
        routes.retain(|_, r| !(r.info.provider == ProviderKind::Mcp && r.info.provider_id == server));
        for remote in tools {
            let tool = McpTool::new(server, remote, Arc::clone(&servers)).with_timeout(self.tool_timeout);
            let info = self.make_info(&tool, ProviderKind::Mcp, server);
            self.insert(&mut routes, Route {
                info,
                handle: Arc::new(tool),
            });
        }
        info!(server, tools = tools.len(), "Imported server tools");
        tools.len()
    }

    /// Keep a server's tools for introspection but fail calls to them.
    pub fn mark_server_offline(&self, server: &str) {
        let mut routes = self.write_routes();
        for route in routes.values_mut() {
            if route.info.provider == ProviderKind::Mcp && route.info.provider_id == server {
                route.info.available = false;
            }
        }
        debug!(server, "Server tools marked unavailable");
    }

    fn remove_server(&self, server: &str) {
        self.write_routes()
            .retain(|_, r| !(r.info.provider == ProviderKind::Mcp && r.info.provider_id == server));
    }

    /// Replace every skill route with `skills`. Returns how many were imported.
    pub fn import_skills(&self, skills: &[Skill]) -> usize {
        let mut routes = self.write_routes();
        routes.retain(|_, r| r.info.provider != ProviderKind::Skill);
        let mut imported = 0;
        for skill in skills {
            let tool = match SkillTool::new(skill.clone()) {
                Ok(tool) => tool,
                Err(e) => {
                    warn!(skill = %skill.id, error = %e, "Skipping skill with invalid pattern");
                    continue;
                }
            };
            let mut info = self.make_info(&tool, ProviderKind::Skill, &skill.id);
            info.hidden = !skill.enabled();
            self.insert(&mut routes, Route {
                info,
                handle: Arc::new(tool),
            });
            imported += 1;
        }
        imported
    }

    /// Reload skills from the configured directories.
    pub fn rescan_skills(&self) -> usize {
        let skills = SkillLoader::new(self.skill_dirs.clone()).load_all();
        self.import_skills(&skills)
    }

    /// Every route, sorted by name.
    pub fn list(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self.read_routes().values().map(|r| r.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn describe(&self, name: &str) -> Option<ToolInfo> {
        self.read_routes().get(name).map(|r| r.info.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.list().into_iter().map(|i| i.name).collect()
    }

    pub fn len(&self) -> usize {
        self.read_routes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Function-call descriptors for the LLM: available, visible, and
    /// admitted by `whitelist` (empty admits all).
    pub fn definitions(&self, whitelist: &[String]) -> Vec<ToolDefinition> {
        self.list()
            .into_iter()
            .filter(|info| info.available && !info.hidden && whitelist_allows(whitelist, &info.name))
            .map(|info| info.to_definition())
            .collect()
    }

    pub fn stats(&self) -> BTreeMap<String, ToolStats> {
        self.stats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn route(&self, name: &str) -> Option<(ToolInfo, Arc<dyn Tool>)> {
        self.read_routes()
            .get(name)
            .map(|r| (r.info.clone(), Arc::clone(&r.handle)))
    }

    /// Start servers that could own `name`: the owner of an offline route,
    /// or any server whose prefix matches an unknown name.
    async fn start_owner(&self, name: &str, known_owner: Option<&str>) {
        let Some(servers) = self.servers.get() else {
            return;
        };
        let candidates: Vec<String> = match known_owner {
            Some(owner) => vec![owner.to_string()],
            None => servers
                .names()
                .into_iter()
                .filter(|s| name.starts_with(&naming::mcp_prefix(s)))
                .collect(),
        };
        for server in candidates {
            debug!(tool = name, server = %server, "Starting server on demand");
            if let Err(e) = servers.ensure_running(&server).await {
                warn!(tool = name, server = %server, error = %e, "On-demand start failed");
            }
        }
    }

    async fn resolve(&self, name: &str) -> Result<(ToolInfo, Arc<dyn Tool>), ToolError> {
        match self.route(name) {
            Some((info, handle)) if info.available => return Ok((info, handle)),
            Some((info, _)) if info.provider == ProviderKind::Mcp => {
                self.start_owner(name, Some(&info.provider_id)).await;
            }
            Some((info, _)) => {
                return Err(ToolError::ProviderOffline {
                    tool: name.to_string(),
                    provider: info.provider_id,
                });
            }
            None => self.start_owner(name, None).await,
        }
        match self.route(name) {
            Some((info, handle)) if info.available => Ok((info, handle)),
            Some((info, _)) => Err(ToolError::ProviderOffline {
                tool: name.to_string(),
                provider: info.provider_id,
            }),
            None => Err(ToolError::NotFound(name.to_string())),
        }
    }

    fn check_rate(&self, info: &ToolInfo) -> Result<(), ToolError> {
        let Some(limit) = info.rate_limit else {
            return Ok(());
        };
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let bucket = buckets
            .entry(info.name.clone())
            .or_insert_with(|| TokenBucket::new(limit));
        bucket.try_acquire().map_err(|wait| ToolError::RateLimited {
            tool: info.name.clone(),
            retry_after_ms: wait.as_millis().max(1) as u64,
        })
    }

    fn record(&self, tool: &str, success: bool, cached: bool, elapsed: Duration) {
        {
            let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
            let entry = stats.entry(tool.to_string()).or_default();
            entry.calls += 1;
            if success {
                entry.successes += 1;
            } else {
                entry.failures += 1;
            }
            if cached {
                entry.cache_hits += 1;
            }
            entry.total_duration_ms += elapsed.as_millis() as u64;
        }
        self.events.publish(DomainEvent::ToolExecuted {
            tool: tool.to_string(),
            success,
            duration_ms: elapsed.as_millis() as u64,
            cached,
            timestamp: Utc::now(),
        });
    }

    /// Route a call by federated name.
    pub async fn call(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        let (info, handle) = self.resolve(name).await?;
        let validated = info.input_schema.validate(name, args)?;

        let key = info
            .cacheable
            .then(|| cache_key(name, &Value::Object(validated.as_map().clone())));
        if let Some(key) = &key
            && let Some(hit) = self.cache.get(key)
        {
            debug!(tool = name, "Cache hit");
            self.record(name, true, true, Duration::ZERO);
            return Ok(hit);
        }

        if let Err(e) = self.check_rate(&info) {
            self.record(name, false, false, Duration::ZERO);
            return Err(e);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ToolError::execution(name, "tool dispatch is shut down"))?;

        let started = Instant::now();
        let result = match tokio::time::timeout(self.tool_timeout, handle.call(validated)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                timeout_ms: self.tool_timeout.as_millis() as u64,
            }),
        };
        let elapsed = started.elapsed();
        self.record(name, result.is_ok(), false, elapsed);

        match &result {
            Ok(output) => {
                debug!(tool = name, duration_ms = elapsed.as_millis() as u64, "Tool succeeded");
                if let Some(key) = key {
                    self.cache.put(key, output.clone());
                }
            }
            Err(e) => debug!(tool = name, error = %e, "Tool failed"),
        }
        result
    }

    /// Execute an LLM tool call.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        self.call(&call.name, call.arguments.clone()).await
    }
}

impl InstanceObserver for ToolRegistry {
    fn on_running(&self, server: &str, tools: &[RemoteTool]) {
        self.import_server(server, tools);
    }

    fn on_offline(&self, server: &str) {
        self.mark_server_offline(server);
    }

    fn on_removed(&self, server: &str) {
        self.remove_server(server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{CountingTool, SleepTool};
    use rago_config::{ServerDescriptor, TransportConfig};
    use rago_core::ErrorKind;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(&RegistryConfig::default(), Arc::new(EventBus::new(64)))
    }

    #[tokio::test]
    async fn register_and_call() {
        let registry = registry();
        let tool = Arc::new(CountingTool::new("local_echo"));
        registry.register_tool(tool.clone(), ProviderKind::Local);

        let out = registry.call("local_echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out.text, "hi");
        assert_eq!(tool.calls(), 1);
        assert_eq!(registry.describe("local_echo").unwrap().provider, ProviderKind::Local);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let err = registry().call("mcp_filesystem_ls", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(ref n) if n == "mcp_filesystem_ls"));
        assert_eq!(err.kind(), ErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn invalid_args_rejected_before_dispatch() {
        let registry = registry();
        let tool = Arc::new(CountingTool::new("local_echo"));
        registry.register_tool(tool.clone(), ProviderKind::Local);

        let err = registry.call("local_echo", json!({"text": 5})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
        let err = registry.call("local_echo", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
        assert_eq!(tool.calls(), 0);
    }

    #[tokio::test]
    async fn later_registration_wins() {
        let registry = registry();
        registry.register_tool(Arc::new(CountingTool::new("shared")), ProviderKind::Local);
        let second = Arc::new(CountingTool::new("shared").with_reply("second"));
        let displaced = registry.register_tool(second.clone(), ProviderKind::Skill);

        assert_eq!(displaced.unwrap().provider, ProviderKind::Local);
        assert_eq!(registry.len(), 1);
        let out = registry.call("shared", json!({"text": "x"})).await.unwrap();
        assert_eq!(out.text, "second");
        assert_eq!(registry.describe("shared").unwrap().provider, ProviderKind::Skill);
    }

    #[tokio::test]
    async fn cacheable_results_are_reused() {
        let config = RegistryConfig {
            cacheable: vec!["local_echo".into()],
            ..RegistryConfig::default()
        };
        let registry = ToolRegistry::new(&config, Arc::new(EventBus::new(64)));
        let tool = Arc::new(CountingTool::new("local_echo"));
        registry.register_tool(tool.clone(), ProviderKind::Local);

        registry.call("local_echo", json!({"text": "a"})).await.unwrap();
        registry.call("local_echo", json!({"text": "a"})).await.unwrap();
        registry.call("local_echo", json!({"text": "b"})).await.unwrap();
        assert_eq!(tool.calls(), 2);
        assert_eq!(registry.stats()["local_echo"].cache_hits, 1);
        assert_eq!(registry.stats()["local_echo"].calls, 3);
    }

    #[tokio::test]
    async fn rate_limit_fails_fast() {
        let config = RegistryConfig {
            rate_limits: HashMap::from([(
                "local_echo".to_string(),
                RateLimit {
                    capacity: 1,
                    refill_per_sec: 0.001,
                },
            )]),
            ..RegistryConfig::default()
        };
        let registry = ToolRegistry::new(&config, Arc::new(EventBus::new(64)));
        registry.register_tool(Arc::new(CountingTool::new("local_echo")), ProviderKind::Local);

        registry.call("local_echo", json!({"text": "a"})).await.unwrap();
        let err = registry.call("local_echo", json!({"text": "a"})).await.unwrap_err();
        match err {
            ToolError::RateLimited { retry_after_ms, .. } => assert!(retry_after_ms > 0),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let registry = registry().with_tool_timeout(Duration::from_millis(50));
        registry.register_tool(Arc::new(SleepTool::new(Duration::from_secs(5))), ProviderKind::Local);
        let err = registry.call("local_sleep", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_ms: 50, .. }));
        assert_eq!(registry.stats()["local_sleep"].failures, 1);
    }

    #[tokio::test]
    async fn executions_are_published() {
        let events = Arc::new(EventBus::new(16));
        let mut sub = events.subscribe();
        let registry = ToolRegistry::new(&RegistryConfig::default(), Arc::clone(&events));
        registry.register_tool(Arc::new(CountingTool::new("local_echo")), ProviderKind::Local);
        registry.call("local_echo", json!({"text": "x"})).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            DomainEvent::ToolExecuted { tool, success: true, cached: false, .. } if tool == "local_echo"
        ));
    }

    #[test]
    fn definitions_respect_whitelist_and_visibility() {
        let registry = registry();
        registry.register_tool(Arc::new(CountingTool::new("rag_query")), ProviderKind::Rag);
        registry.register_tool(Arc::new(CountingTool::new("local_echo")), ProviderKind::Local);

        assert_eq!(registry.definitions(&[]).len(), 2);
        let defs = registry.definitions(&["rag_*".to_string()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "rag_query");
        assert_eq!(registry.describe("rag_query").unwrap().provider_id, "rag");
    }

    #[test]
    fn skills_import_and_hidden_flag() {
        let dir = tempfile::tempdir().unwrap();
        for (id, extra) in [("review", ""), ("secret", "disable_model_invocation: true\n")] {
            let skill_dir = dir.path().join(id);
            std::fs::create_dir_all(&skill_dir).unwrap();
            std::fs::write(
                skill_dir.join("SKILL.md"),
                format!("---\ndescription: {id} skill\n{extra}---\n## Step\nDo {id}.\n"),
            )
            .unwrap();
        }

        let registry = registry().with_skill_dirs(vec![dir.path().to_path_buf()]);
        assert_eq!(registry.rescan_skills(), 2);
        assert!(registry.describe("skill_secret").unwrap().hidden);
        let visible: Vec<String> = registry.definitions(&[]).into_iter().map(|d| d.name).collect();
        assert_eq!(visible, ["skill_review"]);

        // Rescan replaces the previous skill routes.
        std::fs::remove_dir_all(dir.path().join("secret")).unwrap();
        assert_eq!(registry.rescan_skills(), 1);
        assert!(registry.describe("skill_secret").is_none());
    }

    #[cfg(unix)]
    mod servers {
        use super::*;

        const CLOCK: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","serverInfo":{"name":"clock","version":"1.0.0"},"capabilities":{}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"now","description":"Current time","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"2024-01-01T00:00:00Z"}]}}\n' "$id" ;;
  esac
done
"#;

        fn clock_manager(dir: &std::path::Path) -> Arc<ServerManager> {
            let script = dir.join("clock.sh");
            std::fs::write(&script, CLOCK).unwrap();
            let manager =
                ServerManager::from_config(&TransportConfig::default(), Arc::new(EventBus::new(64)));
            manager.register(
                ServerDescriptor::stdio("clock", "sh", vec![script.display().to_string()])
                    .with_auto_start(false),
            );
            manager
        }

        fn setup(dir: &std::path::Path) -> (Arc<ServerManager>, Arc<ToolRegistry>) {
            let manager = clock_manager(dir);
            let registry = Arc::new(registry());
            registry.attach_servers(Arc::clone(&manager));
            (manager, registry)
        }

        #[tokio::test]
        async fn attaching_imports_already_running_servers() {
            let dir = tempfile::tempdir().unwrap();
            let manager = clock_manager(dir.path());
            manager.start("clock").await.unwrap();

            let registry = Arc::new(registry());
            registry.attach_servers(Arc::clone(&manager));
            assert_eq!(registry.definitions(&[]).len(), 1);

            let out = registry.call("mcp_clock_now", json!({})).await.unwrap();
            assert_eq!(out.text, "2024-01-01T00:00:00Z");
            manager.stop_all().await;
        }

        #[tokio::test]
        async fn starts_owner_on_demand() {
            let dir = tempfile::tempdir().unwrap();
            let (manager, registry) = setup(dir.path());
            assert!(registry.is_empty());

            let out = registry.call("mcp_clock_now", json!({})).await.unwrap();
            assert_eq!(out.text, "2024-01-01T00:00:00Z");
            assert_eq!(registry.describe("mcp_clock_now").unwrap().provider_id, "clock");
            manager.stop_all().await;
        }

        #[tokio::test]
        async fn stopped_server_tools_become_unavailable() {
            let dir = tempfile::tempdir().unwrap();
            let (manager, registry) = setup(dir.path());
            manager.start("clock").await.unwrap();
            assert_eq!(registry.definitions(&[]).len(), 1);

            manager.stop("clock").await.unwrap();
            let info = registry.describe("mcp_clock_now").unwrap();
            assert!(!info.available);
            assert!(registry.definitions(&[]).is_empty());

            // A call restarts the stopped owner.
            registry.call("mcp_clock_now", json!({})).await.unwrap();
            assert!(registry.describe("mcp_clock_now").unwrap().available);

            manager.unregister("clock").await;
            assert!(registry.describe("mcp_clock_now").is_none());
        }
    }
}
