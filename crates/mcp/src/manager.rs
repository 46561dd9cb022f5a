//! Server Manager: registration, lifecycle, restart, and health of
//! protocol servers.
//!
//! Lifecycle transitions on one instance serialize through that
//! instance's async mutex. `call` never takes it: it clones the client
//! handle out of a short-held lock and talks to the transport directly.

use crate::client::{RemoteTool, RpcClient, ServerInfo, ServerNotice};
use crate::transport::{DefaultTransportFactory, TransportFactory};
use chrono::Utc;
use rago_config::{ServerDescriptor, TransportConfig};
use rago_core::error::TransportError;
use rago_core::{DomainEvent, EventBus, ServerState};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receives lifecycle notifications. Called synchronously after each
/// transition, outside every manager lock.
pub trait InstanceObserver: Send + Sync {
    /// The server reached `running` or refreshed its catalog.
    fn on_running(&self, server: &str, tools: &[RemoteTool]);

    /// The server left `running`.
    fn on_offline(&self, server: &str);

    /// The server was unregistered.
    fn on_removed(&self, server: &str) {
        self.on_offline(server);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerHealth {
    pub name: String,
    pub state: ServerState,
    pub tool_count: usize,
    pub uptime_ms: Option<u64>,
    pub last_ping_age_ms: Option<u64>,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Snapshot {
    state: ServerState,
    tools: Vec<RemoteTool>,
    info: Option<ServerInfo>,
    started_at: Option<Instant>,
    last_ping: Option<Instant>,
    consecutive_errors: u32,
    /// Automatic restarts since the last explicit start.
    restarts: u32,
    last_error: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: ServerState::Stopped,
            tools: Vec::new(),
            info: None,
            started_at: None,
            last_ping: None,
            consecutive_errors: 0,
            restarts: 0,
            last_error: None,
        }
    }
}

struct Instance {
    descriptor: ServerDescriptor,
    lifecycle: tokio::sync::Mutex<()>,
    snapshot: Mutex<Snapshot>,
    client: RwLock<Option<Arc<RpcClient>>>,
    /// Bumped by every start attempt and every stop; a watcher whose
    /// generation is stale exits quietly.
    generation: AtomicU64,
}

impl Instance {
    fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            lifecycle: tokio::sync::Mutex::new(()),
            snapshot: Mutex::new(Snapshot::default()),
            client: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn snapshot(&self) -> std::sync::MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn state(&self) -> ServerState {
        self.snapshot().state
    }

    fn client(&self) -> Option<Arc<RpcClient>> {
        self.client.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn set_client(&self, client: Option<Arc<RpcClient>>) -> Option<Arc<RpcClient>> {
        let mut slot = self.client.write().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *slot, client)
    }
}

pub struct ServerManager {
    me: Weak<ServerManager>,
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    factory: Arc<dyn TransportFactory>,
    events: Arc<EventBus>,
    observers: RwLock<Vec<Weak<dyn InstanceObserver>>>,
    request_timeout: Duration,
}

impl ServerManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        events: Arc<EventBus>,
        request_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            instances: RwLock::new(HashMap::new()),
            factory,
            events,
            observers: RwLock::new(Vec::new()),
            request_timeout,
        })
    }

    /// A manager using the stdio/HTTP transports.
    pub fn from_config(config: &TransportConfig, events: Arc<EventBus>) -> Arc<Self> {
        let factory = DefaultTransportFactory::new(config.clone()).with_events(Arc::clone(&events));
        Self::new(
            Arc::new(factory),
            events,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn add_observer(&self, observer: Weak<dyn InstanceObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(observer);
    }

    fn observers(&self) -> Vec<Arc<dyn InstanceObserver>> {
        let mut observers = self.observers.write().unwrap_or_else(|p| p.into_inner());
        observers.retain(|o| o.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    fn instance(&self, name: &str) -> Result<Arc<Instance>, TransportError> {
        self.instances
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::UnknownServer {
                server: name.to_string(),
            })
    }

    /// Store a descriptor. Auto-start descriptors are started in the
    /// background. Re-registering a name replaces the previous instance.
    pub fn register(&self, descriptor: ServerDescriptor) {
        let name = descriptor.name.clone();
        let auto_start = descriptor.auto_start;
        let previous = self
            .instances
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.clone(), Arc::new(Instance::new(descriptor)));
        info!(server = %name, auto_start, "Registered server");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            if auto_start {
                warn!(server = %name, "No async runtime; auto-start deferred to first use");
            }
            return;
        };

        if let Some(previous) = previous {
            runtime.spawn(shutdown_instance(previous));
        }
        if auto_start {
            let me = self.me.clone();
            runtime.spawn(async move {
                if let Some(manager) = me.upgrade()
                    && let Err(e) = manager.start(&name).await
                {
                    warn!(server = %name, error = %e, "Auto-start failed");
                }
            });
        }
    }

    /// Stop and forget a server.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self
            .instances
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name);
        let Some(instance) = removed else {
            return false;
        };
        let _guard = instance.lifecycle.lock().await;
        self.stop_locked(&instance).await;
        for observer in self.observers() {
            observer.on_removed(name);
        }
        info!(server = %name, "Unregistered server");
        true
    }

    /// Start a server. An explicit start resets the restart budget.
    pub async fn start(&self, name: &str) -> Result<(), TransportError> {
        let instance = self.instance(name)?;
        let _guard = instance.lifecycle.lock().await;
        {
            let mut snap = instance.snapshot();
            snap.restarts = 0;
            snap.consecutive_errors = 0;
        }
        self.start_locked(&instance).await
    }

    /// Start a stopped server; used for on-demand starts. A `failed`
    /// server stays failed until an explicit [`start`](Self::start).
    pub async fn ensure_running(&self, name: &str) -> Result<(), TransportError> {
        let instance = self.instance(name)?;
        let _guard = instance.lifecycle.lock().await;
        match instance.state() {
            ServerState::Running => Ok(()),
            ServerState::Failed => Err(TransportError::NotOpen {
                server: name.to_string(),
            }),
            ServerState::Stopped | ServerState::Starting => self.start_locked(&instance).await,
        }
    }

    async fn start_locked(&self, instance: &Arc<Instance>) -> Result<(), TransportError> {
        if instance.state() == ServerState::Running {
            return Ok(());
        }
        let name = instance.name().to_string();
        let generation = instance.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.transition(instance, ServerState::Starting, None);

        let connected = async {
            let transport = self.factory.create(&instance.descriptor)?;
            let (client, notices) =
                RpcClient::connect(name.clone(), transport, self.request_timeout).await?;
            let setup = async {
                let info = client.initialize().await?;
                let tools = client.list_tools().await?;
                Ok::<_, TransportError>((info, tools))
            }
            .await;
            match setup {
                Ok((info, tools)) => Ok((client, notices, info, tools)),
                Err(e) => {
                    client.close().await;
                    Err(e)
                }
            }
        }
        .await;

        match connected {
            Ok((client, notices, info, tools)) => {
                instance.set_client(Some(Arc::clone(&client)));
                {
                    let mut snap = instance.snapshot();
                    snap.tools = tools.clone();
                    snap.info = Some(info);
                    snap.started_at = Some(Instant::now());
                    snap.last_ping = Some(Instant::now());
                    snap.consecutive_errors = 0;
                    snap.last_error = None;
                }
                self.transition(instance, ServerState::Running, None);
                info!(server = %name, tools = tools.len(), "Server running");
                for observer in self.observers() {
                    observer.on_running(&name, &tools);
                }
                tokio::spawn(watch_instance(
                    self.me.clone(),
                    Arc::clone(instance),
                    generation,
                    notices,
                ));
                Ok(())
            }
            Err(e) => {
                {
                    let mut snap = instance.snapshot();
                    snap.consecutive_errors += 1;
                    snap.last_error = Some(e.to_string());
                }
                warn!(server = %name, error = %e, "Server failed to start");
                self.transition(instance, ServerState::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    pub async fn stop(&self, name: &str) -> Result<(), TransportError> {
        let instance = self.instance(name)?;
        let _guard = instance.lifecycle.lock().await;
        self.stop_locked(&instance).await;
        Ok(())
    }

    async fn stop_locked(&self, instance: &Arc<Instance>) {
        instance.generation.fetch_add(1, Ordering::SeqCst);
        let was_running = instance.state() == ServerState::Running;
        if let Some(client) = instance.set_client(None) {
            client.close().await;
        }
        if instance.state() != ServerState::Stopped {
            instance.snapshot().started_at = None;
            self.transition(instance, ServerState::Stopped, None);
        }
        if was_running {
            for observer in self.observers() {
                observer.on_offline(instance.name());
            }
        }
    }

    /// Issue `tools/call`. Fails unless the server is running.
    pub async fn call(
        &self,
        name: &str,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        let instance = self.instance(name)?;
        let client = match (instance.state(), instance.client()) {
            (ServerState::Running, Some(client)) => client,
            _ => {
                return Err(TransportError::NotOpen {
                    server: name.to_string(),
                });
            }
        };

        debug!(server = %name, tool, "Calling remote tool");
        let result = client.call_tool(tool, arguments, timeout).await;
        let mut snap = instance.snapshot();
        match &result {
            Ok(_) => snap.consecutive_errors = 0,
            // The server answered; the connection is healthy.
            Err(TransportError::Rpc { .. }) => {}
            Err(e) => {
                snap.consecutive_errors += 1;
                snap.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Send a protocol `ping` and record the time.
    pub async fn ping(&self, name: &str) -> Result<Duration, TransportError> {
        let instance = self.instance(name)?;
        let client = instance.client().ok_or_else(|| TransportError::NotOpen {
            server: name.to_string(),
        })?;
        let began = Instant::now();
        client.ping().await?;
        instance.snapshot().last_ping = Some(Instant::now());
        Ok(began.elapsed())
    }

    pub fn health(&self) -> Vec<ServerHealth> {
        let instances: Vec<Arc<Instance>> = self
            .instances
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        let mut health: Vec<ServerHealth> = instances
            .iter()
            .map(|instance| {
                let snap = instance.snapshot();
                let millis = |t: Option<Instant>| t.map(|t| t.elapsed().as_millis() as u64);
                ServerHealth {
                    name: instance.name().to_string(),
                    state: snap.state,
                    tool_count: snap.tools.len(),
                    uptime_ms: millis(snap.started_at),
                    last_ping_age_ms: millis(snap.last_ping),
                    consecutive_errors: snap.consecutive_errors,
                    last_error: snap.last_error.clone(),
                }
            })
            .collect();
        health.sort_by(|a, b| a.name.cmp(&b.name));
        health
    }

    /// Registered descriptors, sorted by name.
    pub fn list(&self) -> Vec<ServerDescriptor> {
        let mut descriptors: Vec<ServerDescriptor> = self
            .instances
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .map(|i| i.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn names(&self) -> Vec<String> {
        self.list().into_iter().map(|d| d.name).collect()
    }

    pub fn state(&self, name: &str) -> Option<ServerState> {
        self.instance(name).ok().map(|i| i.state())
    }

    /// The tool catalog last reported by a server.
    pub fn tools(&self, name: &str) -> Vec<RemoteTool> {
        self.instance(name)
            .map(|i| i.snapshot().tools.clone())
            .unwrap_or_default()
    }

    pub fn server_info(&self, name: &str) -> Option<ServerInfo> {
        self.instance(name).ok().and_then(|i| i.snapshot().info.clone())
    }

    /// Start every auto-start server. Failures are logged per server.
    pub async fn start_all(&self) {
        let names: Vec<String> = self
            .list()
            .into_iter()
            .filter(|d| d.auto_start)
            .map(|d| d.name)
            .collect();
        let starts = names.iter().map(|name| async move {
            if let Err(e) = self.ensure_running(name).await {
                warn!(server = %name, error = %e, "Server did not start");
            }
        });
        futures::future::join_all(starts).await;
    }

    pub async fn stop_all(&self) {
        for name in self.names() {
            if let Err(e) = self.stop(&name).await {
                debug!(server = %name, error = %e, "Stop skipped");
            }
        }
    }

    fn transition(&self, instance: &Instance, to: ServerState, error: Option<String>) {
        let from = {
            let mut snap = instance.snapshot();
            std::mem::replace(&mut snap.state, to)
        };
        if from == to {
            return;
        }
        debug!(server = %instance.name(), %from, %to, "Server state changed");
        self.events.publish(DomainEvent::ServerStateChanged {
            server: instance.name().to_string(),
            from,
            to,
            error,
            timestamp: Utc::now(),
        });
    }

    async fn refresh_tools(&self, instance: &Arc<Instance>) {
        let Some(client) = instance.client() else {
            return;
        };
        match client.list_tools().await {
            Ok(tools) => {
                info!(server = %instance.name(), tools = tools.len(), "Tool catalog changed");
                instance.snapshot().tools = tools.clone();
                for observer in self.observers() {
                    observer.on_running(instance.name(), &tools);
                }
            }
            Err(e) => warn!(server = %instance.name(), error = %e, "Catalog refresh failed"),
        }
    }

    /// The connection of a running instance dropped: mark it failed and
    /// restart within the descriptor's budget.
    ///
    /// Returns a boxed future: it re-enters `start_locked`, whose watcher
    /// task calls back here.
    fn recover(&self, instance: Arc<Instance>, generation: u64) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let name = instance.name().to_string();
            {
                let _guard = instance.lifecycle.lock().await;
                if instance.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                instance.set_client(None);
                {
                    let mut snap = instance.snapshot();
                    snap.consecutive_errors += 1;
                    snap.started_at = None;
                    snap.last_error = Some("connection closed".into());
                }
                self.transition(&instance, ServerState::Failed, Some("connection closed".into()));
                warn!(server = %name, "Server connection closed unexpectedly");
            }
            for observer in self.observers() {
                observer.on_offline(&name);
            }

            let policy = instance.descriptor.restart;
            let mut expected = generation;
            loop {
                {
                    let mut snap = instance.snapshot();
                    if snap.restarts >= policy.max_restarts {
                        warn!(
                            server = %name,
                            max_restarts = policy.max_restarts,
                            "Restart budget exhausted; server left failed"
                        );
                        return;
                    }
                    snap.restarts += 1;
                }

                tokio::time::sleep(Duration::from_millis(policy.delay_ms)).await;

                let _guard = instance.lifecycle.lock().await;
                // An explicit stop or start happened meanwhile.
                if instance.generation.load(Ordering::SeqCst) != expected {
                    return;
                }
                info!(server = %name, "Restarting server");
                match self.start_locked(&instance).await {
                    Ok(()) => return,
                    Err(_) => expected = instance.generation.load(Ordering::SeqCst),
                }
            }
        })
    }
}

async fn watch_instance(
    manager: Weak<ServerManager>,
    instance: Arc<Instance>,
    generation: u64,
    mut notices: mpsc::UnboundedReceiver<ServerNotice>,
) {
    while let Some(notice) = notices.recv().await {
        if instance.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        match notice {
            ServerNotice::ToolsChanged => {
                if let Some(manager) = manager.upgrade() {
                    manager.refresh_tools(&instance).await;
                }
            }
            ServerNotice::Notification { method, .. } => {
                debug!(server = %instance.name(), method = %method, "Ignoring notification");
            }
            ServerNotice::Closed => break,
        }
    }

    if instance.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    if let Some(manager) = manager.upgrade() {
        manager.recover(instance, generation).await;
    }
}

async fn shutdown_instance(instance: Arc<Instance>) {
    let _guard = instance.lifecycle.lock().await;
    instance.generation.fetch_add(1, Ordering::SeqCst);
    if let Some(client) = instance.set_client(None) {
        client.close().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{CLOCK_SCRIPT, MockHttpServer, write_script};
    use serde_json::json;
    use std::path::Path;

    #[derive(Default)]
    struct Recorder {
        running: Mutex<Vec<(String, usize)>>,
        offline: Mutex<Vec<String>>,
    }

    impl InstanceObserver for Recorder {
        fn on_running(&self, server: &str, tools: &[RemoteTool]) {
            self.running.lock().unwrap().push((server.to_string(), tools.len()));
        }
        fn on_offline(&self, server: &str) {
            self.offline.lock().unwrap().push(server.to_string());
        }
    }

    fn manager() -> Arc<ServerManager> {
        ServerManager::from_config(&TransportConfig::default(), Arc::new(EventBus::new(64)))
    }

    fn clock(dir: &Path) -> ServerDescriptor {
        let script = write_script(dir, "clock.sh", CLOCK_SCRIPT);
        ServerDescriptor::stdio("clock", "sh", vec![script.display().to_string()])
            .with_auto_start(false)
    }

    fn with_env(mut descriptor: ServerDescriptor, key: &str, value: &str) -> ServerDescriptor {
        if let rago_config::TransportSpec::Stdio { env, .. } = &mut descriptor.transport {
            env.insert(key.to_string(), value.to_string());
        }
        descriptor
    }

    async fn wait_for(manager: &ServerManager, name: &str, state: ServerState) {
        for _ in 0..200 {
            if manager.state(name) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("{name} never reached {state}; now {:?}", manager.state(name));
    }

    #[tokio::test]
    async fn start_discovers_tools_and_calls() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager();
        manager.register(clock(dir.path()));
        assert_eq!(manager.state("clock"), Some(ServerState::Stopped));

        manager.start("clock").await.unwrap();
        assert_eq!(manager.state("clock"), Some(ServerState::Running));
        assert_eq!(manager.tools("clock")[0].name, "now");
        assert_eq!(manager.server_info("clock").unwrap().name, "clock");

        let result = manager.call("clock", "now", json!({}), None).await.unwrap();
        assert_eq!(result["content"][0]["text"], "2024-01-01T00:00:00Z");

        manager.ping("clock").await.unwrap();
        let health = manager.health();
        assert_eq!(health[0].tool_count, 1);
        assert!(health[0].last_ping_age_ms.is_some());

        manager.stop("clock").await.unwrap();
        assert_eq!(manager.state("clock"), Some(ServerState::Stopped));
    }

    #[tokio::test]
    async fn call_requires_running() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager();
        manager.register(clock(dir.path()));
        let err = manager.call("clock", "now", json!({}), None).await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen { .. }));

        let err = manager.start("nope").await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownServer { .. }));
    }

    #[tokio::test]
    async fn failed_start_records_error() {
        let manager = manager();
        manager.register(
            ServerDescriptor::stdio("ghost", "/definitely/not/a/binary", vec![])
                .with_auto_start(false),
        );
        assert!(manager.start("ghost").await.is_err());
        let health = manager.health();
        assert_eq!(health[0].state, ServerState::Failed);
        assert_eq!(health[0].consecutive_errors, 1);
        assert!(health[0].last_error.is_some());
    }

    #[tokio::test]
    async fn observers_follow_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager();
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn InstanceObserver> = Arc::downgrade(&recorder) as Weak<dyn InstanceObserver>;
        manager.add_observer(weak);

        manager.register(clock(dir.path()));
        manager.start("clock").await.unwrap();
        manager.stop("clock").await.unwrap();

        assert_eq!(*recorder.running.lock().unwrap(), [("clock".to_string(), 1)]);
        assert_eq!(*recorder.offline.lock().unwrap(), ["clock"]);
    }

    #[tokio::test]
    async fn auto_start_on_register() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager();
        manager.register(clock(dir.path()).with_auto_start(true));
        wait_for(&manager, "clock", ServerState::Running).await;
    }

    #[tokio::test]
    async fn lifecycle_events_published() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventBus::new(64));
        let mut sub = events.subscribe();
        let manager = ServerManager::from_config(&TransportConfig::default(), Arc::clone(&events));
        manager.register(clock(dir.path()));
        manager.start("clock").await.unwrap();

        let mut transitions = Vec::new();
        while let Ok(event) = sub.try_recv() {
            if let DomainEvent::ServerStateChanged { to, .. } = event.as_ref() {
                transitions.push(*to);
            }
        }
        assert_eq!(transitions, [ServerState::Starting, ServerState::Running]);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn crash_loop_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("starts.log");
        let descriptor = with_env(
            with_env(clock(dir.path()), "MOCK_EXIT_AFTER_LIST", "1"),
            "MOCK_START_LOG",
            &log.display().to_string(),
        )
        .with_restart(2, 50);

        let manager = manager();
        manager.register(descriptor);
        // Each start succeeds, then the server exits right after listing.
        let _ = manager.start("clock").await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(manager.state("clock"), Some(ServerState::Failed));
        let starts = std::fs::read_to_string(&log).unwrap().lines().count();
        assert_eq!(starts, 3, "one explicit start plus two restarts");

        // Still failed later: no further automatic attempts.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let starts_later = std::fs::read_to_string(&log).unwrap().lines().count();
        assert_eq!(starts_later, 3);
    }

    #[tokio::test]
    async fn unregister_notifies_removal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager();
        let recorder = Arc::new(Recorder::default());
        manager.add_observer(Arc::downgrade(&recorder) as Weak<dyn InstanceObserver>);

        manager.register(clock(dir.path()));
        manager.start("clock").await.unwrap();
        assert!(manager.unregister("clock").await);
        assert!(!manager.unregister("clock").await);
        assert!(manager.state("clock").is_none());
        assert!(recorder.offline.lock().unwrap().contains(&"clock".to_string()));
    }

    #[tokio::test]
    async fn http_server_lifecycle() {
        let server = MockHttpServer::start().await;
        let manager = manager();
        manager.register(ServerDescriptor::http("remote", server.url()).with_auto_start(false));
        manager.start("remote").await.unwrap();
        assert_eq!(manager.tools("remote")[0].name, "answer");

        let result = manager.call("remote", "answer", json!({}), None).await.unwrap();
        assert_eq!(result, json!({"success": true, "data": 42}));
        manager.stop("remote").await.unwrap();
    }
}
