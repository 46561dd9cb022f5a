pub mod call;
pub mod memory;
pub mod servers;
pub mod skills;
pub mod tools;

use rago_config::{AppConfig, ServerCatalog};
use rago_core::event::EventBus;
use rago_mcp::ServerManager;
use rago_tools::ToolRegistry;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

/// Server manager and registry wired from configuration and the
/// discovered server catalog. Nothing is started yet.
pub struct Runtime {
    pub servers: Arc<ServerManager>,
    pub registry: Arc<ToolRegistry>,
}

impl Runtime {
    pub fn build(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let events = Arc::new(EventBus::default());
        let catalog = ServerCatalog::discover(&config.restart)?;
        if let Some(source) = &catalog.source {
            tracing::debug!(path = %source.display(), servers = catalog.servers.len(), "Loaded server catalog");
        }

        let servers = ServerManager::from_config(&config.transport, Arc::clone(&events));
        for descriptor in catalog.servers {
            servers.register(descriptor);
        }

        let registry = Arc::new(
            ToolRegistry::new(&config.registry, events)
                .with_max_concurrent(config.engine.max_concurrent_tools)
                .with_tool_timeout(Duration::from_secs(config.engine.tool_timeout_secs))
                .with_skill_dirs(config.skills.dirs.clone()),
        );
        registry.attach_servers(Arc::clone(&servers));
        registry.rescan_skills();
        Ok(Self { servers, registry })
    }
}
