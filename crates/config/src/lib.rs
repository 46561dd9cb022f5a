//! Configuration loading, validation, and management for rago.
//!
//! Loads runtime configuration from `~/.rago/config.toml` with environment
//! variable overrides, and the protocol server catalog from a
//! `mcpServers.json` file (see [`catalog`]). Validates all settings at
//! startup.

pub mod catalog;

pub use catalog::{RestartPolicy, ServerCatalog, ServerDescriptor, TransportSpec};

use rago_core::AgentProfile;
use rago_core::tool::RateLimit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.rago/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Round loop limits and timeouts
    #[serde(default)]
    pub engine: EngineConfig,

    /// Tool federation registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Protocol transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Default restart policy for protocol servers
    #[serde(default)]
    pub restart: RestartConfig,

    /// Long-term memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Session and plan persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Skill directories
    #[serde(default)]
    pub skills: SkillsConfig,

    /// Semantic router
    #[serde(default)]
    pub router: RouterConfig,

    /// Agent profiles available for handoff
    #[serde(default)]
    pub profiles: Vec<AgentProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_round_cap")]
    pub round_cap: u32,

    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Hard ceiling on a whole run
    #[serde(default = "default_run_ceiling_secs")]
    pub run_ceiling_secs: u64,

    #[serde(default = "default_handoff_cap")]
    pub handoff_cap: u32,

    /// Outstanding tool requests across all runs
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,

    /// Run event channel capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Messages of history kept when retrying a failed LLM call
    #[serde(default = "default_llm_retry_history")]
    pub llm_retry_history: usize,
}

fn default_round_cap() -> u32 {
    20
}
fn default_round_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_run_ceiling_secs() -> u64 {
    900
}
fn default_handoff_cap() -> u32 {
    3
}
fn default_max_concurrent_tools() -> usize {
    8
}
fn default_event_buffer() -> usize {
    64
}
fn default_llm_retry_history() -> usize {
    6
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round_cap: default_round_cap(),
            round_timeout_secs: default_round_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            run_ceiling_secs: default_run_ceiling_secs(),
            handoff_cap: default_handoff_cap(),
            max_concurrent_tools: default_max_concurrent_tools(),
            event_buffer: default_event_buffer(),
            llm_retry_history: default_llm_retry_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Per-tool token buckets, keyed by federated name
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimit>,

    /// Federated names whose results may be cached
    #[serde(default)]
    pub cacheable: Vec<String>,
}

fn default_cache_ttl_secs() -> u64 {
    60
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            rate_limits: HashMap::new(),
            cacheable: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_http_max_retries")]
    pub http_max_retries: u32,

    #[serde(default = "default_http_backoff_ms")]
    pub http_backoff_ms: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}
fn default_http_max_retries() -> u32 {
    5
}
fn default_http_backoff_ms() -> u64 {
    200
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            http_max_retries: default_http_max_retries(),
            http_backoff_ms: default_http_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_restart_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_restarts() -> u32 {
    3
}
fn default_restart_delay_ms() -> u64 {
    1000
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            delay_ms: default_restart_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_sqlite_backend")]
    pub backend: String,

    /// Database path (default: `<config_dir>/memory.db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_memory_limit")]
    pub limit: usize,

    #[serde(default = "default_min_score")]
    pub min_score: f32,

    #[serde(default = "default_entity_limit")]
    pub entity_limit: usize,
}

fn default_sqlite_backend() -> String {
    "sqlite".into()
}
fn default_memory_limit() -> usize {
    5
}
fn default_min_score() -> f32 {
    0.01
}
fn default_entity_limit() -> usize {
    3
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_sqlite_backend(),
            path: None,
            limit: default_memory_limit(),
            min_score: default_min_score(),
            entity_limit: default_entity_limit(),
        }
    }
}

impl MemoryConfig {
    pub fn db_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memory.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_sqlite_backend")]
    pub backend: String,

    /// Database path (default: `<config_dir>/sessions.db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_sqlite_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("sessions.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default = "default_skill_dirs")]
    pub dirs: Vec<PathBuf>,
}

fn default_skill_dirs() -> Vec<PathBuf> {
    vec![
        AppConfig::config_dir().join("skills"),
        PathBuf::from(".rago").join("skills"),
    ]
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            dirs: default_skill_dirs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_router_threshold")]
    pub threshold: f32,

    #[serde(default)]
    pub intents: Vec<IntentConfig>,
}

fn default_router_threshold() -> f32 {
    0.75
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_router_threshold(),
            intents: Vec::new(),
        }
    }
}

/// One routable intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    pub name: String,

    /// Example utterances embedded at startup
    pub examples: Vec<String>,

    /// Appended to the system preamble on a match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<String>,

    /// Tool subset (names or `prefix*`) pre-selected on a match
    #[serde(default)]
    pub tools: Vec<String>,
}

const BACKENDS: [&str; 2] = ["sqlite", "memory"];

impl AppConfig {
    /// Load configuration from the default path (`<config_dir>/config.toml`).
    ///
    /// Environment overrides:
    /// - `RAGO_CONFIG_DIR` relocates the config directory
    /// - `RAGO_ROUND_CAP` overrides `engine.round_cap`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = std::env::var("RAGO_ROUND_CAP") {
            self.engine.round_cap = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("RAGO_ROUND_CAP is not a number: {raw}"))
            })?;
            self.validate()?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        match std::env::var("RAGO_CONFIG_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs_home().join(".rago"),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.round_cap == 0 {
            return Err(ConfigError::ValidationError(
                "engine.round_cap must be at least 1".into(),
            ));
        }

        if self.engine.tool_timeout_secs == 0 || self.engine.round_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "engine timeouts must be > 0".into(),
            ));
        }

        if self.engine.max_concurrent_tools == 0 || self.engine.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_concurrent_tools and engine.event_buffer must be > 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.router.threshold) {
            return Err(ConfigError::ValidationError(
                "router.threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.memory.min_score) {
            return Err(ConfigError::ValidationError(
                "memory.min_score must be between 0.0 and 1.0".into(),
            ));
        }

        for (field, backend) in [("memory", &self.memory.backend), ("store", &self.store.backend)] {
            if !BACKENDS.contains(&backend.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "{field}.backend must be one of {BACKENDS:?}, got '{backend}'"
                )));
            }
        }

        for (tool, limit) in &self.registry.rate_limits {
            if limit.capacity == 0 || limit.refill_per_sec <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "registry.rate_limits.{tool}: capacity and refill_per_sec must be > 0"
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for profile in &self.profiles {
            if profile.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "profiles: id must not be empty".into(),
                ));
            }
            if !seen.insert(profile.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "profiles: duplicate id '{}'",
                    profile.id
                )));
            }
        }

        for intent in &self.router.intents {
            if intent.examples.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "router.intents.{}: at least one example is required",
                    intent.name
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
pub fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl ConfigError {
    pub fn kind(&self) -> rago_core::ErrorKind {
        rago_core::ErrorKind::Config
    }
}

impl From<ConfigError> for rago_core::Error {
    fn from(err: ConfigError) -> Self {
        rago_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.round_cap, 20);
        assert_eq!(config.engine.handoff_cap, 3);
        assert_eq!(config.transport.http_max_retries, 5);
        assert_eq!(config.restart.max_restarts, 3);
        assert!((config.router.threshold - 0.75).abs() < f32::EPSILON);
        assert!((config.memory.min_score - 0.01).abs() < f32::EPSILON);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.engine.round_cap, config.engine.round_cap);
        assert_eq!(parsed.memory.backend, config.memory.backend);
    }

    #[test]
    fn zero_round_cap_rejected() {
        let mut config = AppConfig::default();
        config.engine.round_cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.store.backend = "postgres".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store.backend"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.engine.tool_timeout_secs, 30);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine\nround_cap = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn full_config_parsing() {
        let toml_str = r#"
[engine]
round_cap = 4
tool_timeout_secs = 5

[registry]
cache_ttl_secs = 10
cacheable = ["mcp_clock_now"]

[registry.rate_limits.mcp_web_fetch]
capacity = 2
refill_per_sec = 0.5

[memory]
backend = "memory"

[router]
enabled = true

[[router.intents]]
name = "weather"
examples = ["what's the weather", "is it raining"]
tools = ["mcp_weather_*"]

[[profiles]]
id = "researcher"
preamble = "You research things."
tools = ["rag_*"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine.round_cap, 4);
        assert_eq!(config.engine.round_timeout_secs, 120);
        assert_eq!(config.registry.rate_limits["mcp_web_fetch"].capacity, 2);
        assert_eq!(config.router.intents[0].tools, ["mcp_weather_*"]);
        assert!(config.profiles[0].allows("rag_query"));
    }

    #[test]
    fn duplicate_profiles_rejected() {
        let mut config = AppConfig::default();
        config.profiles = vec![
            AgentProfile::new("a", "one"),
            AgentProfile::new("a", "two"),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_error_converts_to_core_error() {
        let err: rago_core::Error = ConfigError::ValidationError("bad".into()).into();
        assert_eq!(err.kind(), rago_core::ErrorKind::Config);
    }
}
