//! The protocol server catalog (`mcpServers.json`).
//!
//! ```json
//! { "mcpServers": {
//!     "fs":  { "command": "mcp-fs", "args": ["--root", "."] },
//!     "web": { "url": "http://localhost:8931/mcp", "headers": {"Authorization": "Bearer x"} }
//! } }
//! ```
//!
//! A malformed file is an error; a malformed entry is skipped with a
//! warning so one bad server never takes its siblings down.

use crate::{ConfigError, RestartConfig, dirs_home};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File names accepted in each search directory, in priority order.
pub const CATALOG_FILE_NAMES: [&str; 2] = ["mcpServers.json", "mcp.json"];

/// How to reach a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportSpec {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl TransportSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub delay_ms: u64,
}

impl From<&RestartConfig> for RestartPolicy {
    fn from(config: &RestartConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            delay_ms: config.delay_ms,
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from(&RestartConfig::default())
    }
}

/// Configuration for one protocol server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: TransportSpec,
    pub auto_start: bool,
    pub restart: RestartPolicy,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ServerDescriptor {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportSpec::Stdio {
                command: command.into(),
                args,
                env: BTreeMap::new(),
                working_dir: None,
            },
            auto_start: true,
            restart: RestartPolicy::default(),
            tags: Vec::new(),
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportSpec::Http {
                url: url.into(),
                headers: BTreeMap::new(),
            },
            auto_start: true,
            restart: RestartPolicy::default(),
            tags: Vec::new(),
        }
    }

    pub fn with_restart(mut self, max_restarts: u32, delay_ms: u64) -> Self {
        self.restart = RestartPolicy {
            max_restarts,
            delay_ms,
        };
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

/// One entry as it appears in the file.
#[derive(Debug, Clone, Deserialize)]
struct RawServer {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default, alias = "cwd")]
    working_dir: Option<PathBuf>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    auto_start: Option<bool>,
    #[serde(default)]
    max_restarts: Option<u32>,
    #[serde(default)]
    restart_delay_ms: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
}

impl RawServer {
    fn into_descriptor(
        self,
        name: &str,
        defaults: &RestartConfig,
    ) -> Result<ServerDescriptor, String> {
        // `type` defaults to stdio unless a url is present.
        let kind = match self.kind.as_deref() {
            Some(kind) => kind.to_ascii_lowercase(),
            None if self.url.is_some() => "http".into(),
            None => "stdio".into(),
        };

        let transport = match kind.as_str() {
            "stdio" => TransportSpec::Stdio {
                command: self
                    .command
                    .filter(|c| !c.trim().is_empty())
                    .ok_or("stdio server requires 'command'")?,
                args: self.args,
                env: self.env,
                working_dir: self.working_dir,
            },
            "http" | "sse" | "streamable-http" => TransportSpec::Http {
                url: self
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or("http server requires 'url'")?,
                headers: self.headers,
            },
            other => return Err(format!("unknown transport type '{other}'")),
        };

        Ok(ServerDescriptor {
            name: name.to_string(),
            transport,
            auto_start: self.auto_start.unwrap_or(true),
            restart: RestartPolicy {
                max_restarts: self.max_restarts.unwrap_or(defaults.max_restarts),
                delay_ms: self.restart_delay_ms.unwrap_or(defaults.delay_ms),
            },
            tags: self.tags,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(rename = "mcpServers", default)]
    servers: BTreeMap<String, serde_json::Value>,
}

/// The set of server descriptors read from a catalog file.
#[derive(Debug, Clone, Default)]
pub struct ServerCatalog {
    pub servers: Vec<ServerDescriptor>,
    /// The file the catalog was read from, if any
    pub source: Option<PathBuf>,
}

impl ServerCatalog {
    /// Directories searched by [`ServerCatalog::discover`], in order.
    pub fn search_dirs() -> Vec<PathBuf> {
        let home = dirs_home().join(".rago");
        let mut dirs = Vec::with_capacity(3);
        if let Ok(cwd) = std::env::current_dir() {
            dirs.push(cwd);
        }
        dirs.push(home.clone());
        dirs.push(home.join("config"));
        dirs
    }

    /// Find the first catalog file in the standard locations.
    /// Finding none yields an empty catalog.
    pub fn discover(defaults: &RestartConfig) -> Result<Self, ConfigError> {
        Self::discover_in(&Self::search_dirs(), defaults)
    }

    pub fn discover_in(dirs: &[PathBuf], defaults: &RestartConfig) -> Result<Self, ConfigError> {
        for dir in dirs {
            for file in CATALOG_FILE_NAMES {
                let candidate = dir.join(file);
                if candidate.is_file() {
                    debug!(path = %candidate.display(), "Found server catalog");
                    return Self::load_from(&candidate, defaults);
                }
            }
        }
        debug!("No server catalog found, starting with no servers");
        Ok(Self::default())
    }

    /// Parse the catalog at `path`.
    pub fn load_from(path: &Path, defaults: &RestartConfig) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut catalog = Self::parse(&content, defaults).map_err(|reason| {
            ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            }
        })?;
        catalog.source = Some(path.to_path_buf());
        Ok(catalog)
    }

    /// Parse catalog JSON. Bad entries are skipped with a warning.
    pub fn parse(content: &str, defaults: &RestartConfig) -> Result<Self, String> {
        let raw: RawCatalog = serde_json::from_str(content).map_err(|e| e.to_string())?;

        let mut servers = Vec::with_capacity(raw.servers.len());
        for (name, value) in raw.servers {
            let entry = serde_json::from_value::<RawServer>(value)
                .map_err(|e| e.to_string())
                .and_then(|raw| raw.into_descriptor(&name, defaults));
            match entry {
                Ok(descriptor) => servers.push(descriptor),
                Err(reason) => warn!(server = %name, %reason, "Skipping malformed server entry"),
            }
        }

        Ok(Self {
            servers,
            source: None,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|s| s.name == name)
    }
}
