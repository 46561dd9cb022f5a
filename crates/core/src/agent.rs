//! Agent profiles: the unit of handoff.

use serde::{Deserialize, Serialize};

/// A named system preamble plus the tools it may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,

    #[serde(default)]
    pub description: String,

    pub preamble: String,

    /// Exact names or `prefix*` patterns; empty allows every tool
    #[serde(default)]
    pub tools: Vec<String>,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, preamble: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            preamble: preamble.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The built-in profile used when a run names none.
    pub fn default_profile() -> Self {
        Self::new(
            "default",
            "You are an autonomous assistant. Work towards the user's goal step by step. \
             Call tools when you need information or need to act, and answer directly \
             once you have what you need.",
        )
    }

    /// Whether this profile's whitelist admits `tool`.
    pub fn allows(&self, tool: &str) -> bool {
        whitelist_allows(&self.tools, tool)
    }
}

/// Match `tool` against a whitelist of exact names and `prefix*` patterns.
/// An empty whitelist admits everything.
pub fn whitelist_allows(whitelist: &[String], tool: &str) -> bool {
    whitelist.is_empty()
        || whitelist.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => tool.starts_with(prefix),
            None => pattern == tool,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_whitelist_allows_all() {
        assert!(AgentProfile::default_profile().allows("mcp_fs_ls"));
    }

    #[test]
    fn prefix_and_exact_patterns() {
        let profile = AgentProfile::new("research", "You research.")
            .with_tools(vec!["rag_*".into(), "mcp_web_fetch".into()]);
        assert!(profile.allows("rag_query"));
        assert!(profile.allows("mcp_web_fetch"));
        assert!(!profile.allows("mcp_web_post"));
        assert!(!profile.allows("skill_deploy"));
    }
}
