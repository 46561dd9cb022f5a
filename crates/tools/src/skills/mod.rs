//! Skills: declarative tools defined by `SKILL.md` files.
//!
//! ```text
//! ~/.rago/skills/
//! └── git-commit/
//!     └── SKILL.md    frontmatter + "## " step sections
//! ```

pub mod frontmatter;
pub mod loader;
pub mod tool;

pub use loader::{SkillError, SkillLoader, parse_skill};
pub use tool::SkillTool;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Declared type of a skill variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillVariable {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "type", default)]
    pub kind: VariableType,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Regex the rendered value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// One `## ` section of the skill body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillStep {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    /// Directory name, lowercased
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub command: Option<String>,
    pub fork_mode: bool,
    pub user_invocable: bool,
    pub disable_model_invocation: bool,
    pub variables: Vec<SkillVariable>,
    pub steps: Vec<SkillStep>,

    /// Markdown before the first step
    pub overview: String,
    pub path: PathBuf,
}

impl Skill {
    /// Whether the LLM may see and call this skill.
    pub fn enabled(&self) -> bool {
        !self.disable_model_invocation
    }

    /// One-line summary for listings.
    pub fn summary(&self) -> String {
        match &self.category {
            Some(category) => format!("[{}] {} ({category}): {}", self.id, self.name, self.description),
            None => format!("[{}] {}: {}", self.id, self.name, self.description),
        }
    }
}
