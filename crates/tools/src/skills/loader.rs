//! Skill discovery and `SKILL.md` parsing.

use super::{Skill, SkillStep, SkillVariable, frontmatter};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SKILL_FILE: &str = "SKILL.md";

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid frontmatter in {path}: {message}")]
    Frontmatter { path: PathBuf, message: String },

    #[error("Invalid variable '{variable}' in {path}: {message}")]
    Variable {
        path: PathBuf,
        variable: String,
        message: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    name: Option<String>,
    #[serde(default)]
    description: String,
    version: Option<Value>,
    author: Option<String>,
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    command: Option<String>,
    #[serde(default)]
    fork_mode: bool,
    #[serde(default = "default_true")]
    user_invocable: bool,
    #[serde(default)]
    disable_model_invocation: bool,
    #[serde(default)]
    variables: Vec<SkillVariable>,
}

fn default_true() -> bool {
    true
}

/// Parse one skill document.
pub fn parse_skill(id: &str, document: &str, path: &Path) -> Result<Skill, SkillError> {
    let invalid = |message: String| SkillError::Frontmatter {
        path: path.to_path_buf(),
        message,
    };
    let (front, body) = frontmatter::split(document).map_err(invalid)?;
    let front: Frontmatter = match front {
        Some(source) => {
            let map: Map<String, Value> = frontmatter::parse(source).map_err(invalid)?;
            serde_json::from_value(Value::Object(map)).map_err(|e| invalid(e.to_string()))?
        }
        None => Frontmatter {
            user_invocable: true,
            ..Frontmatter::default()
        },
    };

    for variable in &front.variables {
        if let Some(pattern) = &variable.pattern
            && let Err(e) = regex_lite::Regex::new(pattern)
        {
            return Err(SkillError::Variable {
                path: path.to_path_buf(),
                variable: variable.name.clone(),
                message: format!("bad pattern: {e}"),
            });
        }
    }

    let (overview, steps) = parse_steps(body);
    let version = front.version.map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    });

    Ok(Skill {
        id: id.to_lowercase(),
        name: front.name.unwrap_or_else(|| id.to_string()),
        description: front.description,
        version,
        author: front.author,
        category: front.category,
        tags: front.tags,
        command: front.command,
        fork_mode: front.fork_mode,
        user_invocable: front.user_invocable,
        disable_model_invocation: front.disable_model_invocation,
        variables: front.variables,
        steps,
        overview,
        path: path.to_path_buf(),
    })
}

/// Split a body on `## ` headers. Deeper headers stay inside the step.
fn parse_steps(body: &str) -> (String, Vec<SkillStep>) {
    let mut overview = String::new();
    let mut steps: Vec<SkillStep> = Vec::new();
    for line in body.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            steps.push(SkillStep {
                title: title.trim().to_string(),
                content: String::new(),
            });
            continue;
        }
        let target = match steps.last_mut() {
            Some(step) => &mut step.content,
            None => &mut overview,
        };
        target.push_str(line);
        target.push('\n');
    }
    for step in &mut steps {
        step.content = step.content.trim().to_string();
    }
    (overview.trim().to_string(), steps)
}

/// Scans skill directories. Later directories override earlier ones on
/// id collisions, so project skills shadow user skills.
pub struct SkillLoader {
    dirs: Vec<PathBuf>,
}

impl SkillLoader {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Load every `*/SKILL.md`. Broken skills are skipped with a warning.
    pub fn load_all(&self) -> Vec<Skill> {
        let mut skills: BTreeMap<String, Skill> = BTreeMap::new();
        for dir in &self.dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                debug!(dir = %dir.display(), "Skill directory not present");
                continue;
            };
            let mut paths: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.join(SKILL_FILE).is_file())
                .collect();
            paths.sort();

            for skill_dir in paths {
                match Self::load_dir(&skill_dir) {
                    Ok(skill) => {
                        if let Some(previous) = skills.insert(skill.id.clone(), skill) {
                            debug!(skill = %previous.id, "Skill overridden by a later directory");
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping skill"),
                }
            }
        }
        info!(count = skills.len(), "Loaded skills");
        skills.into_values().collect()
    }

    pub fn load_dir(skill_dir: &Path) -> Result<Skill, SkillError> {
        let path = skill_dir.join(SKILL_FILE);
        let document = std::fs::read_to_string(&path).map_err(|source| SkillError::Read {
            path: path.clone(),
            source,
        })?;
        let id = skill_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        parse_skill(&id, &document, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::VariableType;

    const GIT_COMMIT: &str = r#"---
name: Git Commit
description: Write a conventional commit for staged changes
category: vcs
tags: [git]
command: git commit -m "{{message}}"
variables:
  - name: scope
    type: string
    required: true
    pattern: "^[a-z]+$"
  - name: message
    description: Commit subject
    default: update
---
Commit carefully.

## Inspect
Run `git diff --staged` for {{scope}}.

## Commit
Use the subject "{{scope}}: {{message}}".
### Notes
Keep it short.
"#;

    fn write_skill(root: &Path, id: &str, document: &str) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SKILL_FILE), document).unwrap();
    }

    #[test]
    fn parses_frontmatter_and_steps() {
        let skill = parse_skill("Git-Commit", GIT_COMMIT, Path::new("SKILL.md")).unwrap();
        assert_eq!(skill.id, "git-commit");
        assert_eq!(skill.name, "Git Commit");
        assert_eq!(skill.category.as_deref(), Some("vcs"));
        assert!(skill.user_invocable);
        assert!(skill.enabled());
        assert_eq!(skill.overview, "Commit carefully.");

        assert_eq!(skill.variables.len(), 2);
        assert!(skill.variables[0].required);
        assert_eq!(skill.variables[1].kind, VariableType::String);

        assert_eq!(skill.steps.len(), 2);
        assert_eq!(skill.steps[0].title, "Inspect");
        assert!(skill.steps[1].content.contains("### Notes"));
    }

    #[test]
    fn missing_frontmatter_uses_defaults() {
        let skill = parse_skill("notes", "## Only step\nDo it.", Path::new("SKILL.md")).unwrap();
        assert_eq!(skill.name, "notes");
        assert!(skill.user_invocable);
        assert_eq!(skill.steps[0].content, "Do it.");
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let doc = "---\nvariables:\n  - name: x\n    pattern: \"([\"\n---\n";
        let err = parse_skill("broken", doc, Path::new("SKILL.md")).unwrap_err();
        assert!(matches!(err, SkillError::Variable { .. }));
    }

    #[test]
    fn loader_skips_broken_and_later_dirs_win() {
        let user = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        write_skill(user.path(), "git-commit", GIT_COMMIT);
        write_skill(user.path(), "broken", "---\nname: [unclosed\n");
        write_skill(
            project.path(),
            "git-commit",
            "---\nname: Project Commit\n---\n## Step\nx\n",
        );
        std::fs::create_dir_all(user.path().join("not-a-skill")).unwrap();

        let loader = SkillLoader::new(vec![
            user.path().to_path_buf(),
            project.path().to_path_buf(),
            PathBuf::from("/definitely/missing"),
        ]);
        let skills = loader.load_all();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "Project Commit");
    }
}
