//! `skill_<id>`: validates variables, fills `{{name}}` placeholders, and
//! hands the rendered steps back as the observation.

use super::{Skill, SkillVariable, VariableType};
use crate::naming;
use async_trait::async_trait;
use rago_core::error::ToolError;
use rago_core::schema::{JsonType, PropertySchema, ToolSchema, ValidatedArgs};
use rago_core::tool::{Tool, ToolOutput};
use regex_lite::Regex;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

pub struct SkillTool {
    name: String,
    description: String,
    skill: Skill,
    patterns: HashMap<String, Regex>,
}

impl SkillTool {
    /// Fails only if a variable pattern does not compile.
    pub fn new(skill: Skill) -> Result<Self, regex_lite::Error> {
        let mut patterns = HashMap::new();
        for variable in &skill.variables {
            if let Some(pattern) = &variable.pattern {
                patterns.insert(variable.name.clone(), Regex::new(pattern)?);
            }
        }
        let description = match &skill.category {
            Some(category) => format!("[{category}] {}", skill.description),
            None => skill.description.clone(),
        };
        Ok(Self {
            name: naming::skill_tool_name(&skill.id),
            description,
            skill,
            patterns,
        })
    }

    pub fn skill(&self) -> &Skill {
        &self.skill
    }

    fn property(variable: &SkillVariable) -> PropertySchema {
        let kind = match variable.kind {
            VariableType::String => JsonType::String,
            VariableType::Number => JsonType::Number,
            VariableType::Integer => JsonType::Integer,
            VariableType::Boolean => JsonType::Boolean,
        };
        let mut property = PropertySchema::typed(kind, variable.description.clone());
        property.default = variable.default.clone();
        if let Some(pattern) = &variable.pattern {
            property.extra.insert("pattern".into(), Value::String(pattern.clone()));
        }
        property
    }

    /// Resolve every declared variable: supplied value, else default.
    fn bind(&self, args: &ValidatedArgs) -> Result<Map<String, Value>, ToolError> {
        let mut bound = Map::new();
        for variable in &self.skill.variables {
            let value = args
                .get(&variable.name)
                .filter(|v| !v.is_null())
                .cloned()
                .or_else(|| variable.default.clone());
            let Some(value) = value else {
                if variable.required {
                    return Err(ToolError::invalid_args(
                        &self.name,
                        format!("missing required variable '{}'", variable.name),
                    ));
                }
                continue;
            };
            if let Some(regex) = self.patterns.get(&variable.name) {
                let text = render_value(&value);
                if !regex.is_match(&text) {
                    return Err(ToolError::invalid_args(
                        &self.name,
                        format!(
                            "variable '{}' = '{text}' does not match pattern {}",
                            variable.name,
                            regex.as_str()
                        ),
                    ));
                }
            }
            bound.insert(variable.name.clone(), value);
        }
        Ok(bound)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace `{{name}}` and `{{ name }}`; unknown placeholders are kept.
pub fn substitute(template: &str, vars: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.get(key) {
                    Some(value) => out.push_str(&render_value(value)),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> ToolSchema {
        let mut schema = ToolSchema::object();
        for variable in &self.skill.variables {
            schema = schema.property(variable.name.clone(), Self::property(variable));
            if variable.required && variable.default.is_none() {
                schema = schema.require(variable.name.clone());
            }
        }
        schema
    }

    async fn call(&self, args: ValidatedArgs) -> Result<ToolOutput, ToolError> {
        let vars = self.bind(&args)?;

        let mut text = format!("# Skill: {}\n", self.skill.name);
        if !self.skill.overview.is_empty() {
            text.push('\n');
            text.push_str(&substitute(&self.skill.overview, &vars));
            text.push('\n');
        }
        let steps: Vec<Value> = self
            .skill
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let content = substitute(&step.content, &vars);
                text.push_str(&format!("\n{}. {}\n{content}\n", i + 1, step.title));
                json!({"title": step.title, "content": content})
            })
            .collect();
        let command = self.skill.command.as_deref().map(|c| substitute(c, &vars));
        if let Some(command) = &command {
            text.push_str(&format!("\nCommand: {command}\n"));
        }

        Ok(ToolOutput {
            text: text.trim_end().to_string(),
            data: Some(json!({
                "skill": self.skill.id,
                "variables": vars,
                "steps": steps,
                "command": command,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::parse_skill;
    use std::path::Path;

    const DEPLOY: &str = r#"---
name: Deploy
description: Ship a service
category: ops
command: deploy {{service}} --env {{env}}
variables:
  - name: service
    required: true
    pattern: "^[a-z][a-z0-9-]*$"
  - name: env
    default: staging
  - name: replicas
    type: integer
---
## Build
Build {{ service }} for {{env}}.

## Roll out
Roll out {{replicas}} replicas of {{service}}.
"#;

    fn tool() -> SkillTool {
        SkillTool::new(parse_skill("deploy", DEPLOY, Path::new("SKILL.md")).unwrap()).unwrap()
    }

    #[test]
    fn schema_derived_from_variables() {
        let tool = tool();
        assert_eq!(tool.name(), "skill_deploy");
        assert_eq!(tool.description(), "[ops] Ship a service");
        let schema = tool.schema().to_value();
        assert_eq!(schema["required"], json!(["service"]));
        assert_eq!(schema["properties"]["replicas"]["type"], "integer");
        assert_eq!(schema["properties"]["env"]["default"], "staging");
        assert_eq!(schema["properties"]["service"]["pattern"], "^[a-z][a-z0-9-]*$");
    }

    #[tokio::test]
    async fn renders_steps_with_defaults() {
        let tool = tool();
        let args = tool
            .schema()
            .validate(tool.name(), json!({"service": "api"}))
            .unwrap();
        let out = tool.call(args).await.unwrap();
        assert!(out.text.contains("1. Build\nBuild api for staging."));
        // No value and no default: placeholder stays.
        assert!(out.text.contains("Roll out {{replicas}} replicas of api."));
        assert!(out.text.contains("Command: deploy api --env staging"));
        assert_eq!(out.data.unwrap()["variables"]["env"], "staging");
    }

    #[tokio::test]
    async fn pattern_mismatch_is_invalid_args() {
        let tool = tool();
        let args = tool
            .schema()
            .validate(tool.name(), json!({"service": "Bad Name"}))
            .unwrap();
        let err = tool.call(args).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
    }

    #[tokio::test]
    async fn schema_rejects_wrong_type() {
        let tool = tool();
        let err = tool
            .schema()
            .validate(tool.name(), json!({"service": "api", "replicas": "three"}))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
    }

    #[test]
    fn substitute_handles_unterminated() {
        let vars = Map::from_iter([("a".to_string(), json!(1))]);
        assert_eq!(substitute("x {{a}} {{b}} {{", &vars), "x 1 {{b}} {{");
    }
}
