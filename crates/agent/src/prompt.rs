//! Prompt assembly for the round loop.
//!
//! The initial working list is, in order:
//!
//! 1. **System**: profile preamble, routed intent guidance, handoff
//!    targets, and the retrieved memory block
//! 2. **History**: the session as the model should see it (summary + tail)
//! 3. **Goal**: the user message for this run
//!
//! Everything after the goal is produced by the loop itself.

use crate::router::RouteMatch;
use rago_core::agent::AgentProfile;
use rago_core::llm::ToolDefinition;
use rago_core::message::{Message, Role};
use rago_core::plan::Step;
use serde_json::{Value, json};

/// The synthetic tool through which the LLM asks for a handoff.
pub const TRANSFER_TOOL: &str = "transfer_to_agent";

pub struct PromptParts<'a> {
    pub profile: &'a AgentProfile,
    pub route: Option<&'a RouteMatch>,
    pub memory: &'a str,
    pub handoff_targets: &'a [AgentProfile],
}

pub fn system_prompt(parts: &PromptParts<'_>) -> String {
    let mut prompt = parts.profile.preamble.trim().to_string();

    if let Some(preamble) = parts.route.and_then(|r| r.preamble.as_deref()) {
        prompt.push_str("\n\n");
        prompt.push_str(preamble.trim());
    }

    let targets: Vec<&AgentProfile> = parts
        .handoff_targets
        .iter()
        .filter(|p| p.id != parts.profile.id)
        .collect();
    if !targets.is_empty() {
        prompt.push_str(&format!(
            "\n\n## Other agents\nCall `{TRANSFER_TOOL}` to hand the conversation to a better suited agent:\n"
        ));
        for target in targets {
            if target.description.is_empty() {
                prompt.push_str(&format!("- {}\n", target.id));
            } else {
                prompt.push_str(&format!("- {}: {}\n", target.id, target.description));
            }
        }
    }

    if !parts.memory.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(parts.memory.trim_end());
    }
    prompt
}

pub fn initial_messages(system: String, history: Vec<Message>, goal: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history);
    messages.push(Message::user(goal));
    messages
}

/// Replace the leading system message after a handoff.
pub fn swap_system(messages: &mut [Message], system: String) {
    if let Some(first) = messages.first_mut()
        && first.role == Role::System
        && !first.has_flag("summary")
    {
        first.content = system;
    }
}

/// A shorter list for the retry after a failed LLM call: the system
/// prompt, the goal at `goal_index`, and at most `keep` later messages.
/// Session history before the goal is dropped, and the kept tail never
/// starts with a tool result whose call was cut off.
pub fn truncate_for_retry(messages: &[Message], goal_index: usize, keep: usize) -> Vec<Message> {
    let mut out = Vec::with_capacity(keep + 2);
    if let Some(first) = messages.first()
        && first.role == Role::System
        && goal_index > 0
    {
        out.push(first.clone());
    }
    let Some(goal) = messages.get(goal_index) else {
        return messages.to_vec();
    };
    out.push(goal.clone());

    let after = &messages[goal_index + 1..];
    let start = after.len().saturating_sub(keep);
    out.extend(
        after[start..]
            .iter()
            .skip_while(|m| m.role == Role::Tool)
            .cloned(),
    );
    out
}

pub fn handoff_tool(profiles: &[AgentProfile], current: &str) -> ToolDefinition {
    let targets: Vec<&str> = profiles
        .iter()
        .map(|p| p.id.as_str())
        .filter(|id| *id != current)
        .collect();
    ToolDefinition {
        name: TRANSFER_TOOL.into(),
        description: "Hand the conversation to another agent profile.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Profile id of the agent to hand over to",
                    "enum": targets
                }
            },
            "required": ["agent"]
        }),
    }
}

/// Schema for `plan` output.
pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": {"type": "string"},
                        "tool": {"type": ["string", "null"]},
                        "args": {"type": "object"}
                    },
                    "required": ["description"]
                }
            }
        },
        "required": ["steps"]
    })
}

pub fn plan_prompt(goal: &str, catalog: &[ToolDefinition]) -> String {
    let mut prompt = format!(
        "Break the goal below into an ordered list of steps. Each step has a short \
         description and, when a tool should perform it, the tool name and an \
         argument object matching that tool's parameters. Use only the listed tools.\n\n\
         Goal:\n{goal}\n\nTools:\n"
    );
    if catalog.is_empty() {
        prompt.push_str("(none)\n");
    }
    for tool in catalog {
        prompt.push_str(&format!("- {}: {} {}\n", tool.name, tool.description, tool.parameters));
    }
    prompt
}

/// The user turn that drives one step of a stored plan.
pub fn step_instruction(index: usize, total: usize, step: &Step) -> String {
    match &step.tool {
        Some(tool) => format!(
            "Step {} of {total}: {}\nCall `{tool}` now. Suggested arguments: {}",
            index + 1,
            step.description,
            step.args
        ),
        None => format!(
            "Step {} of {total}: {}\nDo this step without tools and reply with the result.",
            index + 1,
            step.description
        ),
    }
}

pub const FINAL_INSTRUCTION: &str =
    "All steps are done. Reply with the final answer for the goal, without calling tools.";

pub const FAILED_STEP_INSTRUCTION: &str = "A step failed and the remaining steps were skipped. \
     Reply with what was done and what failed, without calling tools.";
