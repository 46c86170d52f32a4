//! System prompts and synthetic messages for the onboarding loop.
//!
//! Everything here is a pure function of its inputs. The loop controller
//! gathers state from the store and hands it in through [`PromptContext`].

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDate;
use serde_json::Value;

use super::model::{Boat, Flow, Journey, Profile};
use super::state::OnboardingStep;
use super::types::ToolResult;
use crate::tools::ToolDefinition;

/// Shown by the HTTP layer when a turn ends with no usable content.
pub const FALLBACK_MESSAGE: &str =
    "Sorry, I didn't quite catch that. Could you try again in a moment?";

/// Everything the prompt shows about the current state.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub today: NaiveDate,
    pub identity_present: bool,
    pub profile: Option<&'a Profile>,
    pub boats: &'a [Boat],
    pub journeys: &'a [Journey],
    /// Allowed tools for the step, already filtered.
    pub tools: &'a [ToolDefinition],
    pub stored_context: &'a BTreeMap<String, String>,
}

const TOOL_CALL_FORMAT: &str = "\
## Tool Call Format

To call a tool, write a fenced block tagged tool_call containing one JSON object:

```tool_call
{\"name\": \"tool_name\", \"arguments\": {\"field\": \"value\"}}
```

Rules:
- One call per block. Use several blocks for several calls; they run in order.
- Fill every argument with the user's actual answer. Never write placeholder \
values such as \"<name>\", \"TBD\", \"unknown\" or \"...\". If you do not know a \
value yet, ask the user instead of calling the tool.
- Only call tools listed under Available Tools.
- Never say something was saved unless a tool result in this conversation \
confirms it.";

/// Build the system prompt for one model call.
pub fn build_prompt(flow: Flow, step: OnboardingStep, ctx: &PromptContext<'_>) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(flow_intro(flow));
    out.push_str("\n\n");
    render_state(&mut out, step, ctx);
    out.push_str("\n## Instructions\n\n");
    out.push_str(step_instructions(flow, step));
    out.push_str("\n\n");
    render_tools(&mut out, ctx.tools);
    out.push('\n');
    out.push_str(TOOL_CALL_FORMAT);
    out.push('\n');
    render_stored_context(&mut out, ctx.stored_context);
    out
}

fn flow_intro(flow: Flow) -> &'static str {
    match flow {
        Flow::Prospect => "\
You are the onboarding assistant of a sailing crew-matching service. You are \
talking with someone who would like to sail as crew. Learn what kind of sailing \
they are after, show them real journeys when it helps, and get their crew \
profile saved. Keep replies short and ask one question at a time.",
        Flow::Owner => "\
You are the onboarding assistant of a sailing crew-matching service. You are \
talking with a boat owner or skipper who wants to find crew. Get their skipper \
profile saved, then their boat, then their first journey. Keep replies short \
and ask one question at a time.",
    }
}

fn render_state(out: &mut String, step: OnboardingStep, ctx: &PromptContext<'_>) {
    out.push_str("## Current State\n\n");
    let _ = writeln!(out, "- Today: {}", ctx.today);
    let _ = writeln!(out, "- Step: {}", step.label());
    let _ = writeln!(
        out,
        "- Signed in: {}",
        if ctx.identity_present { "yes" } else { "no" }
    );
    match ctx.profile {
        Some(profile) => {
            let _ = writeln!(out, "- Profile: {}", profile.summary());
        }
        None => out.push_str("- Profile: none yet\n"),
    }
    if !ctx.boats.is_empty() {
        out.push_str("- Boats:\n");
        for boat in ctx.boats {
            let _ = writeln!(out, "  - {}", boat.summary());
        }
    }
    if !ctx.journeys.is_empty() {
        out.push_str("- Journeys:\n");
        for journey in ctx.journeys {
            let _ = writeln!(out, "  - {}", journey.summary());
        }
    }
}

fn step_instructions(flow: Flow, step: OnboardingStep) -> &'static str {
    match (flow, step) {
        (Flow::Prospect, OnboardingStep::SignUp) => "\
The user is not signed in. Find out where they would like to sail, their \
comfort zone (risk level) and their experience. You may search journeys to \
show real examples. When you know enough, call suggest_sign_up so they can \
create an account and keep their preferences.",
        (Flow::Owner, OnboardingStep::SignUp) => "\
The user is not signed in. Explain briefly that an account is needed to list \
a boat, and call suggest_sign_up.",
        (_, OnboardingStep::CreateProfile) => "\
The user is signed in but has no profile. Collect their name and a short \
introduction, their sailing experience and comfort zone, then call \
create_profile with everything you have learned. Use the stored context only \
for the fields its heading describes.",
        (Flow::Owner, OnboardingStep::AddBoat) => "\
The profile is saved. Ask about the boat: its name, type, make and model, \
length, home port and how many crew it sleeps. Call create_boat once you have \
at least the name.",
        (Flow::Owner, OnboardingStep::AddJourney) => "\
The boat is saved. Ask about the first journey: a name, dates, the route as \
legs with named waypoints, the skills and experience crew need, and how costs \
are shared. Call create_journey. Only include waypoint coordinates you are \
sure of; never invent them.",
        (_, OnboardingStep::Completed) => "\
Onboarding is complete. Help the user refine their details with the update \
tools, or answer their questions.",
        (Flow::Prospect, OnboardingStep::AddBoat | OnboardingStep::AddJourney) => "\
Onboarding is complete. Help the user refine their profile or find journeys.",
    }
}

fn render_tools(out: &mut String, tools: &[ToolDefinition]) {
    out.push_str("## Available Tools\n\n");
    if tools.is_empty() {
        out.push_str("(none)\n");
        return;
    }
    for tool in tools {
        let _ = writeln!(out, "### {}\n{}", tool.name, tool.description);
        let params = compact_schema(&tool.parameters);
        if !params.is_empty() {
            let _ = writeln!(out, "Arguments: {params}");
        }
        out.push('\n');
    }
}

/// `name: type` pairs, required ones marked with `*`.
fn compact_schema(schema: &Value) -> String {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return String::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    props
        .iter()
        .map(|(name, prop)| {
            let mut ty = prop
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("any")
                .to_string();
            if let Some(values) = prop.get("enum").and_then(Value::as_array) {
                let values: Vec<&str> = values.iter().filter_map(Value::as_str).collect();
                ty = values.join("|");
            } else if ty == "array"
                && let Some(item_ty) = prop.pointer("/items/type").and_then(Value::as_str)
            {
                ty = format!("{item_ty}[]");
            }
            let star = if required.contains(&name.as_str()) { "*" } else { "" };
            format!("{name}{star}: {ty}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_stored_context(out: &mut String, blocks: &BTreeMap<String, String>) {
    let blocks: Vec<(&String, &String)> = blocks
        .iter()
        .filter(|(_, body)| !body.trim().is_empty())
        .collect();
    if blocks.is_empty() {
        return;
    }
    out.push_str("\n## Stored Context\n\n");
    out.push_str(
        "Each block below stands on its own. Information under one heading must \
         never be used to fill fields that belong to another heading. For example, \
         what the user wants from others is never their own profile.\n",
    );
    for (label, body) in blocks {
        let _ = write!(out, "\n### {}\n{}\n", label.trim(), body.trim());
    }
}

/// Feed tool results back to the model as one user-visible-to-model message.
pub fn tool_results_message(results: &[ToolResult]) -> String {
    let mut out = String::from("Tool results:\n");
    for result in results {
        let body = match (&result.error, &result.result) {
            (Some(error), _) => format!("ERROR: {error}. Nothing was saved by this call."),
            (None, Some(value)) => value.to_string(),
            (None, None) => "ok".to_string(),
        };
        let _ = writeln!(out, "- {} [{}]: {}", result.name, result.tool_call_id, body);
    }
    out.push_str("\nContinue the conversation using these results.");
    out
}

pub fn nudge_message(tool: &str) -> String {
    format!(
        "You described this as done, but no {tool} call was made, so nothing was saved. \
         If you have the details, emit the {tool} tool_call block now with the real values. \
         Otherwise ask the user for what is missing."
    )
}

pub fn assume_exists_message(tool: &str) -> String {
    format!(
        "Stop repeating the {tool} request. Assume the record probably already exists \
         and continue with the next part of onboarding."
    )
}

pub fn malformed_retry_message() -> &'static str {
    "Your last message contained a tool call that could not be parsed. Resend it as a \
     single fenced tool_call block holding valid JSON with \"name\" and \"arguments\". \
     Use complete values only: no placeholder values, no comments, no trailing commas."
}

/// Canned reply after a step's terminal mutation succeeds.
pub fn terminal_success_message(flow: Flow, tool: &str, next: OnboardingStep) -> String {
    let done = match tool {
        "create_profile" => "Your profile is saved.",
        "create_boat" => "Your boat is saved.",
        "create_journey" => "Your journey is saved.",
        _ => "Saved.",
    };
    let next_hint = match (flow, next) {
        (Flow::Owner, OnboardingStep::AddBoat) => " Next, tell me about your boat.",
        (Flow::Owner, OnboardingStep::AddJourney) => {
            " Next, let's plan your first journey. Where are you heading?"
        }
        (Flow::Prospect, OnboardingStep::Completed) => {
            " You can now browse journeys that match your experience."
        }
        (_, OnboardingStep::Completed) => " You're all set.",
        _ => "",
    };
    format!("{done}{next_hint}")
}

/// Canned reply for an approved action.
pub fn approved_action_message(result: &ToolResult) -> String {
    match &result.error {
        Some(error) => format!("I couldn't complete that: {error}"),
        None if result.written_fields.is_empty() => "Done. Nothing needed to change.".to_string(),
        None => format!("Done. Updated: {}.", result.written_fields.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::UserRole;
    use crate::onboarding::types::ToolCall;
    use crate::tools::{ToolAccess, ToolCategory};
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: format!("{name} description"),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "risk_level": {"type": "array", "items": {"type": "string"}},
                    "cost_model": {"type": "string", "enum": ["delivery", "not_defined"]}
                },
                "required": ["name"]
            }),
            access: ToolAccess::Public,
            category: ToolCategory::Mutate,
            disabled: false,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
    }

    #[test]
    fn sections_appear_in_order() {
        let tools = vec![tool("create_boat")];
        let stored = BTreeMap::from([("About me".to_string(), "I sail dinghies".to_string())]);
        let ctx = PromptContext {
            today: today(),
            identity_present: true,
            profile: None,
            boats: &[],
            journeys: &[],
            tools: &tools,
            stored_context: &stored,
        };
        let prompt = build_prompt(Flow::Owner, OnboardingStep::AddBoat, &ctx);
        let positions: Vec<usize> = [
            "## Current State",
            "## Instructions",
            "## Available Tools",
            "## Tool Call Format",
            "## Stored Context",
        ]
        .iter()
        .map(|h| prompt.find(h).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.contains("- Today: 2026-05-01"));
        assert!(prompt.contains("### About me\nI sail dinghies"));
        assert!(prompt.contains("never be used to fill fields"));
    }

    #[test]
    fn only_given_tools_are_listed() {
        let tools = vec![tool("create_profile")];
        let stored = BTreeMap::new();
        let ctx = PromptContext {
            today: today(),
            identity_present: true,
            profile: None,
            boats: &[],
            journeys: &[],
            tools: &tools,
            stored_context: &stored,
        };
        let prompt = build_prompt(Flow::Prospect, OnboardingStep::CreateProfile, &ctx);
        assert!(prompt.contains("### create_profile"));
        assert!(!prompt.contains("### create_boat"));
        assert!(!prompt.contains("## Stored Context"));
    }

    #[test]
    fn state_lists_boats_with_ids() {
        let profile = Profile::new("u1", "salty_ana", UserRole::Owner);
        let boat = Boat::new("u1", "Saltwhistle");
        let boats = vec![boat.clone()];
        let stored = BTreeMap::new();
        let ctx = PromptContext {
            today: today(),
            identity_present: true,
            profile: Some(&profile),
            boats: &boats,
            journeys: &[],
            tools: &[],
            stored_context: &stored,
        };
        let prompt = build_prompt(Flow::Owner, OnboardingStep::AddJourney, &ctx);
        assert!(prompt.contains(&boat.id.to_string()));
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn compact_schema_marks_required_and_enums() {
        let rendered = compact_schema(&tool("x").parameters);
        assert!(rendered.contains("name*: string"));
        assert!(rendered.contains("risk_level: string[]"));
        assert!(rendered.contains("cost_model: delivery|not_defined"));
    }

    #[test]
    fn errors_are_reported_as_not_saved() {
        let call = ToolCall::new("create_boat", json!({}));
        let msg = tool_results_message(&[ToolResult::err(&call, "missing name")]);
        assert!(msg.contains("ERROR: missing name"));
        assert!(msg.contains("Nothing was saved"));
    }

    #[test]
    fn retry_text_forbids_placeholders() {
        assert!(malformed_retry_message().contains("no placeholder values"));
    }

    #[test]
    fn terminal_message_points_to_next_step() {
        let msg = terminal_success_message(Flow::Owner, "create_boat", OnboardingStep::AddJourney);
        assert!(msg.starts_with("Your boat is saved."));
        assert!(msg.contains("first journey"));
    }
}
