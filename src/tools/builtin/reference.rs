//! Read-only reference tools: level, risk and skill definitions, and the
//! sign-up suggestion for anonymous users.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::onboarding::model::{ExperienceLevel, RiskLevel, SKILL_VOCABULARY};
use crate::onboarding::normalize::normalize_string;
use crate::tools::builtin::field;
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput};

// ── get_experience_level_definitions ────────────────────────────────

pub struct ExperienceLevelDefinitionsTool;

#[async_trait]
impl Tool for ExperienceLevelDefinitionsTool {
    fn name(&self) -> &str {
        "get_experience_level_definitions"
    }

    fn description(&self) -> &str {
        "List the sailing experience levels (1-4) with what each one means. \
         Use it before asking the user which level fits them."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let levels: Vec<serde_json::Value> = ExperienceLevel::ALL
            .iter()
            .map(|l| {
                json!({
                    "level": l.level(),
                    "label": l.label(),
                    "description": l.description(),
                })
            })
            .collect();
        Ok(ToolOutput::success(json!({ "levels": levels }), start.elapsed()))
    }
}

// ── get_risk_level_definitions ──────────────────────────────────────

pub struct RiskLevelDefinitionsTool;

#[async_trait]
impl Tool for RiskLevelDefinitionsTool {
    fn name(&self) -> &str {
        "get_risk_level_definitions"
    }

    fn description(&self) -> &str {
        "List the accepted risk level values (comfort zones) with descriptions."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let levels: Vec<serde_json::Value> = RiskLevel::ALL
            .iter()
            .map(|r| json!({"value": r.label(), "description": r.description()}))
            .collect();
        Ok(ToolOutput::success(json!({ "risk_levels": levels }), start.elapsed()))
    }
}

// ── get_skill_definitions ───────────────────────────────────────────

pub struct SkillDefinitionsTool;

#[async_trait]
impl Tool for SkillDefinitionsTool {
    fn name(&self) -> &str {
        "get_skill_definitions"
    }

    fn description(&self) -> &str {
        "List the skill identifiers that profiles and journeys may reference. \
         Skills outside this list are discarded."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let skills: Vec<serde_json::Value> = SKILL_VOCABULARY
            .iter()
            .map(|(name, description)| json!({"name": name, "description": description}))
            .collect();
        Ok(ToolOutput::success(json!({ "skills": skills }), start.elapsed()))
    }
}

// ── suggest_sign_up ─────────────────────────────────────────────────

/// Asks the client to show its sign-up dialog. Writes nothing.
pub struct SuggestSignUpTool;

#[async_trait]
impl Tool for SuggestSignUpTool {
    fn name(&self) -> &str {
        "suggest_sign_up"
    }

    fn description(&self) -> &str {
        "Invite the user to create an account so their preferences can be saved. \
         Call this once you know enough about what they are looking for."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "One sentence shown next to the sign-up button"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        if ctx.identity_id.is_some() {
            return Ok(ToolOutput::success(
                json!({"sign_up_suggested": false, "message": "User is already signed in"}),
                start.elapsed(),
            ));
        }
        let reason = field(&params, &["reason", "message"])
            .and_then(normalize_string)
            .unwrap_or_else(|| "Sign up to save your sailing preferences".to_string());
        Ok(ToolOutput::success(
            json!({"sign_up_suggested": true, "reason": reason}),
            start.elapsed(),
        ))
    }
}
