//! Runs one parsed tool call through the gate checks and the tool itself.
//!
//! Order: allow-list, registry lookup, access, placeholder scan, execute.
//! Every failure comes back as a `ToolResult` with `error` set; nothing here
//! aborts a turn.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;

use super::types::{ToolCall, ToolResult};
use crate::tools::{ToolAccess, ToolContext, ToolError, ToolRegistry};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:<[^>]*>|\{\{[^}]*\}\}|\[[^\]]*\]|\.{3}|…|tbd|todo|placeholder|unknown|n/a|xxx+|your[ _][a-z _]+|example[ _][a-z _]+)\s*$",
    )
    .unwrap()
});

/// Sequential executor shared by every turn.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute `call` if `allowed` contains it.
    pub async fn execute(&self, call: &ToolCall, allowed: &[&str], ctx: &ToolContext) -> ToolResult {
        match self.try_execute(call, allowed, ctx).await {
            Ok(result) => result,
            Err(e) => {
                tracing::info!(tool = %call.name, kind = e.kind(), error = %e, "Tool call rejected");
                ToolResult::err(call, e.to_string())
            }
        }
    }

    async fn try_execute(
        &self,
        call: &ToolCall,
        allowed: &[&str],
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        if !allowed.contains(&call.name.as_str()) {
            return Err(ToolError::StepViolation(call.name.clone()));
        }

        let tool = self
            .registry
            .get(&call.name)
            .filter(|t| !t.disabled())
            .ok_or_else(|| ToolError::NotFound(format!("tool '{}'", call.name)))?;

        check_access(tool.access(), &call.name, ctx).await?;

        if let Some(path) = find_placeholder(&call.arguments, "") {
            return Err(ToolError::Validation(format!(
                "'{path}' holds a placeholder value; ask the user for the real value"
            )));
        }

        let output = tool.execute(call.arguments.clone(), ctx).await?;
        tracing::info!(
            tool = %call.name,
            written = ?output.written_fields,
            duration_ms = output.duration.as_millis() as u64,
            "Tool executed"
        );
        Ok(ToolResult::ok(call, output.result, output.written_fields))
    }
}

async fn check_access(access: ToolAccess, tool: &str, ctx: &ToolContext) -> Result<(), ToolError> {
    match access {
        ToolAccess::Public => Ok(()),
        ToolAccess::IdentityRequired => ctx.require_identity(tool).map(|_| ()),
        ToolAccess::RoleRestricted(role) => {
            let user_id = ctx.require_identity(tool)?;
            let profile = ctx.db.get_profile_by_user(user_id).await?;
            match profile {
                Some(p) if p.has_role(role) => Ok(()),
                Some(_) => Err(ToolError::Ownership(format!(
                    "{tool} requires the {} role",
                    role.as_str()
                ))),
                None => Err(ToolError::Ownership(format!(
                    "{tool} requires a profile with the {} role",
                    role.as_str()
                ))),
            }
        }
    }
}

/// Dotted path of the first string leaf that is a template placeholder.
fn find_placeholder(value: &Value, path: &str) -> Option<String> {
    match value {
        Value::String(s) if PLACEHOLDER_RE.is_match(s) => {
            Some(if path.is_empty() { "arguments".to_string() } else { path.to_string() })
        }
        Value::Object(map) => map.iter().find_map(|(k, v)| {
            let child = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
            find_placeholder(v, &child)
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_placeholder(v, &format!("{path}[{i}]"))),
        _ => None,
    }
}
