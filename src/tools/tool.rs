//! The `Tool` trait and the types that travel with it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DatabaseError;
use crate::onboarding::model::{Flow, UserRole};
use crate::store::Database;

/// Who may invoke a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "role")]
pub enum ToolAccess {
    /// Anyone, including unauthenticated prospects.
    Public,
    /// Requires an identity id on the turn.
    IdentityRequired,
    /// Requires an identity whose profile holds this role.
    RoleRestricted(UserRole),
}

/// Whether a tool writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Read,
    Mutate,
}

/// Static description of a tool, rendered into the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub access: ToolAccess,
    pub category: ToolCategory,
    pub disabled: bool,
}

/// Errors a tool call can end in. None of these abort a turn: the executor
/// turns each into a `ToolResult.error` string for the model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Tool '{0}' is not available in the current step")]
    StepViolation(String),

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Not permitted: {0}")]
    Ownership(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Could not parse tool call: {0}")]
    ParseFailure(String),

    #[error("Storage failure: {0}")]
    Database(String),
}

impl ToolError {
    /// Stable snake_case kind, surfaced in tool results and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StepViolation(_) => "step_violation",
            Self::Validation(_) => "validation",
            Self::Ownership(_) => "ownership",
            Self::NotFound(_) => "not_found",
            Self::ParseFailure(_) => "parse_failure",
            Self::Database(_) => "database",
        }
    }
}

impl From<DatabaseError> for ToolError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id}")),
            other => Self::Database(other.to_string()),
        }
    }
}

/// Per-call execution context.
#[derive(Clone)]
pub struct ToolContext {
    /// Identity supplied by the caller's auth layer, if any.
    pub identity_id: Option<String>,
    pub flow: Flow,
    pub db: Arc<dyn Database>,
}

impl ToolContext {
    pub fn new(identity_id: Option<String>, flow: Flow, db: Arc<dyn Database>) -> Self {
        Self {
            identity_id,
            flow,
            db,
        }
    }

    /// The acting identity, or a validation error naming the tool.
    pub fn require_identity(&self, tool: &str) -> Result<&str, ToolError> {
        self.identity_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ToolError::Validation(format!("{tool} requires a signed-in user"))
            })
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("identity_id", &self.identity_id)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

/// Successful tool output.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    /// Fields actually written by a mutation. Empty for reads.
    pub written_fields: Vec<String>,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self {
            result,
            written_fields: Vec::new(),
            duration,
        }
    }

    pub fn with_written_fields(mut self, fields: Vec<String>) -> Self {
        self.written_fields = fields;
        self
    }
}

/// A capability the model may invoke through a fenced tool-call block.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the arguments object.
    fn parameters_schema(&self) -> serde_json::Value;

    fn access(&self) -> ToolAccess {
        ToolAccess::Public
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    fn disabled(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            access: self.access(),
            category: self.category(),
            disabled: self.disabled(),
        }
    }
}

/// Pull a required, non-empty string argument.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::Validation(format!("missing required field '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_str_rejects_missing_and_blank() {
        let params = json!({"name": "Saltwhistle", "blank": "  ", "num": 3});
        assert_eq!(require_str(&params, "name").unwrap(), "Saltwhistle");
        assert!(matches!(require_str(&params, "blank"), Err(ToolError::Validation(_))));
        assert!(matches!(require_str(&params, "num"), Err(ToolError::Validation(_))));
        assert!(matches!(require_str(&params, "missing"), Err(ToolError::Validation(_))));
    }

    #[test]
    fn database_not_found_maps_to_not_found() {
        let err: ToolError = DatabaseError::NotFound {
            entity: "boat".into(),
            id: "abc".into(),
        }
        .into();
        assert_eq!(err.kind(), "not_found");

        let err: ToolError = DatabaseError::Query("boom".into()).into();
        assert_eq!(err.kind(), "database");
    }

    #[test]
    fn access_serializes_with_role() {
        let json = serde_json::to_value(ToolAccess::RoleRestricted(UserRole::Owner)).unwrap();
        assert_eq!(json, json!({"kind": "role_restricted", "role": "owner"}));
        let json = serde_json::to_value(ToolAccess::Public).unwrap();
        assert_eq!(json, json!({"kind": "public"}));
    }
}
