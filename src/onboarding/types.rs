//! Turn request/response types and the call/result records that flow
//! through one turn.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{OnboardingStep, StepFacts};
use crate::llm::{ChatMessage, Role};

/// One parsed call. `arguments` is the untyped boundary record; tools run it
/// through the normalizers before anything else sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of executing one call. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub written_fields: Vec<String>,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, result: serde_json::Value, written_fields: Vec<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            result: Some(result),
            error: None,
            written_fields,
        }
    }

    pub fn err(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            result: None,
            error: Some(error.into()),
            written_fields: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// A successful call that wrote something.
    pub fn wrote(&self) -> bool {
        self.is_success() && !self.written_fields.is_empty()
    }
}

/// A mutation confirmed by the user outside the chat text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedAction {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A prior message supplied by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl From<&HistoryMessage> for ChatMessage {
    fn from(m: &HistoryMessage) -> Self {
        ChatMessage {
            role: m.role,
            content: m.content.clone(),
        }
    }
}

/// Inbound turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryMessage>,
    #[serde(default)]
    pub identity_id: Option<String>,
    /// Free-text context blocks keyed by label, rendered each under its own
    /// heading.
    #[serde(default)]
    pub stored_context: BTreeMap<String, String>,
    #[serde(default)]
    pub approved_action: Option<ApprovedAction>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Which entities exist after the turn, and which the turn created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFlags {
    pub profile: bool,
    pub boat: bool,
    pub journey: bool,
    pub profile_created: bool,
    pub boat_created: bool,
    pub journey_created: bool,
}

impl EntityFlags {
    pub fn from_facts(facts: StepFacts) -> Self {
        Self {
            profile: facts.has_profile,
            boat: facts.has_boat,
            journey: facts.has_journey,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    /// Nudges and retry instructions injected during the turn. Never shown
    /// to the end user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synthetic_messages: Vec<String>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty()
            && self.tool_results.is_empty()
            && self.synthetic_messages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Outbound turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub session_id: Uuid,
    pub message: AssistantMessage,
    pub entities: EntityFlags,
    /// Step derived after the turn's last mutation.
    pub step: OnboardingStep,
    /// The iteration cap ended the turn.
    pub exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_request_defaults_optional_fields() {
        let req: TurnRequest = serde_json::from_value(json!({"message": "hi"})).unwrap();
        assert_eq!(req.message, "hi");
        assert!(req.session_id.is_none());
        assert!(req.stored_context.is_empty());
        assert!(req.approved_action.is_none());
    }

    #[test]
    fn tool_result_success_flags() {
        let call = ToolCall::new("create_boat", json!({"name": "Saltwhistle"}));
        let ok = ToolResult::ok(&call, json!({}), vec!["name".into()]);
        assert!(ok.wrote());
        let read = ToolResult::ok(&call, json!({}), vec![]);
        assert!(read.is_success() && !read.wrote());
        let err = ToolResult::err(&call, "Invalid arguments: missing name");
        assert!(!err.is_success());
        assert_eq!(err.tool_call_id, call.id);
    }

    #[test]
    fn empty_metadata_fields_are_omitted() {
        let value = serde_json::to_value(MessageMetadata::default()).unwrap();
        assert_eq!(value, json!({}));
    }
}
