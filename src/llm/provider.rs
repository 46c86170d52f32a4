//! Provider-agnostic LLM types.
//!
//! The onboarding core only ever needs "prompt in, text out", so the provider
//! trait is a single `complete` call. Tool calls travel inside the text as
//! fenced blocks rather than through a vendor tool-calling API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request: a system prompt plus the running transcript.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Render the non-system messages as a single plain-text transcript.
    ///
    /// The last user message is left as the final block so the model answers it.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let label = match m.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::System => "System",
                };
                format!("{label}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Text returned by the model.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
}

/// Opaque model collaborator.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Single blocking completion. No streaming, no partial results.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_skips_system_and_labels_roles() {
        let request = CompletionRequest::new(
            "system prompt",
            vec![
                ChatMessage::system("ignored"),
                ChatMessage::user("Hi, I have a boat"),
                ChatMessage::assistant("Great, what is it called?"),
                ChatMessage::user("Saltwhistle"),
            ],
        );
        let transcript = request.transcript();
        assert!(!transcript.contains("ignored"));
        assert!(transcript.starts_with("User: Hi, I have a boat"));
        assert!(transcript.ends_with("User: Saltwhistle"));
        assert!(transcript.contains("Assistant: Great, what is it called?"));
    }

    #[test]
    fn role_serde_is_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("x")).unwrap();
        assert!(json.contains("\"assistant\""));
        let parsed: ChatMessage =
            serde_json::from_str(r#"{"role":"user","content":"hello"}"#).unwrap();
        assert_eq!(parsed.role, Role::User);
    }
}
