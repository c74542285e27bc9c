//! Core type definitions for talking to a language model.
//!
//! Every model interaction in Veritas is a single-turn chat completion:
//! a system instruction plus one user message carrying the rendered input
//! fields. These types are the provider-neutral shape of that exchange.

use serde::{Deserialize, Serialize};

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name used by chat-completion APIs.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// The instruction half of a predictor call.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// The rendered input fields of a predictor call.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Requested shape of the model's reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask the provider to constrain output to a single JSON object.
    JsonObject,
}

/// Prompt and completion token counts reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// One model reply plus the provider's bookkeeping.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: Message,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

impl CompletionResponse {
    /// The assistant's reply text.
    pub fn text(&self) -> &str {
        &self.message.content
    }
}

/// One chat completion call. `None` fields fall back to the provider's config.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub response_format: ResponseFormat,
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_names_match_serde() {
        for role in [Role::System, Role::User, Role::Assistant] {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
            assert_eq!(role.to_string(), role.as_str());
        }
    }

    #[test]
    fn test_message_constructors_set_role() {
        assert_eq!(Message::system("rules").role, Role::System);
        let input = Message::user("[[ ## question ## ]]\nWhat is DSPy?");
        assert_eq!(input.role, Role::User);
        assert!(input.content.starts_with("[[ ## question ## ]]"));
    }

    #[test]
    fn test_response_text_and_usage() {
        let response = CompletionResponse {
            message: Message::assistant("Paris"),
            usage: TokenUsage {
                input_tokens: 120,
                output_tokens: 3,
            },
            model: "gpt-4o-mini".into(),
            finish_reason: None,
        };
        assert_eq!(response.text(), "Paris");
        assert_eq!(response.usage.total(), 123);
    }

    #[test]
    fn test_request_defaults_to_text_format() {
        let request = CompletionRequest::default();
        assert!(request.messages.is_empty());
        assert!(request.model.is_none() && request.max_tokens.is_none());
        assert!(request.temperature.is_none());
        assert_eq!(request.response_format, ResponseFormat::Text);
        assert_eq!(
            serde_json::to_string(&ResponseFormat::JsonObject).unwrap(),
            "\"json_object\""
        );
    }
}
