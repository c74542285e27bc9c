//! Typed answer generation.
//!
//! The typed output mode hands generation to a [`TypedGenerator`], a
//! capability that returns an already-structured answer instead of text the
//! pipeline has to decode. [`JsonTypedGenerator`] implements it by asking the
//! model for a JSON object and deserializing the reply with serde.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use veritas_core::{CompletionRequest, LlmError, LlmProvider, Message, ResponseFormat};

/// A cited source in a typed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
}

/// Answer shape returned by a typed generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedAnswer {
    pub answer: String,
    /// Whatever the model reported; normalized by the answer generator.
    #[serde(default)]
    pub confidence: serde_json::Value,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Reply text the answer was parsed from.
    #[serde(skip)]
    pub raw: Option<String>,
}

/// Structured answer generation capability.
#[async_trait]
pub trait TypedGenerator: Send + Sync {
    async fn generate(&self, question: &str, context: &str) -> Result<TypedAnswer, LlmError>;
}

const TYPED_SYSTEM_PROMPT: &str = "Answer the question using only the provided context. \
Reply with a single JSON object and nothing else, with exactly these keys:\n\
{\"answer\": string, \"confidence\": number between 0 and 1, \"sources\": [{\"name\": string}]}\n\
Each source name is the bracketed source label of a passage you relied on.";

/// Typed generator backed by a JSON-mode completion.
pub struct JsonTypedGenerator {
    provider: Arc<dyn LlmProvider>,
}

impl JsonTypedGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    /// Parse a reply into a [`TypedAnswer`].
    ///
    /// Code fences and text around the outermost JSON object are ignored. A
    /// reply with no usable object becomes an answer carrying the raw text.
    pub fn parse_reply(reply: &str) -> TypedAnswer {
        let candidate = match (reply.find('{'), reply.rfind('}')) {
            (Some(start), Some(end)) if start < end => &reply[start..=end],
            _ => reply,
        };
        match serde_json::from_str::<TypedAnswer>(candidate) {
            Ok(answer) => TypedAnswer {
                raw: Some(reply.to_string()),
                ..answer
            },
            Err(e) => {
                warn!(error = %e, "Typed reply is not a valid answer object; keeping raw text");
                TypedAnswer {
                    answer: reply.trim().to_string(),
                    confidence: serde_json::Value::Null,
                    sources: Vec::new(),
                    raw: Some(reply.to_string()),
                }
            }
        }
    }
}

#[async_trait]
impl TypedGenerator for JsonTypedGenerator {
    async fn generate(&self, question: &str, context: &str) -> Result<TypedAnswer, LlmError> {
        let response_format = if self.provider.supports_json_mode() {
            ResponseFormat::JsonObject
        } else {
            ResponseFormat::Text
        };
        let request = CompletionRequest {
            messages: vec![
                Message::system(TYPED_SYSTEM_PROMPT),
                Message::user(format!("Question: {}\n\nContext:\n{}", question, context)),
            ],
            response_format,
            ..Default::default()
        };

        let response = self.provider.complete(request).await?;
        debug!(model = %response.model, "Typed generation completed");
        Ok(Self::parse_reply(response.text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::MockLlmProvider;

    #[test]
    fn test_parse_reply_plain_object() {
        let parsed = JsonTypedGenerator::parse_reply(
            r#"{"answer": "Paris", "confidence": 0.9, "sources": [{"name": "geo"}]}"#,
        );
        assert_eq!(parsed.answer, "Paris");
        assert_eq!(parsed.confidence, serde_json::json!(0.9));
        assert_eq!(parsed.sources[0].name, "geo");
        assert!(parsed.raw.as_deref().is_some_and(|r| r.starts_with("{\"answer\"")));
    }

    #[test]
    fn test_parse_reply_fenced_with_missing_fields() {
        let parsed = JsonTypedGenerator::parse_reply("```json\n{\"answer\": \"Paris\"}\n```");
        assert_eq!(parsed.answer, "Paris");
        assert!(parsed.confidence.is_null());
        assert!(parsed.sources.is_empty());
    }

    #[test]
    fn test_parse_reply_garbage_keeps_text() {
        let parsed = JsonTypedGenerator::parse_reply("I think it is Paris.");
        assert_eq!(parsed.answer, "I think it is Paris.");
        assert!(parsed.sources.is_empty());
        assert_eq!(parsed.raw.as_deref(), Some("I think it is Paris."));
    }

    #[tokio::test]
    async fn test_generate_requests_json_mode() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text(r#"{"answer": "42", "confidence": "high", "sources": []}"#);
        let generator = JsonTypedGenerator::new(provider.clone());
        let answer = generator.generate("q", "[s] ctx").await.unwrap();
        assert_eq!(answer.answer, "42");

        let requests = provider.requests();
        assert_eq!(requests[0].response_format, ResponseFormat::JsonObject);
        assert!(requests[0].messages[1].content.contains("[s] ctx"));
    }
}
