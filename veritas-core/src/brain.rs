//! The model-call seam shared by every pipeline stage.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions and a
//! scriptable `MockLlmProvider` used by tests and offline development.
//! Providers are constructed explicitly and passed by `Arc` into every
//! component that needs them; there is no process-wide model handle.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Anything that can answer a chat completion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one request and wait for the whole reply.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Default model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Whether the provider honours `ResponseFormat::JsonObject`.
    fn supports_json_mode(&self) -> bool {
        false
    }
}

enum Scripted {
    Response(CompletionResponse),
    Failure(LlmError),
}

/// Scripted provider for tests and offline runs.
///
/// Replies are served from a FIFO queue. When the queue is empty the
/// fallback reply (if any) is returned, otherwise a canned notice.
pub struct MockLlmProvider {
    model: String,
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose every unscripted call returns `text`.
    pub fn with_response(text: &str) -> Self {
        Self {
            fallback: Some(text.to_string()),
            ..Self::new()
        }
    }

    /// Serve `response` on the next unanswered call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(Scripted::Response(response));
    }

    /// Queue a plain-text reply.
    pub fn queue_text(&self, text: &str) {
        self.queue_response(Self::text_response(text));
    }

    /// Queue a failure for the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(Scripted::Failure(error));
    }

    /// Number of `complete` calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Snapshot of every request received, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// A finished assistant reply carrying `text`.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::Failure(error)) => Err(error),
            None => Ok(Self::text_response(
                self.fallback
                    .as_deref()
                    .unwrap_or("I'm a mock LLM. No queued responses available."),
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_json_mode(&self) -> bool {
        true
    }
}
