//! Chat-completions client for OpenAI and compatible servers.
//!
//! Anything that speaks the `/chat/completions` wire format works here:
//! hosted OpenAI, Azure deployments, and local Ollama, vLLM, or LM Studio.

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::providers::with_retry;
use crate::types::{CompletionRequest, CompletionResponse, Message, ResponseFormat, TokenUsage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Seconds to wait on a 429 whose body carries no usable hint.
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 5;

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct WireFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

fn is_local_endpoint(base_url: Option<&str>) -> bool {
    base_url.is_some_and(|u| u.contains("localhost") || u.contains("127.0.0.1"))
}

/// Pull the wait from messages like "Please try again in 20s" or "in 1.5s".
fn retry_hint_secs(body: &str) -> Option<u64> {
    let detail = serde_json::from_str::<ErrorEnvelope>(body).ok()?.error.message;
    let (_, tail) = detail.rsplit_once("in ")?;
    let digits: String = tail
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let secs: f64 = digits.parse().ok()?;
    Some(secs.ceil() as u64)
}

/// Provider for the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiCompatibleProvider {
    /// Build from config, taking the key from `config.api_key_env`.
    ///
    /// Endpoints on localhost get a placeholder bearer token when the variable is unset.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) => key,
            Err(_) if is_local_endpoint(config.base_url.as_deref()) => {
                debug!(
                    base_url = ?config.base_url,
                    "Local endpoint without key; sending placeholder token"
                );
                "local".to_string()
            }
            Err(_) => {
                return Err(LlmError::AuthFailed {
                    provider: format!("{} (set {})", config.provider, config.api_key_env),
                });
            }
        };
        Self::new_with_key(config, api_key)
    }

    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("HTTP client setup: {}", e),
            })?;

        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            retry: config.retry.clone(),
        })
    }

    fn chat_body<'a>(&'a self, request: &'a CompletionRequest) -> ChatBody<'a> {
        ChatBody {
            model: request.model.as_deref().unwrap_or(&self.model),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature.unwrap_or(self.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            stream: false,
            response_format: (request.response_format == ResponseFormat::JsonObject)
                .then_some(WireFormat {
                    kind: "json_object",
                }),
        }
    }

    fn completion_from(
        reply: ChatReply,
        fallback_model: &str,
    ) -> Result<CompletionResponse, LlmError> {
        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "reply has no choices".to_string(),
            })?;
        let message = choice.message.ok_or_else(|| LlmError::ResponseParse {
            message: "first choice has no message".to_string(),
        })?;
        let usage = reply.usage.unwrap_or_default();

        Ok(CompletionResponse {
            message: Message::assistant(message.content.unwrap_or_default()),
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
            model: reply.model.unwrap_or_else(|| fallback_model.to_string()),
            finish_reason: choice.finish_reason,
        })
    }

    /// Classify a non-2xx reply. 429 and 5xx are transient; the rest are not.
    fn status_error(status: StatusCode, body: &str) -> LlmError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(%status, body, "Provider rejected credentials");
            return LlmError::AuthFailed {
                provider: "openai-compatible".to_string(),
            };
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return LlmError::RateLimited {
                retry_after_secs: retry_hint_secs(body).unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS),
            };
        }
        if status.is_server_error() {
            return LlmError::Connection {
                message: format!("server returned {}: {}", status, body),
            };
        }
        LlmError::ApiRequest {
            message: format!("{}: {}", status, body),
        }
    }

    async fn post_chat(&self, body: &ChatBody<'_>) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = body.model, messages = body.messages.len(), "POST chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::Connection {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::Connection {
            message: format!("reading reply body: {}", e),
        })?;
        if !status.is_success() {
            return Err(Self::status_error(status, &text));
        }

        let reply: ChatReply = serde_json::from_str(&text).map_err(|e| LlmError::ResponseParse {
            message: format!("reply is not chat-completion JSON: {}", e),
        })?;
        Self::completion_from(reply, &self.model)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.chat_body(&request);
        with_retry(&self.retry, || self.post_chat(&body)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_json_mode(&self) -> bool {
        true
    }
}
