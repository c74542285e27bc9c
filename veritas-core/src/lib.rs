//! # Veritas Core
//!
//! Core library for the Veritas answer-refinement pipeline.
//! Provides the LLM interface (brain), provider implementations,
//! field-in/field-out signatures, configuration, and error types.

pub mod brain;
pub mod config;
pub mod error;
pub mod providers;
pub mod signature;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{
    FeedbackConfig, LlmConfig, OutputMode, PipelineConfig, RankingConfig, RankingStrategy,
    RetrievalConfig, RetryConfig, VeritasConfig, load_config,
};
pub use error::{
    ConfigError, FeedbackError, LlmError, PipelineError, Result, RetrievalError, VeritasError,
};
pub use providers::{OpenAiCompatibleProvider, create_provider};
pub use signature::{FieldMap, Prediction, Predictor, Signature};
pub use types::{CompletionRequest, CompletionResponse, Message, ResponseFormat, Role, TokenUsage};
