//! Error types for the Veritas core library.
//!
//! Uses `thiserror` for public API error types, one enum per subsystem,
//! rolled up into [`VeritasError`]. Hard failures from external collaborators
//! (model calls, the retrieval backend) travel through these types; soft
//! parsing anomalies never do, they degrade to documented defaults instead.

use std::path::PathBuf;

/// Top-level error type for the Veritas libraries.
#[derive(Debug, thiserror::Error)]
pub enum VeritasError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),
}

/// Errors from language-model interactions (the "model call failure" class).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the retrieval backend and its embedder.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Retrieval backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Embedding dimension mismatch: index expects {expected}, embedder produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid insert: {message}")]
    InvalidInsert { message: String },
}

/// Errors from the configuration system. All of these surface at construction time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },

    #[error("Generator unavailable: output mode '{mode}' requires a typed-generation capability")]
    GeneratorUnavailable { mode: String },
}

/// Errors raised by the orchestrator itself.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Request was cancelled during {stage}")]
    Cancelled { stage: String },
}

/// Errors from the feedback sink.
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Score {score} is outside the accepted range 0-10")]
    ScoreOutOfRange { score: u8 },

    #[error("Feedback log IO failed at {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Malformed feedback record on line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// Result type for operations that can fail in any subsystem.
pub type Result<T> = std::result::Result<T, VeritasError>;
