//! Configuration system for Veritas.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! Configuration is loaded from `~/.config/veritas/config.toml` and/or
//! `.veritas/config.toml` in the workspace directory. Command-line overrides are
//! applied by the binary on the extracted struct.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VeritasConfig {
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub ranking: RankingConfig,
    pub pipeline: PipelineConfig,
    pub feedback: FeedbackConfig,
}

/// Language-model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "mock" for offline runs; anything else is an OpenAI-compatible endpoint.
    pub provider: String,
    /// Model sent with every request unless a call overrides it.
    pub model: String,
    /// Name of the environment variable holding the bearer key.
    pub api_key_env: String,
    /// Endpoint root, e.g. `http://localhost:11434/v1` for Ollama.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Completion token cap when a call sets none.
    pub max_tokens: usize,
    /// Sampling temperature for calls that do not set one.
    pub temperature: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry policy applied at the provider call boundary.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 1024,
            temperature: 0.0,
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff settings for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt (0 disables retrying).
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retrieval backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Path of the SQLite vector store.
    pub db_path: PathBuf,
    /// Dimensionality of the embedding vectors.
    pub embedding_dimensions: usize,
    /// Number of passages fetched per request (retrieval breadth).
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".veritas/vectors.db"),
            embedding_dimensions: 384,
            top_k: 10,
        }
    }
}

/// How retrieved evidence is ranked before generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingStrategy {
    /// Ask the language model for an ordered subset of passage indices.
    #[default]
    Llm,
    /// Sort by backend score without a model call.
    Score,
}

/// Evidence ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub strategy: RankingStrategy,
    /// Minimum backend score kept by the score ranker.
    pub min_score: f32,
    /// Maximum passages kept by the score ranker.
    pub top_n: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            strategy: RankingStrategy::Llm,
            min_score: 0.0,
            top_n: 5,
        }
    }
}

/// Output shape requested from the answer generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Free text answer plus confidence.
    #[default]
    #[serde(alias = "text")]
    Plain,
    /// Compact key-value notation decoded by the structured-text codec.
    #[serde(alias = "toon")]
    Structured,
    /// Delegated to an external typed-generation capability.
    #[serde(alias = "json")]
    Typed,
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputMode::Plain => write!(f, "plain"),
            OutputMode::Structured => write!(f, "structured"),
            OutputMode::Typed => write!(f, "typed"),
        }
    }
}

impl FromStr for OutputMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(OutputMode::Plain),
            "structured" | "toon" => Ok(OutputMode::Structured),
            "typed" | "json" => Ok(OutputMode::Typed),
            other => Err(ConfigError::Invalid {
                message: format!(
                    "unknown output mode '{}' (expected plain, structured, or typed)",
                    other
                ),
            }),
        }
    }
}

/// Orchestrator and refinement-loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Output mode used by `Pipeline::ask`.
    pub output_mode: OutputMode,
    /// Upper bound on critic rounds per request.
    pub max_iterations: usize,
    /// Critic score at or above which the answer is accepted.
    pub pass_threshold: f64,
    /// Whether to build the JSON typed-generation capability.
    pub typed_generation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::Plain,
            max_iterations: 3,
            pass_threshold: 9.0,
            typed_generation: false,
        }
    }
}

/// Human feedback sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub path: PathBuf,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/feedback.jsonl"),
        }
    }
}

impl VeritasConfig {
    /// Validate this config and return human-readable warnings.
    ///
    /// Returns an empty Vec if nothing looks suspicious. Hard violations are
    /// reported by [`VeritasConfig::ensure_valid`] instead.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.llm.temperature > 1.0 {
            warnings.push(format!(
                "llm.temperature ({}) > 1.0; critic and ranker output may be erratic",
                self.llm.temperature
            ));
        }
        if self.pipeline.output_mode == OutputMode::Typed && !self.pipeline.typed_generation {
            warnings.push(
                "pipeline.output_mode is 'typed' but pipeline.typed_generation is false"
                    .to_string(),
            );
        }
        if self.ranking.strategy == RankingStrategy::Score
            && self.ranking.top_n > self.retrieval.top_k
        {
            warnings.push(format!(
                "ranking.top_n ({}) exceeds retrieval.top_k ({}); the cap has no effect",
                self.ranking.top_n, self.retrieval.top_k
            ));
        }
        warnings
    }

    /// Reject configurations that cannot produce a well-formed pipeline.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                message: "pipeline.max_iterations must be at least 1".to_string(),
            });
        }
        let threshold = self.pipeline.pass_threshold;
        if !threshold.is_finite() || !(0.0..=10.0).contains(&threshold) {
            return Err(ConfigError::Invalid {
                message: format!("pipeline.pass_threshold must be within 0-10, got {}", threshold),
            });
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.top_k must be at least 1".to_string(),
            });
        }
        if self.retrieval.embedding_dimensions == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.embedding_dimensions must be at least 1".to_string(),
            });
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm.model".to_string(),
            });
        }
        Ok(())
    }
}

/// Extract the effective config. Later layers win:
///
/// 1. built-in defaults
/// 2. the user file from [`user_config_path`]
/// 3. `<workspace>/.veritas/config.toml`
/// 4. `VERITAS_`-prefixed environment variables, `__` separating sections
pub fn load_config(workspace: Option<&Path>) -> Result<VeritasConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(VeritasConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // VERITAS_LLM__MODEL, VERITAS_PIPELINE__MAX_ITERATIONS, etc.
    figment = figment.merge(Env::prefixed("VERITAS_").split("__"));

    figment.extract().map_err(Box::new)
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".veritas").join("config.toml")
}

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "veritas", "veritas")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Render a config as pretty TOML.
pub fn to_toml(config: &VeritasConfig) -> Result<String, ConfigError> {
    toml::to_string_pretty(config).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}
