//! Data model for one question-answering request.
//!
//! Every record here is created once and never mutated afterwards; the
//! refinement loop produces new [`Answer`] values rather than editing old ones.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;
use veritas_core::OutputMode;

/// Search-oriented restatement of the user's question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewrittenQuery {
    pub search_query: String,
    pub intent: String,
    pub entities: Vec<String>,
}

/// A unit of retrieved evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source: String,
    /// Backend relevance score; higher is more relevant.
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Passage {
    pub fn new(text: impl Into<String>, source: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            score,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// `[source] text`, the form passages take inside prompts.
    pub fn render(&self) -> String {
        format!("[{}] {}", self.source, self.text)
    }
}

/// Ordered evidence for one request. After ranking it is unique by `(source, text)`.
pub type EvidenceSet = Vec<Passage>;

/// Order scores high to low with NaN last. Unlike `partial_cmp`, this is a
/// total order, so `sort_by` cannot panic on a backend that returns NaN.
pub(crate) fn by_score_desc(a: f32, b: f32) -> Ordering {
    let key = |score: f32| if score.is_nan() { f32::NEG_INFINITY } else { score };
    key(b).total_cmp(&key(a))
}

/// Join passages into the context block handed to the generator, critic, and reviser.
pub fn context_block(evidence: &[Passage]) -> String {
    evidence
        .iter()
        .map(Passage::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// A candidate answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// Self-reported confidence in `[0, 1]`, unset when the model gave nothing usable.
    pub confidence: Option<f64>,
    pub sources: Vec<String>,
    /// Model output the answer was decoded from, kept for structured and typed modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Answer {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// The critic's verdict on one answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub narrative: String,
    /// Quality score clamped to `[0, 10]`.
    pub score: f64,
    pub passed: bool,
}

/// Audit record of one refinement iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementStep {
    /// 1-based iteration number.
    pub iteration: usize,
    /// The answer that was critiqued in this iteration.
    pub answer: Answer,
    pub critique: Critique,
}

/// How the refinement loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinementStatus {
    /// The critic accepted an answer.
    Passed,
    /// The iteration budget ran out first.
    Exhausted,
}

impl std::fmt::Display for RefinementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefinementStatus::Passed => write!(f, "passed"),
            RefinementStatus::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Outcome of the refinement loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub final_answer: Answer,
    pub history: Vec<RefinementStep>,
    pub status: RefinementStatus,
}

/// Terminal output of one pipeline request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub output_mode: OutputMode,
    pub status: RefinementStatus,
    pub final_answer: Answer,
    pub history: Vec<RefinementStep>,
    pub rewritten_query: RewrittenQuery,
    pub evidence: EvidenceSet,
}

impl PipelineResult {
    pub fn iterations(&self) -> usize {
        self.history.len()
    }

    pub fn final_score(&self) -> Option<f64> {
        self.history.last().map(|s| s.critique.score)
    }

    /// Model output behind the initial answer, present in structured and typed modes.
    pub fn raw_output(&self) -> Option<&str> {
        self.history
            .first()
            .map_or(&self.final_answer, |s| &s.answer)
            .raw
            .as_deref()
    }
}
