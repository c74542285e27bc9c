//! Evidence ranking strategies.
//!
//! A ranker returns a reordered, possibly reduced subsequence of its input and
//! never invents passages. When a strategy cannot produce a trustworthy
//! ordering it hands the input back unchanged.

use crate::types::{EvidenceSet, Passage, by_score_desc};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use veritas_core::{LlmError, LlmProvider, Predictor, Signature};

/// Ranker trait.
#[async_trait]
pub trait Ranker: Send + Sync {
    async fn rank(&self, question: &str, evidence: EvidenceSet) -> Result<EvidenceSet, LlmError>;
}

/// Asks the model for an ordered list of passage indices.
pub struct LlmRanker {
    predictor: Predictor,
}

impl LlmRanker {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        let signature = Signature::new(
            "Rank the numbered passages by how well they help answer the question. \
             Drop passages that are irrelevant. Reply with the passage indices only, \
             most relevant first, separated by commas (for example: 2, 0, 3).",
        )
        .input("question", "the user's question")
        .input("contexts", "numbered passages in the form [index] [source] text")
        .output("ranked_contexts", "comma-separated passage indices, most relevant first");
        Self {
            predictor: Predictor::new(provider, signature),
        }
    }

    fn render_contexts(evidence: &[Passage]) -> String {
        evidence
            .iter()
            .enumerate()
            .map(|(i, p)| format!("[{}] {}", i, p.render()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Ranker for LlmRanker {
    async fn rank(&self, question: &str, evidence: EvidenceSet) -> Result<EvidenceSet, LlmError> {
        if evidence.is_empty() {
            return Ok(evidence);
        }

        let contexts = Self::render_contexts(&evidence);
        let prediction = self
            .predictor
            .call(&[("question", question), ("contexts", contexts.as_str())])
            .await?;
        let reply = prediction.text("ranked_contexts");

        let Some(indices) = parse_index_list(&reply, evidence.len()) else {
            warn!(
                reply = %reply,
                passages = evidence.len(),
                "Ranker reply is not a clean index list; keeping retrieval order"
            );
            return Ok(evidence);
        };

        let ranked = dedup_passages(indices.into_iter().map(|i| evidence[i].clone()));
        info!(
            before = evidence.len(),
            after = ranked.len(),
            "Ranked evidence"
        );
        Ok(ranked)
    }
}

/// Model-free ranker: stable sort by backend score, filter, cap.
#[derive(Debug, Clone)]
pub struct ScoreRanker {
    pub min_score: f32,
    pub top_n: usize,
}

impl ScoreRanker {
    pub fn new(min_score: f32, top_n: usize) -> Self {
        Self { min_score, top_n }
    }
}

#[async_trait]
impl Ranker for ScoreRanker {
    async fn rank(&self, _question: &str, evidence: EvidenceSet) -> Result<EvidenceSet, LlmError> {
        let mut sorted = evidence.clone();
        sorted.sort_by(|a, b| by_score_desc(a.score, b.score));

        let kept: Vec<Passage> = dedup_passages(
            sorted
                .into_iter()
                .filter(|p| p.score >= self.min_score),
        )
        .into_iter()
        .take(self.top_n)
        .collect();

        if kept.is_empty() {
            debug!(
                min_score = self.min_score,
                top_n = self.top_n,
                "Score ranker would drop every passage; keeping input"
            );
            return Ok(evidence);
        }
        Ok(kept)
    }
}

/// Keep the first passage for each `(source, text)` pair.
fn dedup_passages(passages: impl IntoIterator<Item = Passage>) -> EvidenceSet {
    let mut seen = HashSet::new();
    passages
        .into_iter()
        .filter(|p| seen.insert((p.source.clone(), p.text.clone())))
        .collect()
}

/// Parse a reply made only of passage indices.
///
/// Indices may be bracketed (`[2]`) and separated by commas or whitespace; the
/// whole list may be wrapped in one pair of brackets. Returns `None` for any
/// other text, an out-of-range index, or an empty list. Repeated indices keep
/// their first position.
pub fn parse_index_list(reply: &str, len: usize) -> Option<Vec<usize>> {
    let mut seen = HashSet::new();
    let mut indices = Vec::new();

    for token in reply.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim_matches(['[', ']']);
        if token.is_empty() {
            continue;
        }
        let index: usize = token.parse().ok()?;
        if index >= len {
            return None;
        }
        if seen.insert(index) {
            indices.push(index);
        }
    }

    if indices.is_empty() { None } else { Some(indices) }
}
