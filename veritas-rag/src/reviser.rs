//! Revision of an answer in light of a critique.

use crate::types::{Answer, Passage, context_block};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use veritas_core::{LlmError, LlmProvider, Predictor, Signature};

/// Produces a corrected answer text. Stateless between calls.
#[async_trait]
pub trait Reviser: Send + Sync {
    async fn revise(
        &self,
        question: &str,
        evidence: &[Passage],
        prior: &Answer,
        critique: &str,
    ) -> Result<Answer, LlmError>;
}

/// Model-backed reviser.
pub struct LlmReviser {
    predictor: Predictor,
}

impl LlmReviser {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        let signature = Signature::new(
            "Refine the past answer using the critique. Keep what is correct, fix what the \
             critique identifies, and stay grounded in the context.",
        )
        .input("question", "the user's question")
        .input("context", "retrieved passages, each prefixed with its [source]")
        .input("past_answer", "the answer being revised")
        .input("critique", "the critic's feedback")
        .output("revised_answer", "the improved answer");
        Self {
            predictor: Predictor::new(provider, signature),
        }
    }
}

#[async_trait]
impl Reviser for LlmReviser {
    async fn revise(
        &self,
        question: &str,
        evidence: &[Passage],
        prior: &Answer,
        critique: &str,
    ) -> Result<Answer, LlmError> {
        let context = context_block(evidence);
        let prediction = self
            .predictor
            .call(&[
                ("question", question),
                ("context", context.as_str()),
                ("past_answer", prior.text.as_str()),
                ("critique", critique),
            ])
            .await?;

        let revised = prediction.text("revised_answer");
        if revised.trim().is_empty() {
            warn!("Reviser returned an empty answer; keeping the prior text");
            return Ok(Answer::from_text(prior.text.clone()));
        }
        debug!(chars = revised.len(), "Revised answer");
        Ok(Answer::from_text(revised))
    }
}
