//! Critique of a candidate answer against the question and evidence.

use crate::parse::{extract_score, parse_passed};
use crate::types::{Answer, Critique, Passage, context_block};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use veritas_core::{LlmError, LlmProvider, Predictor, Signature};

/// Scores an answer and decides whether it is good enough.
#[async_trait]
pub trait Critic: Send + Sync {
    async fn critique(
        &self,
        question: &str,
        evidence: &[Passage],
        answer: &Answer,
    ) -> Result<Critique, LlmError>;
}

/// Model-backed critic.
pub struct LlmCritic {
    predictor: Predictor,
}

impl LlmCritic {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        let signature = Signature::new(
            "Critique the answer. Look for logical fallacies, contradictions with the \
             context, and missing information. Score it from 0 to 10 and say whether it \
             passes as-is.",
        )
        .input("question", "the user's question")
        .input("context", "retrieved passages, each prefixed with its [source]")
        .input("answer", "the candidate answer")
        .output("critique", "specific problems with the answer and how to fix them")
        .output("score", "a number from 0 to 10")
        .output("passed", "true if the answer needs no revision, otherwise false");
        Self {
            predictor: Predictor::new(provider, signature),
        }
    }
}

#[async_trait]
impl Critic for LlmCritic {
    async fn critique(
        &self,
        question: &str,
        evidence: &[Passage],
        answer: &Answer,
    ) -> Result<Critique, LlmError> {
        let context = context_block(evidence);
        let prediction = self
            .predictor
            .call(&[
                ("question", question),
                ("context", context.as_str()),
                ("answer", answer.text.as_str()),
            ])
            .await?;

        let raw_score = prediction.text("score");
        let critique = Critique {
            narrative: prediction.text("critique"),
            score: extract_score(&raw_score).clamp(0.0, 10.0),
            passed: parse_passed(&prediction.text("passed")),
        };
        debug!(
            raw_score = %raw_score,
            score = critique.score,
            passed = critique.passed,
            "Critique parsed"
        );
        Ok(critique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::MockLlmProvider;

    async fn critique_reply(reply: &str) -> Critique {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text(reply);
        LlmCritic::new(provider)
            .critique("q", &[], &Answer::from_text("a"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_critique_fields() {
        let c = critique_reply(
            "[[ ## critique ## ]]\nMissing a citation.\n\n\
             [[ ## score ## ]]\n7/10\n\n[[ ## passed ## ]]\nFalse",
        )
        .await;
        assert_eq!(c.narrative, "Missing a citation.");
        assert_eq!(c.score, 7.0);
        assert!(!c.passed);
    }

    #[tokio::test]
    async fn test_score_is_clamped() {
        let c = critique_reply("[[ ## score ## ]]\n85\n\n[[ ## passed ## ]]\nyes").await;
        assert_eq!(c.score, 10.0);
        assert!(c.passed);
    }

    #[tokio::test]
    async fn test_missing_fields_default() {
        let c = critique_reply("no structure at all").await;
        assert_eq!(c.narrative, "");
        assert_eq!(c.score, 0.0);
        assert!(!c.passed);
    }

    #[tokio::test]
    async fn test_prompt_carries_answer_and_context() {
        let provider = Arc::new(MockLlmProvider::new());
        let critic = LlmCritic::new(provider.clone());
        let evidence = vec![Passage::new("Paris is in France.", "geo", 1.0)];
        critic
            .critique("Where is Paris?", &evidence, &Answer::from_text("In France."))
            .await
            .unwrap();
        let requests = provider.requests();
        let prompt = &requests[0].messages[1].content;
        assert!(prompt.contains("[geo] Paris is in France."));
        assert!(prompt.contains("In France."));
    }
}
