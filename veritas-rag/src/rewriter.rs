//! Query rewriting: question → search query, intent, entities.

use crate::parse::parse_list;
use crate::types::RewrittenQuery;
use std::sync::Arc;
use tracing::{debug, info};
use veritas_core::{LlmError, LlmProvider, Predictor, Signature};

/// Restates a question as a retrieval query. One model call, no retry.
pub struct QueryRewriter {
    predictor: Predictor,
}

impl QueryRewriter {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        let signature = Signature::new(
            "Interpret the user's question. Rewrite it as a concise search query for a \
             document index, name the user's intent, and list the key entities.",
        )
        .input("user_query", "the question as the user asked it")
        .output("search_query", "a keyword-rich query for vector search")
        .output("intent", "a short label for what the user wants")
        .output("entities", "named entities as a JSON array of strings");
        Self {
            predictor: Predictor::new(provider, signature),
        }
    }

    pub async fn rewrite(&self, question: &str) -> Result<RewrittenQuery, LlmError> {
        let prediction = self.predictor.call(&[("user_query", question)]).await?;

        let mut search_query = prediction.text("search_query").trim().to_string();
        if search_query.is_empty() {
            debug!("Rewriter produced no search query; using the question");
            search_query = question.trim().to_string();
        }

        let rewritten = RewrittenQuery {
            search_query,
            intent: prediction.text("intent").trim().to_string(),
            entities: parse_list(&prediction.text("entities")),
        };
        info!(
            search_query = %rewritten.search_query,
            intent = %rewritten.intent,
            entities = rewritten.entities.len(),
            "Rewrote query"
        );
        Ok(rewritten)
    }
}
