//! Answer generation in one of three output shapes.
//!
//! The output mode is fixed when an [`AnswerGenerator`] is built and there is
//! a single [`AnswerGenerator::generate`] entry point for all of them.

use crate::codec::{self, ToonValue};
use crate::parse::normalize_confidence;
use crate::typed::TypedGenerator;
use crate::types::{Answer, Passage, context_block};
use std::sync::Arc;
use tracing::{debug, info};
use veritas_core::{ConfigError, LlmError, LlmProvider, OutputMode, Predictor, Signature};

const STRUCTURED_INSTRUCTION: &str = "Answer the question using the context, and write the \
answer in TOON (Token-Oriented Object Notation).\n\n\
Format rules:\n\
- Scalars: key: value\n\
- Arrays: key[count]: item1, item2\n\n\
Example:\n\
answer: DSPy is a framework.\n\
confidence: 0.95\n\
sources[2]: dspy_docs, milvus_docs\n\n\
You MUST use exactly the keys answer, confidence, and sources.";

enum GeneratorMode {
    Plain(Predictor),
    Structured(Predictor),
    Typed(Arc<dyn TypedGenerator>),
}

/// Produces the initial answer from the question and ranked evidence.
pub struct AnswerGenerator {
    mode: GeneratorMode,
}

impl std::fmt::Debug for AnswerGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerGenerator")
            .field("mode", &self.output_mode())
            .finish()
    }
}

impl AnswerGenerator {
    /// Build a generator for `mode`.
    ///
    /// Fails with [`ConfigError::GeneratorUnavailable`] when `mode` is typed
    /// and no typed-generation capability is supplied.
    pub fn new(
        mode: OutputMode,
        provider: Arc<dyn LlmProvider>,
        typed: Option<Arc<dyn TypedGenerator>>,
    ) -> Result<Self, ConfigError> {
        match mode {
            OutputMode::Plain => Ok(Self::plain(provider)),
            OutputMode::Structured => Ok(Self::structured(provider)),
            OutputMode::Typed => typed.map(Self::typed).ok_or_else(|| {
                ConfigError::GeneratorUnavailable {
                    mode: mode.to_string(),
                }
            }),
        }
    }

    pub fn plain(provider: Arc<dyn LlmProvider>) -> Self {
        let signature = Signature::new("Answer the question using the context.")
            .input("context", "retrieved passages, each prefixed with its [source]")
            .input("question", "the user's question")
            .output("answer", "a concise, grounded answer")
            .output("confidence", "your confidence in the answer, between 0 and 1");
        Self {
            mode: GeneratorMode::Plain(Predictor::new(provider, signature)),
        }
    }

    pub fn structured(provider: Arc<dyn LlmProvider>) -> Self {
        let signature = Signature::new(STRUCTURED_INSTRUCTION)
            .input("context", "retrieved passages, each prefixed with its [source]")
            .input("question", "the user's question")
            .output(
                "answer_toon",
                "the output using ONLY the keys: answer, confidence, sources",
            );
        Self {
            mode: GeneratorMode::Structured(Predictor::new(provider, signature)),
        }
    }

    pub fn typed(generator: Arc<dyn TypedGenerator>) -> Self {
        Self {
            mode: GeneratorMode::Typed(generator),
        }
    }

    pub fn output_mode(&self) -> OutputMode {
        match self.mode {
            GeneratorMode::Plain(_) => OutputMode::Plain,
            GeneratorMode::Structured(_) => OutputMode::Structured,
            GeneratorMode::Typed(_) => OutputMode::Typed,
        }
    }

    pub async fn generate(&self, question: &str, evidence: &[Passage]) -> Result<Answer, LlmError> {
        let context = context_block(evidence);
        let answer = match &self.mode {
            GeneratorMode::Plain(predictor) => {
                let prediction = predictor
                    .call(&[("context", context.as_str()), ("question", question)])
                    .await?;
                let text = match prediction.get("answer") {
                    Some(text) => text.to_string(),
                    None => prediction.raw().trim().to_string(),
                };
                Answer {
                    text,
                    confidence: normalize_confidence(&prediction.text("confidence")),
                    sources: Vec::new(),
                    raw: None,
                }
            }
            GeneratorMode::Structured(predictor) => {
                let prediction = predictor
                    .call(&[("context", context.as_str()), ("question", question)])
                    .await?;
                let raw = match prediction.get("answer_toon") {
                    Some(text) => text.to_string(),
                    None => prediction.raw().trim().to_string(),
                };
                decode_structured(&raw)
            }
            GeneratorMode::Typed(generator) => {
                let typed = generator.generate(question, &context).await?;
                let confidence = match &typed.confidence {
                    serde_json::Value::String(s) => normalize_confidence(s),
                    serde_json::Value::Number(n) => normalize_confidence(&n.to_string()),
                    _ => None,
                };
                Answer {
                    text: typed.answer,
                    confidence,
                    sources: typed.sources.into_iter().map(|s| s.name).collect(),
                    raw: typed.raw,
                }
            }
        };

        info!(
            mode = %self.output_mode(),
            confidence = ?answer.confidence,
            sources = answer.sources.len(),
            "Generated initial answer"
        );
        debug!(answer = %answer.text, "Initial answer text");
        Ok(answer)
    }
}

/// Map a TOON reply onto an [`Answer`], with raw text, `0.0`, and no sources as defaults.
fn decode_structured(raw: &str) -> Answer {
    let map = codec::decode(raw);
    debug!(toon = %codec::encode(&map), "Decoded structured answer");
    let text = map.scalar("answer").unwrap_or(raw).to_string();
    let confidence = normalize_confidence(map.scalar("confidence").unwrap_or("0.0"));
    let sources = match map.get("sources") {
        Some(ToonValue::List(items)) => items.iter().filter(|s| !s.is_empty()).cloned().collect(),
        Some(ToonValue::Scalar(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => Vec::new(),
    };
    Answer {
        text,
        confidence,
        sources,
        raw: Some(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::{SourceRef, TypedAnswer};
    use async_trait::async_trait;
    use veritas_core::MockLlmProvider;

    struct FixedTyped(TypedAnswer);

    #[async_trait]
    impl TypedGenerator for FixedTyped {
        async fn generate(&self, _q: &str, _c: &str) -> Result<TypedAnswer, LlmError> {
            Ok(self.0.clone())
        }
    }

    fn evidence() -> Vec<Passage> {
        vec![Passage::new("DSPy is a framework.", "dspy_docs", 0.9)]
    }

    #[test]
    fn test_typed_without_capability_is_unavailable() {
        let provider = Arc::new(MockLlmProvider::new());
        let result = AnswerGenerator::new(OutputMode::Typed, provider, None);
        assert!(matches!(
            result,
            Err(ConfigError::GeneratorUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_plain_mode() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("[[ ## answer ## ]]\nA framework.\n\n[[ ## confidence ## ]]\n0.8");
        let generator = AnswerGenerator::new(OutputMode::Plain, provider.clone(), None).unwrap();
        let answer = generator.generate("What is DSPy?", &evidence()).await.unwrap();
        assert_eq!(answer.text, "A framework.");
        assert_eq!(answer.confidence, Some(0.8));
        assert!(answer.sources.is_empty());

        let requests = provider.requests();
        assert!(requests[0].messages[1].content.contains("[dspy_docs] DSPy is a framework."));
    }

    #[tokio::test]
    async fn test_plain_mode_headerless_reply_uses_raw_text() {
        let provider = Arc::new(MockLlmProvider::with_response("Just an answer."));
        let generator = AnswerGenerator::plain(provider);
        let answer = generator.generate("q", &evidence()).await.unwrap();
        assert_eq!(answer.text, "Just an answer.");
        assert_eq!(answer.confidence, None);
        assert_eq!(answer.raw, None);
    }

    #[tokio::test]
    async fn test_structured_mode_decodes_fields() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text(
            "[[ ## answer_toon ## ]]\n```toon\nanswer: DSPy is a framework.\nconfidence: 0.95\n\
             sources[2]: dspy_docs, milvus_docs\n```",
        );
        let generator = AnswerGenerator::structured(provider);
        let answer = generator.generate("q", &evidence()).await.unwrap();
        assert_eq!(answer.text, "DSPy is a framework.");
        assert_eq!(answer.confidence, Some(0.95));
        assert_eq!(answer.sources, vec!["dspy_docs", "milvus_docs"]);
        let raw = answer.raw.unwrap();
        assert!(raw.starts_with("```toon\nanswer: DSPy is a framework."));
    }

    #[test]
    fn test_structured_defaults() {
        let answer = decode_structured("The model ignored the format.");
        assert_eq!(answer.text, "The model ignored the format.");
        assert_eq!(answer.confidence, Some(0.0));
        assert!(answer.sources.is_empty());
    }

    #[test]
    fn test_structured_scalar_sources_are_split() {
        let answer = decode_structured("answer: x\nsources: a, b");
        assert_eq!(answer.sources, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_typed_mode_normalizes_confidence() {
        let typed: Arc<dyn TypedGenerator> = Arc::new(FixedTyped(TypedAnswer {
            answer: "Paris".into(),
            confidence: serde_json::json!(90),
            sources: vec![SourceRef { name: "geo".into() }],
            raw: Some(r#"{"answer": "Paris", "confidence": 90}"#.into()),
        }));
        let provider = Arc::new(MockLlmProvider::new());
        let generator =
            AnswerGenerator::new(OutputMode::Typed, provider.clone(), Some(typed)).unwrap();
        assert_eq!(generator.output_mode(), OutputMode::Typed);

        let answer = generator.generate("q", &evidence()).await.unwrap();
        assert_eq!(answer.text, "Paris");
        assert_eq!(answer.confidence, Some(0.9));
        assert_eq!(answer.sources, vec!["geo"]);
        assert_eq!(answer.raw.as_deref(), Some(r#"{"answer": "Paris", "confidence": 90}"#));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::AuthFailed {
            provider: "mock".into(),
        });
        let generator = AnswerGenerator::plain(provider);
        assert!(generator.generate("q", &evidence()).await.is_err());
    }
}
