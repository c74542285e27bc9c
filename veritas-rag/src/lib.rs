//! # Veritas RAG
//!
//! The answer-refinement pipeline: query rewriting, evidence retrieval and
//! ranking, answer generation in plain, structured, or typed form, and a
//! bounded critique-and-revision loop. Also hosts the structured-text codec,
//! the SQLite vector store, and the feedback log.

pub mod codec;
pub mod critic;
pub mod feedback;
pub mod generator;
pub mod parse;
pub mod pipeline;
pub mod ranker;
pub mod refine;
pub mod retriever;
pub mod reviser;
pub mod rewriter;
pub mod store;
pub mod typed;
pub mod types;

pub use codec::{ToonMap, ToonValue, decode, encode, try_decode};
pub use critic::{Critic, LlmCritic};
pub use feedback::{FeedbackEntry, FeedbackLog, FeedbackStats, MAX_SCORE};
pub use generator::AnswerGenerator;
pub use pipeline::{NoOpCallback, Pipeline, PipelineCallback, Stage, build_ranker};
pub use ranker::{LlmRanker, Ranker, ScoreRanker};
pub use refine::RefinementLoop;
pub use retriever::Retriever;
pub use reviser::{LlmReviser, Reviser};
pub use rewriter::QueryRewriter;
pub use store::{
    Document, Embedder, HashingEmbedder, MockRetrievalBackend, RetrievalBackend, SearchHit,
    SqliteVectorStore,
};
pub use typed::{JsonTypedGenerator, TypedAnswer, TypedGenerator};
pub use types::{
    Answer, Critique, EvidenceSet, Passage, PipelineResult, RefinementOutcome, RefinementStatus,
    RefinementStep, RewrittenQuery,
};
