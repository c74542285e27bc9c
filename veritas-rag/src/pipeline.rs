//! Pipeline orchestrator.
//!
//! One request runs strictly in sequence:
//! rewrite → retrieve → rank → generate → refine.
//! The first hard failure aborts the request; parsing anomalies inside each
//! stage have already been absorbed by the time a stage returns.

use crate::critic::LlmCritic;
use crate::generator::AnswerGenerator;
use crate::ranker::{LlmRanker, Ranker, ScoreRanker};
use crate::refine::{RefinementLoop, until_cancelled};
use crate::retriever::Retriever;
use crate::reviser::LlmReviser;
use crate::rewriter::QueryRewriter;
use crate::store::RetrievalBackend;
use crate::typed::{JsonTypedGenerator, TypedGenerator};
use crate::types::{Passage, PipelineResult, RefinementStep};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;
use veritas_core::{
    ConfigError, LlmProvider, OutputMode, RankingConfig, RankingStrategy, VeritasConfig,
};

/// A pipeline stage, used for progress reporting and cancellation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Rewrite,
    Retrieve,
    Rank,
    Generate,
    Refine,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Rewrite => write!(f, "rewrite"),
            Stage::Retrieve => write!(f, "retrieve"),
            Stage::Rank => write!(f, "rank"),
            Stage::Generate => write!(f, "generate"),
            Stage::Refine => write!(f, "refine"),
        }
    }
}

/// Observer hooks for a running request. Every method defaults to a no-op.
#[async_trait]
pub trait PipelineCallback: Send + Sync {
    /// A stage is about to run.
    async fn on_stage_start(&self, _stage: Stage) {}

    /// Ranked evidence is ready.
    async fn on_evidence(&self, _evidence: &[Passage]) {}

    /// A refinement iteration completed and was recorded.
    async fn on_refinement_step(&self, _step: &RefinementStep) {}

    /// The request finished successfully.
    async fn on_complete(&self, _result: &PipelineResult) {}
}

/// A callback that ignores every event.
pub struct NoOpCallback;

#[async_trait]
impl PipelineCallback for NoOpCallback {}

/// Build the ranker selected by configuration.
pub fn build_ranker(config: &RankingConfig, provider: Arc<dyn LlmProvider>) -> Arc<dyn Ranker> {
    match config.strategy {
        RankingStrategy::Llm => Arc::new(LlmRanker::new(provider)),
        RankingStrategy::Score => Arc::new(ScoreRanker::new(config.min_score, config.top_n)),
    }
}

/// The answer-refinement pipeline.
///
/// `Send + Sync`; independent requests may run concurrently on one instance.
pub struct Pipeline {
    rewriter: QueryRewriter,
    retriever: Retriever,
    ranker: Arc<dyn Ranker>,
    plain: AnswerGenerator,
    structured: AnswerGenerator,
    typed: Option<AnswerGenerator>,
    refinement: RefinementLoop,
    default_mode: OutputMode,
    callback: Arc<dyn PipelineCallback>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("retriever", &self.retriever)
            .field("refinement", &self.refinement)
            .field("default_mode", &self.default_mode)
            .field("typed_available", &self.typed.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline from configuration and explicit collaborators.
    ///
    /// When `pipeline.typed_generation` is set a [`JsonTypedGenerator`] on the
    /// same provider backs the typed output mode.
    pub fn new(
        config: &VeritasConfig,
        provider: Arc<dyn LlmProvider>,
        backend: Arc<dyn RetrievalBackend>,
    ) -> Result<Self, ConfigError> {
        let typed: Option<Arc<dyn TypedGenerator>> = if config.pipeline.typed_generation {
            Some(Arc::new(JsonTypedGenerator::new(provider.clone())))
        } else {
            None
        };
        Self::with_collaborators(config, provider, backend, typed)
    }

    /// Like [`Pipeline::new`] but with an explicitly supplied typed-generation capability.
    pub fn with_collaborators(
        config: &VeritasConfig,
        provider: Arc<dyn LlmProvider>,
        backend: Arc<dyn RetrievalBackend>,
        typed: Option<Arc<dyn TypedGenerator>>,
    ) -> Result<Self, ConfigError> {
        config.ensure_valid()?;
        for warning in config.validate() {
            tracing::warn!(warning = %warning, "Configuration warning");
        }

        let default_mode = config.pipeline.output_mode;
        if default_mode == OutputMode::Typed && typed.is_none() {
            return Err(ConfigError::GeneratorUnavailable {
                mode: default_mode.to_string(),
            });
        }

        let refinement = RefinementLoop::new(
            Arc::new(LlmCritic::new(provider.clone())),
            Arc::new(LlmReviser::new(provider.clone())),
        )
        .with_max_iterations(config.pipeline.max_iterations)?
        .with_pass_threshold(config.pipeline.pass_threshold)?;

        Ok(Self {
            rewriter: QueryRewriter::new(provider.clone()),
            retriever: Retriever::new(backend, config.retrieval.top_k)?,
            ranker: build_ranker(&config.ranking, provider.clone()),
            plain: AnswerGenerator::plain(provider.clone()),
            structured: AnswerGenerator::structured(provider),
            typed: typed.map(AnswerGenerator::typed),
            refinement,
            default_mode,
            callback: Arc::new(NoOpCallback),
        })
    }

    /// Replace the observer for all subsequent requests.
    pub fn with_callback(mut self, callback: Arc<dyn PipelineCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Replace the ranking strategy.
    pub fn with_ranker(mut self, ranker: Arc<dyn Ranker>) -> Self {
        self.ranker = ranker;
        self
    }

    /// Replace the refinement loop (e.g. with a different critic or reviser).
    pub fn with_refinement(mut self, refinement: RefinementLoop) -> Self {
        self.refinement = refinement;
        self
    }

    pub fn default_mode(&self) -> OutputMode {
        self.default_mode
    }

    /// Whether `mode` can be served by this pipeline.
    pub fn supports(&self, mode: OutputMode) -> bool {
        mode != OutputMode::Typed || self.typed.is_some()
    }

    fn generator(&self, mode: OutputMode) -> Result<&AnswerGenerator, ConfigError> {
        match mode {
            OutputMode::Plain => Ok(&self.plain),
            OutputMode::Structured => Ok(&self.structured),
            OutputMode::Typed => self
                .typed
                .as_ref()
                .ok_or_else(|| ConfigError::GeneratorUnavailable {
                    mode: mode.to_string(),
                }),
        }
    }

    /// Answer with the configured default output mode.
    pub async fn ask(&self, question: &str) -> veritas_core::Result<PipelineResult> {
        self.answer(question, self.default_mode).await
    }

    /// Answer in the given output mode.
    pub async fn answer(
        &self,
        question: &str,
        mode: OutputMode,
    ) -> veritas_core::Result<PipelineResult> {
        self.answer_with_cancel(question, mode, &CancellationToken::new())
            .await
    }

    /// Answer in the given output mode, abandoning the request as soon as
    /// `cancel` fires.
    pub async fn answer_with_cancel(
        &self,
        question: &str,
        mode: OutputMode,
        cancel: &CancellationToken,
    ) -> veritas_core::Result<PipelineResult> {
        let request_id = Uuid::new_v4();
        let span = info_span!("pipeline", %request_id, mode = %mode);
        self.run(request_id, question, mode, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        request_id: Uuid,
        question: &str,
        mode: OutputMode,
        cancel: &CancellationToken,
    ) -> veritas_core::Result<PipelineResult> {
        let generator = self.generator(mode)?;
        let callback = self.callback.as_ref();
        info!(question = %question, "Pipeline request started");

        callback.on_stage_start(Stage::Rewrite).await;
        let rewritten =
            until_cancelled(cancel, Stage::Rewrite, self.rewriter.rewrite(question)).await?;

        callback.on_stage_start(Stage::Retrieve).await;
        let retrieved = until_cancelled(
            cancel,
            Stage::Retrieve,
            self.retriever.retrieve(&rewritten.search_query),
        )
        .await?;

        callback.on_stage_start(Stage::Rank).await;
        let evidence =
            until_cancelled(cancel, Stage::Rank, self.ranker.rank(question, retrieved)).await?;
        callback.on_evidence(&evidence).await;

        callback.on_stage_start(Stage::Generate).await;
        let initial = until_cancelled(
            cancel,
            Stage::Generate,
            generator.generate(question, &evidence),
        )
        .await?;

        callback.on_stage_start(Stage::Refine).await;
        let outcome = self
            .refinement
            .run(question, &evidence, initial, cancel, callback)
            .await?;

        let result = PipelineResult {
            request_id,
            output_mode: mode,
            status: outcome.status,
            final_answer: outcome.final_answer,
            history: outcome.history,
            rewritten_query: rewritten,
            evidence,
        };
        info!(
            status = %result.status,
            iterations = result.iterations(),
            evidence = result.evidence.len(),
            "Pipeline request finished"
        );
        callback.on_complete(&result).await;
        Ok(result)
    }
}
