//! Bounded critique-and-revision loop.
//!
//! ```text
//! ITERATING(i) --critic--> record step --score >= threshold or passed--> PASSED
//!                                      \--i == max_iterations---------> EXHAUSTED
//!                                       \--otherwise: revise, i + 1---> ITERATING(i + 1)
//! ```
//!
//! At most `max_iterations` critic calls and `max_iterations - 1` reviser
//! calls are made. The loop never backtracks to an earlier answer.

use crate::critic::Critic;
use crate::pipeline::{PipelineCallback, Stage};
use crate::reviser::Reviser;
use crate::types::{Answer, Passage, RefinementOutcome, RefinementStatus, RefinementStep};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use veritas_core::{ConfigError, PipelineError, VeritasError};

/// Default upper bound on critic rounds.
pub const DEFAULT_MAX_ITERATIONS: usize = 3;
/// Default critic score at which an answer is accepted.
pub const DEFAULT_PASS_THRESHOLD: f64 = 9.0;

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn until_cancelled<F, T, E>(
    cancel: &CancellationToken,
    stage: Stage,
    fut: F,
) -> Result<T, VeritasError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<VeritasError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled {
            stage: stage.to_string(),
        }
        .into()),
        result = fut => result.map_err(Into::into),
    }
}

/// Critic ⇄ reviser loop with a stop policy.
#[derive(Clone)]
pub struct RefinementLoop {
    critic: Arc<dyn Critic>,
    reviser: Arc<dyn Reviser>,
    max_iterations: usize,
    pass_threshold: f64,
}

impl std::fmt::Debug for RefinementLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementLoop")
            .field("max_iterations", &self.max_iterations)
            .field("pass_threshold", &self.pass_threshold)
            .finish()
    }
}

impl RefinementLoop {
    pub fn new(critic: Arc<dyn Critic>, reviser: Arc<dyn Reviser>) -> Self {
        Self {
            critic,
            reviser,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Result<Self, ConfigError> {
        if max_iterations == 0 {
            return Err(ConfigError::Invalid {
                message: "max_iterations must be at least 1".to_string(),
            });
        }
        self.max_iterations = max_iterations;
        Ok(self)
    }

    /// Score at or above which a critique counts as passing, on the 0-10 scale.
    pub fn with_pass_threshold(mut self, pass_threshold: f64) -> Result<Self, ConfigError> {
        if !pass_threshold.is_finite() || !(0.0..=10.0).contains(&pass_threshold) {
            return Err(ConfigError::Invalid {
                message: format!("pass_threshold must be within 0-10, got {}", pass_threshold),
            });
        }
        self.pass_threshold = pass_threshold;
        Ok(self)
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn pass_threshold(&self) -> f64 {
        self.pass_threshold
    }

    /// Run the loop from `initial`.
    ///
    /// Revised answers keep the confidence and sources of the answer they
    /// replace. A cancelled iteration leaves no step in the history.
    pub async fn run(
        &self,
        question: &str,
        evidence: &[Passage],
        initial: Answer,
        cancel: &CancellationToken,
        callback: &dyn PipelineCallback,
    ) -> Result<RefinementOutcome, VeritasError> {
        let mut current = initial;
        let mut history: Vec<RefinementStep> = Vec::with_capacity(self.max_iterations);

        for iteration in 1..=self.max_iterations {
            let critique = until_cancelled(
                cancel,
                Stage::Refine,
                self.critic.critique(question, evidence, &current),
            )
            .await?;
            info!(
                iteration,
                score = critique.score,
                passed = critique.passed,
                "Critique received"
            );

            let accepted = critique.score >= self.pass_threshold || critique.passed;
            if accepted || iteration == self.max_iterations {
                let step = RefinementStep {
                    iteration,
                    answer: current.clone(),
                    critique,
                };
                callback.on_refinement_step(&step).await;
                history.push(step);
                let status = if accepted {
                    RefinementStatus::Passed
                } else {
                    RefinementStatus::Exhausted
                };
                info!(iterations = iteration, status = %status, "Refinement finished");
                return Ok(RefinementOutcome {
                    final_answer: current,
                    history,
                    status,
                });
            }

            let revised = until_cancelled(
                cancel,
                Stage::Refine,
                self.reviser
                    .revise(question, evidence, &current, &critique.narrative),
            )
            .await?;

            let step = RefinementStep {
                iteration,
                answer: current.clone(),
                critique,
            };
            callback.on_refinement_step(&step).await;
            history.push(step);

            current = Answer {
                text: revised.text,
                raw: None,
                ..current
            };
        }

        Ok(RefinementOutcome {
            final_answer: current,
            history,
            status: RefinementStatus::Exhausted,
        })
    }
}
