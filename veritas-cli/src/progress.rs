//! Terminal progress output for `veritas ask`.

use async_trait::async_trait;
use veritas_rag::{Passage, PipelineCallback, RefinementStep, Stage};

/// Prints one line per pipeline event to stderr, keeping stdout for the answer.
pub struct ProgressPrinter {
    quiet: bool,
}

impl ProgressPrinter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

pub(crate) fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Rewrite => "Rewriting query",
        Stage::Retrieve => "Retrieving passages",
        Stage::Rank => "Ranking evidence",
        Stage::Generate => "Drafting answer",
        Stage::Refine => "Critiquing",
    }
}

pub(crate) fn step_line(step: &RefinementStep) -> String {
    format!(
        "  round {}: score {:.1}{}",
        step.iteration,
        step.critique.score,
        if step.critique.passed { " (passed)" } else { "" }
    )
}

#[async_trait]
impl PipelineCallback for ProgressPrinter {
    async fn on_stage_start(&self, stage: Stage) {
        if !self.quiet {
            eprintln!("{}...", stage_label(stage));
        }
    }

    async fn on_evidence(&self, evidence: &[Passage]) {
        if !self.quiet {
            eprintln!("  {} passage(s) kept", evidence.len());
        }
    }

    async fn on_refinement_step(&self, step: &RefinementStep) {
        if !self.quiet {
            eprintln!("{}", step_line(step));
        }
    }
}
