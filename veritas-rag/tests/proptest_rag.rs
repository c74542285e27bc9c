//! Property-based tests for the codec and the refinement loop using proptest.

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use veritas_core::LlmError;
use veritas_rag::{
    Answer, Critic, Critique, NoOpCallback, Passage, RefinementLoop, RefinementStatus, Reviser,
    ToonMap, ToonValue, decode, encode,
};

// --- Codec properties ---

fn scalar_value() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]([A-Za-z0-9 .]{0,20}[A-Za-z0-9])?"
}

fn list_value() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[A-Za-z0-9_]{1,10}", 0..5)
}

fn toon_value() -> impl Strategy<Value = ToonValue> {
    prop_oneof![
        scalar_value().prop_map(ToonValue::Scalar),
        list_value().prop_map(ToonValue::List),
    ]
}

proptest! {
    #[test]
    fn codec_recovers_string_and_list_maps(
        entries in prop::collection::btree_map("[a-z][a-z0-9_]{0,8}", toon_value(), 0..6)
    ) {
        let map: ToonMap = entries.into_iter().collect();
        prop_assert_eq!(decode(&encode(&map)), map);
    }

    #[test]
    fn decode_never_panics_and_keys_are_words(text in any::<String>()) {
        let word = regex::Regex::new(r"^\w+$").unwrap();
        let map = decode(&text);
        for (key, _) in map.iter() {
            prop_assert!(word.is_match(key), "key {:?}", key);
        }
    }
}

// --- Refinement loop bounds ---

/// Passes on its `pass_on`-th call (never when `None`).
struct ScriptedCritic {
    pass_on: Option<usize>,
    calls: AtomicUsize,
}

#[async_trait]
impl Critic for ScriptedCritic {
    async fn critique(
        &self,
        _question: &str,
        _evidence: &[Passage],
        _answer: &Answer,
    ) -> Result<Critique, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let passed = self.pass_on == Some(n);
        Ok(Critique {
            narrative: format!("round {}", n),
            score: if passed { 9.5 } else { 4.0 },
            passed: false,
        })
    }
}

#[derive(Default)]
struct EchoReviser {
    calls: AtomicUsize,
}

#[async_trait]
impl Reviser for EchoReviser {
    async fn revise(
        &self,
        _question: &str,
        _evidence: &[Passage],
        prior: &Answer,
        _critique: &str,
    ) -> Result<Answer, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Answer::from_text(format!("{}+", prior.text)))
    }
}

proptest! {
    #[test]
    fn loop_history_is_bounded(max in 1usize..6, pass_on in prop::option::of(1usize..8)) {
        let critic = Arc::new(ScriptedCritic { pass_on, calls: AtomicUsize::new(0) });
        let reviser = Arc::new(EchoReviser::default());
        let refinement = RefinementLoop::new(critic.clone(), reviser.clone())
            .with_max_iterations(max)
            .unwrap();

        let outcome = tokio_test::block_on(refinement.run(
            "q",
            &[],
            Answer::from_text("a"),
            &CancellationToken::new(),
            &NoOpCallback,
        ))
        .unwrap();

        let len = outcome.history.len();
        prop_assert!(len <= max);
        for (i, step) in outcome.history.iter().enumerate() {
            prop_assert_eq!(step.iteration, i + 1);
        }
        if len < max {
            prop_assert_eq!(outcome.status, RefinementStatus::Passed);
        }
        match pass_on {
            Some(k) if k <= max => {
                prop_assert_eq!(len, k);
                prop_assert_eq!(outcome.status, RefinementStatus::Passed);
            }
            _ => {
                prop_assert_eq!(len, max);
                prop_assert_eq!(outcome.status, RefinementStatus::Exhausted);
            }
        }
        prop_assert_eq!(critic.calls.load(Ordering::SeqCst), len);
        prop_assert_eq!(reviser.calls.load(Ordering::SeqCst), len - 1);
        prop_assert_eq!(outcome.final_answer.text.len(), len);
    }
}
