//! Evidence retrieval: search query → top-K passages.

use crate::store::{RetrievalBackend, SearchHit};
use crate::types::{EvidenceSet, Passage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use veritas_core::{ConfigError, RetrievalError};

/// Default number of passages fetched before ranking.
pub const DEFAULT_TOP_K: usize = 10;

/// Fetches passages from a [`RetrievalBackend`] in backend rank order.
///
/// No deduplication or re-ranking happens here; that is the ranker's job.
#[derive(Clone)]
pub struct Retriever {
    backend: Arc<dyn RetrievalBackend>,
    k: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever").field("k", &self.k).finish()
    }
}

impl Retriever {
    pub fn new(backend: Arc<dyn RetrievalBackend>, k: usize) -> Result<Self, ConfigError> {
        if k == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval top_k must be greater than zero".to_string(),
            });
        }
        Ok(Self { backend, k })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub async fn retrieve(&self, search_query: &str) -> Result<EvidenceSet, RetrievalError> {
        let hits = self.backend.search(search_query, self.k).await?;
        let evidence: EvidenceSet = hits.into_iter().take(self.k).map(to_passage).collect();
        info!(
            k = self.k,
            retrieved = evidence.len(),
            "Retrieved evidence"
        );
        debug!(
            sources = ?evidence.iter().map(|p| p.source.as_str()).collect::<Vec<_>>(),
            "Retrieved sources"
        );
        Ok(evidence)
    }
}

fn to_passage(hit: SearchHit) -> Passage {
    let metadata = match hit.metadata {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        serde_json::Value::Null => HashMap::new(),
        other => HashMap::from([("value".to_string(), other)]),
    };
    Passage::new(hit.text, hit.source, hit.score).with_metadata(metadata)
}
