//! Retrieval backend and embedding capability.
//!
//! [`RetrievalBackend`] is the seam the retriever searches through. The
//! bundled implementation, [`SqliteVectorStore`], keeps documents and their
//! embeddings in a single SQLite file and ranks by cosine similarity; the
//! [`HashingEmbedder`] makes it usable without any model download.

use crate::types::by_score_desc;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use veritas_core::RetrievalError;

/// A document to be indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Document {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            metadata: HashMap::new(),
        }
    }
}

/// One raw search result as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub source: String,
    pub score: f32,
    /// Whatever metadata the backend stored; not necessarily an object.
    pub metadata: serde_json::Value,
}

/// Vector-similarity search over indexed documents.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Return at most `top_k` hits, most relevant first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, RetrievalError>;

    /// Index new documents. Returns the number inserted.
    async fn insert(&self, documents: Vec<Document>) -> Result<usize, RetrievalError>;

    /// Number of indexed documents.
    async fn count(&self) -> Result<usize, RetrievalError>;
}

/// Turns text into fixed-width vectors.
pub trait Embedder: Send + Sync {
    fn encode(&self, texts: &[&str]) -> Vec<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

/// Deterministic feature-hashing embedder.
///
/// Lower-cased alphanumeric terms are hashed (FNV-1a) into buckets weighted
/// by `1 + ln(tf)`, and the result is L2-normalised. Good enough to rank a
/// small corpus without downloading a model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for term in lowered.split(|c: char| !c.is_alphanumeric()) {
            if !term.is_empty() {
                *counts.entry(term).or_default() += 1;
            }
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for (term, count) in counts {
            let bucket = (fnv1a(term) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0 + (count as f32).ln();
        }

        let norm = l2_norm(&vector);
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn encode(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn fnv1a(term: &str) -> u64 {
    term.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity; 0.0 for empty, mismatched, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>() / denom
}

fn storage_err(e: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Unavailable {
        message: e.to_string(),
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS documents (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        text      TEXT NOT NULL,
        source    TEXT NOT NULL,
        metadata  TEXT NOT NULL DEFAULT '{}',
        embedding BLOB NOT NULL
    );
";

/// SQLite-backed vector store with brute-force cosine search.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("dimensions", &self.embedder.dimensions())
            .finish()
    }
}

impl SqliteVectorStore {
    /// Open (creating if absent) the store at `path`.
    ///
    /// The first open records the embedder's dimension; later opens with a
    /// different dimension fail with [`RetrievalError::DimensionMismatch`].
    pub fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, RetrievalError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(storage_err)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(storage_err)?;
        let store = Self::init(conn, embedder)?;
        info!(path = %path.display(), "Opened vector store");
        Ok(store)
    }

    /// Open a private in-memory store (for tests and one-off runs).
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self, RetrievalError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn, embedder)
    }

    fn init(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self, RetrievalError> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;

        let actual = embedder.dimensions();
        let recorded: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;

        match recorded {
            Some(value) => {
                let expected: usize = value.parse().map_err(|_| RetrievalError::Unavailable {
                    message: format!("corrupt dimension record '{}'", value),
                })?;
                if expected != actual {
                    return Err(RetrievalError::DimensionMismatch { expected, actual });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('dimensions', ?1)",
                    params![actual.to_string()],
                )
                .map_err(storage_err)?;
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }
}

#[async_trait]
impl RetrievalBackend for SqliteVectorStore {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, RetrievalError> {
        let query_vec = self
            .embedder
            .encode(&[query])
            .pop()
            .unwrap_or_default();

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT text, source, metadata, embedding FROM documents ORDER BY id")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })
            .map_err(storage_err)?;

        let mut hits = Vec::new();
        for row in rows {
            let (text, source, metadata, blob) = row.map_err(storage_err)?;
            let vector = blob_to_vector(&blob);
            if vector.len() != query_vec.len() {
                warn!(
                    source = %source,
                    expected = query_vec.len(),
                    actual = vector.len(),
                    "Skipping document with mismatched embedding width"
                );
                continue;
            }
            let metadata = serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null);
            hits.push(SearchHit {
                score: cosine_similarity(&query_vec, &vector),
                text,
                source,
                metadata,
            });
        }

        hits.sort_by(|a, b| by_score_desc(a.score, b.score));
        hits.truncate(top_k);
        debug!(query = %query, hits = hits.len(), "Vector search completed");
        Ok(hits)
    }

    async fn insert(&self, documents: Vec<Document>) -> Result<usize, RetrievalError> {
        if let Some(pos) = documents.iter().position(|d| d.text.trim().is_empty()) {
            return Err(RetrievalError::InvalidInsert {
                message: format!("document {} has empty text", pos),
            });
        }
        if documents.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = documents.iter().map(|d| d.text.as_str()).collect();
        let vectors = self.embedder.encode(&texts);
        if vectors.len() != documents.len() {
            return Err(RetrievalError::InvalidInsert {
                message: format!(
                    "embedder returned {} vectors for {} documents",
                    vectors.len(),
                    documents.len()
                ),
            });
        }
        let expected = self.embedder.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RetrievalError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(storage_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO documents (text, source, metadata, embedding)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(storage_err)?;
            for (doc, vector) in documents.iter().zip(vectors.iter()) {
                let metadata = serde_json::to_string(&doc.metadata).map_err(storage_err)?;
                stmt.execute(params![doc.text, doc.source, metadata, vector_to_blob(vector)])
                    .map_err(storage_err)?;
            }
        }
        tx.commit().map_err(storage_err)?;

        info!(count = documents.len(), "Inserted documents");
        Ok(documents.len())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        let conn = self.conn.lock().await;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(n as usize)
    }
}

/// In-memory backend that returns its hits in stored order.
///
/// Used by tests and for offline development.
#[derive(Debug, Default)]
pub struct MockRetrievalBackend {
    hits: StdMutex<Vec<SearchHit>>,
    fail_with: Option<String>,
    queries: StdMutex<Vec<(String, usize)>>,
}

impl MockRetrievalBackend {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits: StdMutex::new(hits),
            ..Default::default()
        }
    }

    /// A backend whose every call fails as unavailable.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Build hits from `(source, text)` pairs with descending scores.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let n = pairs.len().max(1) as f32;
        let hits = pairs
            .iter()
            .enumerate()
            .map(|(i, (source, text))| SearchHit {
                text: text.to_string(),
                source: source.to_string(),
                score: 1.0 - i as f32 / n,
                metadata: serde_json::Value::Null,
            })
            .collect();
        Self::new(hits)
    }

    /// Every `(query, top_k)` received so far.
    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn check(&self) -> Result<(), RetrievalError> {
        match &self.fail_with {
            Some(message) => Err(RetrievalError::Unavailable {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RetrievalBackend for MockRetrievalBackend {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, RetrievalError> {
        self.queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((query.to_string(), top_k));
        self.check()?;
        let hits = self
            .hits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(hits.iter().take(top_k).cloned().collect())
    }

    async fn insert(&self, documents: Vec<Document>) -> Result<usize, RetrievalError> {
        self.check()?;
        let n = documents.len();
        let mut hits = self
            .hits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        hits.extend(documents.into_iter().map(|d| SearchHit {
            text: d.text,
            source: d.source,
            score: 0.0,
            metadata: serde_json::to_value(d.metadata).unwrap_or_default(),
        }));
        Ok(n)
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        self.check()?;
        Ok(self
            .hits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len())
    }
}
