//! Append-only JSONL log of human feedback on answers.
//!
//! Each line is one [`FeedbackEntry`]. The log is write-once per entry and is
//! meant to be replayed later as labelled examples.

use crate::types::PipelineResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use veritas_core::FeedbackError;

/// Highest accepted feedback score.
pub const MAX_SCORE: u8 = 10;

/// One human judgement of an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub initial_answer: String,
    pub corrected_answer: String,
    pub score: u8,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl FeedbackEntry {
    pub fn new(
        question: impl Into<String>,
        initial_answer: impl Into<String>,
        corrected_answer: impl Into<String>,
        score: u8,
    ) -> Result<Self, FeedbackError> {
        if score > MAX_SCORE {
            return Err(FeedbackError::ScoreOutOfRange { score });
        }
        Ok(Self {
            timestamp: Utc::now(),
            question: question.into(),
            initial_answer: initial_answer.into(),
            corrected_answer: corrected_answer.into(),
            score,
            metadata: HashMap::new(),
        })
    }

    /// Feedback on a pipeline result. The pipeline's final answer is the
    /// "initial" answer from the reviewer's point of view.
    pub fn for_result(
        question: impl Into<String>,
        result: &PipelineResult,
        corrected_answer: impl Into<String>,
        score: u8,
    ) -> Result<Self, FeedbackError> {
        let mut entry = Self::new(
            question,
            result.final_answer.text.clone(),
            corrected_answer,
            score,
        )?;
        entry.metadata.extend([
            ("request_id".to_string(), serde_json::json!(result.request_id)),
            ("iterations".to_string(), serde_json::json!(result.iterations())),
            ("final_score".to_string(), serde_json::json!(result.final_score())),
            ("status".to_string(), serde_json::json!(result.status)),
            (
                "sources".to_string(),
                serde_json::json!(
                    result
                        .evidence
                        .iter()
                        .map(|p| p.source.as_str())
                        .collect::<Vec<_>>()
                ),
            ),
        ]);
        Ok(entry)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// JSONL feedback sink.
#[derive(Debug, Clone)]
pub struct FeedbackLog {
    path: PathBuf,
}

impl FeedbackLog {
    /// Open the log at `path`, creating its parent directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FeedbackError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| io_err(&path, e))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single JSON line.
    pub fn append(&self, entry: &FeedbackEntry) -> Result<(), FeedbackError> {
        if entry.score > MAX_SCORE {
            return Err(FeedbackError::ScoreOutOfRange { score: entry.score });
        }
        let line = serde_json::to_string(entry).map_err(|e| FeedbackError::Malformed {
            line: 0,
            message: e.to_string(),
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        writeln!(file, "{}", line).map_err(|e| io_err(&self.path, e))?;

        info!(
            path = %self.path.display(),
            score = entry.score,
            "Feedback saved"
        );
        Ok(())
    }

    /// Load the log and summarize it.
    pub fn stats(&self) -> Result<FeedbackStats, FeedbackError> {
        Ok(FeedbackStats::from_entries(&self.load()?))
    }

    /// Read every entry. A missing file is an empty log; blank lines are skipped.
    pub fn load(&self) -> Result<Vec<FeedbackEntry>, FeedbackError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.path, e)),
        };

        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| io_err(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry =
                serde_json::from_str(&line).map_err(|e| FeedbackError::Malformed {
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Summary of a feedback log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedbackStats {
    /// Number of entries.
    pub count: usize,
    /// Mean score, unset for an empty log.
    pub average_score: Option<f64>,
    pub min_score: Option<u8>,
    pub max_score: Option<u8>,
    /// Entries whose corrected answer differs from the answer given.
    pub corrected: usize,
    /// Timestamp of the newest entry.
    pub last_entry: Option<DateTime<Utc>>,
}

impl FeedbackStats {
    pub fn from_entries(entries: &[FeedbackEntry]) -> Self {
        if entries.is_empty() {
            return Self::default();
        }
        let total: u32 = entries.iter().map(|e| u32::from(e.score)).sum();
        Self {
            count: entries.len(),
            average_score: Some(f64::from(total) / entries.len() as f64),
            min_score: entries.iter().map(|e| e.score).min(),
            max_score: entries.iter().map(|e| e.score).max(),
            corrected: entries
                .iter()
                .filter(|e| e.corrected_answer.trim() != e.initial_answer.trim())
                .count(),
            last_entry: entries.iter().map(|e| e.timestamp).max(),
        }
    }
}

fn io_err(path: &Path, e: std::io::Error) -> FeedbackError {
    FeedbackError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
