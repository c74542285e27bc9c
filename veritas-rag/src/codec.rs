//! Structured-text codec for the compact key-value notation (TOON).
//!
//! One entry per line:
//!
//! ```text
//! answer: DSPy is a framework.
//! confidence: 0.95
//! sources[2]: dspy_docs, milvus_docs
//! ```
//!
//! Scalars are `key: value`; arrays are `key[n]: a, b` where `n` is advisory.
//! Decoding is best effort: lines that are not entries are skipped, a
//! surrounding code fence is removed, and [`decode`] never fails.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::warn;

/// A decoded value: a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToonValue {
    Scalar(String),
    List(Vec<String>),
}

impl From<&str> for ToonValue {
    fn from(s: &str) -> Self {
        ToonValue::Scalar(s.to_string())
    }
}

impl From<String> for ToonValue {
    fn from(s: String) -> Self {
        ToonValue::Scalar(s)
    }
}

impl From<Vec<String>> for ToonValue {
    fn from(v: Vec<String>) -> Self {
        ToonValue::List(v)
    }
}

/// Key → value map produced by [`decode`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToonMap(BTreeMap<String, ToonValue>);

impl ToonMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ToonValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ToonValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The value under `key` if it is a scalar.
    pub fn scalar(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(ToonValue::Scalar(s)) => Some(s),
            _ => None,
        }
    }

    /// The value under `key` if it is a list.
    pub fn list(&self, key: &str) -> Option<&[String]> {
        match self.0.get(key) {
            Some(ToonValue::List(v)) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ToonValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, ToonValue)> for ToonMap {
    fn from_iter<I: IntoIterator<Item = (String, ToonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Internal decoder fault. Only [`try_decode`] exposes it.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),
}

struct Patterns {
    array: Regex,
    scalar: Regex,
}

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(|| {
    Ok(Patterns {
        array: Regex::new(r"^(\w+)\[(\d+)\]:\s*(.*)$")?,
        scalar: Regex::new(r"^(\w+):\s*(.*)$")?,
    })
});

/// Decode `text`, reporting internal faults.
pub fn try_decode(text: &str) -> Result<ToonMap, CodecError> {
    let patterns = PATTERNS.as_ref().map_err(|e| CodecError::Pattern(e.clone()))?;
    let mut map = ToonMap::new();

    for line in strip_fence(text).lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = patterns.array.captures(line) {
            let payload = caps[3].trim();
            let items = if payload.is_empty() {
                Vec::new()
            } else {
                payload.split(',').map(|v| v.trim().to_string()).collect()
            };
            map.insert(&caps[1], ToonValue::List(items));
            continue;
        }

        if let Some(caps) = patterns.scalar.captures(line) {
            map.insert(&caps[1], unquote(&caps[2]).to_string());
        }
    }

    Ok(map)
}

/// Decode `text`. An internal fault yields `{error, raw}` instead of failing.
pub fn decode(text: &str) -> ToonMap {
    match try_decode(text) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "Structured-text decode failed; returning error map");
            let mut map = ToonMap::new();
            map.insert("error", e.to_string());
            map.insert("raw", text);
            map
        }
    }
}

/// Encode a map, one entry per line. Values are written as-is, without quoting.
pub fn encode(map: &ToonMap) -> String {
    map.iter()
        .map(|(key, value)| match value {
            ToonValue::Scalar(s) => format!("{key}: {s}"),
            ToonValue::List(items) => format!("{key}[{}]: {}", items.len(), items.join(",")),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_fence(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```toon") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

/// Strip one matching layer of `"` or `'`.
fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
