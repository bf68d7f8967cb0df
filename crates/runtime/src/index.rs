//! Semantic tool index.
//!
//! Maps a free-text request to the tools it likely needs by nearest-neighbour
//! search over short "which tools for which kind of request" descriptions.

use crate::tools::ToolId;
use crate::{Error, Result};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

/// Default minimum cosine similarity for a match.
pub const DEFAULT_SIMILARITY_FLOOR: f32 = 0.35;

/// Errors from an embedding backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EmbedError {
    #[error("network: {0}")]
    Network(String),

    #[error("embedding api: {0}")]
    Api(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

impl From<EmbedError> for Error {
    fn from(err: EmbedError) -> Self {
        Error::IndexUnavailable(err.to_string())
    }
}

/// Turns text into a vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> impl Future<Output = std::result::Result<Vec<f32>, EmbedError>> + Send;
}

/// One corpus entry: a request pattern and the tools it calls for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub query_pattern: String,
    pub tools: Vec<ToolId>,
}

impl IndexEntry {
    pub fn new<I, S>(query_pattern: impl Into<String>, tools: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            query_pattern: query_pattern.into(),
            tools: tools
                .into_iter()
                .map(ToolId::new)
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

/// A scored lookup hit.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub query_pattern: String,
    pub tools: Vec<ToolId>,
    pub score: f32,
}

struct Embedded {
    entry: IndexEntry,
    vector: Vec<f32>,
}

/// Pre-embedded corpus of [`IndexEntry`] values.
///
/// Read-only after [`build`](Self::build); share it behind an `Arc`.
pub struct ToolIndex<E> {
    embedder: E,
    entries: Vec<Embedded>,
    similarity_floor: f32,
}

impl<E: Embedder> ToolIndex<E> {
    /// Embed every entry's pattern.
    ///
    /// Fails with [`Error::IndexUnavailable`] if the embedder does.
    pub async fn build(embedder: E, entries: Vec<IndexEntry>, similarity_floor: f32) -> Result<Self> {
        if !(-1.0..=1.0).contains(&similarity_floor) {
            return Err(Error::Config(format!(
                "similarity floor must be within [-1, 1], got {similarity_floor}"
            )));
        }

        let mut embedded = Vec::with_capacity(entries.len());
        for entry in entries {
            let vector = embedder.embed(&entry.query_pattern).await?;
            embedded.push(Embedded { entry, vector });
        }
        debug!(entries = embedded.len(), "tool index built");

        Ok(Self {
            embedder,
            entries: embedded,
            similarity_floor,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter().map(|e| &e.entry)
    }

    pub fn similarity_floor(&self) -> f32 {
        self.similarity_floor
    }

    /// Tool lists of the top-`k` entries at or above the similarity floor.
    ///
    /// No match is an empty result, not an error.
    pub async fn lookup(&self, query: &str, k: usize) -> Result<Vec<Vec<ToolId>>> {
        Ok(self
            .lookup_scored(query, k)
            .await?
            .into_iter()
            .map(|m| m.tools)
            .collect())
    }

    /// Like [`lookup`](Self::lookup), with patterns and scores.
    ///
    /// Ordered by descending score; ties keep corpus order.
    pub async fn lookup_scored(&self, query: &str, k: usize) -> Result<Vec<IndexMatch>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(&query_vector, &e.vector)))
            .filter(|(_, score)| *score >= self.similarity_floor)
            .collect();
        // Stable sort keeps corpus order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        let matches: Vec<IndexMatch> = scored
            .into_iter()
            .map(|(i, score)| IndexMatch {
                query_pattern: self.entries[i].entry.query_pattern.clone(),
                tools: self.entries[i].entry.tools.clone(),
                score,
            })
            .collect();
        debug!(query, hits = matches.len(), "tool index lookup");
        Ok(matches)
    }
}

/// Cosine similarity; zero for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
