//! Append-only vector index with brute-force cosine search.
//!
//! Queries scan the `candidate_window` most recently indexed rows, so cost
//! is linear in the window and older rows fall out of reach. That is the
//! scaling ceiling of this design; an approximate-nearest-neighbour index
//! would replace [`VectorIndex::query`] at larger corpus sizes.

use std::sync::Arc;

use std::fmt;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::{cosine_similarity, truncate_chars, EmbeddingProvider};
use crate::models::{SimilarityMatch, VectorRecord};
use crate::store::VectorStore;

/// Default number of most-recent rows scanned per query.
pub const DEFAULT_CANDIDATE_WINDOW: usize = 100;
/// Default cap on characters sent to the embedding provider.
pub const DEFAULT_MAX_EMBED_CHARS: usize = 8000;

/// Rejected indexing input. Storage failures are reported separately as
/// plain `anyhow` errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    EmptyVector,
    NoVector { model: String },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::EmptyVector => write!(f, "cannot index an empty vector"),
            IndexError::NoVector { model } => {
                write!(f, "embedding provider '{}' returned no vector", model)
            }
        }
    }
}

impl std::error::Error for IndexError {}

/// Vector index over a [`VectorStore`] and an [`EmbeddingProvider`].
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    candidate_window: usize,
    max_embed_chars: usize,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn VectorStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            provider,
            candidate_window: DEFAULT_CANDIDATE_WINDOW,
            max_embed_chars: DEFAULT_MAX_EMBED_CHARS,
        }
    }

    pub fn with_candidate_window(mut self, window: usize) -> Self {
        self.candidate_window = window;
        self
    }

    pub fn with_max_embed_chars(mut self, max_chars: usize) -> Self {
        self.max_embed_chars = max_chars;
        self
    }

    /// Embed `text`, truncated to the configured length. Returns an empty
    /// vector when the provider fails.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        let input = truncate_chars(text, self.max_embed_chars);
        match self.provider.embed(input).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(model = self.provider.model_name(), error = %e, "embedding failed");
                Vec::new()
            }
        }
    }

    /// Append a row. Empty vectors are rejected.
    pub async fn index(&self, text: &str, vector: Vec<f32>, metadata: Value) -> Result<String> {
        if vector.is_empty() {
            return Err(IndexError::EmptyVector.into());
        }
        let record = VectorRecord {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            vector,
            metadata,
            created_at: Utc::now(),
        };
        self.store.append_vector(&record).await?;
        debug!(id = %record.id, dims = record.vector.len(), "indexed vector");
        Ok(record.id)
    }

    /// Embed then index.
    pub async fn index_text(&self, text: &str, metadata: Value) -> Result<String> {
        let vector = self.embed(text).await;
        if vector.is_empty() {
            return Err(IndexError::NoVector {
                model: self.provider.model_name().to_string(),
            }
            .into());
        }
        self.index(text, vector, metadata).await
    }

    /// Matches with `similarity >= threshold`, best first, at most `limit`.
    pub async fn query(&self, vector: &[f32], limit: usize, threshold: f64) -> Vec<SimilarityMatch> {
        if vector.is_empty() || limit == 0 {
            return Vec::new();
        }

        let candidates = match self.store.recent_vectors(self.candidate_window).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "vector store read failed");
                return Vec::new();
            }
        };

        let mut matches: Vec<SimilarityMatch> = candidates
            .into_iter()
            .filter_map(|row| {
                let similarity = cosine_similarity(vector, &row.vector) as f64;
                (similarity >= threshold).then(|| SimilarityMatch {
                    text: row.text,
                    similarity,
                    metadata: row.metadata,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);
        matches
    }
}
