//! Storage abstraction for Context Fusion.
//!
//! Three traits describe the external contracts the retrieval core needs:
//!
//! | Trait | Used by | Purpose |
//! |-------|---------|---------|
//! | [`CacheStore`] | [`QueryCache`](crate::cache::QueryCache), external source | TTL-keyed rows, text scan, expiry GC |
//! | [`VectorStore`] | [`VectorIndex`](crate::vector::VectorIndex) | append-only vectors, recent window |
//! | [`PersonalDataStore`] | personal source | capped per-category reads by user |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! The [`memory`] module provides one type implementing all three.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CacheEntry, CensusRow, FlashcardRecord, GoalRecord, NoteRecord, SourceType, VectorRecord,
};

/// Coarse keyword filter for [`CacheStore::scan_text`].
///
/// An entry matches when its payload contains any of `terms` and its source
/// type equals `source_type`. Case folding is ASCII-only on every backend,
/// matching SQLite's `LOWER`.
///
/// When `metadata_key` is set, only entries whose metadata holds a string
/// under that key match. The check runs before `limit` is applied.
#[derive(Debug, Clone)]
pub struct TextFilter {
    pub source_type: SourceType,
    pub terms: Vec<String>,
    pub metadata_key: Option<String>,
    pub limit: usize,
}

impl TextFilter {
    /// Whether `metadata` satisfies the `metadata_key` constraint.
    pub fn accepts_metadata(&self, metadata: &serde_json::Value) -> bool {
        match &self.metadata_key {
            Some(key) => metadata.get(key).is_some_and(|v| v.is_string()),
            None => true,
        }
    }
}

/// Backing store for cache rows.
///
/// Every read takes `now` so that expiry is evaluated against a single
/// instant chosen by the caller.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Insert a new row. Rows are never updated in place.
    async fn insert_entry(&self, entry: &CacheEntry) -> Result<()>;

    /// The most recently created live row for `key`, if any.
    async fn latest_entry(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>>;

    /// Delete every row for `key`. Returns the number of rows removed.
    async fn delete_key(&self, key: &str) -> Result<u64>;

    /// Delete every row whose expiry is at or before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Live rows matching a coarse keyword filter, newest first.
    async fn scan_text(&self, filter: &TextFilter, now: DateTime<Utc>) -> Result<Vec<CacheEntry>>;

    /// Row counts grouped by source type and expiry state.
    async fn census(&self, now: DateTime<Utc>) -> Result<Vec<CensusRow>>;
}

/// Append-only vector storage.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn append_vector(&self, record: &VectorRecord) -> Result<()>;

    /// The `limit` most recently appended records, newest first.
    async fn recent_vectors(&self, limit: usize) -> Result<Vec<VectorRecord>>;
}

/// Read-only access to a user's personal records.
///
/// Each method returns at most `limit` records, most recent first.
#[async_trait]
pub trait PersonalDataStore: Send + Sync {
    async fn recent_notes(&self, user_id: &str, limit: usize) -> Result<Vec<NoteRecord>>;
    async fn recent_flashcards(&self, user_id: &str, limit: usize)
        -> Result<Vec<FlashcardRecord>>;
    async fn active_goals(&self, user_id: &str, limit: usize) -> Result<Vec<GoalRecord>>;
}
