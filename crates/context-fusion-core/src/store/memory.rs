//! In-memory store implementing every storage trait, for tests and
//! embedded use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Guards are never held
//! across an `.await`. Text scans are substring matches over the payload.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CacheEntry, CensusRow, FlashcardRecord, GoalRecord, NoteRecord, SourceType, VectorRecord,
};

use super::{CacheStore, PersonalDataStore, TextFilter, VectorStore};

#[derive(Default)]
struct PersonalRecords {
    notes: Vec<NoteRecord>,
    flashcards: Vec<FlashcardRecord>,
    goals: Vec<GoalRecord>,
}

/// In-memory store for tests and embedded environments.
pub struct InMemoryStore {
    entries: RwLock<Vec<CacheEntry>>,
    vectors: RwLock<Vec<VectorRecord>>,
    personal: RwLock<HashMap<String, PersonalRecords>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            vectors: RwLock::new(Vec::new()),
            personal: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_note(&self, user_id: &str, note: NoteRecord) {
        write_recover(&self.personal)
            .entry(user_id.to_string())
            .or_default()
            .notes
            .push(note);
    }

    pub fn add_flashcard(&self, user_id: &str, card: FlashcardRecord) {
        write_recover(&self.personal)
            .entry(user_id.to_string())
            .or_default()
            .flashcards
            .push(card);
    }

    pub fn add_goal(&self, user_id: &str, goal: GoalRecord) {
        write_recover(&self.personal)
            .entry(user_id.to_string())
            .or_default()
            .goals
            .push(goal);
    }

    /// Number of cache rows currently held, live or expired.
    pub fn entry_count(&self) -> usize {
        read_recover(&self.entries).len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read_recover<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn newest_first<T: Clone>(items: &[T], created: impl Fn(&T) -> DateTime<Utc>, limit: usize) -> Vec<T> {
    let mut out: Vec<T> = items.to_vec();
    // Reversed first so equal timestamps keep the latest insertion ahead.
    out.reverse();
    out.sort_by_key(|item| std::cmp::Reverse(created(item)));
    out.truncate(limit);
    out
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn insert_entry(&self, entry: &CacheEntry) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        entries.push(entry.clone());
        Ok(())
    }

    async fn latest_entry(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        let mut best: Option<&CacheEntry> = None;
        for entry in entries.iter().filter(|e| e.key == key && e.is_live(now)) {
            match best {
                Some(b) if entry.created_at < b.created_at => {}
                _ => best = Some(entry),
            }
        }
        Ok(best.cloned())
    }

    async fn delete_key(&self, key: &str) -> Result<u64> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        let before = entries.len();
        entries.retain(|e| e.key != key);
        Ok((before - entries.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        let before = entries.len();
        entries.retain(|e| e.is_live(now));
        Ok((before - entries.len()) as u64)
    }

    async fn scan_text(&self, filter: &TextFilter, now: DateTime<Utc>) -> Result<Vec<CacheEntry>> {
        if filter.terms.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        let matching: Vec<CacheEntry> = entries
            .iter()
            .filter(|e| e.source_type == filter.source_type && e.is_live(now))
            .filter(|e| filter.accepts_metadata(&e.metadata))
            .filter(|e| {
                let payload = e.payload.to_ascii_lowercase();
                filter
                    .terms
                    .iter()
                    .any(|t| payload.contains(&t.to_ascii_lowercase()))
            })
            .cloned()
            .collect();
        Ok(newest_first(&matching, |e| e.created_at, filter.limit))
    }

    async fn census(&self, now: DateTime<Utc>) -> Result<Vec<CensusRow>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        let mut groups: BTreeMap<(SourceType, bool), u64> = BTreeMap::new();
        for e in entries.iter() {
            *groups.entry((e.source_type, !e.is_live(now))).or_insert(0) += 1;
        }
        Ok(groups
            .into_iter()
            .map(|((source_type, expired), count)| CensusRow {
                source_type,
                expired,
                count,
            })
            .collect())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn append_vector(&self, record: &VectorRecord) -> Result<()> {
        let mut vectors = self
            .vectors
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        vectors.push(record.clone());
        Ok(())
    }

    async fn recent_vectors(&self, limit: usize) -> Result<Vec<VectorRecord>> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        Ok(vectors.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl PersonalDataStore for InMemoryStore {
    async fn recent_notes(&self, user_id: &str, limit: usize) -> Result<Vec<NoteRecord>> {
        let personal = self
            .personal
            .read()
            .map_err(|_| anyhow!("personal store lock poisoned"))?;
        Ok(personal
            .get(user_id)
            .map(|p| newest_first(&p.notes, |n| n.created_at, limit))
            .unwrap_or_default())
    }

    async fn recent_flashcards(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<FlashcardRecord>> {
        let personal = self
            .personal
            .read()
            .map_err(|_| anyhow!("personal store lock poisoned"))?;
        Ok(personal
            .get(user_id)
            .map(|p| newest_first(&p.flashcards, |f| f.created_at, limit))
            .unwrap_or_default())
    }

    async fn active_goals(&self, user_id: &str, limit: usize) -> Result<Vec<GoalRecord>> {
        let personal = self
            .personal
            .read()
            .map_err(|_| anyhow!("personal store lock poisoned"))?;
        Ok(personal
            .get(user_id)
            .map(|p| {
                let active: Vec<GoalRecord> = p
                    .goals
                    .iter()
                    .filter(|g| g.status.as_deref() != Some("completed"))
                    .cloned()
                    .collect();
                newest_first(&active, |g| g.created_at, limit)
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entry(key: &str, payload: &str, created: DateTime<Utc>, ttl: Duration) -> CacheEntry {
        CacheEntry {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
            source_type: SourceType::External,
            metadata: json!({}),
            created_at: created,
            expires_at: created + ttl,
        }
    }

    #[tokio::test]
    async fn test_latest_entry_prefers_newest_live_row() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_entry(&entry("k", "old", now - Duration::minutes(10), Duration::hours(1)))
            .await
            .unwrap();
        store
            .insert_entry(&entry("k", "new", now - Duration::minutes(1), Duration::hours(1)))
            .await
            .unwrap();
        store
            .insert_entry(&entry("k", "dead", now, Duration::zero()))
            .await
            .unwrap();

        let got = store.latest_entry("k", now).await.unwrap().unwrap();
        assert_eq!(got.payload, "new");
    }

    #[tokio::test]
    async fn test_delete_expired_keeps_live_rows() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_entry(&entry("a", "x", now - Duration::hours(2), Duration::hours(1)))
            .await
            .unwrap();
        store
            .insert_entry(&entry("b", "y", now, Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_scan_text_is_case_insensitive_and_typed() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_entry(&entry("a", "Paris is the capital of France", now, Duration::hours(1)))
            .await
            .unwrap();
        let mut hybrid = entry("b", "france again", now, Duration::hours(1));
        hybrid.source_type = SourceType::Hybrid;
        store.insert_entry(&hybrid).await.unwrap();

        let filter = TextFilter {
            source_type: SourceType::External,
            terms: vec!["FRANCE".to_string()],
            metadata_key: None,
            limit: 10,
        };
        let hits = store.scan_text(&filter, now).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "a");
    }

    #[tokio::test]
    async fn test_scan_text_folds_ascii_only() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_entry(&entry("upper", "ÉLAN VITAL", now, Duration::hours(1)))
            .await
            .unwrap();
        store
            .insert_entry(&entry("lower", "élan vital", now, Duration::hours(1)))
            .await
            .unwrap();

        let filter = TextFilter {
            source_type: SourceType::External,
            terms: vec!["Élan".to_string()],
            metadata_key: None,
            limit: 10,
        };
        let hits = store.scan_text(&filter, now).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "upper");
    }

    #[tokio::test]
    async fn test_scan_text_metadata_key_applies_before_limit() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut snippet = entry("snippet", "photosynthesis in leaves", now, Duration::hours(1));
        snippet.metadata = json!({"source_name": "Wikipedia"});
        store.insert_entry(&snippet).await.unwrap();
        for i in 0..5 {
            let fused = entry(
                &format!("fused{}", i),
                "photosynthesis answer",
                now + Duration::milliseconds(i + 1),
                Duration::hours(1),
            );
            store.insert_entry(&fused).await.unwrap();
        }

        let filter = TextFilter {
            source_type: SourceType::External,
            terms: vec!["photosynthesis".to_string()],
            metadata_key: Some("source_name".to_string()),
            limit: 2,
        };
        let hits = store.scan_text(&filter, now).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "snippet");
    }

    #[tokio::test]
    async fn test_recent_vectors_newest_first() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .append_vector(&VectorRecord {
                    id: i.to_string(),
                    text: format!("t{}", i),
                    vector: vec![1.0],
                    metadata: json!({}),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let recent = store.recent_vectors(2).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "3"]);
    }
}
