//! SQLite-backed implementation of the core storage traits.
//!
//! One [`SqliteStore`] wraps a [`SqlitePool`] and serves as the cache
//! store, the vector store, and the personal-data store, translating each
//! trait method into SQL against the schema created by [`crate::migrate`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use context_fusion_core::embedding::{blob_to_vec, vec_to_blob};
use context_fusion_core::models::{
    CacheEntry, CensusRow, FlashcardRecord, GoalRecord, NoteRecord, SourceType, VectorRecord,
};
use context_fusion_core::store::{CacheStore, PersonalDataStore, TextFilter, VectorStore};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of every store trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and ensure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config)
            .await
            .with_context(|| format!("Failed to open database: {}", config.db.path.display()))?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_note(&self, user_id: &str, note: &NoteRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO notes (id, user_id, title, content, category, tags_json, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&note.id)
        .bind(user_id)
        .bind(&note.title)
        .bind(&note.content)
        .bind(&note.category)
        .bind(serde_json::to_string(&note.tags)?)
        .bind(note.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_flashcard(&self, user_id: &str, card: &FlashcardRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flashcards (id, user_id, front, back, times_reviewed, times_correct,
                                    last_reviewed_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&card.id)
        .bind(user_id)
        .bind(&card.front)
        .bind(&card.back)
        .bind(card.times_reviewed)
        .bind(card.times_correct)
        .bind(card.last_reviewed_at.map(|t| t.timestamp_millis()))
        .bind(card.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_goal(&self, user_id: &str, goal: &GoalRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO goals (id, user_id, title, description, progress, priority, status,
                               target_date, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&goal.id)
        .bind(user_id)
        .bind(&goal.title)
        .bind(&goal.description)
        .bind(goal.progress)
        .bind(&goal.priority)
        .bind(&goal.status)
        .bind(&goal.target_date)
        .bind(goal.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_metadata(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or(serde_json::json!({}))
}

fn row_to_entry(row: &SqliteRow) -> Result<CacheEntry> {
    let source_type: String = row.get("source_type");
    let metadata_json: String = row.get("metadata_json");
    Ok(CacheEntry {
        id: row.get("id"),
        key: row.get("query_hash"),
        payload: row.get("payload"),
        source_type: source_type.parse()?,
        metadata: parse_metadata(&metadata_json),
        created_at: from_millis(row.get("created_at")),
        expires_at: from_millis(row.get("expires_at")),
    })
}

const ENTRY_COLUMNS: &str =
    "id, query_hash, payload, source_type, metadata_json, created_at, expires_at";

#[async_trait]
impl CacheStore for SqliteStore {
    async fn insert_entry(&self, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_cache (id, query_hash, payload, source_type, metadata_json,
                                         created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.key)
        .bind(&entry.payload)
        .bind(entry.source_type.as_str())
        .bind(entry.metadata.to_string())
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_entry(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM knowledge_cache WHERE query_hash = ? AND expires_at > ? ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(key)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn delete_key(&self, key: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM knowledge_cache WHERE query_hash = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM knowledge_cache WHERE expires_at <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn scan_text(&self, filter: &TextFilter, now: DateTime<Utc>) -> Result<Vec<CacheEntry>> {
        if filter.terms.is_empty() {
            return Ok(Vec::new());
        }

        // LOWER and the scan's patterns both fold ASCII only.
        let like_clause = vec!["LOWER(payload) LIKE ?"; filter.terms.len()].join(" OR ");
        let metadata_clause = if filter.metadata_key.is_some() {
            " AND json_type(metadata_json, ?) = 'text'"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM knowledge_cache WHERE source_type = ? AND expires_at > ?{metadata_clause} AND ({like_clause}) ORDER BY created_at DESC LIMIT ?"
        );

        let mut query = sqlx::query(&sql)
            .bind(filter.source_type.as_str())
            .bind(now.timestamp_millis());
        if let Some(key) = &filter.metadata_key {
            query = query.bind(format!("$.\"{}\"", key));
        }
        for term in &filter.terms {
            query = query.bind(format!("%{}%", term.to_ascii_lowercase()));
        }
        let rows = query
            .bind(filter.limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn census(&self, now: DateTime<Utc>) -> Result<Vec<CensusRow>> {
        let rows = sqlx::query(
            r#"
            SELECT source_type, (expires_at <= ?) AS expired, COUNT(*) AS n
            FROM knowledge_cache
            GROUP BY source_type, expired
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let source_type: String = row.get("source_type");
                let expired: i64 = row.get("expired");
                let n: i64 = row.get("n");
                Ok(CensusRow {
                    source_type: source_type.parse()?,
                    expired: expired != 0,
                    count: n as u64,
                })
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn append_vector(&self, record: &VectorRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO knowledge_embeddings (id, content, embedding, metadata_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.text)
        .bind(vec_to_blob(&record.vector))
        .bind(record.metadata.to_string())
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_vectors(&self, limit: usize) -> Result<Vec<VectorRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content, embedding, metadata_json, created_at
            FROM knowledge_embeddings
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                VectorRecord {
                    id: row.get("id"),
                    text: row.get("content"),
                    vector: blob_to_vec(&blob),
                    metadata: parse_metadata(&metadata_json),
                    created_at: from_millis(row.get("created_at")),
                }
            })
            .collect())
    }
}

#[async_trait]
impl PersonalDataStore for SqliteStore {
    async fn recent_notes(&self, user_id: &str, limit: usize) -> Result<Vec<NoteRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, content, category, tags_json, created_at
            FROM notes
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let tags_json: String = row.get("tags_json");
                NoteRecord {
                    id: row.get("id"),
                    title: row.get("title"),
                    content: row.get("content"),
                    category: row.get("category"),
                    tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                    created_at: from_millis(row.get("created_at")),
                }
            })
            .collect())
    }

    async fn recent_flashcards(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<FlashcardRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, front, back, times_reviewed, times_correct, last_reviewed_at, created_at
            FROM flashcards
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let last_reviewed: Option<i64> = row.get("last_reviewed_at");
                FlashcardRecord {
                    id: row.get("id"),
                    front: row.get("front"),
                    back: row.get("back"),
                    times_reviewed: row.get("times_reviewed"),
                    times_correct: row.get("times_correct"),
                    last_reviewed_at: last_reviewed.map(from_millis),
                    created_at: from_millis(row.get("created_at")),
                }
            })
            .collect())
    }

    async fn active_goals(&self, user_id: &str, limit: usize) -> Result<Vec<GoalRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, description, progress, priority, status, target_date, created_at
            FROM goals
            WHERE user_id = ? AND (status IS NULL OR status != 'completed')
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| GoalRecord {
                id: row.get("id"),
                title: row.get("title"),
                description: row.get("description"),
                progress: row.get("progress"),
                priority: row.get("priority"),
                status: row.get("status"),
                target_date: row.get("target_date"),
                created_at: from_millis(row.get("created_at")),
            })
            .collect())
    }
}
