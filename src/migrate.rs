//! Database schema migrations (idempotent).
//!
//! Tables:
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `knowledge_cache` | Immutable TTL rows for fused results and external snippets |
//! | `knowledge_embeddings` | Append-only vector index (little-endian f32 BLOBs) |
//! | `notes`, `flashcards`, `goals` | Personal records read by the personal source |
//!
//! All timestamps are Unix milliseconds.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an existing pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_cache (
            id TEXT PRIMARY KEY,
            query_hash TEXT NOT NULL,
            payload TEXT NOT NULL,
            source_type TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_embeddings (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            category TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flashcards (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            front TEXT NOT NULL,
            back TEXT NOT NULL,
            times_reviewed INTEGER NOT NULL DEFAULT 0,
            times_correct INTEGER NOT NULL DEFAULT 0,
            last_reviewed_at INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS goals (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            progress REAL NOT NULL DEFAULT 0,
            priority TEXT,
            status TEXT,
            target_date TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cache_hash_created ON knowledge_cache(query_hash, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_expires ON knowledge_cache(expires_at)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_created ON knowledge_embeddings(created_at DESC)",
    )
    .execute(pool)
    .await?;
    for table in ["notes", "flashcards", "goals"] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_user_created ON {table}(user_id, created_at DESC)"
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}
