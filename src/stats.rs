//! Cache statistics overview.
//!
//! Used by `cfx cache stats` to summarize what the cache and vector index
//! hold: live and expired rows, a per-source-type breakdown, and the
//! database size on disk.

use anyhow::Result;
use sqlx::SqlitePool;

use context_fusion_core::cache::QueryCache;
use context_fusion_core::models::CacheStats;

use crate::config::Config;

/// Print cache statistics, as a table or as JSON.
pub async fn run_stats(config: &Config, cache: &QueryCache, pool: &SqlitePool, json: bool) -> Result<()> {
    let stats = cache.stats().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_embeddings")
        .fetch_one(pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    print!("{}", render(&stats, vectors, &config.db.path.display().to_string(), db_size));
    Ok(())
}

fn render(stats: &CacheStats, vectors: i64, db_path: &str, db_size: u64) -> String {
    let mut out = String::new();
    out.push_str("Context Fusion: Cache Stats\n");
    out.push_str("============================\n\n");
    out.push_str(&format!("  Database:    {}\n", db_path));
    out.push_str(&format!("  Size:        {}\n\n", format_bytes(db_size)));
    out.push_str(&format!("  Entries:     {}\n", stats.total));
    out.push_str(&format!("  Live:        {}\n", stats.total.saturating_sub(stats.expired_count)));
    out.push_str(&format!("  Expired:     {}\n", stats.expired_count));
    out.push_str(&format!("  Vectors:     {}\n", vectors));

    if !stats.counts_by_source_type.is_empty() {
        out.push_str("\n  Live by source type:\n");
        out.push_str(&format!("  {:<12} {:>8}\n", "TYPE", "ENTRIES"));
        out.push_str(&format!("  {}\n", "-".repeat(21)));
        for (source_type, count) in &stats.counts_by_source_type {
            out.push_str(&format!("  {:<12} {:>8}\n", source_type, count));
        }
    }
    out.push('\n');
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
