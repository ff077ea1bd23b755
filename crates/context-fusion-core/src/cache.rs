//! TTL-keyed cache of fused retrieval results.
//!
//! [`QueryCache`] is an explicit client object: build it once over a
//! [`CacheStore`] and share it (`Arc<QueryCache>`) with every consumer.
//! It never raises: read failures and undecodable payloads are misses,
//! write failures are logged and swallowed.
//!
//! # Keys
//!
//! [`cache_key`] is a SHA-256 hex digest over the canonical JSON
//!
//! ```text
//! {"context":{...},"query":"<lowercased, trimmed>","user_id":"..."}
//! ```
//!
//! `serde_json` maps are key-sorted, so the context serializes canonically
//! at every nesting level regardless of insertion order.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{CacheEntry, CacheStats, EnhancedResult, SourceType};
use crate::store::{CacheStore, TextFilter};

#[derive(Serialize)]
struct KeyMaterial<'a> {
    context: &'a BTreeMap<String, Value>,
    query: String,
    user_id: &'a str,
}

/// Deterministic cache key for `(query, user_id, context)`.
///
/// # Example
///
/// ```rust
/// use std::collections::BTreeMap;
/// use context_fusion_core::cache::cache_key;
///
/// let ctx = BTreeMap::new();
/// assert_eq!(
///     cache_key("  Capital of FRANCE ", "u1", &ctx),
///     cache_key("capital of france", "u1", &ctx),
/// );
/// assert_eq!(cache_key("q", "u1", &ctx).len(), 64);
/// ```
pub fn cache_key(query: &str, user_id: &str, context: &BTreeMap<String, Value>) -> String {
    let material = KeyMaterial {
        context,
        query: query.trim().to_lowercase(),
        user_id,
    };
    // Serializing string/Value maps cannot fail; fall back to Debug to stay total.
    let canonical =
        serde_json::to_string(&material).unwrap_or_else(|_| format!("{:?}", context));

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cache client over a [`CacheStore`].
pub struct QueryCache {
    store: Arc<dyn CacheStore>,
}

impl QueryCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// See [`cache_key`].
    pub fn key(&self, query: &str, user_id: &str, context: &BTreeMap<String, Value>) -> String {
        cache_key(query, user_id, context)
    }

    /// The newest live entry for `key`. Errors are misses.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        match self.store.latest_entry(key, now).await {
            // The store filters on expiry too; re-check against our own instant.
            Ok(Some(entry)) if entry.is_live(now) => {
                debug!(key, source_type = %entry.source_type, "cache hit");
                Some(entry)
            }
            Ok(_) => {
                debug!(key, "cache miss");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    /// [`get`](Self::get) followed by payload decoding. Undecodable payloads
    /// are misses.
    pub async fn get_result(&self, key: &str) -> Option<EnhancedResult> {
        let entry = self.get(key).await?;
        match serde_json::from_str::<EnhancedResult>(&entry.payload) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(key, error = %e, "cached payload could not be decoded; treating as miss");
                None
            }
        }
    }

    /// Insert a new entry expiring `ttl` from now. Errors are logged only.
    pub async fn set(
        &self,
        key: &str,
        payload: &str,
        source_type: SourceType,
        metadata: Value,
        ttl: Duration,
    ) {
        if let Err(e) = self.try_set(key, payload, source_type, metadata, ttl).await {
            warn!(key, error = %e, "cache write failed");
        }
    }

    async fn try_set(
        &self,
        key: &str,
        payload: &str,
        source_type: SourceType,
        metadata: Value,
        ttl: Duration,
    ) -> Result<()> {
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(ttl)
            .with_context(|| format!("TTL of {}s overflows the timestamp range", ttl.num_seconds()))?;
        let entry = CacheEntry {
            id: Uuid::new_v4().to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
            source_type,
            metadata,
            created_at,
            expires_at,
        };
        self.store.insert_entry(&entry).await?;
        debug!(key, %source_type, ttl_secs = ttl.num_seconds(), "cache write");
        Ok(())
    }

    /// Serialize and store a fused result.
    pub async fn set_result(&self, key: &str, result: &EnhancedResult, metadata: Value, ttl: Duration) {
        match serde_json::to_string(result) {
            Ok(payload) => {
                self.set(key, &payload, result.source_type(), metadata, ttl)
                    .await
            }
            Err(e) => warn!(key, error = %e, "fused result could not be encoded; not cached"),
        }
    }

    /// Remove every entry for `key`. Returns rows removed (0 on error).
    pub async fn invalidate(&self, key: &str) -> u64 {
        match self.store.delete_key(key).await {
            Ok(n) => {
                debug!(key, removed = n, "cache invalidated");
                n
            }
            Err(e) => {
                warn!(key, error = %e, "cache invalidation failed");
                0
            }
        }
    }

    /// Remove all expired entries. Returns rows removed (0 on error).
    pub async fn cleanup(&self) -> u64 {
        match self.store.delete_expired(Utc::now()).await {
            Ok(n) => {
                debug!(removed = n, "cache cleanup");
                n
            }
            Err(e) => {
                warn!(error = %e, "cache cleanup failed");
                0
            }
        }
    }

    /// Live entries matching a coarse keyword filter, newest first.
    pub async fn scan(&self, filter: &TextFilter) -> Vec<CacheEntry> {
        match self.store.scan_text(filter, Utc::now()).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cache scan failed");
                Vec::new()
            }
        }
    }

    /// Occupancy summary. Zeroed on storage error.
    pub async fn stats(&self) -> CacheStats {
        let rows = match self.store.census(Utc::now()).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "cache stats failed");
                return CacheStats::default();
            }
        };

        let mut stats = CacheStats::default();
        for row in rows {
            stats.total += row.count;
            if row.expired {
                stats.expired_count += row.count;
            } else {
                *stats
                    .counts_by_source_type
                    .entry(row.source_type.to_string())
                    .or_insert(0) += row.count;
            }
        }
        stats
    }
}
