//! Retrieval orchestration.
//!
//! [`RetrievalOrchestrator::retrieve`] is the single entry point of the
//! retrieval path:
//!
//! ```text
//! query ─▶ time-sensitive? ──no──▶ cache.get ──hit──▶ return (cache_hit)
//!               │ yes                  │ miss
//!               ▼                      ▼
//!      ┌── personal (mode = personal) ──┐
//!      ├── external ────────────────────┼─▶ fuse ─▶ cache.set (TTL) ─▶ return
//!      └── embed ─▶ vector query ───────┘
//! ```
//!
//! Each branch runs as its own task under a timeout. A panic, timeout, or
//! error in one branch contributes an empty list and never cancels the
//! others. The method is infallible: internal failures only mean less
//! context.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tracing::{debug, error, info, warn};

use context_fusion_core::cache::QueryCache;
use context_fusion_core::fusion::{fuse, BranchOutputs};
use context_fusion_core::models::{EnhancedResult, QueryMode, RetrievalQuery};
use context_fusion_core::sensitivity::TimeSensitivity;
use context_fusion_core::store::{CacheStore, PersonalDataStore, VectorStore};
use context_fusion_core::vector::VectorIndex;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::external::ExternalKnowledgeSource;
use crate::personal::{PersonalCaps, PersonalKnowledgeSource};
use crate::providers::build_providers;

/// Tunables of the retrieval path.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub default_ttl: chrono::Duration,
    pub time_sensitive_ttl: chrono::Duration,
    pub similarity_limit: usize,
    pub similarity_threshold: f64,
    pub branch_timeout: std::time::Duration,
}

impl RetrievalSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_ttl: chrono::Duration::hours(config.cache.default_ttl_hours),
            time_sensitive_ttl: chrono::Duration::hours(config.cache.time_sensitive_ttl_hours),
            similarity_limit: config.retrieval.similarity_limit,
            similarity_threshold: config.retrieval.similarity_threshold,
            branch_timeout: std::time::Duration::from_secs(config.retrieval.branch_timeout_secs),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&Config::minimal())
    }
}

pub struct RetrievalOrchestrator {
    cache: Arc<QueryCache>,
    personal: Arc<PersonalKnowledgeSource>,
    external: Arc<ExternalKnowledgeSource>,
    vectors: Arc<VectorIndex>,
    sensitivity: TimeSensitivity,
    settings: RetrievalSettings,
}

impl RetrievalOrchestrator {
    pub fn new(
        cache: Arc<QueryCache>,
        personal: Arc<PersonalKnowledgeSource>,
        external: Arc<ExternalKnowledgeSource>,
        vectors: Arc<VectorIndex>,
        sensitivity: TimeSensitivity,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            cache,
            personal,
            external,
            vectors,
            sensitivity,
            settings,
        }
    }

    /// Wire every component from configuration over one backing store.
    ///
    /// # Errors
    ///
    /// Fails when the embedding provider or an external provider cannot be
    /// constructed (for example a missing `OPENAI_API_KEY`).
    pub fn from_config<S>(config: &Config, store: Arc<S>) -> Result<Self>
    where
        S: CacheStore + VectorStore + PersonalDataStore + 'static,
    {
        let cache = Arc::new(QueryCache::new(store.clone()));
        let personal = PersonalKnowledgeSource::new(
            store.clone(),
            PersonalCaps::from(&config.personal),
        );
        let external = ExternalKnowledgeSource::new(
            cache.clone(),
            build_providers(&config.external)?,
            &config.external,
        );
        let vectors = VectorIndex::new(store, create_provider(&config.embedding)?)
            .with_candidate_window(config.retrieval.candidate_window)
            .with_max_embed_chars(config.retrieval.max_embed_chars);
        let sensitivity = TimeSensitivity::new(
            &config.retrieval.time_sensitive_keywords,
            config.retrieval.match_year_tokens,
        );

        Ok(Self::new(
            cache,
            Arc::new(personal),
            Arc::new(external),
            Arc::new(vectors),
            sensitivity,
            RetrievalSettings::from_config(config),
        ))
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn vectors(&self) -> &Arc<VectorIndex> {
        &self.vectors
    }

    pub fn is_time_sensitive(&self, text: &str) -> bool {
        self.sensitivity.is_time_sensitive(text)
    }

    /// The cache key `retrieve` uses for `query`.
    pub fn cache_key(&self, query: &RetrievalQuery) -> String {
        self.cache
            .key(&query.text, &query.user_id, &key_context(query))
    }

    /// Remove expired cache entries.
    pub async fn cleanup(&self) -> u64 {
        self.cache.cleanup().await
    }

    pub async fn retrieve(&self, query: &RetrievalQuery) -> EnhancedResult {
        let time_sensitive = self.is_time_sensitive(&query.text);
        let key = self.cache_key(query);

        if time_sensitive {
            debug!(key = %key, "time-sensitive query; skipping cache read");
        } else if let Some(mut cached) = self.cache.get_result(&key).await {
            cached.cache_hit = true;
            info!(key = %key, mode = %query.mode, "retrieval served from cache");
            return cached;
        }

        let outputs = self.fan_out(query).await;
        let result = match fuse(outputs, Utc::now()) {
            Ok(result) => result,
            Err(e) => {
                error!(key = %key, error = %e, "fusion failed; returning empty result");
                return EnhancedResult::empty();
            }
        };

        let ttl = if time_sensitive {
            self.settings.time_sensitive_ttl
        } else {
            self.settings.default_ttl
        };
        let metadata = json!({
            "mode": query.mode,
            "time_sensitive": time_sensitive,
            "confidence": result.confidence,
            "sources": result.sources,
        });
        self.cache.set_result(&key, &result, metadata, ttl).await;

        info!(
            key = %key,
            mode = %query.mode,
            personal = result.personal_knowledge.len(),
            external = result.external_knowledge.len(),
            similar = result.similar_content.len(),
            confidence = result.confidence,
            "retrieval complete"
        );
        result
    }

    async fn fan_out(&self, query: &RetrievalQuery) -> BranchOutputs {
        let timeout = self.settings.branch_timeout;

        let personal = (query.mode == QueryMode::Personal).then(|| {
            let source = self.personal.clone();
            let user_id = query.user_id.clone();
            spawn_branch(timeout, async move { source.retrieve(&user_id).await })
        });

        let external = {
            let source = self.external.clone();
            let text = query.text.clone();
            spawn_branch(timeout, async move { source.retrieve(&text).await })
        };

        let similar = {
            let vectors = self.vectors.clone();
            let text = query.text.clone();
            let limit = self.settings.similarity_limit;
            let threshold = self.settings.similarity_threshold;
            spawn_branch(timeout, async move {
                let vector = vectors.embed(&text).await;
                if vector.is_empty() {
                    return Vec::new();
                }
                vectors.query(&vector, limit, threshold).await
            })
        };

        let (personal, external, similar) = tokio::join!(
            settle("personal", personal),
            settle("external", Some(external)),
            settle("similarity", Some(similar)),
        );

        BranchOutputs {
            personal,
            external,
            similar,
        }
    }
}

/// Request context plus the query mode.
fn key_context(query: &RetrievalQuery) -> std::collections::BTreeMap<String, Value> {
    let mut context = query.context.clone();
    context.insert("mode".to_string(), Value::from(query.mode.as_str()));
    context
}

fn spawn_branch<T, F>(timeout: std::time::Duration, fut: F) -> JoinHandle<Result<Vec<T>, Elapsed>>
where
    F: Future<Output = Vec<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(tokio::time::timeout(timeout, fut))
}

async fn settle<T>(
    branch: &'static str,
    handle: Option<JoinHandle<Result<Vec<T>, Elapsed>>>,
) -> Vec<T> {
    let Some(handle) = handle else {
        return Vec::new();
    };
    match handle.await {
        Ok(Ok(items)) => items,
        Ok(Err(_)) => {
            warn!(branch, "retrieval branch timed out");
            Vec::new()
        }
        Err(e) => {
            warn!(branch, error = %e, "retrieval branch failed");
            Vec::new()
        }
    }
}
