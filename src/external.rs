//! External knowledge source.
//!
//! Resolution order for a query:
//!
//! 1. **Stored snippets**: live `external` cache rows whose payload mentions
//!    any of the query's first few keywords.
//! 2. **Provider tiers**: each configured [`KnowledgeProvider`] in order,
//!    under a per-provider timeout. The first hit is stored for reuse.
//! 3. **Fallback**: a single generic item naming the topic.
//!
//! [`ExternalKnowledgeSource::retrieve`] therefore never returns an empty
//! list.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use context_fusion_core::cache::{cache_key, QueryCache};
use context_fusion_core::models::{CacheEntry, ExternalItem, SourceType};
use context_fusion_core::sensitivity::tokenize;
use context_fusion_core::store::TextFilter;

use crate::config::ExternalConfig;
use crate::providers::KnowledgeProvider;

pub const FALLBACK_SOURCE: &str = "Fallback";
pub const FALLBACK_CONFIDENCE: f64 = 0.2;

/// Keywords shorter than this are ignored by the stored-snippet scan.
const MIN_KEYWORD_LEN: usize = 3;
/// Metadata key present on stored snippets and absent on fused results.
const SNIPPET_MARKER: &str = "source_name";

/// Owner id under which snippets are keyed. Snippets are shared by all users.
const SNIPPET_OWNER: &str = "external";

pub struct ExternalKnowledgeSource {
    cache: Arc<QueryCache>,
    providers: Vec<Arc<dyn KnowledgeProvider>>,
    keyword_tokens: usize,
    ttl_hours: i64,
    max_stored_items: usize,
    provider_timeout: std::time::Duration,
}

impl ExternalKnowledgeSource {
    pub fn new(
        cache: Arc<QueryCache>,
        providers: Vec<Arc<dyn KnowledgeProvider>>,
        config: &ExternalConfig,
    ) -> Self {
        Self {
            cache,
            providers,
            keyword_tokens: config.keyword_tokens,
            ttl_hours: config.ttl_hours,
            max_stored_items: config.max_stored_items.max(1),
            provider_timeout: std::time::Duration::from_secs(config.timeout_secs),
        }
    }

    pub async fn retrieve(&self, query: &str) -> Vec<ExternalItem> {
        let topic = query.trim();

        let stored = self.stored_snippets(topic).await;
        if !stored.is_empty() {
            debug!(count = stored.len(), "external knowledge served from store");
            return stored;
        }

        if let Some(item) = self.query_providers(topic).await {
            return vec![item];
        }

        vec![fallback_item(topic)]
    }

    /// Persist a snippet for reuse by later queries.
    pub async fn store(
        &self,
        key: &str,
        content: &str,
        source_type: SourceType,
        metadata: Value,
        ttl_hours: i64,
    ) {
        let Some(ttl) = Duration::try_hours(ttl_hours) else {
            warn!(key, ttl_hours, "snippet TTL out of range; not stored");
            return;
        };
        self.cache.set(key, content, source_type, metadata, ttl).await;
    }

    /// The first `keyword_tokens` tokens of at least three characters.
    pub fn keywords(&self, query: &str) -> Vec<String> {
        tokenize(query)
            .into_iter()
            .filter(|t| t.chars().count() >= MIN_KEYWORD_LEN)
            .take(self.keyword_tokens)
            .collect()
    }

    async fn stored_snippets(&self, topic: &str) -> Vec<ExternalItem> {
        let terms = self.keywords(topic);
        if terms.is_empty() {
            return Vec::new();
        }

        let filter = TextFilter {
            source_type: SourceType::External,
            terms,
            metadata_key: Some(SNIPPET_MARKER.to_string()),
            limit: self.max_stored_items,
        };

        self.cache
            .scan(&filter)
            .await
            .iter()
            .filter_map(snippet_from_entry)
            .take(self.max_stored_items)
            .collect()
    }

    async fn query_providers(&self, topic: &str) -> Option<ExternalItem> {
        if topic.is_empty() {
            return None;
        }

        for provider in &self.providers {
            let name = provider.name();
            match tokio::time::timeout(self.provider_timeout, provider.lookup(topic)).await {
                Ok(Ok(Some(item))) => {
                    info!(provider = name, "external knowledge fetched");
                    self.remember(topic, &item).await;
                    return Some(item);
                }
                Ok(Ok(None)) => debug!(provider = name, "no external knowledge"),
                Ok(Err(e)) => warn!(provider = name, error = %e, "external provider failed"),
                Err(_) => warn!(
                    provider = name,
                    timeout_secs = self.provider_timeout.as_secs(),
                    "external provider timed out"
                ),
            }
        }
        None
    }

    async fn remember(&self, topic: &str, item: &ExternalItem) {
        let key = cache_key(topic, SNIPPET_OWNER, &BTreeMap::new());
        let metadata = json!({
            "topic": topic,
            "source_name": item.source_name,
            "source_url": item.url,
            "confidence": item.confidence,
            "is_current": item.current,
        });
        self.store(&key, &item.content, SourceType::External, metadata, self.ttl_hours)
            .await;
    }
}

/// Stored snippets carry a `source_name`; fused results never do.
fn snippet_from_entry(entry: &CacheEntry) -> Option<ExternalItem> {
    let source_name = entry.metadata.get(SNIPPET_MARKER)?.as_str()?.to_string();
    Some(ExternalItem {
        source_name,
        content: entry.payload.clone(),
        url: entry
            .metadata
            .get("source_url")
            .and_then(|u| u.as_str())
            .filter(|u| !u.is_empty())
            .map(str::to_string),
        confidence: Some(
            entry
                .metadata
                .get("confidence")
                .and_then(|c| c.as_f64())
                .unwrap_or(context_fusion_core::fusion::DEFAULT_EXTERNAL_CONFIDENCE),
        ),
        retrieved_at: Some(entry.created_at),
        current: entry
            .metadata
            .get("is_current")
            .and_then(|c| c.as_bool())
            .unwrap_or(false),
        metadata: json!({"stored": true, "entry_id": entry.id}),
    })
}

pub fn fallback_item(topic: &str) -> ExternalItem {
    ExternalItem {
        source_name: FALLBACK_SOURCE.to_string(),
        content: format!(
            "I couldn't find specific external information about \"{}\" in my knowledge sources. \
             I can still help based on my training data and your study materials.",
            topic
        ),
        url: None,
        confidence: Some(FALLBACK_CONFIDENCE),
        retrieved_at: None,
        current: false,
        metadata: json!({"fallback": true, "topic": topic}),
    }
}
