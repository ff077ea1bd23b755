//! End-to-end retrieval tests over the in-memory store with fake
//! embedding and external providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use context_fusion::config::ExternalConfig;
use context_fusion::external::ExternalKnowledgeSource;
use context_fusion::orchestrator::{RetrievalOrchestrator, RetrievalSettings};
use context_fusion::personal::{PersonalCaps, PersonalKnowledgeSource};
use context_fusion::providers::KnowledgeProvider;
use context_fusion_core::cache::QueryCache;
use context_fusion_core::embedding::EmbeddingProvider;
use context_fusion_core::fusion;
use context_fusion_core::models::{
    CacheEntry, CensusRow, EnhancedResult, ExternalItem, FlashcardRecord, Freshness, GoalRecord,
    NoteRecord, PersonalKind, QueryMode, RetrievalQuery, SourceType,
};
use context_fusion_core::sensitivity::TimeSensitivity;
use context_fusion_core::store::memory::InMemoryStore;
use context_fusion_core::store::{CacheStore, PersonalDataStore, TextFilter};
use context_fusion_core::vector::VectorIndex;

// ============ Fakes ============

/// Cache store that counts reads and records inserts.
struct RecordingStore {
    inner: Arc<InMemoryStore>,
    reads: AtomicUsize,
    inserted: Mutex<Vec<CacheEntry>>,
}

impl RecordingStore {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            inserted: Mutex::new(Vec::new()),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Inserted fused results (snippets carry a `source_name`).
    fn fused_writes(&self) -> Vec<CacheEntry> {
        self.inserted
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.metadata.get("source_name").is_none())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn insert_entry(&self, entry: &CacheEntry) -> Result<()> {
        self.inserted.lock().unwrap().push(entry.clone());
        self.inner.insert_entry(entry).await
    }
    async fn latest_entry(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.latest_entry(key, now).await
    }
    async fn delete_key(&self, key: &str) -> Result<u64> {
        self.inner.delete_key(key).await
    }
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.inner.delete_expired(now).await
    }
    async fn scan_text(&self, filter: &TextFilter, now: DateTime<Utc>) -> Result<Vec<CacheEntry>> {
        self.inner.scan_text(filter, now).await
    }
    async fn census(&self, now: DateTime<Utc>) -> Result<Vec<CensusRow>> {
        self.inner.census(now).await
    }
}

const VOCABULARY: &[&str] = &["cell", "plant", "france"];

/// One dimension per vocabulary word present in the text.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        VOCABULARY.len()
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(VOCABULARY
            .iter()
            .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
            .collect())
    }
}

struct PanickingEmbedder;

#[async_trait]
impl EmbeddingProvider for PanickingEmbedder {
    fn model_name(&self) -> &str {
        "panics"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        panic!("embedding backend crashed");
    }
}

struct EmptyEmbedder;

#[async_trait]
impl EmbeddingProvider for EmptyEmbedder {
    fn model_name(&self) -> &str {
        "empty"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}

struct FailingPersonalStore;

#[async_trait]
impl PersonalDataStore for FailingPersonalStore {
    async fn recent_notes(&self, _user_id: &str, _limit: usize) -> Result<Vec<NoteRecord>> {
        bail!("notes table unavailable")
    }
    async fn recent_flashcards(&self, _user_id: &str, _limit: usize) -> Result<Vec<FlashcardRecord>> {
        bail!("flashcards table unavailable")
    }
    async fn active_goals(&self, _user_id: &str, _limit: usize) -> Result<Vec<GoalRecord>> {
        bail!("goals table unavailable")
    }
}

/// Answers every topic with a fixed snippet.
struct StaticProvider {
    content: &'static str,
    current: bool,
    confidence: f64,
    delay: Option<StdDuration>,
}

impl StaticProvider {
    fn wikipedia(content: &'static str) -> Self {
        Self {
            content,
            current: false,
            confidence: 0.8,
            delay: None,
        }
    }
}

#[async_trait]
impl KnowledgeProvider for StaticProvider {
    fn name(&self) -> &str {
        "Wikipedia"
    }
    async fn lookup(&self, _topic: &str) -> Result<Option<ExternalItem>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Some(ExternalItem {
            source_name: "Wikipedia".to_string(),
            content: self.content.to_string(),
            url: Some("https://en.wikipedia.org/wiki/Test".to_string()),
            confidence: Some(self.confidence),
            retrieved_at: Some(Utc::now()),
            current: self.current,
            metadata: json!({}),
        }))
    }
}

/// Provider that counts lookups.
struct CountingProvider {
    inner: StaticProvider,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl KnowledgeProvider for CountingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }
    async fn lookup(&self, topic: &str) -> Result<Option<ExternalItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(topic).await
    }
}

// ============ Harness ============

struct Harness {
    data: Arc<InMemoryStore>,
    cache_store: Arc<RecordingStore>,
    orchestrator: Arc<RetrievalOrchestrator>,
}

struct Parts {
    personal: Option<Arc<dyn PersonalDataStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    providers: Vec<Arc<dyn KnowledgeProvider>>,
    settings: RetrievalSettings,
}

impl Default for Parts {
    fn default() -> Self {
        Self {
            personal: None,
            embedder: Arc::new(KeywordEmbedder),
            providers: vec![Arc::new(StaticProvider::wikipedia(
                "Paris is the capital and largest city of France.",
            ))],
            settings: RetrievalSettings::default(),
        }
    }
}

fn harness(parts: Parts) -> Harness {
    let data = Arc::new(InMemoryStore::new());
    let cache_store = Arc::new(RecordingStore::new(data.clone()));
    let cache = Arc::new(QueryCache::new(cache_store.clone()));

    let personal_store: Arc<dyn PersonalDataStore> = match parts.personal {
        Some(store) => store,
        None => data.clone(),
    };
    let personal = PersonalKnowledgeSource::new(personal_store, PersonalCaps::default());
    let external =
        ExternalKnowledgeSource::new(cache.clone(), parts.providers, &ExternalConfig::default());
    let vectors = VectorIndex::new(data.clone(), parts.embedder);

    let orchestrator = RetrievalOrchestrator::new(
        cache,
        Arc::new(personal),
        Arc::new(external),
        Arc::new(vectors),
        TimeSensitivity::default(),
        parts.settings,
    );

    Harness {
        data,
        cache_store,
        orchestrator: Arc::new(orchestrator),
    }
}

fn note(i: i64) -> NoteRecord {
    NoteRecord {
        id: format!("note-{}", i),
        title: format!("Cell biology {}", i),
        content: "Plant cells have walls.".to_string(),
        category: Some("biology".to_string()),
        tags: vec!["cells".to_string()],
        created_at: Utc::now() - Duration::minutes(60 - i),
    }
}

fn flashcard(i: i64) -> FlashcardRecord {
    FlashcardRecord {
        id: format!("card-{}", i),
        front: format!("Organelle {}?", i),
        back: "Chloroplast".to_string(),
        times_reviewed: 4,
        times_correct: 3,
        last_reviewed_at: None,
        created_at: Utc::now() - Duration::minutes(60 - i),
    }
}

fn goal(i: i64) -> GoalRecord {
    GoalRecord {
        id: format!("goal-{}", i),
        title: format!("Goal {}", i),
        description: None,
        progress: 25.0,
        priority: Some("medium".to_string()),
        status: Some("active".to_string()),
        target_date: None,
        created_at: Utc::now() - Duration::minutes(60 - i),
    }
}

fn seed_personal(store: &InMemoryStore, user: &str, notes: i64, cards: i64, goals: i64) {
    for i in 0..notes {
        store.add_note(user, note(i));
    }
    for i in 0..cards {
        store.add_flashcard(user, flashcard(i));
    }
    for i in 0..goals {
        store.add_goal(user, goal(i));
    }
}

async fn seed_vectors(h: &Harness) {
    let index = h.orchestrator.vectors();
    index
        .index("Plant cells contain chloroplasts.", vec![1.0, 1.0, 0.0], json!({"doc": "bio"}))
        .await
        .unwrap();
    index
        .index("The Eiffel Tower is in France.", vec![0.0, 0.0, 1.0], json!({"doc": "geo"}))
        .await
        .unwrap();
}

fn without_hit_flag(mut result: EnhancedResult) -> EnhancedResult {
    result.cache_hit = false;
    result
}

// ============ Tests ============

#[tokio::test]
async fn france_general_query_then_cache_hit() {
    let h = harness(Parts::default());
    seed_personal(&h.data, "u1", 3, 3, 1);
    let query = RetrievalQuery::new("What is the capital of France?", "u1", QueryMode::General);

    let first = h.orchestrator.retrieve(&query).await;
    assert!(!first.cache_hit);
    assert!(first.personal_knowledge.is_empty());
    assert!(!first.external_knowledge.is_empty());
    assert!(first.confidence > 0.0);
    assert!(first.sources.contains(&"Wikipedia".to_string()));

    let second = h.orchestrator.retrieve(&query).await;
    assert!(second.cache_hit);
    assert_eq!(without_hit_flag(second), first);
}

#[tokio::test]
async fn cached_result_round_trips_every_field() {
    let h = harness(Parts::default());
    seed_personal(&h.data, "u1", 2, 2, 1);
    seed_vectors(&h).await;
    let query = RetrievalQuery::new("How do plant cells work?", "u1", QueryMode::Personal);

    let first = h.orchestrator.retrieve(&query).await;
    assert_eq!(first.personal_knowledge.len(), 5);
    assert_eq!(first.similar_content.len(), 1);
    assert_eq!(
        first.sources,
        vec!["personal".to_string(), "Wikipedia".to_string(), "similarity".to_string()]
    );

    let second = h.orchestrator.retrieve(&query).await;
    assert!(second.cache_hit);
    assert_eq!(without_hit_flag(second), first);
}

#[tokio::test]
async fn time_sensitive_query_skips_cache_read_and_uses_short_ttl() {
    let h = harness(Parts::default());
    let query = RetrievalQuery::new("What is the weather in Paris today?", "u1", QueryMode::General);

    let first = h.orchestrator.retrieve(&query).await;
    let second = h.orchestrator.retrieve(&query).await;

    assert!(!first.cache_hit);
    assert!(!second.cache_hit);
    assert_eq!(h.cache_store.reads(), 0);

    let writes = h.cache_store.fused_writes();
    assert_eq!(writes.len(), 2);
    for entry in writes {
        assert_eq!(entry.expires_at - entry.created_at, Duration::hours(1));
    }
}

#[tokio::test]
async fn ordinary_query_uses_default_ttl() {
    let h = harness(Parts::default());
    let query = RetrievalQuery::new("photosynthesis", "u1", QueryMode::General);
    h.orchestrator.retrieve(&query).await;

    assert_eq!(h.cache_store.reads(), 1);
    let writes = h.cache_store.fused_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].expires_at - writes[0].created_at, Duration::hours(24));
}

#[tokio::test]
async fn panicking_embedder_leaves_other_branches_intact() {
    let h = harness(Parts {
        embedder: Arc::new(PanickingEmbedder),
        ..Parts::default()
    });
    seed_personal(&h.data, "u1", 2, 0, 0);
    let query = RetrievalQuery::new("plant cells", "u1", QueryMode::Personal);

    let result = h.orchestrator.retrieve(&query).await;
    assert_eq!(result.personal_knowledge.len(), 2);
    assert!(!result.external_knowledge.is_empty());
    assert!(result.similar_content.is_empty());
}

#[tokio::test]
async fn failing_personal_store_leaves_other_branches_intact() {
    let h = harness(Parts {
        personal: Some(Arc::new(FailingPersonalStore)),
        ..Parts::default()
    });
    seed_vectors(&h).await;
    let query = RetrievalQuery::new("plant cells", "u1", QueryMode::Personal);

    let result = h.orchestrator.retrieve(&query).await;
    assert!(result.personal_knowledge.is_empty());
    assert!(!result.external_knowledge.is_empty());
    assert_eq!(result.similar_content.len(), 1);
    assert_eq!(result.similar_content[0].text, "Plant cells contain chloroplasts.");
}

#[tokio::test]
async fn slow_external_branch_times_out_alone() {
    let settings = RetrievalSettings {
        branch_timeout: StdDuration::from_millis(200),
        ..RetrievalSettings::default()
    };
    let slow = StaticProvider {
        delay: Some(StdDuration::from_secs(5)),
        ..StaticProvider::wikipedia("too late")
    };
    let h = harness(Parts {
        providers: vec![Arc::new(slow)],
        settings,
        ..Parts::default()
    });
    seed_personal(&h.data, "u1", 1, 1, 0);
    seed_vectors(&h).await;
    let query = RetrievalQuery::new("plant cells", "u1", QueryMode::Personal);

    let result = h.orchestrator.retrieve(&query).await;
    assert!(result.external_knowledge.is_empty());
    assert_eq!(result.personal_knowledge.len(), 2);
    assert_eq!(result.similar_content.len(), 1);
}

#[tokio::test]
async fn empty_embedding_scores_personal_and_external_only() {
    let h = harness(Parts {
        embedder: Arc::new(EmptyEmbedder),
        ..Parts::default()
    });
    seed_personal(&h.data, "u1", 1, 0, 0);
    seed_vectors(&h).await;
    let query = RetrievalQuery::new("plant cells", "u1", QueryMode::Personal);

    let result = h.orchestrator.retrieve(&query).await;
    assert!(result.similar_content.is_empty());
    let expected =
        fusion::confidence(&result.personal_knowledge, &result.external_knowledge, &[]).unwrap();
    assert_eq!(result.confidence, expected);
    // (0.3 + 0.8 * 0.4) / 0.8
    assert!((result.confidence - 0.775).abs() < 1e-9);
}

#[tokio::test]
async fn personal_caps_are_applied_per_category() {
    let h = harness(Parts::default());
    seed_personal(&h.data, "u1", 12, 20, 3);
    let query = RetrievalQuery::new("review my biology", "u1", QueryMode::Personal);

    let result = h.orchestrator.retrieve(&query).await;
    let count = |kind: PersonalKind| {
        result
            .personal_knowledge
            .iter()
            .filter(|p| p.kind == kind)
            .count()
    };
    assert_eq!(count(PersonalKind::Note), 10);
    assert_eq!(count(PersonalKind::Flashcard), 15);
    assert_eq!(count(PersonalKind::Goal), 3);
    assert!(result.confidence <= 1.0);
}

#[tokio::test]
async fn concurrent_identical_requests_both_complete() {
    let h = harness(Parts::default());
    let query = RetrievalQuery::new("mitochondria", "u1", QueryMode::General);

    let (a, b) = tokio::join!(
        h.orchestrator.retrieve(&query),
        h.orchestrator.retrieve(&query)
    );
    assert!(!a.external_knowledge.is_empty());
    assert!(!b.external_knowledge.is_empty());

    let key = h.orchestrator.cache_key(&query);
    let cached = h.orchestrator.cache().get_result(&key).await.unwrap();
    assert_eq!(cached.sources, a.sources);
    assert!(!h.cache_store.fused_writes().is_empty());
}

#[tokio::test]
async fn current_external_item_marks_result_current() {
    let provider = StaticProvider {
        current: true,
        ..StaticProvider::wikipedia("Live figures")
    };
    let h = harness(Parts {
        providers: vec![Arc::new(provider)],
        ..Parts::default()
    });
    let query = RetrievalQuery::new("population of lyon", "u1", QueryMode::General);
    let result = h.orchestrator.retrieve(&query).await;
    assert_eq!(result.freshness, Freshness::Current);

    let h = harness(Parts::default());
    let result = h.orchestrator.retrieve(&query).await;
    assert_eq!(result.freshness, Freshness::Recent);
}

#[tokio::test]
async fn fusion_failure_returns_empty_and_skips_cache() {
    let provider = StaticProvider {
        confidence: f64::NAN,
        ..StaticProvider::wikipedia("Broken score")
    };
    let h = harness(Parts {
        providers: vec![Arc::new(provider)],
        ..Parts::default()
    });
    let query = RetrievalQuery::new("quantum tunnelling", "u1", QueryMode::General);

    let result = h.orchestrator.retrieve(&query).await;
    assert_eq!(result, EnhancedResult::empty());
    assert!(h.cache_store.fused_writes().is_empty());
}

#[tokio::test]
async fn general_and_personal_modes_do_not_share_cache() {
    let h = harness(Parts::default());
    seed_personal(&h.data, "u1", 2, 0, 0);
    let general = RetrievalQuery::new("plant biology", "u1", QueryMode::General);
    let personal = RetrievalQuery::new("plant biology", "u1", QueryMode::Personal);

    let g = h.orchestrator.retrieve(&general).await;
    let p = h.orchestrator.retrieve(&personal).await;
    assert!(!p.cache_hit);
    assert!(g.personal_knowledge.is_empty());
    assert_eq!(p.personal_knowledge.len(), 2);
}

#[tokio::test]
async fn cleanup_removes_only_expired_entries() {
    let h = harness(Parts::default());
    let cache = h.orchestrator.cache();
    cache
        .set(
            "old",
            "{}",
            SourceType::External,
            json!({}),
            Duration::milliseconds(1),
        )
        .await;
    h.orchestrator
        .retrieve(&RetrievalQuery::new("enzymes", "u1", QueryMode::General))
        .await;
    tokio::time::sleep(StdDuration::from_millis(20)).await;

    let stats = cache.stats().await;
    assert_eq!(stats.expired_count, 1);
    assert_eq!(h.orchestrator.cleanup().await, 1);

    let stats = cache.stats().await;
    assert_eq!(stats.expired_count, 0);
    assert_eq!(stats.total, 2);
}

#[tokio::test]
async fn stored_snippet_survives_many_fused_results() {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = CountingProvider {
        inner: StaticProvider::wikipedia("Photosynthesis converts light into chemical energy."),
        calls: calls.clone(),
    };
    let h = harness(Parts {
        providers: vec![Arc::new(provider)],
        ..Parts::default()
    });

    for i in 0..20 {
        let query = RetrievalQuery::new(
            format!("photosynthesis question {}", i),
            "u1",
            QueryMode::General,
        );
        let result = h.orchestrator.retrieve(&query).await;
        assert!(!result.cache_hit);
        assert_eq!(result.external_knowledge.len(), 1);
        assert_eq!(result.external_knowledge[0].source_name, "Wikipedia");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.cache_store.fused_writes().len(), 20);
}
