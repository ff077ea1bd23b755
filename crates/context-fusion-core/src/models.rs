//! Core data models used throughout Context Fusion.
//!
//! These types represent the queries, knowledge items, cache entries, and
//! fused results that flow through the retrieval pipeline, plus the raw
//! record shapes read from the personal-data and vector stores.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a query may draw on the user's personal records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Personal records are fetched and prioritized.
    Personal,
    /// Personal records are never fetched.
    General,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Personal => "personal",
            QueryMode::General => "general",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "personal" => Ok(QueryMode::Personal),
            "general" => Ok(QueryMode::General),
            other => bail!("Unknown query mode: '{}'. Use personal or general.", other),
        }
    }
}

/// A single retrieval request. Created per request and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub text: String,
    pub user_id: String,
    pub mode: QueryMode,
    /// Extra request context that participates in the cache key.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>, user_id: impl Into<String>, mode: QueryMode) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            mode,
            context: BTreeMap::new(),
        }
    }

    /// Attach a context value, replacing any previous value for `key`.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Category of a personal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonalKind {
    Note,
    Flashcard,
    Goal,
}

/// A user's note, flashcard, or goal mapped to the uniform item shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalItem {
    pub kind: PersonalKind,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

/// A knowledge snippet from an external source (stored or freshly fetched).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalItem {
    pub source_name: String,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Per-item confidence in `[0, 1]`. Scored as `0.5` when absent.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// When the snippet was fetched. `None` for synthesized fallback items.
    #[serde(default)]
    pub retrieved_at: Option<DateTime<Utc>>,
    /// The snippet is flagged as describing the current state of the world.
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub metadata: Value,
}

/// A vector-index hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub text: String,
    pub similarity: f64,
    #[serde(default)]
    pub metadata: Value,
}

/// Borrowed view over any of the three knowledge item kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KnowledgeItem<'a> {
    Personal(&'a PersonalItem),
    External(&'a ExternalItem),
    Similarity(&'a SimilarityMatch),
}

impl KnowledgeItem<'_> {
    /// The item's main text body.
    pub fn text(&self) -> &str {
        match self {
            KnowledgeItem::Personal(p) => &p.content,
            KnowledgeItem::External(e) => &e.content,
            KnowledgeItem::Similarity(s) => &s.text,
        }
    }
}

/// Which branches produced a cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Personal,
    External,
    Hybrid,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Personal => "personal",
            SourceType::External => "external",
            SourceType::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(SourceType::Personal),
            "external" => Ok(SourceType::External),
            "hybrid" => Ok(SourceType::Hybrid),
            other => bail!("Unknown cache source type: '{}'", other),
        }
    }
}

/// An immutable cache row. Never mutated after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: String,
    pub key: String,
    pub payload: String,
    pub source_type: SourceType,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// An entry is live strictly before its expiry instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Coarse recency classification of the knowledge behind a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Current,
    Recent,
    Outdated,
}

/// The fused output of one retrieval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedResult {
    pub personal_knowledge: Vec<PersonalItem>,
    pub external_knowledge: Vec<ExternalItem>,
    pub similar_content: Vec<SimilarityMatch>,
    pub cache_hit: bool,
    /// Distinct source labels in first-seen order.
    pub sources: Vec<String>,
    pub confidence: f64,
    pub freshness: Freshness,
}

impl EnhancedResult {
    /// The zero-value result returned when fusion itself fails.
    pub fn empty() -> Self {
        Self {
            personal_knowledge: Vec::new(),
            external_knowledge: Vec::new(),
            similar_content: Vec::new(),
            cache_hit: false,
            sources: Vec::new(),
            confidence: 0.0,
            freshness: Freshness::Outdated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.personal_knowledge.is_empty()
            && self.external_knowledge.is_empty()
            && self.similar_content.is_empty()
    }

    /// Cache source type: `hybrid` when two or more branches contributed.
    pub fn source_type(&self) -> SourceType {
        let has_personal = !self.personal_knowledge.is_empty();
        let has_other = !self.external_knowledge.is_empty() || !self.similar_content.is_empty();
        match (has_personal, has_other) {
            (true, true) => SourceType::Hybrid,
            (true, false) => SourceType::Personal,
            (false, _) => {
                if !self.external_knowledge.is_empty() && !self.similar_content.is_empty() {
                    SourceType::Hybrid
                } else {
                    SourceType::External
                }
            }
        }
    }

    /// All items, personal first, then external, then similarity matches.
    pub fn items(&self) -> Vec<KnowledgeItem<'_>> {
        self.personal_knowledge
            .iter()
            .map(KnowledgeItem::Personal)
            .chain(self.external_knowledge.iter().map(KnowledgeItem::External))
            .chain(self.similar_content.iter().map(KnowledgeItem::Similarity))
            .collect()
    }
}

/// Cache occupancy summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// All stored rows, live or expired.
    pub total: u64,
    /// Rows past expiry that `cleanup()` would remove.
    pub expired_count: u64,
    /// Live rows per source type.
    pub counts_by_source_type: BTreeMap<String, u64>,
}

/// One row of a store census: how many entries share a source type and
/// expiry state.
#[derive(Debug, Clone, PartialEq)]
pub struct CensusRow {
    pub source_type: SourceType,
    pub expired: bool,
    pub count: u64,
}

/// A stored note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRecord {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored flashcard with review statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FlashcardRecord {
    pub id: String,
    pub front: String,
    pub back: String,
    pub times_reviewed: i64,
    pub times_correct: i64,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A stored learning goal.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub progress: f64,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub target_date: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A row of the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}
