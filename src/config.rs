//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` is optional and falls back to defaults, so
//! the smallest valid file is:
//!
//! ```toml
//! [db]
//! path = "./data/cfx.sqlite"
//! ```
//!
//! See [`load_config`] for the validation rules.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use context_fusion_core::sensitivity::DEFAULT_KEYWORDS;
use context_fusion_core::vector::{DEFAULT_CANDIDATE_WINDOW, DEFAULT_MAX_EMBED_CHARS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub personal: PersonalConfig,
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_hours")]
    pub default_ttl_hours: i64,
    #[serde(default = "default_time_sensitive_ttl_hours")]
    pub time_sensitive_ttl_hours: i64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_hours: default_ttl_hours(),
            time_sensitive_ttl_hours: default_time_sensitive_ttl_hours(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_ttl_hours() -> i64 {
    24
}
fn default_time_sensitive_ttl_hours() -> i64 {
    1
}
fn default_cleanup_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_keywords")]
    pub time_sensitive_keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub match_year_tokens: bool,
    #[serde(default = "default_similarity_limit")]
    pub similarity_limit: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_candidate_window")]
    pub candidate_window: usize,
    #[serde(default = "default_branch_timeout_secs")]
    pub branch_timeout_secs: u64,
    #[serde(default = "default_max_embed_chars")]
    pub max_embed_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            time_sensitive_keywords: default_keywords(),
            match_year_tokens: true,
            similarity_limit: default_similarity_limit(),
            similarity_threshold: default_similarity_threshold(),
            candidate_window: default_candidate_window(),
            branch_timeout_secs: default_branch_timeout_secs(),
            max_embed_chars: default_max_embed_chars(),
        }
    }
}

fn default_keywords() -> Vec<String> {
    DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
}
fn default_true() -> bool {
    true
}
fn default_similarity_limit() -> usize {
    5
}
fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_candidate_window() -> usize {
    DEFAULT_CANDIDATE_WINDOW
}
fn default_branch_timeout_secs() -> u64 {
    10
}
fn default_max_embed_chars() -> usize {
    DEFAULT_MAX_EMBED_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonalConfig {
    #[serde(default = "default_max_notes")]
    pub max_notes: usize,
    #[serde(default = "default_max_flashcards")]
    pub max_flashcards: usize,
    #[serde(default = "default_max_goals")]
    pub max_goals: usize,
}

impl Default for PersonalConfig {
    fn default() -> Self {
        Self {
            max_notes: default_max_notes(),
            max_flashcards: default_max_flashcards(),
            max_goals: default_max_goals(),
        }
    }
}

fn default_max_notes() -> usize {
    10
}
fn default_max_flashcards() -> usize {
    15
}
fn default_max_goals() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExternalConfig {
    /// Ordered provider tiers: `wikipedia`, `openlibrary`, `crossref`.
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default = "default_keyword_tokens")]
    pub keyword_tokens: usize,
    #[serde(default = "default_external_ttl_hours")]
    pub ttl_hours: i64,
    #[serde(default = "default_external_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_stored_items")]
    pub max_stored_items: usize,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            keyword_tokens: default_keyword_tokens(),
            ttl_hours: default_external_ttl_hours(),
            timeout_secs: default_external_timeout_secs(),
            max_stored_items: default_max_stored_items(),
        }
    }
}

fn default_keyword_tokens() -> usize {
    3
}
fn default_external_ttl_hours() -> i64 {
    24 * 7
}
fn default_external_timeout_secs() -> u64 {
    8
}
fn default_max_stored_items() -> usize {
    3
}

/// Upper bound for every TTL setting (100 years).
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 100;

pub const KNOWN_PROVIDERS: &[&str] = &["wikipedia", "openlibrary", "crossref"];

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// All defaults, with the database at `./data/cfx.sqlite`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/cfx.sqlite"),
            },
            cache: CacheConfig::default(),
            retrieval: RetrievalConfig::default(),
            personal: PersonalConfig::default(),
            external: ExternalConfig::default(),
            embedding: EmbeddingConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Apply the validation rules of [`load_config`].
    pub fn validate(&self) -> Result<()> {
        // Validate cache
        if self.cache.default_ttl_hours < 1 || self.cache.time_sensitive_ttl_hours < 1 {
            bail!("cache TTLs must be >= 1 hour");
        }
        if self.cache.default_ttl_hours > MAX_TTL_HOURS {
            bail!("cache.default_ttl_hours must be <= {}", MAX_TTL_HOURS);
        }
        if self.cache.time_sensitive_ttl_hours >= self.cache.default_ttl_hours {
            bail!("cache.time_sensitive_ttl_hours must be shorter than cache.default_ttl_hours");
        }
        if self.cache.cleanup_interval_secs == 0 {
            bail!("cache.cleanup_interval_secs must be > 0");
        }

        // Validate retrieval
        if self.retrieval.similarity_limit < 1 {
            bail!("retrieval.similarity_limit must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
        }
        if self.retrieval.candidate_window < 1 {
            bail!("retrieval.candidate_window must be >= 1");
        }
        if self.retrieval.branch_timeout_secs == 0 {
            bail!("retrieval.branch_timeout_secs must be > 0");
        }
        if self.retrieval.max_embed_chars == 0 {
            bail!("retrieval.max_embed_chars must be > 0");
        }

        // Validate external
        for provider in &self.external.providers {
            if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
                bail!(
                    "Unknown external provider: '{}'. Must be one of: {}.",
                    provider,
                    KNOWN_PROVIDERS.join(", ")
                );
            }
        }
        if !(1..=MAX_TTL_HOURS).contains(&self.external.ttl_hours) {
            bail!("external.ttl_hours must be in [1, {}]", MAX_TTL_HOURS);
        }

        // Validate embedding
        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
