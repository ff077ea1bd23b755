//! External knowledge providers.
//!
//! Each provider turns a topic into at most one [`ExternalItem`] by calling
//! a public HTTP API. The external source tries them in configured order
//! and keeps the first hit.
//!
//! | Name | Endpoint | Snippet |
//! |------|----------|---------|
//! | `wikipedia` | REST page summary | article extract |
//! | `openlibrary` | `search.json` | up to 3 related books |
//! | `crossref` | `/works` | up to 3 research papers |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use serde_json::{json, Value};

use context_fusion_core::models::ExternalItem;

use crate::config::ExternalConfig;

const WIKIPEDIA_SUMMARY_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary/";
const OPENLIBRARY_SEARCH_URL: &str = "https://openlibrary.org/search.json";
const CROSSREF_WORKS_URL: &str = "https://api.crossref.org/works";

const WIKIPEDIA_CONFIDENCE: f64 = 0.8;
const CROSSREF_CONFIDENCE: f64 = 0.7;
const OPENLIBRARY_CONFIDENCE: f64 = 0.6;

/// Number of books or papers summarized per snippet.
const MAX_LISTED: usize = 3;

/// A source of external knowledge snippets.
#[async_trait]
pub trait KnowledgeProvider: Send + Sync {
    /// Display name, used as the item's `source_name`.
    fn name(&self) -> &str;

    /// Look up `topic`. `Ok(None)` means the provider has nothing on it.
    async fn lookup(&self, topic: &str) -> Result<Option<ExternalItem>>;
}

/// Build the configured provider tiers in order.
pub fn build_providers(config: &ExternalConfig) -> Result<Vec<Arc<dyn KnowledgeProvider>>> {
    if config.providers.is_empty() {
        return Ok(Vec::new());
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(concat!("context-fusion/", env!("CARGO_PKG_VERSION")))
        .build()?;

    config
        .providers
        .iter()
        .map(|name| -> Result<Arc<dyn KnowledgeProvider>> {
            match name.as_str() {
                "wikipedia" => Ok(Arc::new(WikipediaProvider::new(client.clone()))),
                "openlibrary" => Ok(Arc::new(OpenLibraryProvider::new(client.clone()))),
                "crossref" => Ok(Arc::new(CrossrefProvider::new(client.clone()))),
                other => bail!("Unknown external provider: {}", other),
            }
        })
        .collect()
}

fn snippet(source_name: &str, content: String, url: String, confidence: f64) -> ExternalItem {
    ExternalItem {
        source_name: source_name.to_string(),
        content,
        url: Some(url),
        confidence: Some(confidence),
        retrieved_at: Some(Utc::now()),
        current: false,
        metadata: json!({}),
    }
}

async fn get_json(client: &Client, url: Url) -> Result<Option<Value>> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status.as_u16() == 404 {
        return Ok(None);
    }
    if !status.is_success() {
        bail!("HTTP {}", status);
    }
    Ok(Some(response.json().await?))
}

fn search_url(base: &str, params: &[(&str, &str)]) -> Result<Url> {
    Ok(Url::parse_with_params(base, params)?)
}

// ============ Wikipedia ============

pub struct WikipediaProvider {
    client: Client,
}

impl WikipediaProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KnowledgeProvider for WikipediaProvider {
    fn name(&self) -> &str {
        "Wikipedia"
    }

    async fn lookup(&self, topic: &str) -> Result<Option<ExternalItem>> {
        let mut url = Url::parse(WIKIPEDIA_SUMMARY_URL)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("invalid Wikipedia base URL"))?
            .pop_if_empty()
            .push(topic);
        let page_url = format!(
            "https://en.wikipedia.org/wiki/{}",
            url.path_segments()
                .and_then(|mut s| s.next_back())
                .unwrap_or_default()
        );

        Ok(get_json(&self.client, url)
            .await?
            .and_then(|json| parse_wikipedia(&json, page_url)))
    }
}

fn parse_wikipedia(json: &Value, fallback_url: String) -> Option<ExternalItem> {
    let extract = json.get("extract")?.as_str()?.trim();
    if extract.is_empty() {
        return None;
    }
    let url = json
        .pointer("/content_urls/desktop/page")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(fallback_url);
    Some(snippet("Wikipedia", extract.to_string(), url, WIKIPEDIA_CONFIDENCE))
}

// ============ OpenLibrary ============

pub struct OpenLibraryProvider {
    client: Client,
}

impl OpenLibraryProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KnowledgeProvider for OpenLibraryProvider {
    fn name(&self) -> &str {
        "OpenLibrary"
    }

    async fn lookup(&self, topic: &str) -> Result<Option<ExternalItem>> {
        let limit = MAX_LISTED.to_string();
        let url = search_url(OPENLIBRARY_SEARCH_URL, &[("q", topic), ("limit", &limit)])?;
        let page_url = search_url("https://openlibrary.org/search", &[("q", topic)])?;

        Ok(get_json(&self.client, url)
            .await?
            .and_then(|json| parse_openlibrary(&json, page_url.to_string())))
    }
}

fn parse_openlibrary(json: &Value, url: String) -> Option<ExternalItem> {
    let docs = json.get("docs")?.as_array()?;
    if docs.is_empty() {
        return None;
    }
    let books: Vec<String> = docs
        .iter()
        .take(MAX_LISTED)
        .map(|doc| {
            let title = doc.get("title").and_then(|t| t.as_str()).unwrap_or("Untitled");
            let authors = doc
                .get("author_name")
                .and_then(|a| a.as_array())
                .map(|names| {
                    names
                        .iter()
                        .filter_map(|n| n.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Unknown".to_string());
            format!("\"{}\" by {}", title, authors)
        })
        .collect();

    Some(snippet(
        "OpenLibrary",
        format!("Related books: {}", books.join("; ")),
        url,
        OPENLIBRARY_CONFIDENCE,
    ))
}

// ============ Crossref ============

pub struct CrossrefProvider {
    client: Client,
}

impl CrossrefProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KnowledgeProvider for CrossrefProvider {
    fn name(&self) -> &str {
        "Crossref"
    }

    async fn lookup(&self, topic: &str) -> Result<Option<ExternalItem>> {
        let rows = MAX_LISTED.to_string();
        let url = search_url(CROSSREF_WORKS_URL, &[("query", topic), ("rows", &rows)])?;
        let page_url = search_url("https://search.crossref.org/", &[("q", topic)])?;

        Ok(get_json(&self.client, url)
            .await?
            .and_then(|json| parse_crossref(&json, page_url.to_string())))
    }
}

fn parse_crossref(json: &Value, url: String) -> Option<ExternalItem> {
    let items = json.pointer("/message/items")?.as_array()?;
    if items.is_empty() {
        return None;
    }
    let papers: Vec<String> = items
        .iter()
        .take(MAX_LISTED)
        .map(|item| {
            let title = item
                .pointer("/title/0")
                .and_then(|t| t.as_str())
                .unwrap_or("Untitled");
            let authors = item
                .get("author")
                .and_then(|a| a.as_array())
                .map(|people| {
                    people
                        .iter()
                        .map(|p| {
                            let given = p.get("given").and_then(|g| g.as_str()).unwrap_or("");
                            let family = p.get("family").and_then(|f| f.as_str()).unwrap_or("");
                            format!("{} {}", given, family).trim().to_string()
                        })
                        .filter(|name| !name.is_empty())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Unknown".to_string());
            format!("\"{}\" by {}", title, authors)
        })
        .collect();

    Some(snippet(
        "Crossref",
        format!("Recent research papers: {}", papers.join("; ")),
        url,
        CROSSREF_CONFIDENCE,
    ))
}
