//! CLI command implementations.
//!
//! Each `run_*` function backs one `cfx` subcommand. Results go to stdout
//! as JSON so they can be piped; progress and diagnostics go to the
//! tracing subscriber on stderr.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::info;

use context_fusion_core::models::{QueryMode, RetrievalQuery};

use crate::config::Config;
use crate::orchestrator::RetrievalOrchestrator;
use crate::sqlite_store::SqliteStore;
use crate::stats;

/// Maintenance action on the query cache.
#[derive(Debug, Clone)]
pub enum CacheCommand {
    Stats { json: bool },
    Cleanup,
    Invalidate { key: String },
    Key { query: RetrievalQuery },
}

/// Parse repeated `KEY=VALUE` arguments.
///
/// Values that parse as JSON keep their JSON type (`n=3` is a number,
/// `tags=["a"]` an array); everything else is a string.
pub fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got '{}'", pair))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("empty key in '{}'", pair);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

/// Build a query from CLI arguments.
pub fn build_query(text: &str, user: &str, mode: &str, context: &[String]) -> Result<RetrievalQuery> {
    if text.trim().is_empty() {
        bail!("query must not be empty");
    }
    let mode: QueryMode = mode.parse()?;
    Ok(RetrievalQuery {
        text: text.to_string(),
        user_id: user.to_string(),
        mode,
        context: parse_pairs(context)?,
    })
}

async fn open(config: &Config) -> Result<(Arc<SqliteStore>, RetrievalOrchestrator)> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let orchestrator = RetrievalOrchestrator::from_config(config, store.clone())?;
    Ok((store, orchestrator))
}

pub async fn run_retrieve(config: &Config, query: &RetrievalQuery) -> Result<()> {
    let (store, orchestrator) = open(config).await?;
    let result = orchestrator.retrieve(query).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    store.pool().close().await;
    Ok(())
}

pub async fn run_index(config: &Config, text: &str, metadata: &[String]) -> Result<()> {
    if text.trim().is_empty() {
        bail!("text must not be empty");
    }
    let metadata = Value::Object(parse_pairs(metadata)?.into_iter().collect());

    let (store, orchestrator) = open(config).await?;
    let id = orchestrator.vectors().index_text(text, metadata).await?;
    info!(id = %id, "text indexed");
    println!("{}", serde_json::json!({ "id": id }));
    store.pool().close().await;
    Ok(())
}

pub async fn run_cache(config: &Config, command: CacheCommand) -> Result<()> {
    let (store, orchestrator) = open(config).await?;
    let cache = orchestrator.cache();

    match command {
        CacheCommand::Stats { json } => {
            stats::run_stats(config, cache, store.pool(), json).await?;
        }
        CacheCommand::Cleanup => {
            let removed = cache.cleanup().await;
            println!("{}", serde_json::json!({ "removed": removed }));
        }
        CacheCommand::Invalidate { key } => {
            let removed = cache.invalidate(&key).await;
            println!("{}", serde_json::json!({ "removed": removed }));
        }
        CacheCommand::Key { query } => {
            println!("{}", orchestrator.cache_key(&query));
        }
    }

    store.pool().close().await;
    Ok(())
}
