//! HTTP server.
//!
//! Exposes retrieval, indexing, and cache maintenance as a JSON HTTP API
//! and runs [`QueryCache::cleanup`](context_fusion_core::cache::QueryCache::cleanup)
//! on an interval in the background.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/retrieve` | Fused retrieval for a query |
//! | `POST` | `/index` | Embed and index a text |
//! | `GET`  | `/cache/stats` | Cache occupancy |
//! | `POST` | `/cache/cleanup` | Remove expired entries |
//! | `DELETE` | `/cache/{key}` | Invalidate one key |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use context_fusion_core::models::{CacheStats, EnhancedResult, QueryMode, RetrievalQuery};
use context_fusion_core::vector::IndexError;

use crate::config::Config;
use crate::orchestrator::RetrievalOrchestrator;
use crate::sqlite_store::SqliteStore;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<RetrievalOrchestrator>,
}

/// Start the server on `[server].bind`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let orchestrator = Arc::new(RetrievalOrchestrator::from_config(config, store)?);

    spawn_cleanup(
        orchestrator.clone(),
        Duration::from_secs(config.cache.cleanup_interval_secs),
    );

    let app = router(orchestrator);
    let bind_addr = &config.server.bind;
    info!(bind = %bind_addr, "server listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Routes and CORS over a ready orchestrator.
pub fn router(orchestrator: Arc<RetrievalOrchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/retrieve", post(handle_retrieve))
        .route("/index", post(handle_index))
        .route("/cache/stats", get(handle_cache_stats))
        .route("/cache/cleanup", post(handle_cache_cleanup))
        .route("/cache/{key}", delete(handle_cache_invalidate))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Periodic expired-entry cleanup.
fn spawn_cleanup(orchestrator: Arc<RetrievalOrchestrator>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = orchestrator.cleanup().await;
            debug!(removed, "scheduled cache cleanup");
        }
    });
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map indexing failures: a refusing embedder is a client-visible 400,
/// anything that is not an [`IndexError`] is a 500.
fn classify_index_error(err: anyhow::Error) -> AppError {
    let message = err.to_string();
    match err.downcast_ref::<IndexError>() {
        Some(IndexError::NoVector { .. }) => AppError {
            status: StatusCode::BAD_REQUEST,
            code: "embeddings_disabled".to_string(),
            message,
        },
        Some(IndexError::EmptyVector) => bad_request(message),
        None => internal(message),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /retrieve ============

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
    query: String,
    #[serde(default = "default_user")]
    user_id: String,
    #[serde(default = "default_mode")]
    mode: QueryMode,
    #[serde(default)]
    context: BTreeMap<String, Value>,
}

fn default_user() -> String {
    "anonymous".to_string()
}

fn default_mode() -> QueryMode {
    QueryMode::General
}

async fn handle_retrieve(
    State(state): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<EnhancedResult>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.user_id.trim().is_empty() {
        return Err(bad_request("user_id must not be empty"));
    }

    let query = RetrievalQuery {
        text: req.query,
        user_id: req.user_id,
        mode: req.mode,
        context: req.context,
    };
    Ok(Json(state.orchestrator.retrieve(&query).await))
}

// ============ POST /index ============

#[derive(Debug, Deserialize)]
struct IndexRequest {
    text: String,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
struct IndexResponse {
    id: String,
}

async fn handle_index(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let metadata = req.metadata.unwrap_or_else(|| serde_json::json!({}));
    let id = state
        .orchestrator
        .vectors()
        .index_text(&req.text, metadata)
        .await
        .map_err(classify_index_error)?;
    Ok(Json(IndexResponse { id }))
}

// ============ Cache maintenance ============

#[derive(Serialize)]
struct RemovedResponse {
    removed: u64,
}

async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.orchestrator.cache().stats().await)
}

async fn handle_cache_cleanup(State(state): State<AppState>) -> Json<RemovedResponse> {
    Json(RemovedResponse {
        removed: state.orchestrator.cleanup().await,
    })
}

async fn handle_cache_invalidate(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<RemovedResponse> {
    Json(RemovedResponse {
        removed: state.orchestrator.cache().invalidate(&key).await,
    })
}
