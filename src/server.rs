//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a question (safety, retrieval, gating, synthesis) |
//! | `POST` | `/search` | Retrieval only: ranked, parent-expanded results |
//! | `GET`  | `/session/{id}` | Turn count, summary and history preview |
//! | `DELETE` | `/session/{id}` | Forget a session |
//! | `GET`  | `/health` | Version, vector counts, cache and session stats |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `integrity` (500),
//! `internal` (500), `upstream` (502), `timeout` (504).
//!
//! A synthesizer failure is not an error: `/query` still returns 200 with
//! `synthesis_failed: true` and the retrieved sources.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use transcript_rag_core::cache::CacheStats;
use transcript_rag_core::engine::{QueryRequest, QueryResponse, SessionInfo};
use transcript_rag_core::memory::SessionStats;
use transcript_rag_core::models::RetrievalResult;
use transcript_rag_core::pipeline::RetrieveOptions;
use transcript_rag_core::RagError;

use crate::app::Runtime;
use crate::config::Config;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/search", post(handle_search))
        .route(
            "/session/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Load the runtime and serve on `[server].bind` until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let runtime = Arc::new(Runtime::load(config)?);
    info!(
        core = runtime.core_len().await,
        longtail = runtime.longtail_len().await,
        parents = runtime.parents.len(),
        synthesis = runtime.engine.has_synthesizer(),
        "runtime loaded"
    );

    let app = router(AppState { runtime });
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("trag server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
    Ok(())
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

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Map a pipeline failure onto the error contract.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = err.to_string();
        match err.downcast_ref::<RagError>() {
            Some(RagError::Validation(_)) => bad_request(message),
            Some(RagError::NotFound(_)) => not_found(message),
            Some(RagError::Integrity(_)) | Some(RagError::DimensionMismatch { .. }) => {
                error!(error = %message, "integrity failure");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "integrity", message)
            }
            Some(RagError::Upstream(_)) => app_error(StatusCode::BAD_GATEWAY, "upstream", message),
            Some(RagError::Timeout(_)) => {
                app_error(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            None => {
                error!(error = %message, "request failed");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let response = state.runtime.engine.answer(req).await?;
    Ok(Json(response))
}

// ============ POST /search ============

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    use_longtail: bool,
    #[serde(default = "default_true")]
    expand: bool,
    #[serde(default)]
    limit: Option<usize>,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<RetrievalResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let opts = RetrieveOptions {
        use_longtail: req.use_longtail,
        use_query_expansion: req.expand,
        filter: None,
    };
    let mut results = state.runtime.pipeline.retrieve(&req.query, &opts).await?;
    if let Some(limit) = req.limit {
        results.truncate(limit);
    }
    Ok(Json(SearchResponse { results }))
}

// ============ /session/{id} ============

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, AppError> {
    state
        .runtime
        .engine
        .session_info(&id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(format!("session not found: {}", id)))
}

#[derive(Serialize)]
struct DeleteResponse {
    session_id: String,
    deleted: bool,
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !state.runtime.engine.clear_session(&id) {
        return Err(not_found(format!("session not found: {}", id)));
    }
    Ok(Json(DeleteResponse {
        session_id: id,
        deleted: true,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct VectorCounts {
    core: usize,
    longtail: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    embedding_model: String,
    synthesis_available: bool,
    vectors: VectorCounts,
    parents: usize,
    cached_parents: usize,
    cache: CacheStats,
    sessions: SessionStats,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let rt = &state.runtime;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        embedding_model: rt.embedding_model.clone(),
        synthesis_available: rt.engine.has_synthesizer(),
        vectors: VectorCounts {
            core: rt.core_len().await,
            longtail: rt.longtail_len().await,
        },
        parents: rt.parents.len(),
        cached_parents: rt.parents.cached_len(),
        cache: rt.engine.cache_stats(),
        sessions: rt.engine.session_stats(),
    })
}
