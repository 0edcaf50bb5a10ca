//! JSON HTTP API.
//!
//! Exposes the query pipeline and the ingestion queue over HTTP. A
//! background task polls the queue so enqueued jobs are processed without
//! a separate worker process.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/query` | Answer a question against the caller's documents |
//! | `POST` | `/jobs` | Enqueue an ingestion job |
//! | `GET`  | `/files/{id}` | Fetch one file record |
//!
//! `POST /query` identifies the caller via the `x-user-id` header; results
//! are always scoped to that user's chunks.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `llm_disabled` (400),
//! `timeout` (408), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::answer;
use crate::config::Config;
use crate::db;
use crate::files;
use crate::ingest;
use crate::jobs;
use crate::models::{FileRecord, IngestJob, ReconciledSource};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

/// Starts the HTTP server and the background job poller.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());
    let pool = db::connect(&config.db).await?;

    spawn_job_poller(config.clone(), pool.clone());

    let state = AppState { config, pool };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/jobs", post(handle_enqueue_job))
        .route("/files/{id}", get(handle_get_file))
        .layer(cors)
        .with_state(state);

    println!("Server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Polls the job queue every `[server].job_poll_secs` seconds and runs any
/// pending job to completion. One job at a time; a failed job is recorded
/// on its row and never blocks the next one.
fn spawn_job_poller(config: Arc<Config>, pool: SqlitePool) {
    let interval = Duration::from_secs(config.server.job_poll_secs);
    tokio::spawn(async move {
        loop {
            match jobs::claim_next_pending(&pool).await {
                Ok(Some(job)) => {
                    println!("Processing job {} — {}", job.id, job.original_name);
                    if let Err(e) = ingest::run_job(&config, &pool, &job).await {
                        eprintln!("Job {} failed: {:#}", job.id, e);
                    }
                }
                Ok(None) => tokio::time::sleep(interval).await,
                Err(e) => {
                    eprintln!("Job poll error: {:#}", e);
                    tokio::time::sleep(interval).await;
                }
            }
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

/// Internal error type that converts into an HTTP response.
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn llm_disabled() -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "llm_disabled".to_string(),
        message: "LLM provider is disabled; /query requires an [llm] provider".to_string(),
    }
}

/// Maps query pipeline errors onto the HTTP error contract.
fn classify_query_error(err: anyhow::Error) -> AppError {
    if let Some(timeout) = err.downcast_ref::<answer::QueryTimeout>() {
        return AppError {
            status: StatusCode::REQUEST_TIMEOUT,
            code: "timeout".to_string(),
            message: timeout.to_string(),
        };
    }
    internal_error(format!("{:#}", err))
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

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    message: String,
    #[serde(default)]
    class_id: Option<String>,
}

#[derive(Serialize)]
struct QueryResponse {
    response: String,
    sources: Vec<ReconciledSource>,
}

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_request("x-user-id header is required"))?
        .to_string();

    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    // The CLI degrades per sub-question without a provider; over HTTP a
    // disabled provider can never synthesize, so reject up front.
    if !state.config.llm.is_enabled() {
        return Err(llm_disabled());
    }

    let (response, sources) = answer::run_query(
        &state.config,
        &state.pool,
        &req.message,
        &user_id,
        req.class_id.as_deref(),
    )
    .await
    .map_err(classify_query_error)?;

    Ok(Json(QueryResponse { response, sources }))
}

// ============ POST /jobs ============

#[derive(Deserialize)]
struct JobRequest {
    storage_path: String,
    user_id: String,
    class_id: String,
    #[serde(default)]
    folder_id: Option<String>,
    original_name: String,
    mime_type: String,
    #[serde(default)]
    size: i64,
}

#[derive(Serialize)]
struct JobResponse {
    job_id: String,
    status: String,
}

async fn handle_enqueue_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobResponse>, AppError> {
    if req.storage_path.is_empty() {
        return Err(bad_request("storage_path must not be empty"));
    }
    if req.user_id.is_empty() {
        return Err(bad_request("user_id must not be empty"));
    }

    let job = IngestJob {
        id: String::new(),
        storage_path: req.storage_path,
        user_id: req.user_id,
        class_id: req.class_id,
        folder_id: req.folder_id,
        original_name: req.original_name,
        mime_type: req.mime_type,
        size: req.size,
    };

    let job_id = jobs::enqueue_job(&state.pool, &job)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(JobResponse {
        job_id,
        status: "pending".to_string(),
    }))
}

// ============ GET /files/{id} ============

async fn handle_get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileRecord>, AppError> {
    let record = files::get(&state.pool, &id)
        .await
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found(format!("File not found: {}", id)))?;

    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::QueryTimeout;

    #[test]
    fn timeout_errors_map_to_request_timeout() {
        let err = anyhow::Error::new(QueryTimeout(30));
        let mapped = classify_query_error(err);
        assert_eq!(mapped.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(mapped.code, "timeout");
        assert!(mapped.message.contains("30s"));
    }

    #[test]
    fn other_errors_map_to_internal() {
        let err = anyhow::anyhow!("decomposition request failed");
        let mapped = classify_query_error(err);
        assert_eq!(mapped.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mapped.code, "internal");
    }

    #[test]
    fn disabled_provider_is_a_client_error() {
        let mapped = llm_disabled();
        assert_eq!(mapped.status, StatusCode::BAD_REQUEST);
        assert_eq!(mapped.code, "llm_disabled");
    }
}
