//! HTTP server for upload and retrieval endpoints
//!
//! Provides PUT /v1/file, GET /v1/{handle} and /health.

use crate::error::AppError;
use crate::types::{HealthResponse, UploadResponse};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    response::{Json, Response},
    routing::{get, put},
    Router,
};
use chrono::{DateTime, Utc};
use ephemeral_blob_store::{Handle, ObjectStore};
use std::future::Future;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

/// Upload header carrying the requested retention in minutes
pub const RETENTION_TIME_HEADER: &str = "retention-time";

/// Shared state for the HTTP server
pub struct ServerState {
    pub store: Arc<ObjectStore>,
    pub max_upload_bytes: usize,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(store: Arc<ObjectStore>, max_upload_bytes: usize) -> Self {
        Self {
            store,
            max_upload_bytes,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(RETENTION_TIME_HEADER),
        ])
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/v1/file", put(upload_file))
        .route("/v1/{handle}", get(retrieve_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer())
        .with_state(state)
}

/// Start the HTTP server and run until `shutdown` resolves
pub async fn start_server<F>(state: SharedState, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        store: state.store.stats().await,
    })
}

/// Accept a multipart upload and stream its `file` field to disk
async fn upload_file(
    State(state): State<SharedState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let requested = headers
        .get(RETENTION_TIME_HEADER)
        .and_then(|v| v.to_str().ok());
    let ttl = state.store.ttl_from_request(requested);

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "Failed to parse multipart form");
        AppError::BadRequest("Failed to parse multipart form".into())
    })? {
        if field.name() != Some("file") {
            debug!(field = ?field.name(), "Ignoring multipart field");
            continue;
        }

        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unnamed".to_string());

        let mut staged = state.store.blobs().create_staged().await?;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = staged.write(&chunk).await {
                        staged.discard().await;
                        return Err(e.into());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(filename = %filename, error = %e, "Failed to read uploaded file");
                    staged.discard().await;
                    return Err(AppError::BadRequest("Failed to read file".into()));
                }
            }
        }

        let size = staged.len();
        let handle = state.store.commit_staged(staged, &filename, ttl).await?;
        info!(handle = %handle, size, ttl_minutes = ttl.num_minutes(), "File uploaded");

        return Ok(Json(UploadResponse {
            url: handle.to_string(),
        }));
    }

    Err(AppError::BadRequest("Failed to read file".into()))
}

/// Stream a live blob back to the caller
async fn retrieve_file(
    State(state): State<SharedState>,
    Path(raw): Path<String>,
) -> Result<Response, AppError> {
    let handle = Handle::parse(&raw)?;
    let resolved = state.store.resolve(&handle).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&resolved.metadata.filename),
        )
        .body(Body::from_stream(ReaderStream::new(resolved.file)))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Inline disposition naming the original file, reduced to safe ASCII
fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = safe.trim();
    let safe = if safe.is_empty() { "download" } else { safe };
    format!("inline; filename=\"{}\"", safe)
}
