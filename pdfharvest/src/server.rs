//! HTTP surface of the download orchestrator.

use anyhow::Context;
use axum::{
    Json, Router,
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use pdfharvest_core::config::{ARCHIVE_FILE_NAME, OutputMode};
use pdfharvest_core::download::{Harvester, SourceRequest, StreamedDownload};
use pdfharvest_core::error::HarvestError;
use pdfharvest_core::progress::ProgressReporter;
use pdfharvest_core::retention::{is_retained_name, spawn_sweeper};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const PROGRESS_BUFFER: usize = 64;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const TRUNCATED_HEADER: &str = "x-items-truncated";

#[derive(Clone)]
pub struct AppState {
    pub harvester: Harvester,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Time allowed until response headers are produced.
    pub request_timeout: Duration,
}

/// Wraps [`HarvestError`] so handlers can return it with `?`.
#[derive(Debug)]
pub struct ApiError(pub HarvestError);

impl From<HarvestError> for ApiError {
    fn from(e: HarvestError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            info!("Request rejected: {}", self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveLink {
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Create the API router
///
/// # Routes
///
/// - `POST /api/download` - Download as a ZIP (JSON body)
/// - `GET /api/download` - Download as a ZIP (query parameters)
/// - `POST /api/download/progress` - Server-sent progress events
/// - `POST /api/download/archive` - Write a retained ZIP and return its link
/// - `GET /temp-archives/:name` - Fetch a retained ZIP
/// - `GET /health` - Health check
pub fn create_router(harvester: Harvester, request_timeout: Option<Duration>) -> Router {
    let state = AppState { harvester };

    let router = Router::new()
        .route("/api/download", post(download_json).get(download_query))
        .route("/api/download/progress", post(download_progress))
        .route("/api/download/archive", post(download_archive))
        .route("/temp-archives/:name", get(retained_archive))
        .route("/health", get(health_check))
        .with_state(state);

    let router = match request_timeout {
        Some(timeout) => router.layer(TimeoutLayer::new(timeout)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

pub async fn start_server(harvester: Harvester, config: ServerConfig) -> anyhow::Result<()> {
    info!(address = %config.bind, "Starting pdfharvest server");

    let sweeper = harvester
        .retention()
        .map(|policy| spawn_sweeper(policy.clone(), SWEEP_INTERVAL));
    let app = create_router(harvester, Some(config.request_timeout));

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(address = %config.bind, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

/// POST /api/download
async fn download_json(
    State(state): State<AppState>,
    payload: Result<Json<SourceRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) =
        payload.map_err(|e| HarvestError::Validation(format!("Invalid request body: {}", e)))?;
    download(&state, request).await
}

/// GET /api/download?baseUrl=..&targetUrl=..
async fn download_query(
    State(state): State<AppState>,
    query: Result<Query<SourceRequest>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(request) =
        query.map_err(|e| HarvestError::Validation(format!("Invalid query: {}", e)))?;
    download(&state, request).await
}

async fn download(state: &AppState, request: SourceRequest) -> Result<Response, ApiError> {
    let harvester = &state.harvester;
    let plan = harvester.plan(&request).await?;
    let truncated = plan.truncated;

    match harvester.config().output_mode {
        OutputMode::Streamed => {
            let StreamedDownload { stream, summary } =
                harvester.stream(plan, ProgressReporter::disabled());
            tokio::spawn(async move {
                match summary.wait().await {
                    Ok(summary) => info!(
                        "Streamed {} documents for {} ({} failed)",
                        summary.succeeded,
                        summary.target,
                        summary.failures.len()
                    ),
                    Err(e) => error!("Streamed download failed: {}", e),
                }
            });
            zip_response(Body::from_stream(stream), None, truncated)
        }
        OutputMode::Buffered => {
            let download = harvester
                .buffered(plan, ProgressReporter::disabled())
                .await?;
            let length = download.bytes.len() as u64;
            zip_response(Body::from(download.bytes), Some(length), truncated)
        }
    }
}

fn zip_response(body: Body, length: Option<u64>, truncated: usize) -> Result<Response, ApiError> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", ARCHIVE_FILE_NAME),
        );
    if let Some(length) = length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }
    if truncated > 0 {
        builder = builder.header(TRUNCATED_HEADER, truncated);
    }
    builder
        .body(body)
        .map_err(|e| ApiError(HarvestError::Unexpected(e.to_string())))
}

/// POST /api/download/progress - one `data:` frame per progress event
async fn download_progress(
    State(state): State<AppState>,
    payload: Result<Json<SourceRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) =
        payload.map_err(|e| HarvestError::Validation(format!("Invalid request body: {}", e)))?;
    state.harvester.validate(&request)?;

    let (reporter, events) = ProgressReporter::channel(PROGRESS_BUFFER);
    let harvester = state.harvester.clone();
    tokio::spawn(async move {
        let mut reporter = reporter.with_payloads(true);
        let plan = match harvester.plan(&request).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Progress download failed before fetching: {}", e);
                reporter.fail(e.to_body().message).await;
                return;
            }
        };
        if let Err(e) = harvester.report_only(plan, reporter).await {
            warn!("Progress download failed: {}", e);
        }
    });

    let stream = ReceiverStream::new(events).map(|event| SseEvent::default().json_data(event));
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// POST /api/download/archive
async fn download_archive(
    State(state): State<AppState>,
    payload: Result<Json<SourceRequest>, JsonRejection>,
) -> Result<Json<ArchiveLink>, ApiError> {
    if state.harvester.retention().is_none() {
        return Err(HarvestError::NotFound("Archive retention is not enabled".to_string()).into());
    }
    let Json(request) =
        payload.map_err(|e| HarvestError::Validation(format!("Invalid request body: {}", e)))?;

    let plan = state.harvester.plan(&request).await?;
    let retained = state
        .harvester
        .retain(plan, ProgressReporter::disabled())
        .await?;

    Ok(Json(ArchiveLink {
        download_url: retained.download_url(),
        expires_at: retained.expires_at,
    }))
}

/// GET /temp-archives/:name
async fn retained_archive(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError(HarvestError::NotFound("Archive not found".to_string()));

    let retention = state.harvester.retention().ok_or_else(not_found)?;
    if !is_retained_name(&name) {
        return Err(not_found());
    }
    let path = retention.directory().join(&name);
    if !retention.is_live(&path) {
        return Err(not_found());
    }

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        warn!("Retained archive {} unreadable: {}", path.display(), e);
        not_found()
    })?;
    let length = bytes.len() as u64;
    zip_response(Body::from(bytes), Some(length), 0)
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
