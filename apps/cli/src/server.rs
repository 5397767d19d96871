//! HTTP trigger surface.
//!
//! - `GET /release-notes?last_published_at=DATE` runs the full query
//!   pipeline (extract, translate, notify) and returns the enriched batch
//! - `GET /crawl` runs the scrape strategy with its configured watermark and
//!   returns the extracted notes only
//! - `GET /healthz`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use color_eyre::eyre::{Result, WrapErr};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info, instrument, warn};

use relnotes_core::{Pipeline, build_extractor};
use relnotes_extractor::Extractor;
use relnotes_shared::{AppConfig, RelnotesError, SourceKind, Watermark};

/// Shared state for the handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    /// Query pipeline behind `/release-notes`; `None` when it could not be
    /// configured at start-up.
    pub pipeline: Option<Arc<Pipeline>>,
    pub scrape: Arc<dyn Extractor>,
}

impl AppState {
    /// Build the query pipeline and the scrape strategy. A misconfigured
    /// pipeline only disables `/release-notes`; the scrape trigger keeps working.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let pipeline = match Pipeline::from_config(config, SourceKind::Query) {
            Ok(pipeline) => Some(Arc::new(pipeline)),
            Err(e) => {
                warn!(error = %e, "query pipeline unavailable, /release-notes will fail");
                None
            }
        };
        let scrape = build_extractor(config, SourceKind::Scrape)
            .wrap_err("failed to configure scrape source")?;
        Ok(Self { pipeline, scrape })
    }
}

/// Create the router with all routes.
pub(crate) fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/release-notes", get(release_notes))
        .route("/crawl", get(crawl))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub(crate) async fn serve(config: &AppConfig, host: &str, port: u16) -> Result<()> {
    let state = AppState::from_config(config)?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .wrap_err_with(|| format!("invalid listen address {host}:{port}"))?;
    info!(%addr, "starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct ReleaseNotesParams {
    pub last_published_at: Option<String>,
}

#[instrument(skip_all, fields(last_published_at = ?params.last_published_at))]
async fn release_notes(
    State(state): State<AppState>,
    Query(params): Query<ReleaseNotesParams>,
) -> Response {
    let Some(raw) = params.last_published_at.filter(|v| !v.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "last_published_at is required");
    };

    let watermark = match Watermark::parse(&raw) {
        Ok(w) => w,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let Some(pipeline) = state.pipeline else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "query pipeline is not configured",
        );
    };

    match pipeline.run(Some(watermark)).await {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                count = report.notes.len(),
                delivery = %report.delivery,
                "release notes served"
            );
            (
                StatusCode::OK,
                Json(json!({ "release_notes": report.notes })),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "release-notes run failed");
            error_response(status_for(&e), &e.to_string())
        }
    }
}

#[instrument(skip_all)]
async fn crawl(State(state): State<AppState>) -> Response {
    let Some(watermark) = state.scrape.default_watermark() else {
        return crawl_failure("scrape watermark is not configured");
    };

    match state.scrape.extract(watermark).await {
        Ok(notes) => {
            info!(count = notes.len(), %watermark, "crawl served");
            (
                StatusCode::OK,
                Json(json!({ "status": "success", "notes": notes })),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "crawl failed");
            crawl_failure(&e.to_string())
        }
    }
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn status_for(err: &RelnotesError) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn crawl_failure(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "message": message })),
    )
        .into_response()
}
