//! HTTP surface over a running engine.
//!
//! This module provides an HTTP server that:
//! - Serves the live snapshot, fleet summary and historical metrics as JSON
//! - Accepts raw telemetry pushed by external producers via POST /ingest
//!
//! # Architecture
//!
//! ```text
//! producer ──→ POST /ingest ──→ Engine ──→ GET /snapshot, /summary, /uptime,
//!                                 ↑         /series/{feature}, /temperatures
//!                    SimulationDriver
//! ```

use crate::core::buckets::SeriesPoint;
use crate::core::intervals::EntityUptime;
use crate::core::metrics::{FleetSummary, TemperatureAverage};
use crate::core::reducer::FleetSnapshot;
use crate::engine::{Engine, IngestSummary};
use crate::quality::QualityStats;
use crate::telemetry::types::{FeatureCode, RawFeatureEvent, ValueKind};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Engine the routes read from and ingest into
    pub engine: Arc<Engine>,
}

impl ServerConfig {
    pub fn new(port: u16, engine: Arc<Engine>) -> Self {
        Self { port, engine }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub events_retained: usize,
    pub events_evicted: u64,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Bucketed series response
#[derive(Serialize)]
pub struct SeriesResponse {
    pub feature: FeatureCode,
    pub points: Vec<SeriesPoint>,
}

/// Optional `[start, end)` window for temperature averages
#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: String) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error,
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health(State(engine): State<Arc<Engine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        events_retained: engine.event_count(),
        events_evicted: engine.quality().stats().events_evicted,
    })
}

/// GET /snapshot
async fn snapshot(State(engine): State<Arc<Engine>>) -> Json<FleetSnapshot> {
    Json(engine.snapshot())
}

/// GET /summary
async fn summary(State(engine): State<Arc<Engine>>) -> Json<FleetSummary> {
    Json(engine.summary())
}

/// GET /uptime
async fn uptime(State(engine): State<Arc<Engine>>) -> Json<Vec<EntityUptime>> {
    Json(engine.uptime(Utc::now()))
}

/// GET /series/{feature}
async fn series(
    State(engine): State<Arc<Engine>>,
    Path(code): Path<String>,
) -> Result<Json<SeriesResponse>, ApiError> {
    let feature = FeatureCode::parse(&code).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            "UNKNOWN_FEATURE",
            format!("Unknown feature code: {code}"),
        )
    })?;
    if feature.kind() != ValueKind::Number {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "NOT_NUMERIC",
            format!("Feature {feature} is boolean and cannot be averaged"),
        ));
    }

    Ok(Json(SeriesResponse {
        feature,
        points: engine.series(feature).points(),
    }))
}

/// GET /temperatures
async fn temperatures(
    State(engine): State<Arc<Engine>>,
    Query(window): Query<WindowQuery>,
) -> Json<Vec<TemperatureAverage>> {
    let start = window.start.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = window.end.unwrap_or(DateTime::<Utc>::MAX_UTC);
    Json(engine.temperatures(start, end))
}

/// GET /quality
async fn quality(State(engine): State<Arc<Engine>>) -> Json<QualityStats> {
    Json(engine.quality().stats())
}

/// POST /ingest
///
/// Accepts a JSON array of raw wire events.
async fn ingest(
    State(engine): State<Arc<Engine>>,
    Json(events): Json<Vec<RawFeatureEvent>>,
) -> Json<IngestSummary> {
    let result = engine.ingest_raw(&events);
    tracing::debug!(
        received = events.len(),
        applied = result.applied,
        skipped = result.skipped,
        "Ingested pushed events"
    );
    Json(result)
}

/// Build the router without binding.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/snapshot", get(snapshot))
        .route("/summary", get(summary))
        .route("/uptime", get(uptime))
        .route("/series/:feature", get(series))
        .route("/temperatures", get(temperatures))
        .route("/quality", get(quality))
        .route("/ingest", post(ingest))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(engine)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(config.engine);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Fleet telemetry server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
