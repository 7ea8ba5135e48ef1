use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::aggregator::SnapshotPublisher;
use crate::error::Result;
use crate::metrics::{HealthChecker, PrometheusExporter};
use crate::origin::OriginPublisher;

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<SnapshotPublisher>,
    pub origin_publisher: Option<Arc<OriginPublisher>>,
    pub health_checker: Arc<HealthChecker>,
}

/// Binds and serves the metrics/health HTTP surface until `cancel` fires
/// (spec §6 "HTTP endpoints", teacher `api::server::run`).
pub async fn run(addr: SocketAddr, state: AppState, cancel: CancellationToken) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!("metrics server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let exporter = PrometheusExporter::new(state.publisher.clone(), state.origin_publisher.clone());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        exporter.export(),
    )
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.publisher.latest();
    let age = snapshot.as_ref().map(|s| Instant::now().duration_since(s.generated_at));
    let (active, target) = snapshot.as_ref().map(|s| (s.active_clients, s.target_clients)).unwrap_or((0, 0));
    let system = state.health_checker.check(active, target, age);
    Json(system)
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.publisher.latest();
    let age = snapshot.as_ref().map(|s| Instant::now().duration_since(s.generated_at));
    let (active, target) = snapshot.as_ref().map(|s| (s.active_clients, s.target_clients)).unwrap_or((0, 0));
    let system = state.health_checker.check(active, target, age);
    if system.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
