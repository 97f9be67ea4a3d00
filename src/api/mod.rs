//! HTTP and WebSocket transport using Axum
//!
//! - `GET /ws/kpi`        - live scored-sample stream (one hub subscriber per socket)
//! - `GET /health`        - liveness probe
//! - `GET /api/v1/status` - scorer phase, model generation, window, counters,
//!   subscriber count, queue depth

pub mod handlers;
pub mod ws;

use axum::routing::get;
use axum::Router;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::hub::HubHandle;
use crate::intake::QueueGauge;
use crate::scoring::StatusCell;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub hub: HubHandle,
    pub scorer_status: StatusCell,
    pub queue: QueueGauge,
    /// Idle time on a socket before a keepalive is sent
    pub keepalive: Duration,
    /// Per-socket outbound buffer, in messages
    pub subscriber_buffer: usize,
}

/// Create the application router.
///
/// CORS is fully open: the stream is read-only and consumed by
/// browser dashboards on other origins.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .route("/ws/kpi", get(ws::kpi_stream))
        .route("/health", get(handlers::health))
        .nest("/api/v1", Router::new().route("/status", get(handlers::get_status)))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
