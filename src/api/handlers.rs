//! REST handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ApiState;
use crate::scoring::ScorerStatus;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub scorer: ScorerStatus,
    pub subscribers: usize,
    pub queue: QueueStatus,
}

/// GET /api/v1/status
///
/// 503 if the hub has stopped.
pub async fn get_status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, StatusCode> {
    let subscribers = state.hub.subscriber_count().await.map_err(|e| {
        tracing::warn!(error = %e, "Status requested but hub unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        scorer: ScorerStatus::clone(&state.scorer_status.load()),
        subscribers,
        queue: QueueStatus {
            depth: state.queue.depth(),
            capacity: state.queue.capacity(),
        },
    }))
}
