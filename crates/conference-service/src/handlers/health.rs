//! Health check handlers.
//!
//! Liveness reports that the process is serving; readiness pings the store.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /health
///
/// Always 200 while the process is able to answer.
#[instrument(skip_all, name = "cs.health.check")]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        store: None,
    })
}

/// Handler for GET /ready
///
/// ## Response
///
/// - 200 OK with `{"status": "ready", "store": "healthy"}` when the store answers
/// - 503 Service Unavailable with `"store": "unhealthy"` otherwise
#[instrument(skip_all, name = "cs.health.ready")]
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ready".to_string(),
                store: Some("healthy".to_string()),
            }),
        ),
        Err(e) => {
            tracing::warn!(target: "cs.handlers.health", error = %e, "Store ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    store: Some("unhealthy".to_string()),
                }),
            )
        }
    }
}
