//! Health Routes
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (store answers queries)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 200 when the store can list its tags, 503 otherwise.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match check_storage_health(&state).await {
        true => StatusCode::OK,
        false => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /health
///
/// Full health status with component details.
pub async fn full_health(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let storage_ok = check_storage_health(&state).await;

    let (status, overall, storage) = if storage_ok {
        (StatusCode::OK, "healthy", "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "error")
    };

    (
        status,
        Json(HealthResponse {
            status: overall.to_string(),
            storage: storage.to_string(),
            backend: state.store.backend().to_string(),
            uptime_seconds: state.uptime_seconds(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

async fn check_storage_health(state: &AppState) -> bool {
    match state.store.all_tags().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Storage health check failed");
            false
        }
    }
}
