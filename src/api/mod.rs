//! Annotation HTTP API
//!
//! HTTP layer built with Axum. The annotation and metrics paths come from
//! configuration; the health probes are fixed.
//!
//! # Endpoints
//!
//! ## Annotations (default `/annotations`)
//! - `GET` - Annotations for `tags[]` within `[until - range, until]`, or all with `all=1`
//! - `PUT` - Store an annotation, replies `{"result":"ok"}`
//!
//! ## Metrics (default `/metrics`)
//! - `GET` - Prometheus gauge `annotations_total{tag}`, plus request
//!   counters and latencies of the annotations endpoint
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use annotations::api::{serve, ApiConfig, AppState};
//!
//! let store = annotations::storage::open("local:/tmp/annotations.db").await?;
//! let config = ApiConfig::default();
//! serve(AppState::new(store, config.clone()), &config).await?;
//! ```

pub mod dto;
pub mod error;
pub mod instrument;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let shared_state = Arc::new(state);

    let annotations = get(routes::annotations::list_annotations)
        .put(routes::annotations::put_annotation)
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&shared_state),
            instrument::track_requests,
        ));

    Router::new()
        .route(&config.endpoint, annotations)
        .route(&config.metrics_endpoint, get(routes::metrics::scrape))
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server, returning once a shutdown signal has drained it
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        endpoint = %config.endpoint,
        metrics_endpoint = %config.metrics_endpoint,
        "Annotation server listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Annotation server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
