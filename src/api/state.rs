//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;

use crate::api::instrument::RequestMetrics;
use crate::storage::AnnotationStore;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Annotation store, one handle for the whole process
    pub store: Arc<dyn AnnotationStore>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    /// Request counters of the annotations endpoint
    pub requests: Arc<RequestMetrics>,
}

impl AppState {
    pub fn new(store: Arc<dyn AnnotationStore>, config: ApiConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            start_time: Instant::now(),
            requests: Arc::new(RequestMetrics::new()),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address to listen on
    pub listen_addr: String,
    /// Path of the annotations endpoint (GET/PUT)
    pub endpoint: String,
    /// Path of the Prometheus metrics endpoint
    pub metrics_endpoint: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9119".to_string(),
            endpoint: "/annotations".to_string(),
            metrics_endpoint: "/metrics".to_string(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> &str {
        &self.listen_addr
    }
}
