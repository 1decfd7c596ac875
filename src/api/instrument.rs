//! Request instrumentation for the annotations endpoint
//!
//! Counts requests and sums their latency per method and status code:
//!
//! ```text
//! http_requests_total{code="200",handler="annotations",method="get"} 12
//! http_request_duration_seconds_sum{code="200",handler="annotations",method="get"} 0.034
//! http_request_duration_seconds_count{code="200",handler="annotations",method="get"} 12
//! ```

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::api::state::AppState;

/// Value of the `handler` label
pub const HANDLER: &str = "annotations";

/// Series key: lowercase method and status code
pub type SeriesKey = (String, u16);

/// Accumulated totals for one series
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestTotals {
    pub count: u64,
    pub duration_secs: f64,
}

/// Per-series request counters, shared through `AppState`
#[derive(Debug, Default)]
pub struct RequestMetrics {
    series: Mutex<BTreeMap<SeriesKey, RequestTotals>>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: &Method, status: StatusCode, elapsed: Duration) {
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let totals = series
            .entry((method.as_str().to_ascii_lowercase(), status.as_u16()))
            .or_default();
        totals.count += 1;
        totals.duration_secs += elapsed.as_secs_f64();
    }

    /// Copy of every series, ordered by method then code
    pub fn snapshot(&self) -> BTreeMap<SeriesKey, RequestTotals> {
        self.series
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Middleware timing each request that reaches the annotations handlers
pub async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    state
        .requests
        .record(&method, response.status(), started.elapsed());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_per_series() {
        let metrics = RequestMetrics::new();
        metrics.record(&Method::GET, StatusCode::OK, Duration::from_millis(10));
        metrics.record(&Method::GET, StatusCode::OK, Duration::from_millis(30));
        metrics.record(&Method::PUT, StatusCode::BAD_REQUEST, Duration::from_millis(5));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);

        let get = snapshot[&("get".to_string(), 200)];
        assert_eq!(get.count, 2);
        assert!((get.duration_secs - 0.04).abs() < 1e-9);
        assert_eq!(snapshot[&("put".to_string(), 400)].count, 1);
    }
}
