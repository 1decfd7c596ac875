//! Metrics Route
//!
//! Prometheus text exposition of per-tag annotation counts, followed by the
//! request counters of the annotations endpoint. The gauge family is rebuilt
//! from the store on every scrape.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::instrument::{RequestTotals, SeriesKey, HANDLER};
use crate::api::state::AppState;
use crate::storage::TagStats;

/// Prometheus text format content type
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET {metrics_endpoint}
///
/// A stats failure is logged and answered with an empty family so the
/// scrape itself does not fail.
pub async fn scrape(State(state): State<Arc<AppState>>) -> Response {
    let stats = match state.store.tag_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!(error = %e, "Failed to collect tag stats");
            TagStats::new()
        }
    };

    let body = render(&stats, &state.requests.snapshot());
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

/// Render `annotations_total{tag="..."}` samples and the request series
pub fn render(stats: &TagStats, requests: &BTreeMap<SeriesKey, RequestTotals>) -> String {
    let mut out = String::new();
    out.push_str("# HELP annotations_total Number of annotations per tag.\n");
    out.push_str("# TYPE annotations_total gauge\n");
    for (tag, count) in stats {
        out.push_str(&format!(
            "annotations_total{{tag=\"{}\"}} {}\n",
            escape_label(tag),
            count
        ));
    }

    out.push_str("# HELP http_requests_total Total number of HTTP requests made.\n");
    out.push_str("# TYPE http_requests_total counter\n");
    for ((method, code), totals) in requests {
        out.push_str(&format!(
            "http_requests_total{} {}\n",
            request_labels(method, *code),
            totals.count
        ));
    }

    out.push_str("# HELP http_request_duration_seconds The HTTP request latencies in seconds.\n");
    out.push_str("# TYPE http_request_duration_seconds summary\n");
    for ((method, code), totals) in requests {
        let labels = request_labels(method, *code);
        out.push_str(&format!(
            "http_request_duration_seconds_sum{} {}\n",
            labels, totals.duration_secs
        ));
        out.push_str(&format!(
            "http_request_duration_seconds_count{} {}\n",
            labels, totals.count
        ));
    }

    out
}

fn request_labels(method: &str, code: u16) -> String {
    format!(
        "{{code=\"{}\",handler=\"{}\",method=\"{}\"}}",
        code,
        HANDLER,
        escape_label(method)
    )
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}
