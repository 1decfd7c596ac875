//! Annotation Routes
//!
//! - GET {endpoint} - Annotations for the requested tags and window
//! - PUT {endpoint} - Store one annotation under each of its tags

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::api::dto::{PostsParams, PutResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::storage::key::{self, MAX_KEY_SECS, MIN_KEY_SECS};
use crate::storage::{Annotation, Posts};

/// GET {endpoint}?tags[]=a&tags[]=b&range=3600&until=1700000000
///
/// `all=1` ignores the other parameters and returns everything.
pub async fn list_annotations(
    State(state): State<Arc<AppState>>,
    RawQuery(raw): RawQuery,
) -> ApiResult<Json<Posts>> {
    let now = Utc::now().timestamp();
    let query = PostsParams::from_query(raw.as_deref())?.into_query(now);

    let posts = query.execute(state.store.as_ref(), now).await?;

    tracing::debug!(count = posts.len(), "Served annotations");

    Ok(Json(posts))
}

/// PUT {endpoint}
///
/// Body: `{"message": "...", "tags": ["a", "b"], "created_at": 1700000000}`.
/// A missing or zero `created_at` is stamped with the current time.
pub async fn put_annotation(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<PutResponse>> {
    let mut annotation: Annotation = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid annotation body: {}", e)))?;

    validate_annotation(&annotation)?;

    if annotation.created_at == 0 {
        annotation.created_at = Utc::now().timestamp();
    }

    state.store.add(&annotation).await?;

    tracing::info!(
        created_at = annotation.created_at,
        tags = ?annotation.tags,
        "Stored annotation"
    );

    Ok(Json(PutResponse::ok()))
}

fn validate_annotation(annotation: &Annotation) -> ApiResult<()> {
    if annotation.message.is_empty() {
        return Err(ApiError::Validation("Message cannot be empty".to_string()));
    }

    if annotation.tags.is_empty() {
        return Err(ApiError::Validation(
            "At least one tag is required".to_string(),
        ));
    }

    if annotation.tags.iter().any(|t| t.is_empty()) {
        return Err(ApiError::Validation("Tags cannot be empty".to_string()));
    }

    if key::check_timestamp(annotation.created_at).is_err() {
        return Err(ApiError::Validation(format!(
            "created_at must lie between {} and {}, got {}",
            MIN_KEY_SECS, MAX_KEY_SECS, annotation.created_at
        )));
    }

    Ok(())
}
