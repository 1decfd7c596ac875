//! Data Transfer Objects
//!
//! Request and response types for the API endpoints that are not storage
//! types themselves (`Annotation` and `Posts` serialize as-is).

use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::query::{PostsQuery, DEFAULT_RANGE_SECS};

// ============================================
// ANNOTATION DTOs
// ============================================

/// PUT response body
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutResponse {
    /// "ok"
    pub result: String,
}

impl PutResponse {
    pub fn ok() -> Self {
        Self {
            result: "ok".to_string(),
        }
    }
}

/// GET query parameters
///
/// `tags[]` repeats, which serde's urlencoded support can't collect into a
/// Vec, so the raw query string is decoded by hand.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PostsParams {
    /// Lookback window in seconds (missing or 0 = 3600)
    pub range: Option<i64>,
    /// End of the window, unix seconds (missing or 0 = now)
    pub until: Option<i64>,
    /// Requested tags, in order of appearance
    pub tags: Vec<String>,
    /// Any non-empty `all` value selects all mode
    pub all: bool,
}

impl PostsParams {
    /// Decode `range`, `until`, `tags[]`/`tags` and `all` from a raw query string
    pub fn from_query(raw: Option<&str>) -> ApiResult<Self> {
        let mut params = Self::default();

        for pair in raw.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode(key)?;
            let value = decode(value)?;

            match key.as_str() {
                "range" => params.range = parse_seconds("range", &value)?,
                "until" => params.until = parse_seconds("until", &value)?,
                "tags" | "tags[]" => params.tags.push(value),
                "all" => params.all = !value.is_empty(),
                _ => {}
            }
        }

        Ok(params)
    }

    /// Resolve defaults against `now` (unix seconds)
    pub fn into_query(self, now: i64) -> PostsQuery {
        if self.all {
            return PostsQuery::All;
        }

        PostsQuery::Ranged {
            tags: self.tags,
            range_secs: self.range.filter(|r| *r != 0).unwrap_or(DEFAULT_RANGE_SECS),
            until_secs: self.until.filter(|u| *u != 0).unwrap_or(now),
        }
    }
}

fn decode(s: &str) -> ApiResult<String> {
    let s = s.replace('+', " ");
    urlencoding::decode(&s)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ApiError::Validation(format!("Malformed query string: {}", e)))
}

fn parse_seconds(name: &str, value: &str) -> ApiResult<Option<i64>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<i64>()
        .map(Some)
        .map_err(|_| ApiError::Validation(format!("{} must be an integer, got \"{}\"", name, value)))
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy or unhealthy
    pub status: String,
    /// Storage status
    pub storage: String,
    /// Storage backend name
    pub backend: String,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let query = PostsParams::from_query(None).unwrap().into_query(5000);
        assert_eq!(
            query,
            PostsQuery::Ranged {
                tags: Vec::new(),
                range_secs: 3600,
                until_secs: 5000,
            }
        );

        let query = PostsParams::from_query(Some("range=0&until=0"))
            .unwrap()
            .into_query(5000);
        assert_eq!(
            query,
            PostsQuery::Ranged {
                tags: Vec::new(),
                range_secs: 3600,
                until_secs: 5000,
            }
        );
    }

    #[test]
    fn test_repeated_tags_keep_order() {
        let params =
            PostsParams::from_query(Some("until=100&range=50&tags%5B%5D=deploy&tags[]=web+app&tags=db"))
                .unwrap();
        assert_eq!(params.tags, vec!["deploy", "web app", "db"]);
        assert_eq!(params.range, Some(50));
        assert_eq!(params.until, Some(100));
    }

    #[test]
    fn test_all_flag() {
        let params = PostsParams::from_query(Some("all=1&tags[]=x")).unwrap();
        assert!(params.all);
        assert_eq!(params.into_query(10), PostsQuery::All);

        let params = PostsParams::from_query(Some("all=")).unwrap();
        assert!(!params.all);
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err = PostsParams::from_query(Some("range=abc")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = PostsParams::from_query(Some("until=1.5")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
