//! Core data types for the annotation store
//!
//! - `Annotation`: a tagged, timestamped text record
//! - `Posts`: the query response wrapper
//! - `TagStats`: per-tag entry counts

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tagged, timestamped text record
///
/// `created_at` is unix seconds when written. Records returned by a range
/// query carry milliseconds instead (see [`Annotation::for_client`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    /// Unix timestamp in seconds (0 = "now" at the HTTP boundary)
    #[serde(default)]
    pub created_at: i64,
    /// Free-form message
    pub message: String,
    /// Tags this annotation is filed under
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Annotation {
    /// Create an annotation stamped with the current time
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_timestamp(message, Utc::now().timestamp())
    }

    /// Create an annotation with a specific timestamp (seconds)
    pub fn with_timestamp(message: impl Into<String>, created_at: i64) -> Self {
        Self {
            created_at,
            message: message.into(),
            tags: Vec::new(),
        }
    }

    /// Builder method: add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Builder method: add multiple tags, keeping their order
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Copy without the tag list (tags are implied by bucket membership)
    pub fn without_tags(&self) -> Self {
        Self {
            created_at: self.created_at,
            message: self.message.clone(),
            tags: Vec::new(),
        }
    }

    /// Presentation form returned by range queries: milliseconds, and only
    /// the tag that produced the match.
    pub fn for_client(self, tag: &str) -> Self {
        Self {
            created_at: self.created_at.saturating_mul(1000),
            message: self.message,
            tags: vec![tag.to_string()],
        }
    }
}

/// Query response body: `{"posts": [...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Posts {
    pub posts: Vec<Annotation>,
}

impl Posts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

impl From<Vec<Annotation>> for Posts {
    fn from(posts: Vec<Annotation>) -> Self {
        Self { posts }
    }
}

/// Tag → number of stored entries under that tag
pub type TagStats = BTreeMap<String, u64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_builder() {
        let a = Annotation::with_timestamp("deploy web", 1_700_000_000)
            .tag("deploy")
            .tags(["web", "prod"]);

        assert_eq!(a.created_at, 1_700_000_000);
        assert_eq!(a.tags, vec!["deploy", "web", "prod"]);
    }

    #[test]
    fn test_without_tags_serializes_compactly() {
        let a = Annotation::with_timestamp("msg", 42).tags(["a", "b"]);
        let json = serde_json::to_string(&a.without_tags()).unwrap();
        assert_eq!(json, r#"{"created_at":42,"message":"msg"}"#);
    }

    #[test]
    fn test_for_client_scales_to_millis() {
        let a = Annotation::with_timestamp("msg", 42).tags(["a", "b"]);
        let shown = a.for_client("b");
        assert_eq!(shown.created_at, 42_000);
        assert_eq!(shown.tags, vec!["b"]);
    }

    #[test]
    fn test_for_client_saturates_huge_timestamps() {
        let shown = Annotation::with_timestamp("far", i64::MAX / 100).for_client("t");
        assert_eq!(shown.created_at, i64::MAX);

        let shown = Annotation::with_timestamp("far", i64::MIN / 100).for_client("t");
        assert_eq!(shown.created_at, i64::MIN);
    }

    #[test]
    fn test_deserialize_without_created_at() {
        let a: Annotation = serde_json::from_str(r#"{"message":"m","tags":["x"]}"#).unwrap();
        assert_eq!(a.created_at, 0);
        assert_eq!(a.tags, vec!["x"]);
    }

    #[test]
    fn test_posts_shape() {
        let posts = Posts::from(vec![Annotation::with_timestamp("m", 1).for_client("t")]);
        let json = serde_json::to_string(&posts).unwrap();
        assert_eq!(json, r#"{"posts":[{"created_at":1000,"message":"m","tags":["t"]}]}"#);
    }
}
