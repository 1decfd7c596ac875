//! Query Coordinator
//!
//! Fans a multi-tag request out into one range scan per tag and
//! concatenates the results in request order. No cross-tag de-duplication:
//! an annotation filed under two requested tags appears once per tag, each
//! time carrying only the tag that produced it.
//!
//! # Execution
//!
//! ```text
//! Ranged: [t1, t2] → range_for_tag(t1) ++ range_for_tag(t2)
//! All:    all_tags() → range_for_tag(t, now, now) for every t
//! ```

use crate::query::error::{QueryError, QueryResult};
use crate::storage::{AnnotationStore, Posts};

/// Default lookback window in seconds
pub const DEFAULT_RANGE_SECS: i64 = 3600;

/// A resolved annotations query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostsQuery {
    /// Requested tags within `[until - range, until]`
    Ranged {
        tags: Vec<String>,
        range_secs: i64,
        until_secs: i64,
    },
    /// Every tag, no time filter
    All,
}

impl PostsQuery {
    /// Run against `store`; `now` is only used by [`PostsQuery::All`].
    pub async fn execute(&self, store: &dyn AnnotationStore, now: i64) -> QueryResult<Posts> {
        match self {
            PostsQuery::Ranged {
                tags,
                range_secs,
                until_secs,
            } => get_posts(store, tags, *range_secs, *until_secs).await,
            PostsQuery::All => get_all_posts(store, now).await,
        }
    }
}

/// One scan per tag, in the order given, results concatenated.
///
/// Stops at the first failing tag; the error carries what was gathered so far.
pub async fn get_posts<S: AsRef<str>>(
    store: &dyn AnnotationStore,
    tags: &[S],
    range_secs: i64,
    until_secs: i64,
) -> QueryResult<Posts> {
    let mut posts = Vec::new();

    for tag in tags {
        let tag = tag.as_ref();
        match store.range_for_tag(tag, range_secs, until_secs).await {
            Ok(found) => posts.extend(found),
            Err(source) => {
                return Err(QueryError {
                    tag: tag.to_string(),
                    partial: posts,
                    source,
                })
            }
        }
    }

    Ok(Posts::from(posts))
}

/// "All" mode: every tag the store knows, looking back from `now` to the epoch.
pub async fn get_all_posts(store: &dyn AnnotationStore, now: i64) -> QueryResult<Posts> {
    let tags = store.all_tags().await.map_err(|source| QueryError {
        tag: "*".to_string(),
        partial: Vec::new(),
        source,
    })?;

    tracing::debug!(tag_count = tags.len(), "Listing annotations for all tags");

    let tags: Vec<String> = tags.into_iter().collect();
    get_posts(store, &tags, now, now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Annotation, LocalStore, StorageError};
    use tempfile::{tempdir, TempDir};

    async fn seeded_store(ts: i64) -> (LocalStore, TempDir) {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("query.db")).unwrap();

        for offset in [0, 5, 10] {
            store
                .add(&Annotation::with_timestamp("Test message", ts - offset).tag("tag1"))
                .await
                .unwrap();
            store
                .add(&Annotation::with_timestamp("Test message", ts - offset).tag("tag2"))
                .await
                .unwrap();
        }

        (store, dir)
    }

    #[tokio::test]
    async fn test_fan_out_counts() {
        let ts = chrono::Utc::now().timestamp();
        let (store, _dir) = seeded_store(ts).await;

        let both = get_posts(&store, &["tag1", "tag2"], 1000, ts).await.unwrap();
        assert_eq!(both.len(), 6);

        let both = get_posts(&store, &["tag1", "tag2"], 1000, ts - 5).await.unwrap();
        assert_eq!(both.len(), 4);

        let one = get_posts(&store, &["tag1"], 1000, ts).await.unwrap();
        let two = get_posts(&store, &["tag2"], 1000, ts).await.unwrap();
        assert_eq!(one.len() + two.len(), 6);
    }

    #[tokio::test]
    async fn test_results_follow_request_order() {
        let ts = chrono::Utc::now().timestamp();
        let (store, _dir) = seeded_store(ts).await;

        let posts = get_posts(&store, &["tag2", "tag1"], 1000, ts).await.unwrap();
        let tags: Vec<&str> = posts.posts.iter().map(|a| a.tags[0].as_str()).collect();
        assert_eq!(tags, vec!["tag2", "tag2", "tag2", "tag1", "tag1", "tag1"]);
    }

    #[tokio::test]
    async fn test_no_dedup_across_tags() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("dedup.db")).unwrap();
        let ts = chrono::Utc::now().timestamp();

        store
            .add(&Annotation::with_timestamp("both", ts).tags(["a", "b"]))
            .await
            .unwrap();

        let posts = get_posts(&store, &["a", "b"], 60, ts).await.unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts.posts[0].tags, vec!["a"]);
        assert_eq!(posts.posts[1].tags, vec!["b"]);
    }

    #[tokio::test]
    async fn test_unknown_and_empty_tags() {
        let ts = chrono::Utc::now().timestamp();
        let (store, _dir) = seeded_store(ts).await;

        let none: [&str; 0] = [];
        assert!(get_posts(&store, &none, 1000, ts).await.unwrap().is_empty());
        assert!(get_posts(&store, &["nonexistent"], 3600, ts).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_mode_ignores_range() {
        let ts = chrono::Utc::now().timestamp();
        let (store, _dir) = seeded_store(ts).await;
        store
            .add(&Annotation::with_timestamp("ancient", 86_400).tag("old"))
            .await
            .unwrap();

        let posts = PostsQuery::All.execute(&store, ts).await.unwrap();
        assert_eq!(posts.len(), 7);

        let ranged = PostsQuery::Ranged {
            tags: vec!["old".to_string()],
            range_secs: DEFAULT_RANGE_SECS,
            until_secs: ts,
        };
        assert!(ranged.execute(&store, ts).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_reports_tag() {
        let ts = chrono::Utc::now().timestamp();
        let (store, _dir) = seeded_store(ts).await;
        store.close().await;

        let err = get_posts(&store, &["tag1", "tag2"], 1000, ts).await.unwrap_err();
        assert_eq!(err.tag, "tag1");
        assert!(err.partial.is_empty());
        assert!(matches!(err.source, StorageError::Closed));

        let err = get_all_posts(&store, ts).await.unwrap_err();
        assert!(matches!(err.source, StorageError::Closed));
    }
}
