//! Annotation storage
//!
//! This module provides the time-indexed tag storage engine and the trait
//! that lets it be swapped for another backend:
//!
//! - **types**: Core data structures (Annotation, Posts, TagStats)
//! - **key**: Chronologically sortable bucket keys and scan bounds
//! - **local**: Embedded SQLite file store, one ordered bucket per tag
//! - **rethinkdb**: Networked document store, speaking ReQL via **reql**
//! - **postgres**: Networked store, one document row per annotation
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Annotation → for each tag: (time key + seq, annotation without tags) → one transaction
//!
//! Read Path:
//!   (tag, range, until) → seek to start key → walk while key ≤ end second → scale to ms
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use annotations::storage::{self, Annotation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = storage::open("local:/tmp/annotations.db").await?;
//!
//!     store.add(&Annotation::new("deployed web v2").tags(["deploy", "web"])).await?;
//!
//!     let now = chrono::Utc::now().timestamp();
//!     let deploys = store.range_for_tag("deploy", 3600, now).await?;
//!     println!("{} deploys in the last hour", deploys.len());
//!
//!     store.close().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod key;
pub mod local;
pub mod postgres;
pub mod reql;
pub mod rethinkdb;
pub mod types;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

pub use error::{StorageError, StorageResult};
pub use local::LocalStore;
pub use postgres::{PostgresStore, PostgresTarget};
pub use rethinkdb::{RethinkStore, RethinkTarget};
pub use types::{Annotation, Posts, TagStats};

/// Capability set shared by every storage backend
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Short backend name, used in logs
    fn backend(&self) -> &'static str;

    /// Store `annotation` under each of its tags, atomically across tags.
    async fn add(&self, annotation: &Annotation) -> StorageResult<()>;

    /// Entries of `tag` whose timestamp lies in `[until - range, until]`,
    /// oldest first, `created_at` in milliseconds, tagged with `tag` only.
    async fn range_for_tag(
        &self,
        tag: &str,
        range_secs: i64,
        until_secs: i64,
    ) -> StorageResult<Vec<Annotation>>;

    /// Number of entries stored under `tag`
    async fn count_for_tag(&self, tag: &str) -> StorageResult<u64>;

    /// Every tag with at least one stored entry
    async fn all_tags(&self) -> StorageResult<BTreeSet<String>>;

    /// Per-tag counts, recomputed on every call
    async fn tag_stats(&self) -> StorageResult<TagStats> {
        let mut stats = TagStats::new();
        for tag in self.all_tags().await? {
            let count = self.count_for_tag(&tag).await?;
            stats.insert(tag, count);
        }
        Ok(stats)
    }

    /// Release the underlying resource. Safe to call more than once.
    async fn close(&self);

    /// Close, then irreversibly delete all persisted data.
    async fn cleanup(&self) -> StorageResult<()>;
}

/// Split `<host:port>/<db-name>` for the networked backends.
///
/// The database name is limited to `[A-Za-z0-9_]` so it can be quoted into
/// DDL safely.
pub(crate) fn parse_network_options(
    backend: &str,
    options: &str,
) -> StorageResult<(String, u16, String)> {
    let invalid = || {
        StorageError::Config(format!(
            "invalid {} connection string: {}  expected format: <host:port>/<dbname>",
            backend, options
        ))
    };

    let parts: Vec<&str> = options.split('/').collect();
    if parts.len() != 2 {
        return Err(invalid());
    }

    let (host, port) = parts[0].rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    if host.is_empty() {
        return Err(invalid());
    }

    let database = parts[1];
    let valid_name = !database.is_empty()
        && database
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        return Err(StorageError::Config(format!(
            "invalid {} database name: \"{}\"",
            backend, database
        )));
    }

    Ok((host.to_string(), port, database.to_string()))
}

/// Open a store from a `"<backend>:<options>"` config string.
///
/// - `local:<file-path>`
/// - `rethinkdb:<host:port>/<db-name>`
/// - `postgres:<host:port>/<db-name>`
pub async fn open(config: &str) -> StorageResult<Arc<dyn AnnotationStore>> {
    let (backend, options) = config.split_once(':').ok_or_else(|| {
        StorageError::Config(format!(
            "\"{}\" is not of the form \"type:options\"",
            config
        ))
    })?;

    match backend {
        "local" => {
            let store = LocalStore::open(options)?;
            Ok(Arc::new(store))
        }
        "rethinkdb" => {
            let target = RethinkTarget::parse(options)?;
            let store = RethinkStore::connect(target).await?;
            Ok(Arc::new(store))
        }
        "postgres" => {
            let target = PostgresTarget::parse(options)?;
            let store = PostgresStore::connect(target).await?;
            Ok(Arc::new(store))
        }
        other => Err(StorageError::Config(format!(
            "type \"{}\" not supported",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_rejects_missing_colon() {
        for config in ["bogus", "INVALID", ""] {
            let err = open(config).await.err().unwrap();
            assert!(matches!(err, StorageError::Config(_)), "{}: {}", config, err);
        }
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_backend() {
        let err = open("INVALID:1234").await.err().unwrap();
        assert!(matches!(err, StorageError::Config(ref msg) if msg.contains("INVALID")));
    }

    #[tokio::test]
    async fn test_open_rejects_bad_postgres_options() {
        let err = open("postgres:localhost:5432").await.err().unwrap();
        assert!(matches!(err, StorageError::Config(_)));

        let err = open("postgres:localhost:5432/a/b").await.err().unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn test_open_rejects_bad_rethinkdb_options() {
        for config in [
            "rethinkdb:localhost:28015",
            "rethinkdb:localhost:28015/a/b",
            "rethinkdb:localhost/annotations",
            "rethinkdb:localhost:28015/bad-name",
        ] {
            let err = open(config).await.err().unwrap();
            assert!(matches!(err, StorageError::Config(_)), "{}: {}", config, err);
        }
    }

    #[tokio::test]
    async fn test_open_rethinkdb_unreachable_is_connection_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = open(&format!("rethinkdb:{}/annotations", addr))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::Connection(_)), "{}", err);
    }

    #[test]
    fn test_parse_network_options() {
        let (host, port, db) = parse_network_options("rethinkdb", "localhost:28015/annotations").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 28015);
        assert_eq!(db, "annotations");

        let err = parse_network_options("rethinkdb", "localhost:28015/x;y").unwrap_err();
        assert!(matches!(err, StorageError::Config(ref msg) if msg.contains("rethinkdb")));
    }

    #[tokio::test]
    async fn test_open_local() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("annotations.db");

        let store = open(&format!("local:{}", path.display())).await.unwrap();
        assert_eq!(store.backend(), "local");
        assert!(store.all_tags().await.unwrap().is_empty());
        store.close().await;
    }

    #[tokio::test]
    async fn test_open_local_unwritable_path() {
        let err = open("local:/proc/123.db").await.err().unwrap();
        assert!(matches!(err, StorageError::Connection(_)), "{}", err);
    }

    #[tokio::test]
    async fn test_default_tag_stats_matches_counts() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("stats.db")).unwrap();

        store
            .add(&Annotation::with_timestamp("one", 100).tags(["a", "b"]))
            .await
            .unwrap();
        store
            .add(&Annotation::with_timestamp("two", 200).tag("b"))
            .await
            .unwrap();

        // Exercise the provided trait method, not the backend override.
        struct Counting<'a>(&'a LocalStore);

        #[async_trait]
        impl AnnotationStore for Counting<'_> {
            fn backend(&self) -> &'static str {
                "counting"
            }
            async fn add(&self, a: &Annotation) -> StorageResult<()> {
                self.0.add(a).await
            }
            async fn range_for_tag(
                &self,
                tag: &str,
                range_secs: i64,
                until_secs: i64,
            ) -> StorageResult<Vec<Annotation>> {
                self.0.range_for_tag(tag, range_secs, until_secs).await
            }
            async fn count_for_tag(&self, tag: &str) -> StorageResult<u64> {
                self.0.count_for_tag(tag).await
            }
            async fn all_tags(&self) -> StorageResult<BTreeSet<String>> {
                self.0.all_tags().await
            }
            async fn close(&self) {}
            async fn cleanup(&self) -> StorageResult<()> {
                Ok(())
            }
        }

        let stats = Counting(&store).tag_stats().await.unwrap();
        assert_eq!(stats.get("a"), Some(&1));
        assert_eq!(stats.get("b"), Some(&2));
        assert_eq!(stats, store.tag_stats().await.unwrap());
    }
}
