//! RethinkDB Store - networked backend, one document per annotation
//!
//! Documents are `{created_at, message, tags}` in an `annotations` table with a
//! secondary index on `created_at`. Range queries walk that index with
//! `between` and filter on tag membership. Tag counting happens client side,
//! one entry per occurrence, so the local store and this one agree on
//! duplicated tags.
//!
//! Connection string: `<host:port>/<db-name>`. The admin password, if any,
//! comes from `RETHINKDB_PASSWORD`. Database, table and index are created
//! on first connect; `cleanup()` drops the database.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tokio::sync::Mutex;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::key;
use crate::storage::reql::{Connection, Term};
use crate::storage::types::{Annotation, TagStats};
use crate::storage::{parse_network_options, AnnotationStore};

const TABLE: &str = "annotations";
const TIME_INDEX: &str = "created_at";

/// Where to connect, parsed from `<host:port>/<db-name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RethinkTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub auth_key: String,
}

impl RethinkTarget {
    pub fn parse(options: &str) -> StorageResult<Self> {
        let (host, port, database) = parse_network_options("rethinkdb", options)?;

        Ok(Self {
            host,
            port,
            database,
            auth_key: std::env::var("RETHINKDB_PASSWORD").unwrap_or_default(),
        })
    }

    fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn addr(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Stored document shape
#[derive(Debug, Deserialize)]
struct Document {
    // ReQL numbers are doubles on the wire
    created_at: f64,
    message: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<String>,
}

/// Networked annotation store
pub struct RethinkStore {
    target: RethinkTarget,
    /// None once closed
    conn: Mutex<Option<Connection>>,
}

impl RethinkStore {
    /// Connect, creating database, table and time index if missing
    pub async fn connect(target: RethinkTarget) -> StorageResult<Self> {
        let mut conn = Connection::connect(&target.socket_addr(), &target.auth_key).await?;

        if let Err(e) = Self::ensure_schema(&mut conn, &target.database).await {
            conn.shutdown().await;
            return Err(StorageError::Connection(format!("{}: {}", target.addr(), e)));
        }

        tracing::info!(addr = %target.addr(), "Connected to RethinkDB annotation store");

        Ok(Self {
            target,
            conn: Mutex::new(Some(conn)),
        })
    }

    async fn ensure_schema(conn: &mut Connection, database: &str) -> StorageResult<()> {
        let dbs = conn.run(Term::db_list()).await?;
        if !lists(&dbs, database) {
            conn.run(Term::db_create(database)).await?;
            tracing::info!(database = %database, "Created RethinkDB database");
        }

        let db = Term::db(database);
        let tables = conn.run(db.table_list()).await?;
        if !lists(&tables, TABLE) {
            conn.run(db.table_create(TABLE)).await?;
        }

        let table = db.table(TABLE);
        let indexes = conn.run(table.index_list()).await?;
        if !lists(&indexes, TIME_INDEX) {
            conn.run(table.index_create(TIME_INDEX)).await?;
        }
        conn.run(table.index_wait(TIME_INDEX)).await?;

        Ok(())
    }

    fn table(&self) -> Term {
        Term::db(&self.target.database).table(TABLE)
    }

    async fn run(&self, term: Term) -> StorageResult<Value> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;
        conn.run(term).await
    }

    async fn tag_lists(&self, term: Term) -> StorageResult<Vec<Vec<String>>> {
        rows(self.run(term).await?)
            .into_iter()
            .map(|row| -> StorageResult<Vec<String>> {
                Ok(serde_json::from_value::<TagList>(row)?.tags)
            })
            .collect()
    }

    pub fn target(&self) -> &RethinkTarget {
        &self.target
    }
}

/// Whether a list-returning admin query mentions `name`
fn lists(value: &Value, name: &str) -> bool {
    value
        .as_array()
        .map_or(false, |items| items.iter().any(|item| item.as_str() == Some(name)))
}

fn rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn occurrences(tags: &[String], tag: &str) -> usize {
    tags.iter().filter(|t| *t == tag).count()
}

#[async_trait]
impl AnnotationStore for RethinkStore {
    fn backend(&self) -> &'static str {
        "rethinkdb"
    }

    async fn add(&self, annotation: &Annotation) -> StorageResult<()> {
        if annotation.tags.is_empty() {
            tracing::debug!("Annotation without tags not stored");
            return Ok(());
        }
        key::check_timestamp(annotation.created_at)?;

        let document = json!({
            "created_at": annotation.created_at,
            "message": annotation.message,
            "tags": Term::array(&annotation.tags),
        });
        let result = self.run(self.table().insert(document)).await.map_err(|e| {
            tracing::error!("Saving annotation failed: {}", e);
            e
        })?;

        let errors = result.get("errors").and_then(Value::as_u64).unwrap_or(0);
        if errors > 0 {
            let first = result
                .get("first_error")
                .and_then(Value::as_str)
                .unwrap_or("insert failed");
            tracing::error!("Saving annotation failed: {}", first);
            return Err(StorageError::Transaction(first.to_string()));
        }
        Ok(())
    }

    async fn range_for_tag(
        &self,
        tag: &str,
        range_secs: i64,
        until_secs: i64,
    ) -> StorageResult<Vec<Annotation>> {
        let start = until_secs.saturating_sub(range_secs);
        if start > until_secs {
            return Ok(Vec::new());
        }

        let query = self
            .table()
            .between(start, until_secs, TIME_INDEX)
            .filter_contains("tags", tag);
        let found = self.run(query).await.map_err(|e| {
            tracing::error!(tag = %tag, "Range query failed: {}", e);
            e
        })?;

        let mut documents = rows(found)
            .into_iter()
            .map(|row| serde_json::from_value::<Document>(row).map_err(StorageError::from))
            .collect::<StorageResult<Vec<_>>>()?;
        documents.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));

        let mut list = Vec::new();
        for document in documents {
            for _ in 0..occurrences(&document.tags, tag) {
                list.push(
                    Annotation::with_timestamp(document.message.clone(), document.created_at as i64)
                        .for_client(tag),
                );
            }
        }
        Ok(list)
    }

    async fn count_for_tag(&self, tag: &str) -> StorageResult<u64> {
        let lists = self
            .tag_lists(self.table().filter_contains("tags", tag).pluck("tags"))
            .await?;
        Ok(lists.iter().map(|tags| occurrences(tags, tag) as u64).sum())
    }

    async fn all_tags(&self) -> StorageResult<BTreeSet<String>> {
        let lists = self.tag_lists(self.table().pluck("tags")).await?;
        Ok(lists.into_iter().flatten().collect())
    }

    async fn tag_stats(&self) -> StorageResult<TagStats> {
        let lists = self.tag_lists(self.table().pluck("tags")).await?;

        let mut stats = TagStats::new();
        for tag in lists.into_iter().flatten() {
            *stats.entry(tag).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.shutdown().await;
            tracing::info!(addr = %self.target.addr(), "Closed RethinkDB annotation store");
        }
    }

    async fn cleanup(&self) -> StorageResult<()> {
        let mut conn = match self.conn.lock().await.take() {
            Some(conn) => conn,
            None => Connection::connect(&self.target.socket_addr(), &self.target.auth_key).await?,
        };

        let result = async {
            let dbs = conn.run(Term::db_list()).await?;
            if lists(&dbs, &self.target.database) {
                conn.run(Term::db_drop(&self.target.database)).await?;
            }
            Ok::<_, StorageError>(())
        }
        .await;
        conn.shutdown().await;
        result?;

        tracing::info!(database = %self.target.database, "Dropped RethinkDB database");
        Ok(())
    }
}
