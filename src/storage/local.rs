//! Local Store - embedded SQLite file with one ordered bucket per tag
//!
//! Every (tag, key) pair lives in a `WITHOUT ROWID` table whose primary key
//! is `(tag, key)`, so SQLite's clustered B-tree keeps each tag's entries
//! contiguous and sorted by key. A range query is a seek to the start key
//! followed by a forward walk, never a full scan.
//!
//! # Performance
//! - Add: O(t log n) for t tags, one transaction
//! - Range query: O(log n + k) where k = results
//! - Count: O(log n + k) over the tag's entries

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::key::{self, ScanBounds};
use crate::storage::types::{Annotation, TagStats};
use crate::storage::AnnotationStore;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS tag_buckets (
        tag TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (tag, key)
    ) WITHOUT ROWID;
";

/// Connection plus the write sequence, guarded together so the counter
/// only moves under the same lock as the write transaction.
struct LocalState {
    conn: Connection,
    /// Last sequence number handed out
    seq: u64,
}

/// Embedded, file-backed annotation store
pub struct LocalStore {
    path: PathBuf,
    /// None once closed (std::sync::Mutex because Connection is !Sync)
    state: Mutex<Option<LocalState>>,
}

impl LocalStore {
    /// Create or open the store file at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StorageError::Config(
                "local storage needs a file path".to_string(),
            ));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .and_then(|conn| conn.execute_batch(SCHEMA).map(|_| conn))
        .map_err(|e| StorageError::Connection(format!("{}: {}", path.display(), e)))?;

        tracing::info!(path = %path.display(), "Opened local annotation store");

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(Some(LocalState {
                conn,
                seq: initial_sequence(),
            })),
        })
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Option<LocalState>>> {
        self.state
            .lock()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire store lock: {}", e)))
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut LocalState) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut guard = self.lock()?;
        let state = guard.as_mut().ok_or(StorageError::Closed)?;
        f(state)
    }

    fn remove_files(&self) -> StorageResult<()> {
        let mut wal = self.path.clone().into_os_string();
        wal.push("-wal");
        let mut shm = self.path.clone().into_os_string();
        shm.push("-shm");

        for file in [self.path.clone(), PathBuf::from(wal), PathBuf::from(shm)] {
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Sequence numbers start at the open time in microseconds. They are never
/// persisted, but a restart still continues above the previous run's keys as
/// long as the clock moves forward.
fn initial_sequence() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}

#[async_trait]
impl AnnotationStore for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn add(&self, annotation: &Annotation) -> StorageResult<()> {
        if annotation.tags.is_empty() {
            tracing::debug!("Annotation without tags not stored");
            return Ok(());
        }

        let value = serde_json::to_string(&annotation.without_tags())?;

        self.with_state(|state| {
            let mut seq = state.seq;
            let tx = state.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO tag_buckets (tag, key, value) VALUES (?1, ?2, ?3)",
                )?;

                for tag in &annotation.tags {
                    seq += 1;
                    let key = key::bucket_key(annotation.created_at, seq)?;
                    stmt.execute(params![tag, key, value])?;
                }
            }
            tx.commit()?;

            state.seq = seq;
            Ok(())
        })
    }

    async fn range_for_tag(
        &self,
        tag: &str,
        range_secs: i64,
        until_secs: i64,
    ) -> StorageResult<Vec<Annotation>> {
        let bounds = ScanBounds::new(range_secs, until_secs);
        if bounds.is_empty() {
            return Ok(Vec::new());
        }

        self.with_state(|state| {
            let mut stmt = state.conn.prepare_cached(
                "SELECT key, value FROM tag_buckets
                 WHERE tag = ?1 AND key >= ?2
                 ORDER BY key",
            )?;
            let mut rows = stmt.query(params![tag, bounds.start()])?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                if bounds.past_end(&key) {
                    break;
                }

                let value: String = row.get(1)?;
                let stored: Annotation = serde_json::from_str(&value)?;
                out.push(stored.for_client(tag));
            }
            Ok(out)
        })
    }

    async fn count_for_tag(&self, tag: &str) -> StorageResult<u64> {
        self.with_state(|state| {
            let count: i64 = state.conn.query_row(
                "SELECT COUNT(*) FROM tag_buckets WHERE tag = ?1",
                params![tag],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    async fn all_tags(&self) -> StorageResult<BTreeSet<String>> {
        self.with_state(|state| {
            let mut stmt = state
                .conn
                .prepare_cached("SELECT DISTINCT tag FROM tag_buckets")?;
            let tags = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(tags)
        })
    }

    /// One grouped read, so every count comes from the same snapshot.
    async fn tag_stats(&self) -> StorageResult<TagStats> {
        self.with_state(|state| {
            let mut stmt = state
                .conn
                .prepare_cached("SELECT tag, COUNT(*) FROM tag_buckets GROUP BY tag")?;
            let stats = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<Result<TagStats, _>>()?;
            Ok(stats)
        })
    }

    async fn close(&self) {
        let state = match self.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                tracing::error!("Failed to close local store: {}", e);
                return;
            }
        };

        if let Some(state) = state {
            if let Err((_, e)) = state.conn.close() {
                tracing::warn!(path = %self.path.display(), "Error closing SQLite connection: {}", e);
            }
            tracing::info!(path = %self.path.display(), "Closed local annotation store");
        }
    }

    async fn cleanup(&self) -> StorageResult<()> {
        self.close().await;
        self.remove_files()?;
        tracing::info!(path = %self.path.display(), "Removed local annotation store");
        Ok(())
    }
}
