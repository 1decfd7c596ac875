//! PostgreSQL Store - networked backend, one document row per annotation
//!
//! Annotations are stored once, with their tag list as a `TEXT[]` column.
//! Range queries use the `created_at` B-tree index and unnest the tag array,
//! so an annotation listing a tag twice matches twice, the same as in the
//! local store.
//!
//! Connection string: `<host:port>/<db-name>`. Credentials come from the
//! usual `PGUSER` / `PGPASSWORD` environment variables. The database is
//! created on first connect and dropped by `cleanup()`.

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::key;
use crate::storage::types::{Annotation, TagStats};
use crate::storage::{parse_network_options, AnnotationStore};

const MAINTENANCE_DB: &str = "postgres";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS annotations (
        id BIGSERIAL PRIMARY KEY,
        created_at BIGINT NOT NULL,
        message TEXT NOT NULL,
        tags TEXT[] NOT NULL
    );
    CREATE INDEX IF NOT EXISTS annotations_created_at ON annotations (created_at);
    CREATE INDEX IF NOT EXISTS annotations_tags ON annotations USING GIN (tags);
";

/// Where to connect, parsed from `<host:port>/<db-name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
}

impl PostgresTarget {
    pub fn parse(options: &str) -> StorageResult<Self> {
        let (host, port, database) = parse_network_options("postgres", options)?;

        Ok(Self {
            host,
            port,
            database,
            user: std::env::var("PGUSER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("PGPASSWORD").ok(),
        })
    }

    fn config(&self, dbname: &str) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(dbname);
        if let Some(password) = &self.password {
            config.password(password);
        }
        config
    }

    fn addr(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// A live client and the task driving its connection
struct Session {
    client: Client,
    connection: JoinHandle<()>,
}

impl Session {
    async fn connect(target: &PostgresTarget, dbname: &str) -> StorageResult<Self> {
        let (client, connection) = target
            .config(dbname)
            .connect(NoTls)
            .await
            .map_err(|e| StorageError::Connection(format!("{}: {}", target.addr(), e)))?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self { client, connection })
    }

    fn shutdown(self) {
        drop(self.client);
        self.connection.abort();
    }
}

/// Networked annotation store
pub struct PostgresStore {
    target: PostgresTarget,
    /// None once closed
    session: RwLock<Option<Session>>,
}

impl PostgresStore {
    /// Connect, creating the database and schema if missing
    pub async fn connect(target: PostgresTarget) -> StorageResult<Self> {
        Self::ensure_database(&target).await?;

        let session = Session::connect(&target, &target.database).await?;
        session
            .client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| StorageError::Connection(format!("{}: {}", target.addr(), e)))?;

        tracing::info!(addr = %target.addr(), "Connected to PostgreSQL annotation store");

        Ok(Self {
            target,
            session: RwLock::new(Some(session)),
        })
    }

    async fn ensure_database(target: &PostgresTarget) -> StorageResult<()> {
        let admin = Session::connect(target, MAINTENANCE_DB).await?;

        let result = async {
            let exists = admin
                .client
                .query_opt(
                    "SELECT 1 FROM pg_database WHERE datname = $1",
                    &[&target.database],
                )
                .await?
                .is_some();

            if !exists {
                // Name is restricted to [A-Za-z0-9_] by parse_network_options.
                admin
                    .client
                    .batch_execute(&format!("CREATE DATABASE \"{}\"", target.database))
                    .await?;
                tracing::info!(database = %target.database, "Created PostgreSQL database");
            }
            Ok::<_, tokio_postgres::Error>(())
        }
        .await;

        admin.shutdown();
        result.map_err(|e| StorageError::Connection(format!("{}: {}", target.addr(), e)))
    }

    async fn session(&self) -> StorageResult<RwLockReadGuard<'_, Session>> {
        let guard = self.session.read().await;
        RwLockReadGuard::try_map(guard, |session| session.as_ref())
            .map_err(|_| StorageError::Closed)
    }

    pub fn target(&self) -> &PostgresTarget {
        &self.target
    }
}

#[async_trait]
impl AnnotationStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn add(&self, annotation: &Annotation) -> StorageResult<()> {
        if annotation.tags.is_empty() {
            tracing::debug!("Annotation without tags not stored");
            return Ok(());
        }
        key::check_timestamp(annotation.created_at)?;

        let session = self.session().await?;
        session
            .client
            .execute(
                "INSERT INTO annotations (created_at, message, tags) VALUES ($1, $2, $3)",
                &[&annotation.created_at, &annotation.message, &annotation.tags],
            )
            .await
            .map_err(|e| {
                tracing::error!("Saving annotation failed: {}", e);
                StorageError::from(e)
            })?;
        Ok(())
    }

    async fn range_for_tag(
        &self,
        tag: &str,
        range_secs: i64,
        until_secs: i64,
    ) -> StorageResult<Vec<Annotation>> {
        let start = until_secs.saturating_sub(range_secs);

        let session = self.session().await?;
        let rows = session
            .client
            .query(
                "SELECT a.created_at, a.message
                 FROM annotations a, unnest(a.tags) AS t(tag)
                 WHERE t.tag = $1 AND a.created_at BETWEEN $2 AND $3
                 ORDER BY a.created_at, a.id",
                &[&tag, &start, &until_secs],
            )
            .await
            .map_err(|e| {
                tracing::error!(tag = %tag, "Range query failed: {}", e);
                StorageError::from(e)
            })?;

        rows.iter()
            .map(|row| -> StorageResult<Annotation> {
                let created_at: i64 = row.try_get(0)?;
                let message: String = row.try_get(1)?;
                Ok(Annotation::with_timestamp(message, created_at).for_client(tag))
            })
            .collect()
    }

    async fn count_for_tag(&self, tag: &str) -> StorageResult<u64> {
        let session = self.session().await?;
        let row = session
            .client
            .query_one(
                "SELECT COUNT(*) FROM annotations a, unnest(a.tags) AS t(tag) WHERE t.tag = $1",
                &[&tag],
            )
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    async fn all_tags(&self) -> StorageResult<BTreeSet<String>> {
        let session = self.session().await?;
        let rows = session
            .client
            .query("SELECT DISTINCT unnest(tags) FROM annotations", &[])
            .await?;

        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(StorageError::from))
            .collect()
    }

    async fn tag_stats(&self) -> StorageResult<TagStats> {
        let session = self.session().await?;
        let rows = session
            .client
            .query(
                "SELECT t.tag, COUNT(*)
                 FROM annotations a, unnest(a.tags) AS t(tag)
                 GROUP BY t.tag",
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| -> StorageResult<(String, u64)> {
                let tag: String = row.try_get(0)?;
                let count: i64 = row.try_get(1)?;
                Ok((tag, count as u64))
            })
            .collect()
    }

    async fn close(&self) {
        if let Some(session) = self.session.write().await.take() {
            session.shutdown();
            tracing::info!(addr = %self.target.addr(), "Closed PostgreSQL annotation store");
        }
    }

    async fn cleanup(&self) -> StorageResult<()> {
        self.close().await;

        let admin = Session::connect(&self.target, MAINTENANCE_DB).await?;
        let result = admin
            .client
            .batch_execute(&format!(
                "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
                self.target.database
            ))
            .await;
        admin.shutdown();
        result?;

        tracing::info!(database = %self.target.database, "Dropped PostgreSQL database");
        Ok(())
    }
}
