//! # Annotations
//!
//! A small annotation store for dashboards: clients PUT tagged, timestamped
//! messages and GET them back filtered by tag and time window. Per-tag
//! counts are exported as a Prometheus gauge.
//!
//! ## Modules
//!
//! - [`storage`]: Tag-indexed stores behind the [`AnnotationStore`] trait
//! - [`query`]: Multi-tag fan-out and "all" mode
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML + environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use annotations::storage::{self, Annotation, AnnotationStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = storage::open("local:/tmp/annotations.db").await?;
//!
//!     store
//!         .add(&Annotation::new("deployed v2").tags(["deploy", "web"]))
//!         .await?;
//!
//!     let now = chrono::Utc::now().timestamp();
//!     let posts = annotations::query::get_posts(store.as_ref(), &["deploy"], 3600, now).await?;
//!     println!("Found {} annotations", posts.len());
//!
//!     store.close().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Annotation, AnnotationStore, LocalStore, PostgresStore, Posts, RethinkStore, StorageError,
    StorageResult, TagStats,
};

pub use query::{get_all_posts, get_posts, PostsQuery, QueryError};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::Config;
