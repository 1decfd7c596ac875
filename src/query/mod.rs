//! Annotation queries
//!
//! - **Coordinator**: multi-tag fan-out over per-tag range scans, and the
//!   separate "all" mode
//! - **Error**: failures that carry the partial result gathered so far
//!
//! # Example
//!
//! ```rust,ignore
//! use annotations::query::get_posts;
//!
//! let now = chrono::Utc::now().timestamp();
//! let posts = get_posts(store.as_ref(), &["deploy", "incident"], 3600, now).await?;
//! ```

mod coordinator;
mod error;

pub use coordinator::{get_all_posts, get_posts, PostsQuery, DEFAULT_RANGE_SECS};
pub use error::{QueryError, QueryResult};
