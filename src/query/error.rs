//! Query error types

use thiserror::Error;

use crate::storage::{Annotation, StorageError};

/// A per-tag scan failed part way through a multi-tag query
#[derive(Error, Debug)]
#[error("query for tag \"{tag}\" failed: {source}")]
pub struct QueryError {
    /// Tag whose scan failed
    pub tag: String,
    /// Posts gathered from the tags scanned before the failure. Incomplete.
    pub partial: Vec<Annotation>,
    #[source]
    pub source: StorageError,
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError {
            tag: "deploy".to_string(),
            partial: Vec::new(),
            source: StorageError::Closed,
        };
        assert_eq!(err.to_string(), "query for tag \"deploy\" failed: Store is closed");
    }
}
