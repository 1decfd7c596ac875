//! Storage error types
//!
//! Defines all errors that can occur in the storage layer.

use thiserror::Error;

/// Errors that can occur in an annotation store
#[derive(Error, Debug)]
pub enum StorageError {
    /// Storage configuration string is malformed or names an unknown backend
    #[error("Invalid storage config: {0}")]
    Config(String),

    /// Backend could not be opened or reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// A write or scan failed mid-flight
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization/deserialization of a stored record failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timestamp cannot be encoded as a bucket key
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Store was already closed
    #[error("Store is closed")]
    Closed,

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
