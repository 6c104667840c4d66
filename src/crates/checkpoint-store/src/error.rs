//! Error types for storage-tier operations

use thiserror::Error;

/// Result type for storage-tier operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a fast-tier cache or durable document store backend
///
/// The checkpoint core propagates these verbatim; it never retries them.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Document (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQL backend error
    #[error("SQL error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A filter, sort or index referenced something the backend cannot express
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}
