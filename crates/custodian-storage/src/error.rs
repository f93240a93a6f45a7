//! Storage error types.

/// Errors from relational store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Acquiring a connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A statement was rejected or failed to execute.
    #[error("query error: {0}")]
    Query(String),

    /// A returned row could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Anything else.
    #[error("storage error: {0}")]
    Internal(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
