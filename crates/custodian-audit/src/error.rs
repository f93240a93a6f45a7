//! Audit-related error types.

use custodian_crypto::CryptoError;
use custodian_storage::StorageError;
use thiserror::Error;

/// Why a write was abandoned.
#[derive(Debug, Error)]
pub enum StoreFailure {
    /// The database rejected a statement or could not be reached.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Payload encryption failed before anything was written.
    #[error(transparent)]
    Encryption(#[from] CryptoError),
}

/// Errors that can occur with audit logging.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The entry was not persisted. The transaction was rolled back.
    #[error("Failed to store audit log")]
    StoreFailed(#[source] StoreFailure),

    /// A read query failed or returned undecodable rows.
    #[error("Failed to retrieve audit logs")]
    RetrievalFailed(#[source] StorageError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl AuditError {
    pub(crate) fn store(cause: impl Into<StoreFailure>) -> Self {
        Self::StoreFailed(cause.into())
    }
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
