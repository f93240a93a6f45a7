//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// An operation needing key material ran before `initialize()` or after `close()`.
    #[error("encryption manager is not initialized")]
    NotInitialized,

    /// Unknown logical key name.
    #[error("invalid key type: {0}")]
    InvalidKeyType(String),

    /// AEAD tag did not verify (tampered data or wrong key).
    #[error("authentication failed: ciphertext or tag does not verify")]
    AuthenticationFailed,

    /// Malformed payload (bad hex, wrong IV length, unusable plaintext).
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Encryption failed inside the cipher.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// I/O error (e.g. reading/writing key files).
    #[error("I/O error: {0}")]
    IoError(String),

    /// A key file exists but its contents are unusable.
    #[error("invalid key file {path}: {reason}")]
    InvalidKeyFile {
        /// Path of the offending file.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// Plaintext is larger than the RSA modulus allows.
    #[error("payload too large for asymmetric encryption: max {max} bytes, got {actual}")]
    PayloadTooLarge {
        /// Largest plaintext accepted.
        max: usize,
        /// Size that was supplied.
        actual: usize,
    },

    /// A caller-supplied parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Internal failure (poisoned lock, serializer failure).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
