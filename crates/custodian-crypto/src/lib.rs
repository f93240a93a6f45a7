//! Custodian Crypto - Key hierarchy and encryption for the compliance core.
//!
//! This crate provides:
//! - A file-persisted key store: one AES-256 data key per [`KeyType`] plus an
//!   RSA-2048 pair
//! - A stateless [`CipherEngine`]: AES-256-GCM, RSA-OAEP, salted SHA-256,
//!   PBKDF2, HMAC-SHA256 and secure random tokens
//! - The [`EncryptionManager`] façade, which owns the key lifecycle and
//!   exposes typed encrypt/decrypt by key type
//!
//! # Example
//!
//! ```no_run
//! use custodian_crypto::{EncryptionConfig, EncryptionManager, KeyType};
//! use serde_json::json;
//!
//! let manager = EncryptionManager::new(
//!     EncryptionConfig::new("/var/lib/custodian/keys").with_signing_secret(b"secret".to_vec()),
//! );
//! manager.initialize()?;
//!
//! let sealed = manager.encrypt(&json!("card ending 4242"), KeyType::Pii)?;
//! if let Some(payload) = sealed {
//!     let opened = manager.decrypt(&payload.to_value()?, KeyType::Pii)?;
//!     assert_eq!(opened, json!("card ending 4242"));
//! }
//! # Ok::<(), custodian_crypto::CryptoError>(())
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod cipher;
mod error;
mod integrity;
pub mod key_store;
mod key_type;
mod manager;
mod payload;

pub use cipher::CipherEngine;
pub use error::{CryptoError, CryptoResult};
pub use integrity::{IntegrityCheck, IntegrityReport};
pub use key_store::{AsymmetricKeyPair, KeyMaterial, KeyStore};
pub use key_type::{IntoKeyType, KeyType};
pub use manager::{
    AUDIT_ENCRYPTED_FIELDS, AlgorithmInfo, EncryptionConfig, EncryptionManager, EncryptionStats,
};
pub use payload::{
    AsymmetricPayload, DerivedKey, Encoding, EncryptedPayload, HashAlgorithm, HashRecord,
    Plaintext, StoredValue, SymmetricPayload,
};
