//! Prelude module - commonly used types for convenient import.
//!
//! Use `use custodian_crypto::prelude::*;` to import all essential types.

// Errors
pub use crate::{CryptoError, CryptoResult};

// Lifecycle
pub use crate::{EncryptionConfig, EncryptionManager};

// Keys
pub use crate::{IntoKeyType, KeyType};

// Payloads
pub use crate::{EncryptedPayload, Plaintext, StoredValue};

// Health
pub use crate::IntegrityReport;
