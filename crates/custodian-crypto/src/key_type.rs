//! Logical key names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CryptoError, CryptoResult};

/// The logical purpose a symmetric key serves.
///
/// Each type owns exactly one key in the store. The master key is generated
/// and persisted like the others; data keys are not derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Root of the hierarchy.
    Master,
    /// Audit trail payloads.
    Audit,
    /// Personally identifiable information.
    Pii,
    /// Session blobs.
    Session,
    /// Arbitrary record metadata.
    Metadata,
}

impl KeyType {
    /// Every key type, in the order the store loads them.
    pub const ALL: [Self; 5] = [
        Self::Master,
        Self::Audit,
        Self::Pii,
        Self::Session,
        Self::Metadata,
    ];

    /// Lower-case name used in payloads and key file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Audit => "audit",
            Self::Pii => "pii",
            Self::Session => "session",
            Self::Metadata => "metadata",
        }
    }

    /// File name of this key inside the key directory.
    #[must_use]
    pub fn file_name(self) -> String {
        format!("{}.key", self.as_str())
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(Self::Master),
            "audit" => Ok(Self::Audit),
            "pii" => Ok(Self::Pii),
            "session" => Ok(Self::Session),
            "metadata" => Ok(Self::Metadata),
            other => Err(CryptoError::InvalidKeyType(other.to_string())),
        }
    }
}

/// Anything that names a key type: the enum itself or its string form.
///
/// String forms are validated at the call, so an unknown name surfaces as
/// [`CryptoError::InvalidKeyType`] from the operation that received it.
pub trait IntoKeyType {
    /// Resolve to a [`KeyType`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyType`] for unknown names.
    fn into_key_type(self) -> CryptoResult<KeyType>;
}

impl IntoKeyType for KeyType {
    fn into_key_type(self) -> CryptoResult<KeyType> {
        Ok(self)
    }
}

impl IntoKeyType for &str {
    fn into_key_type(self) -> CryptoResult<KeyType> {
        self.parse()
    }
}

impl IntoKeyType for &String {
    fn into_key_type(self) -> CryptoResult<KeyType> {
        self.parse()
    }
}

impl IntoKeyType for String {
    fn into_key_type(self) -> CryptoResult<KeyType> {
        self.parse()
    }
}
