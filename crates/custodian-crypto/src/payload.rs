//! Value types produced and consumed by the cipher engine.
//!
//! Encrypted payloads are a tagged enum discriminated by `algorithm`, and
//! every payload carries `encrypted: true` on the wire. [`StoredValue`] is
//! the single place where a value read back from storage is classified as
//! ciphertext or plaintext.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::key_type::KeyType;

/// Wire marker that always serializes as `true`.
///
/// Deserializing `false` is an error, so a payload object cannot claim to be
/// ciphertext and plaintext at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EncryptedFlag;

impl Serialize for EncryptedFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for EncryptedFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if bool::deserialize(deserializer)? {
            Ok(Self)
        } else {
            Err(D::Error::custom("encrypted payload must carry `encrypted: true`"))
        }
    }
}

/// How the plaintext bytes should be interpreted after decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8 text.
    Utf8,
    /// Raw bytes.
    Buffer,
    /// A JSON document serialized to UTF-8 before encryption.
    Json,
}

/// AES-256-GCM ciphertext with detached IV and tag, all hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricPayload {
    encrypted: EncryptedFlag,
    /// Key type the data was sealed with.
    pub key_type: KeyType,
    /// 96-bit nonce, hex.
    pub iv: String,
    /// 128-bit authentication tag, hex.
    pub auth_tag: String,
    /// Ciphertext without the tag, hex.
    pub data: String,
    /// Plaintext interpretation.
    pub encoding: Encoding,
}

impl SymmetricPayload {
    pub(crate) fn new(
        key_type: KeyType,
        iv: String,
        auth_tag: String,
        data: String,
        encoding: Encoding,
    ) -> Self {
        Self {
            encrypted: EncryptedFlag,
            key_type,
            iv,
            auth_tag,
            data,
            encoding,
        }
    }
}

/// RSA-OAEP ciphertext, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsymmetricPayload {
    encrypted: EncryptedFlag,
    /// Ciphertext, standard base64.
    pub data: String,
}

impl AsymmetricPayload {
    pub(crate) fn new(data: String) -> Self {
        Self {
            encrypted: EncryptedFlag,
            data,
        }
    }
}

/// Any encrypted value, tagged by algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum EncryptedPayload {
    /// Envelope-encrypted with a data key.
    #[serde(rename = "aes-256-gcm")]
    Symmetric(SymmetricPayload),
    /// Encrypted to the store's RSA public key.
    #[serde(rename = "rsa")]
    Asymmetric(AsymmetricPayload),
}

impl EncryptedPayload {
    /// Algorithm name as written on the wire.
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Symmetric(_) => "aes-256-gcm",
            Self::Asymmetric(_) => "rsa",
        }
    }

    /// Serialize to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Internal`] if serialization fails.
    pub fn to_value(&self) -> CryptoResult<Value> {
        serde_json::to_value(self).map_err(|e| CryptoError::Internal(e.to_string()))
    }

    /// Parse the JSON text form written by
    /// [`to_json_string`](Self::to_json_string).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionError`] if `text` is not a
    /// well-formed payload.
    pub fn from_json_text(text: &str) -> CryptoResult<Self> {
        serde_json::from_str(text).map_err(malformed).and_then(parse_payload)
    }

    /// Serialize to JSON text, the form stored in text columns.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Internal`] if serialization fails.
    pub fn to_json_string(&self) -> CryptoResult<String> {
        serde_json::to_string(self).map_err(|e| CryptoError::Internal(e.to_string()))
    }
}

impl From<SymmetricPayload> for EncryptedPayload {
    fn from(p: SymmetricPayload) -> Self {
        Self::Symmetric(p)
    }
}

impl From<AsymmetricPayload> for EncryptedPayload {
    fn from(p: AsymmetricPayload) -> Self {
        Self::Asymmetric(p)
    }
}

/// A value read back from storage, classified once.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    /// Ciphertext that must be decrypted.
    Encrypted(EncryptedPayload),
    /// Historical or never-encrypted data; used as is.
    Plain(Value),
}

impl StoredValue {
    /// Classify a stored JSON value.
    ///
    /// Objects carrying `encrypted: true` are parsed as payloads. Everything
    /// else is plain, including strings whose text happens to look like a
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionError`] if a value claims to be
    /// encrypted but is not a well-formed payload.
    pub fn classify(value: &Value) -> CryptoResult<Self> {
        if is_encrypted_marker(value) {
            return parse_payload(value.clone()).map(Self::Encrypted);
        }

        Ok(Self::Plain(value.clone()))
    }
}

fn is_encrypted_marker(value: &Value) -> bool {
    matches!(value.get("encrypted"), Some(Value::Bool(true)))
}

fn parse_payload(value: Value) -> CryptoResult<EncryptedPayload> {
    serde_json::from_value(value).map_err(malformed)
}

fn malformed(e: serde_json::Error) -> CryptoError {
    CryptoError::DecryptionError(format!("malformed encrypted payload: {e}"))
}

/// Decrypted data, typed by the payload's encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Plaintext {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Structured JSON value.
    Json(Value),
}

impl Plaintext {
    /// Convert to a JSON value. Bytes become standard base64 text.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Text(s) => Value::String(s),
            Self::Bytes(b) => {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            },
            Self::Json(v) => v,
        }
    }
}

/// Hash algorithm recorded in a [`HashRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA-256 over input then salt.
    #[serde(rename = "sha256")]
    Sha256,
    /// PBKDF2-HMAC-SHA256 with a recorded iteration count.
    #[serde(rename = "pbkdf2-sha256")]
    Pbkdf2Sha256,
}

/// A salted hash with the parameters needed to verify it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    /// 64-char hex digest.
    pub hash: String,
    /// Salt, hex.
    pub salt: String,
    /// How `hash` was computed.
    pub algorithm: HashAlgorithm,
    /// PBKDF2 iteration count; absent for plain SHA-256.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

/// Output of password-based key derivation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    salt: Vec<u8>,
    #[zeroize(skip)]
    iterations: u32,
}

impl DerivedKey {
    pub(crate) fn new(key: Vec<u8>, salt: Vec<u8>, iterations: u32) -> Self {
        Self {
            key,
            salt,
            iterations,
        }
    }

    /// Derived key bytes (sensitive).
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Derived key as hex (sensitive).
    #[must_use]
    pub fn key_hex(&self) -> String {
        hex::encode(&self.key)
    }

    /// Salt used for derivation.
    #[must_use]
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Salt as hex.
    #[must_use]
    pub fn salt_hex(&self) -> String {
        hex::encode(&self.salt)
    }

    /// Iteration count.
    #[must_use]
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Always `"pbkdf2-sha256"`.
    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        "pbkdf2-sha256"
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("salt", &self.salt_hex())
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}
