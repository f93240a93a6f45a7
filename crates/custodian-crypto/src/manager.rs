//! Encryption manager: the façade over the key store and cipher engine.
//!
//! The manager owns the lifecycle of key material. Before
//! [`initialize`](EncryptionManager::initialize) and after
//! [`close`](EncryptionManager::close) every key-dependent operation fails
//! with [`CryptoError::NotInitialized`]. Hashing, HMAC and random helpers need
//! no stored keys and work in any state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cipher::{CipherEngine, DEFAULT_PBKDF2_ITERATIONS};
use crate::error::{CryptoError, CryptoResult};
use crate::integrity::{IntegrityCheck, IntegrityReport};
use crate::key_store::KeyStore;
use crate::key_type::{IntoKeyType, KeyType};
use crate::payload::{
    DerivedKey, Encoding, EncryptedPayload, HashRecord, Plaintext, StoredValue,
};

/// Record fields transformed by the audit helpers.
pub const AUDIT_ENCRYPTED_FIELDS: [&str; 3] = ["user_query", "final_response", "metadata"];

const INTEGRITY_SAMPLE: &str = "custodian-integrity-sample";

/// Construction parameters for [`EncryptionManager`].
#[derive(Clone)]
pub struct EncryptionConfig {
    /// Directory holding key files.
    pub key_directory: PathBuf,
    /// Default PBKDF2 iteration count for [`EncryptionManager::derive_key`].
    pub pbkdf2_iterations: u32,
    /// HMAC signing secret. A random per-process secret is used when absent.
    pub signing_secret: Option<Zeroizing<Vec<u8>>>,
}

impl EncryptionConfig {
    /// Config for the given key directory with defaults elsewhere.
    #[must_use]
    pub fn new(key_directory: impl Into<PathBuf>) -> Self {
        Self {
            key_directory: key_directory.into(),
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            signing_secret: None,
        }
    }

    /// Set the HMAC signing secret.
    #[must_use]
    pub fn with_signing_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.signing_secret = Some(Zeroizing::new(secret.into()));
        self
    }

    /// Set the default PBKDF2 iteration count.
    #[must_use]
    pub fn with_pbkdf2_iterations(mut self, iterations: u32) -> Self {
        self.pbkdf2_iterations = iterations;
        self
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key_directory", &self.key_directory)
            .field("pbkdf2_iterations", &self.pbkdf2_iterations)
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Algorithms in use, reported by [`EncryptionManager::encryption_stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmInfo {
    /// Data-key cipher.
    pub symmetric: String,
    /// Key-pair cipher.
    pub asymmetric: String,
    /// Content hash.
    pub hash: String,
    /// MAC.
    pub hmac: String,
    /// Password-based key derivation.
    pub kdf: String,
}

impl Default for AlgorithmInfo {
    fn default() -> Self {
        Self {
            symmetric: "aes-256-gcm".to_string(),
            asymmetric: "rsa-2048-oaep-sha256".to_string(),
            hash: "sha256".to_string(),
            hmac: "hmac-sha256".to_string(),
            kdf: "pbkdf2-sha256".to_string(),
        }
    }
}

/// Operational snapshot of the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionStats {
    /// Whether key material is loaded.
    pub initialized: bool,
    /// Algorithms in use.
    pub algorithms: AlgorithmInfo,
    /// Loaded key types; empty when uninitialized.
    pub keys: Vec<KeyType>,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// Typed encrypt/decrypt façade keyed by logical key type.
///
/// Share it behind an [`Arc`]; all methods take `&self`.
pub struct EncryptionManager {
    key_directory: PathBuf,
    engine: CipherEngine,
    store: RwLock<Option<Arc<KeyStore>>>,
}

impl EncryptionManager {
    /// Create an uninitialized manager.
    #[must_use]
    pub fn new(config: EncryptionConfig) -> Self {
        let engine = match config.signing_secret {
            Some(secret) => CipherEngine::new(secret.to_vec()),
            None => {
                warn!(
                    "No signing secret configured; using an ephemeral per-process secret. \
                     HMACs will not verify after restart"
                );
                CipherEngine::with_random_signing_key()
            },
        }
        .with_pbkdf2_iterations(config.pbkdf2_iterations);

        Self {
            key_directory: config.key_directory,
            engine,
            store: RwLock::new(None),
        }
    }

    /// Load or generate the key hierarchy. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the key store's error if any key file cannot be read, parsed,
    /// or written.
    pub fn initialize(&self) -> CryptoResult<()> {
        if self.is_initialized() {
            debug!("Encryption manager already initialized");
            return Ok(());
        }

        // Key generation runs outside the lock; a concurrent winner is kept.
        let store = KeyStore::initialize(&self.key_directory)?;

        let mut slot = self.store.write().unwrap_or_else(|e| {
            warn!("EncryptionManager lock poisoned, recovering");
            e.into_inner()
        });
        if slot.is_none() {
            *slot = Some(Arc::new(store));
            info!(
                directory = %self.key_directory.display(),
                "Encryption manager initialized"
            );
        }
        Ok(())
    }

    /// Whether key material is currently loaded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.store.read().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Drop key state. Idempotent.
    ///
    /// Operations already holding the store finish normally; secrets are
    /// zeroized when the last of them completes.
    pub fn close(&self) {
        let mut slot = self.store.write().unwrap_or_else(|e| {
            warn!("EncryptionManager lock poisoned, recovering");
            e.into_inner()
        });
        if slot.take().is_some() {
            info!("Encryption manager closed");
        }
    }

    /// Key directory this manager loads from.
    #[must_use]
    pub fn key_directory(&self) -> &Path {
        &self.key_directory
    }

    fn store(&self) -> CryptoResult<Arc<KeyStore>> {
        self.store
            .read()
            .map_err(|_| CryptoError::Internal("encryption manager lock poisoned".to_string()))?
            .clone()
            .ok_or(CryptoError::NotInitialized)
    }

    // ---------------------------------------------------------------------
    // Generic encrypt / decrypt
    // ---------------------------------------------------------------------

    /// Encrypt a JSON value with the data key for `key_type`.
    ///
    /// `null` yields `None` so optional fields can be skipped. Strings are
    /// sealed as `utf8`; every other value is serialized and sealed as `json`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NotInitialized`] or
    /// [`CryptoError::InvalidKeyType`], or a cipher failure.
    pub fn encrypt(
        &self,
        value: &Value,
        key_type: impl IntoKeyType,
    ) -> CryptoResult<Option<EncryptedPayload>> {
        let store = self.store()?;
        let key_type = key_type.into_key_type()?;

        let (bytes, encoding) = match value {
            Value::Null => return Ok(None),
            Value::String(text) => (Zeroizing::new(text.as_bytes().to_vec()), Encoding::Utf8),
            other => (
                Zeroizing::new(
                    serde_json::to_vec(other).map_err(|e| CryptoError::Internal(e.to_string()))?,
                ),
                Encoding::Json,
            ),
        };

        debug!(key_type = %key_type, encoding = ?encoding, "Encrypting value");
        let payload =
            CipherEngine::encrypt_symmetric(&bytes, encoding, store.symmetric_key(key_type))?;
        Ok(Some(payload.into()))
    }

    /// Encrypt raw bytes with the data key for `key_type`.
    ///
    /// # Errors
    ///
    /// Same as [`encrypt`](Self::encrypt).
    pub fn encrypt_bytes(
        &self,
        bytes: &[u8],
        key_type: impl IntoKeyType,
    ) -> CryptoResult<EncryptedPayload> {
        let store = self.store()?;
        let key_type = key_type.into_key_type()?;
        debug!(key_type = %key_type, "Encrypting bytes");
        let payload = CipherEngine::encrypt_symmetric(
            bytes,
            Encoding::Buffer,
            store.symmetric_key(key_type),
        )?;
        Ok(payload.into())
    }

    /// Decrypt a stored value. Values that are not encrypted pass through
    /// unchanged.
    ///
    /// `buffer` payloads come back as base64 text; use
    /// [`decrypt_payload`](Self::decrypt_payload) for raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NotInitialized`], [`CryptoError::InvalidKeyType`],
    /// [`CryptoError::AuthenticationFailed`] or [`CryptoError::DecryptionError`].
    pub fn decrypt(&self, value: &Value, key_type: impl IntoKeyType) -> CryptoResult<Value> {
        let store = self.store()?;
        let key_type = key_type.into_key_type()?;

        match StoredValue::classify(value)? {
            StoredValue::Plain(v) => Ok(v),
            StoredValue::Encrypted(payload) => {
                Ok(open_payload(&store, &payload, key_type)?.into_value())
            },
        }
    }

    /// Decrypt a payload to its typed plaintext.
    ///
    /// RSA payloads ignore `key_type` beyond validating it.
    ///
    /// # Errors
    ///
    /// Same as [`decrypt`](Self::decrypt).
    pub fn decrypt_payload(
        &self,
        payload: &EncryptedPayload,
        key_type: impl IntoKeyType,
    ) -> CryptoResult<Plaintext> {
        let store = self.store()?;
        let key_type = key_type.into_key_type()?;
        open_payload(&store, payload, key_type)
    }

    // ---------------------------------------------------------------------
    // Structured helpers
    // ---------------------------------------------------------------------

    /// Encrypt `user_query`, `final_response` and `metadata` of an audit
    /// record with the `audit` key. Absent and null fields, and every other
    /// field, are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NotInitialized`] or a cipher failure.
    pub fn encrypt_audit_data(
        &self,
        mut record: Map<String, Value>,
    ) -> CryptoResult<Map<String, Value>> {
        for field in AUDIT_ENCRYPTED_FIELDS {
            if let Some(value) = record.get_mut(field)
                && let Some(payload) = self.encrypt(value, KeyType::Audit)?
            {
                *value = payload.to_value()?;
            }
        }
        Ok(record)
    }

    /// Inverse of [`encrypt_audit_data`](Self::encrypt_audit_data).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NotInitialized`] or a decryption failure.
    pub fn decrypt_audit_data(
        &self,
        mut record: Map<String, Value>,
    ) -> CryptoResult<Map<String, Value>> {
        for field in AUDIT_ENCRYPTED_FIELDS {
            if let Some(value) = record.get_mut(field) {
                *value = self.decrypt(value, KeyType::Audit)?;
            }
        }
        Ok(record)
    }

    /// Encrypt with the `pii` key.
    ///
    /// # Errors
    ///
    /// Same as [`encrypt`](Self::encrypt).
    pub fn encrypt_pii(&self, value: &Value) -> CryptoResult<Option<EncryptedPayload>> {
        self.encrypt(value, KeyType::Pii)
    }

    /// Decrypt with the `pii` key.
    ///
    /// # Errors
    ///
    /// Same as [`decrypt`](Self::decrypt).
    pub fn decrypt_pii(&self, value: &Value) -> CryptoResult<Value> {
        self.decrypt(value, KeyType::Pii)
    }

    /// Encrypt with the `session` key.
    ///
    /// # Errors
    ///
    /// Same as [`encrypt`](Self::encrypt).
    pub fn encrypt_session_data(&self, value: &Value) -> CryptoResult<Option<EncryptedPayload>> {
        self.encrypt(value, KeyType::Session)
    }

    /// Decrypt with the `session` key.
    ///
    /// # Errors
    ///
    /// Same as [`decrypt`](Self::decrypt).
    pub fn decrypt_session_data(&self, value: &Value) -> CryptoResult<Value> {
        self.decrypt(value, KeyType::Session)
    }

    // ---------------------------------------------------------------------
    // Asymmetric
    // ---------------------------------------------------------------------

    /// Encrypt short text to the store's RSA public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NotInitialized`] or
    /// [`CryptoError::PayloadTooLarge`].
    pub fn encrypt_asymmetric(&self, plaintext: &str) -> CryptoResult<EncryptedPayload> {
        let store = self.store()?;
        let payload =
            CipherEngine::encrypt_asymmetric(plaintext.as_bytes(), store.key_pair().public_key())?;
        Ok(payload.into())
    }

    /// Decrypt an RSA payload with the store's private key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NotInitialized`], or
    /// [`CryptoError::DecryptionError`] for symmetric or undecryptable payloads.
    pub fn decrypt_asymmetric(&self, payload: &EncryptedPayload) -> CryptoResult<String> {
        let store = self.store()?;
        match payload {
            EncryptedPayload::Asymmetric(p) => {
                CipherEngine::decrypt_asymmetric(p, store.key_pair().private_key())
            },
            EncryptedPayload::Symmetric(_) => Err(CryptoError::DecryptionError(
                "expected an rsa payload, got aes-256-gcm".to_string(),
            )),
        }
    }

    /// SPKI PEM of the store's public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NotInitialized`].
    pub fn public_key(&self) -> CryptoResult<String> {
        Ok(self.store()?.key_pair().public_key_pem().to_string())
    }

    // ---------------------------------------------------------------------
    // Keyless delegates
    // ---------------------------------------------------------------------

    /// See [`CipherEngine::hash`].
    #[must_use]
    pub fn hash(&self, input: &[u8], salt: Option<&[u8]>) -> String {
        CipherEngine::hash(input, salt)
    }

    /// See [`CipherEngine::hash_with_salt`].
    #[must_use]
    pub fn hash_with_salt(&self, input: &[u8]) -> HashRecord {
        CipherEngine::hash_with_salt(input)
    }

    /// See [`CipherEngine::hash_password`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidParameter`] for zero iterations.
    pub fn hash_password(&self, input: &[u8], iterations: Option<u32>) -> CryptoResult<HashRecord> {
        CipherEngine::hash_password(input, iterations.unwrap_or(self.engine.pbkdf2_iterations()))
    }

    /// See [`CipherEngine::verify_hash`].
    #[must_use]
    pub fn verify_hash(&self, input: &[u8], record: &HashRecord) -> bool {
        CipherEngine::verify_hash(input, record)
    }

    /// See [`CipherEngine::derive_key`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidParameter`] for zero iterations.
    pub fn derive_key(
        &self,
        password: &[u8],
        salt: Option<&[u8]>,
        iterations: Option<u32>,
    ) -> CryptoResult<DerivedKey> {
        self.engine.derive_key(password, salt, iterations)
    }

    /// See [`CipherEngine::create_hmac`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Internal`] if the MAC cannot be keyed.
    pub fn create_hmac(&self, data: &[u8], secret: Option<&[u8]>) -> CryptoResult<String> {
        self.engine.create_hmac(data, secret)
    }

    /// See [`CipherEngine::verify_hmac`].
    #[must_use]
    pub fn verify_hmac(&self, data: &[u8], mac: &str, secret: Option<&[u8]>) -> bool {
        self.engine.verify_hmac(data, mac, secret)
    }

    /// See [`CipherEngine::generate_secure_token`].
    #[must_use]
    pub fn generate_secure_token(&self, byte_len: usize) -> String {
        CipherEngine::generate_secure_token(byte_len)
    }

    /// See [`CipherEngine::generate_uuid`].
    #[must_use]
    pub fn generate_uuid(&self) -> String {
        CipherEngine::generate_uuid()
    }

    // ---------------------------------------------------------------------
    // Health
    // ---------------------------------------------------------------------

    /// Round-trip a sample through every data key, the RSA pair and HMAC.
    ///
    /// Never fails; problems are reported in the returned report.
    #[must_use]
    pub fn validate_integrity(&self) -> IntegrityReport {
        let store = match self.store() {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Integrity validation skipped");
                return IntegrityReport::from_checks(Vec::new(), vec![e.to_string()]);
            },
        };

        let mut checks = Vec::new();
        for key_type in store.key_types() {
            let name = format!("symmetric:{key_type}");
            let result = CipherEngine::encrypt_symmetric(
                INTEGRITY_SAMPLE.as_bytes(),
                Encoding::Utf8,
                store.symmetric_key(key_type),
            )
            .and_then(|p| CipherEngine::decrypt_symmetric(&p, store.symmetric_key(key_type)));
            checks.push(integrity_check(name, result.map(|b| b == INTEGRITY_SAMPLE.as_bytes())));
        }

        let pair = store.key_pair();
        let rsa = CipherEngine::encrypt_asymmetric(INTEGRITY_SAMPLE.as_bytes(), pair.public_key())
            .and_then(|p| CipherEngine::decrypt_asymmetric(&p, pair.private_key()));
        checks.push(integrity_check("asymmetric:rsa", rsa.map(|s| s == INTEGRITY_SAMPLE)));

        let hmac = self.engine.create_hmac(INTEGRITY_SAMPLE.as_bytes(), None).map(|mac| {
            self.engine.verify_hmac(INTEGRITY_SAMPLE.as_bytes(), &mac, None)
                && !self.engine.verify_hmac(b"tampered-sample", &mac, None)
        });
        checks.push(integrity_check("hmac", hmac));

        let report = IntegrityReport::from_checks(checks, Vec::new());
        if report.valid {
            debug!(checks = report.checks.len(), "Integrity validation passed");
        } else {
            warn!(errors = ?report.errors, "Integrity validation failed");
        }
        report
    }

    /// Snapshot of the manager's state. Never fails.
    #[must_use]
    pub fn encryption_stats(&self) -> EncryptionStats {
        let keys = self
            .store()
            .map(|store| store.key_types())
            .unwrap_or_default();
        EncryptionStats {
            initialized: !keys.is_empty(),
            algorithms: AlgorithmInfo::default(),
            keys,
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Debug for EncryptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionManager")
            .field("key_directory", &self.key_directory)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

fn open_payload(
    store: &KeyStore,
    payload: &EncryptedPayload,
    key_type: KeyType,
) -> CryptoResult<Plaintext> {
    match payload {
        EncryptedPayload::Symmetric(p) => {
            debug!(key_type = %key_type, encoding = ?p.encoding, "Decrypting value");
            let bytes = Zeroizing::new(CipherEngine::decrypt_symmetric(
                p,
                store.symmetric_key(key_type),
            )?);
            match p.encoding {
                Encoding::Buffer => Ok(Plaintext::Bytes(bytes.to_vec())),
                Encoding::Utf8 => String::from_utf8(bytes.to_vec())
                    .map(Plaintext::Text)
                    .map_err(|e| {
                        CryptoError::DecryptionError(format!("plaintext is not UTF-8: {e}"))
                    }),
                Encoding::Json => serde_json::from_slice(&bytes)
                    .map(Plaintext::Json)
                    .map_err(|e| {
                        CryptoError::DecryptionError(format!("plaintext is not JSON: {e}"))
                    }),
            }
        },
        EncryptedPayload::Asymmetric(p) => {
            CipherEngine::decrypt_asymmetric(p, store.key_pair().private_key()).map(Plaintext::Text)
        },
    }
}

fn integrity_check(name: impl Into<String>, result: CryptoResult<bool>) -> IntegrityCheck {
    match result {
        Ok(true) => IntegrityCheck::pass(name),
        Ok(false) => IntegrityCheck::fail(name, "round trip mismatch"),
        Err(e) => IntegrityCheck::fail(name, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(dir: &Path) -> EncryptionManager {
        let manager = EncryptionManager::new(
            EncryptionConfig::new(dir)
                .with_signing_secret(b"unit-test-secret".to_vec())
                .with_pbkdf2_iterations(1_000),
        );
        manager.initialize().unwrap();
        manager
    }

    #[test]
    fn test_string_and_object_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        for value in [json!("hello"), json!({"nested": [1, 2, {"x": null}]}), json!(42)] {
            let sealed = m.encrypt(&value, KeyType::Audit).unwrap().unwrap();
            let opened = m.decrypt(&sealed.to_value().unwrap(), KeyType::Audit).unwrap();
            assert_eq!(opened, value);
        }
    }

    #[test]
    fn test_string_key_types() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let sealed = m.encrypt(&json!("x"), "pii").unwrap().unwrap();
        assert_eq!(m.decrypt(&sealed.to_value().unwrap(), "pii").unwrap(), json!("x"));
    }

    #[test]
    fn test_null_is_noop_for_every_key_type() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        for key_type in KeyType::ALL {
            assert!(m.encrypt(&Value::Null, key_type).unwrap().is_none(), "{key_type}");
            assert_eq!(m.decrypt(&Value::Null, key_type).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_plain_values_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        for value in [json!("legacy text"), json!({"encrypted": false, "data": "x"}), json!(7)] {
            assert_eq!(m.decrypt(&value, KeyType::Audit).unwrap(), value);
        }
    }

    #[test]
    fn test_strings_resembling_payloads_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let sealed = m.encrypt(&json!("secret"), KeyType::Audit).unwrap().unwrap();

        for value in [
            json!(r#"{"encrypted": true, "note": "hi"}"#),
            json!(r#"{"encrypted": true}"#),
            Value::String(sealed.to_json_string().unwrap()),
        ] {
            assert_eq!(m.decrypt(&value, KeyType::Audit).unwrap(), value);
        }
    }

    #[test]
    fn test_invalid_key_type() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        assert!(matches!(
            m.encrypt(&json!("x"), "billing"),
            Err(CryptoError::InvalidKeyType(_))
        ));
        assert!(matches!(
            m.decrypt(&json!("x"), "billing"),
            Err(CryptoError::InvalidKeyType(_))
        ));
    }

    #[test]
    fn test_wrong_key_type_fails_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let sealed = m.encrypt(&json!("x"), KeyType::Audit).unwrap().unwrap();
        assert!(matches!(
            m.decrypt(&sealed.to_value().unwrap(), KeyType::Pii),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_not_initialized_before_and_after_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let m = EncryptionManager::new(EncryptionConfig::new(dir.path()));

        assert!(!m.is_initialized());
        assert!(matches!(
            m.encrypt(&json!("x"), KeyType::Audit),
            Err(CryptoError::NotInitialized)
        ));

        m.initialize().unwrap();
        m.initialize().unwrap();
        assert!(m.is_initialized());
        assert!(m.encrypt(&json!("x"), KeyType::Audit).is_ok());

        m.close();
        m.close();
        assert!(!m.is_initialized());
        assert!(matches!(
            m.encrypt(&json!("x"), KeyType::Audit),
            Err(CryptoError::NotInitialized)
        ));
        assert!(matches!(m.public_key(), Err(CryptoError::NotInitialized)));
    }

    #[test]
    fn test_reinitialize_after_close_reloads_same_keys() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let sealed = m.encrypt(&json!("persisted"), KeyType::Metadata).unwrap().unwrap();

        m.close();
        m.initialize().unwrap();
        assert_eq!(
            m.decrypt(&sealed.to_value().unwrap(), KeyType::Metadata).unwrap(),
            json!("persisted")
        );
    }

    #[test]
    fn test_keyless_helpers_work_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let m = EncryptionManager::new(
            EncryptionConfig::new(dir.path()).with_signing_secret(b"s".to_vec()),
        );

        let mac = m.create_hmac(b"data", None).unwrap();
        assert!(m.verify_hmac(b"data", &mac, None));
        assert_eq!(m.hash(b"a", None).len(), 64);
        assert_eq!(m.generate_secure_token(8).len(), 16);
    }

    #[test]
    fn test_audit_data_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let record = json!({
            "session_id": "s1",
            "user_query": "What is my balance?",
            "final_response": "It is $10.",
            "metadata": {"channel": "web", "tags": ["a", "b"]},
            "confidence_score": 0.9
        });
        let Value::Object(original) = record else { unreachable!() };

        let sealed = m.encrypt_audit_data(original.clone()).unwrap();
        assert_eq!(sealed["session_id"], json!("s1"));
        assert_eq!(sealed["confidence_score"], json!(0.9));
        for field in AUDIT_ENCRYPTED_FIELDS {
            assert_eq!(sealed[field]["encrypted"], json!(true), "{field} not sealed");
            assert_eq!(sealed[field]["keyType"], json!("audit"));
        }

        assert_eq!(m.decrypt_audit_data(sealed).unwrap(), original);
    }

    #[test]
    fn test_audit_data_leaves_absent_and_null_fields() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let Value::Object(original) = json!({"user_query": "q", "final_response": null}) else {
            unreachable!()
        };
        let sealed = m.encrypt_audit_data(original.clone()).unwrap();
        assert_eq!(sealed["final_response"], Value::Null);
        assert!(!sealed.contains_key("metadata"));
        assert_eq!(m.decrypt_audit_data(sealed).unwrap(), original);
    }

    #[test]
    fn test_pii_and_session_helpers_use_their_keys() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let pii = m.encrypt_pii(&json!("555-12-3456")).unwrap().unwrap();
        let session = m.encrypt_session_data(&json!({"cart": 3})).unwrap().unwrap();

        let EncryptedPayload::Symmetric(ref p) = pii else { panic!("expected symmetric") };
        assert_eq!(p.key_type, KeyType::Pii);
        let EncryptedPayload::Symmetric(ref s) = session else { panic!("expected symmetric") };
        assert_eq!(s.key_type, KeyType::Session);

        assert_eq!(m.decrypt_pii(&pii.to_value().unwrap()).unwrap(), json!("555-12-3456"));
        assert_eq!(
            m.decrypt_session_data(&session.to_value().unwrap()).unwrap(),
            json!({"cart": 3})
        );
    }

    #[test]
    fn test_bytes_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let payload = m.encrypt_bytes(&[0, 159, 255], KeyType::Metadata).unwrap();
        assert_eq!(
            m.decrypt_payload(&payload, KeyType::Metadata).unwrap(),
            Plaintext::Bytes(vec![0, 159, 255])
        );
        assert_eq!(
            m.decrypt(&payload.to_value().unwrap(), KeyType::Metadata).unwrap(),
            json!("AJ//")
        );
    }

    #[test]
    fn test_asymmetric_roundtrip_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let payload = m.encrypt_asymmetric("short secret").unwrap();
        assert_eq!(payload.algorithm(), "rsa");
        assert_eq!(m.decrypt_asymmetric(&payload).unwrap(), "short secret");
        assert_eq!(
            m.decrypt(&payload.to_value().unwrap(), KeyType::Master).unwrap(),
            json!("short secret")
        );

        assert!(m.encrypt_asymmetric(&"a".repeat(190)).is_ok());
        assert!(matches!(
            m.encrypt_asymmetric(&"a".repeat(191)),
            Err(CryptoError::PayloadTooLarge { max: 190, actual: 191 })
        ));
    }

    #[test]
    fn test_public_key_pem() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        assert!(m.public_key().unwrap().starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn test_integrity_passes_when_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let report = m.validate_integrity();
        assert!(report.valid, "errors: {:?}", report.errors);
        // Five data keys, RSA, HMAC.
        assert_eq!(report.checks.len(), 7);
    }

    #[test]
    fn test_integrity_reports_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let m = EncryptionManager::new(EncryptionConfig::new(dir.path()));

        let report = m.validate_integrity();
        assert!(!report.valid);
        assert!(report.checks.is_empty());
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let m = EncryptionManager::new(EncryptionConfig::new(dir.path()));
        assert!(!m.encryption_stats().initialized);
        assert!(m.encryption_stats().keys.is_empty());

        m.initialize().unwrap();
        let stats = m.encryption_stats();
        assert!(stats.initialized);
        assert_eq!(stats.keys, KeyType::ALL.to_vec());
        assert_eq!(stats.algorithms.symmetric, "aes-256-gcm");
    }

    #[test]
    fn test_in_flight_store_survives_close() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        let held = m.store().unwrap();
        m.close();
        let key = held.symmetric_key(KeyType::Audit);
        assert!(CipherEngine::encrypt_symmetric(b"x", Encoding::Utf8, key).is_ok());
    }
}
