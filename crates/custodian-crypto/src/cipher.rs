//! Cryptographic primitives parameterized by caller-supplied keys.
//!
//! The engine holds no mutable state. Its only field besides the PBKDF2
//! default is the HMAC signing secret, which is fixed at construction and
//! deliberately distinct from every data key in the [`KeyStore`](crate::KeyStore).

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::key_store::KeyMaterial;
use crate::payload::{
    AsymmetricPayload, DerivedKey, Encoding, HashAlgorithm, HashRecord, SymmetricPayload,
};

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonce size in bytes (96 bits).
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Salt size for hash records and key derivation.
pub const SALT_LEN: usize = 32;

/// Derived key length (256 bits).
pub const DERIVED_KEY_LEN: usize = 32;

/// Default PBKDF2 iteration count.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

/// Default secure token length in bytes.
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// OAEP(SHA-256) padding overhead: two digests plus two bytes.
const OAEP_SHA256_OVERHEAD: usize = 66;

/// Stateless cipher operations.
pub struct CipherEngine {
    signing_key: Zeroizing<Vec<u8>>,
    pbkdf2_iterations: u32,
}

impl CipherEngine {
    /// Create an engine with an explicit HMAC signing secret.
    #[must_use]
    pub fn new(signing_key: impl Into<Vec<u8>>) -> Self {
        Self {
            signing_key: Zeroizing::new(signing_key.into()),
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }

    /// Create an engine with a random per-process signing secret.
    ///
    /// MACs produced by such an engine cannot be verified after restart.
    #[must_use]
    pub fn with_random_signing_key() -> Self {
        let mut key = vec![0u8; DEFAULT_TOKEN_BYTES];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Override the default PBKDF2 iteration count.
    #[must_use]
    pub fn with_pbkdf2_iterations(mut self, iterations: u32) -> Self {
        self.pbkdf2_iterations = iterations;
        self
    }

    /// Default PBKDF2 iteration count used by [`derive_key`](Self::derive_key).
    #[must_use]
    pub const fn pbkdf2_iterations(&self) -> u32 {
        self.pbkdf2_iterations
    }

    // ---------------------------------------------------------------------
    // Symmetric AEAD
    // ---------------------------------------------------------------------

    /// Seal `plaintext` with AES-256-GCM under a fresh random IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionError`] if the cipher rejects the input.
    pub fn encrypt_symmetric(
        plaintext: &[u8],
        encoding: Encoding,
        key: &KeyMaterial,
    ) -> CryptoResult<SymmetricPayload> {
        let cipher = Aes256Gcm::new_from_slice(key.secret()).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: crate::key_store::SYMMETRIC_KEY_LEN,
                actual: key.secret().len(),
            }
        })?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        Ok(SymmetricPayload::new(
            key.key_type(),
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(&buffer),
            encoding,
        ))
    }

    /// Open a symmetric payload.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionError`] for malformed hex or wrong
    /// IV/tag lengths, and [`CryptoError::AuthenticationFailed`] when the tag
    /// does not verify (tampering, or the wrong key).
    pub fn decrypt_symmetric(
        payload: &SymmetricPayload,
        key: &KeyMaterial,
    ) -> CryptoResult<Vec<u8>> {
        let iv = decode_fixed::<IV_LEN>(&payload.iv, "iv")?;
        let tag = decode_fixed::<TAG_LEN>(&payload.auth_tag, "authTag")?;
        let mut buffer = hex::decode(&payload.data)
            .map_err(|e| CryptoError::DecryptionError(format!("invalid data hex: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(key.secret()).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: crate::key_store::SYMMETRIC_KEY_LEN,
                actual: key.secret().len(),
            }
        })?;

        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&iv),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        Ok(buffer)
    }

    // ---------------------------------------------------------------------
    // Asymmetric (RSA-OAEP / SHA-256)
    // ---------------------------------------------------------------------

    /// Largest plaintext accepted by [`encrypt_asymmetric`](Self::encrypt_asymmetric)
    /// for the given key.
    #[must_use]
    pub fn max_asymmetric_plaintext(public_key: &RsaPublicKey) -> usize {
        public_key.size().saturating_sub(OAEP_SHA256_OVERHEAD)
    }

    /// Encrypt a small payload to an RSA public key.
    ///
    /// Larger inputs must be chunked by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::PayloadTooLarge`] if `plaintext` exceeds the
    /// modulus minus padding, or [`CryptoError::EncryptionError`] on failure.
    pub fn encrypt_asymmetric(
        plaintext: &[u8],
        public_key: &RsaPublicKey,
    ) -> CryptoResult<AsymmetricPayload> {
        let max = Self::max_asymmetric_plaintext(public_key);
        if plaintext.len() > max {
            return Err(CryptoError::PayloadTooLarge {
                max,
                actual: plaintext.len(),
            });
        }

        let ciphertext = public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        Ok(AsymmetricPayload::new(
            base64::engine::general_purpose::STANDARD.encode(ciphertext),
        ))
    }

    /// Decrypt an RSA payload to UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionError`] for bad base64, a failed
    /// OAEP decode, or non-UTF-8 plaintext.
    pub fn decrypt_asymmetric(
        payload: &AsymmetricPayload,
        private_key: &RsaPrivateKey,
    ) -> CryptoResult<String> {
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(&payload.data)
            .map_err(|e| CryptoError::DecryptionError(format!("invalid base64: {e}")))?;

        let plaintext = private_key
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .map_err(|e| CryptoError::DecryptionError(format!("RSA decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecryptionError(format!("plaintext is not UTF-8: {e}")))
    }

    // ---------------------------------------------------------------------
    // Hashing
    // ---------------------------------------------------------------------

    /// SHA-256 over `input` followed by `salt`, hex encoded.
    #[must_use]
    pub fn hash(input: &[u8], salt: Option<&[u8]>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input);
        if let Some(salt) = salt {
            hasher.update(salt);
        }
        hex::encode(hasher.finalize())
    }

    /// Hash with a fresh random salt.
    #[must_use]
    pub fn hash_with_salt(input: &[u8]) -> HashRecord {
        let salt = random_bytes(SALT_LEN);
        HashRecord {
            hash: Self::hash(input, Some(&salt)),
            salt: hex::encode(&salt),
            algorithm: HashAlgorithm::Sha256,
            iterations: None,
        }
    }

    /// Slow, salted PBKDF2 hash for low-entropy secrets.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidParameter`] if `iterations` is zero.
    pub fn hash_password(input: &[u8], iterations: u32) -> CryptoResult<HashRecord> {
        check_iterations(iterations)?;
        let salt = random_bytes(SALT_LEN);
        let digest = pbkdf2_sha256(input, &salt, iterations);
        Ok(HashRecord {
            hash: hex::encode(&*digest),
            salt: hex::encode(&salt),
            algorithm: HashAlgorithm::Pbkdf2Sha256,
            iterations: Some(iterations),
        })
    }

    /// Recompute a hash record for `input` and compare in constant time.
    ///
    /// Malformed records never verify.
    #[must_use]
    pub fn verify_hash(input: &[u8], record: &HashRecord) -> bool {
        let Ok(salt) = hex::decode(&record.salt) else {
            return false;
        };

        let computed = match record.algorithm {
            HashAlgorithm::Sha256 => Self::hash(input, Some(&salt)),
            HashAlgorithm::Pbkdf2Sha256 => match record.iterations {
                Some(iterations) if iterations > 0 => {
                    hex::encode(&*pbkdf2_sha256(input, &salt, iterations))
                },
                _ => return false,
            },
        };

        computed
            .as_bytes()
            .ct_eq(record.hash.to_ascii_lowercase().as_bytes())
            .into()
    }

    // ---------------------------------------------------------------------
    // Key derivation
    // ---------------------------------------------------------------------

    /// PBKDF2-HMAC-SHA256 with 256-bit output.
    ///
    /// A random salt is generated when none is supplied; `iterations`
    /// defaults to the engine's configured count.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidParameter`] if `iterations` is zero.
    pub fn derive_key(
        &self,
        password: &[u8],
        salt: Option<&[u8]>,
        iterations: Option<u32>,
    ) -> CryptoResult<DerivedKey> {
        let iterations = iterations.unwrap_or(self.pbkdf2_iterations);
        check_iterations(iterations)?;
        let salt = salt.map_or_else(|| random_bytes(SALT_LEN), <[u8]>::to_vec);
        let key = pbkdf2_sha256(password, &salt, iterations);
        Ok(DerivedKey::new(key.to_vec(), salt, iterations))
    }

    // ---------------------------------------------------------------------
    // HMAC
    // ---------------------------------------------------------------------

    /// HMAC-SHA256, hex encoded. Uses the engine's signing key unless a
    /// custom secret is given.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Internal`] if the MAC cannot be keyed.
    pub fn create_hmac(&self, data: &[u8], secret: Option<&[u8]>) -> CryptoResult<String> {
        let mut mac = self.keyed_mac(secret)?;
        mac.update(data);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify an HMAC-SHA256 in constant time.
    #[must_use]
    pub fn verify_hmac(&self, data: &[u8], mac_hex: &str, secret: Option<&[u8]>) -> bool {
        let Ok(expected) = hex::decode(mac_hex) else {
            return false;
        };
        let Ok(mut mac) = self.keyed_mac(secret) else {
            return false;
        };
        mac.update(data);
        mac.verify_slice(&expected).is_ok()
    }

    fn keyed_mac(&self, secret: Option<&[u8]>) -> CryptoResult<HmacSha256> {
        let key = secret.unwrap_or(self.signing_key.as_slice());
        <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| CryptoError::Internal(e.to_string()))
    }

    // ---------------------------------------------------------------------
    // Randomness
    // ---------------------------------------------------------------------

    /// Random token of `byte_len` bytes, hex encoded (`2 * byte_len` chars).
    #[must_use]
    pub fn generate_secure_token(byte_len: usize) -> String {
        hex::encode(random_bytes(byte_len))
    }

    /// RFC 4122 version 4 UUID.
    #[must_use]
    pub fn generate_uuid() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

impl std::fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherEngine")
            .field("pbkdf2_iterations", &self.pbkdf2_iterations)
            .finish_non_exhaustive()
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

fn check_iterations(iterations: u32) -> CryptoResult<()> {
    if iterations == 0 {
        return Err(CryptoError::InvalidParameter(
            "PBKDF2 iterations must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn pbkdf2_sha256(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Zeroizing<[u8; DERIVED_KEY_LEN]> {
    let mut out = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, out.as_mut_slice());
    out
}

fn decode_fixed<const N: usize>(hex_str: &str, field: &str) -> CryptoResult<[u8; N]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| CryptoError::DecryptionError(format!("invalid {field} hex: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        CryptoError::DecryptionError(format!(
            "invalid {field} length: expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}
