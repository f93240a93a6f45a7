//! File-persisted key hierarchy.
//!
//! The key directory holds one JSON file per symmetric key type
//! (`{key, salt, created, algorithm}`) plus a PEM-encoded RSA pair:
//!
//! ```text
//! keys/
//!   master.key  audit.key  pii.key  session.key  metadata.key
//!   rsa_private.pem   (PKCS#8)
//!   rsa_public.pem    (SPKI)
//! ```
//!
//! Missing files are generated on first start. Any other read failure is
//! fatal: silently regenerating a key that exists but cannot be read would
//! orphan every ciphertext sealed with it.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::key_type::KeyType;

/// Symmetric key size in bytes (AES-256).
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Salt stored alongside each symmetric key.
pub const KEY_SALT_LEN: usize = 32;

/// RSA modulus size.
pub const RSA_KEY_BITS: usize = 2048;

/// Algorithm label written to key files.
pub const SYMMETRIC_ALGORITHM: &str = "aes-256-gcm";

const RSA_PRIVATE_FILE: &str = "rsa_private.pem";
const RSA_PUBLIC_FILE: &str = "rsa_public.pem";

/// A symmetric data key. The secret is zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct KeyMaterial {
    #[zeroize(skip)]
    key_type: KeyType,
    secret: [u8; SYMMETRIC_KEY_LEN],
    salt: Vec<u8>,
    #[zeroize(skip)]
    created_at: DateTime<Utc>,
}

impl KeyMaterial {
    /// Generate fresh random key material.
    #[must_use]
    pub fn generate(key_type: KeyType) -> Self {
        let mut secret = [0u8; SYMMETRIC_KEY_LEN];
        OsRng.fill_bytes(&mut secret);
        let mut salt = vec![0u8; KEY_SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self {
            key_type,
            secret,
            salt,
            created_at: Utc::now(),
        }
    }

    /// Build from raw parts.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if `secret` is not 32 bytes.
    pub fn from_parts(
        key_type: KeyType,
        secret: &[u8],
        salt: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> CryptoResult<Self> {
        let secret: [u8; SYMMETRIC_KEY_LEN] =
            secret
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: SYMMETRIC_KEY_LEN,
                    actual: secret.len(),
                })?;
        Ok(Self {
            key_type,
            secret,
            salt,
            created_at,
        })
    }

    /// Which logical key this is.
    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Raw secret (sensitive).
    #[must_use]
    pub const fn secret(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.secret
    }

    /// Salt persisted with the key.
    #[must_use]
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// When the key was generated.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Always `"aes-256-gcm"`.
    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        SYMMETRIC_ALGORITHM
    }

    fn to_file(&self) -> KeyFile {
        KeyFile {
            key: hex::encode(self.secret),
            salt: hex::encode(&self.salt),
            created: self.created_at,
            algorithm: SYMMETRIC_ALGORITHM.to_string(),
        }
    }

    fn from_file(key_type: KeyType, path: &Path, bytes: &[u8]) -> CryptoResult<Self> {
        let invalid = |reason: String| CryptoError::InvalidKeyFile {
            path: path.display().to_string(),
            reason,
        };

        let file: KeyFile = serde_json::from_slice(bytes).map_err(|e| invalid(e.to_string()))?;
        let key_hex = Zeroizing::new(file.key);
        if file.algorithm != SYMMETRIC_ALGORITHM {
            return Err(invalid(format!("unsupported algorithm '{}'", file.algorithm)));
        }
        let secret =
            Zeroizing::new(hex::decode(key_hex.as_str()).map_err(|e| invalid(e.to_string()))?);
        let salt = hex::decode(&file.salt).map_err(|e| invalid(e.to_string()))?;

        Self::from_parts(key_type, &secret, salt, file.created)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_type", &self.key_type)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// On-disk form of a symmetric key.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    key: String,
    salt: String,
    created: DateTime<Utc>,
    algorithm: String,
}

/// RSA-2048 pair for small out-of-band payloads (key escrow, service handoff).
pub struct AsymmetricKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_pem: String,
}

impl AsymmetricKeyPair {
    /// Generate a fresh 2048-bit pair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Internal`] if key generation or PEM encoding fails.
    pub fn generate() -> CryptoResult<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| CryptoError::Internal(format!("RSA key generation failed: {e}")))?;
        Self::from_private_key(private_key)
    }

    fn from_private_key(private_key: RsaPrivateKey) -> CryptoResult<Self> {
        let public_key = RsaPublicKey::from(&private_key);
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Internal(e.to_string()))?;
        Ok(Self {
            private_key,
            public_key,
            public_pem,
        })
    }

    /// Public key.
    #[must_use]
    pub const fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Private key (sensitive).
    #[must_use]
    pub const fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// SPKI PEM of the public key.
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// PKCS#8 PEM of the private key, zeroized on drop.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Internal`] if PEM encoding fails.
    pub fn private_key_pem(&self) -> CryptoResult<Zeroizing<String>> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Internal(e.to_string()))
    }

    /// Always `"RSA-2048"`.
    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        "RSA-2048"
    }
}

impl std::fmt::Debug for AsymmetricKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsymmetricKeyPair")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

struct SymmetricKeys {
    master: KeyMaterial,
    audit: KeyMaterial,
    pii: KeyMaterial,
    session: KeyMaterial,
    metadata: KeyMaterial,
}

/// The loaded key hierarchy. Read-only once constructed.
pub struct KeyStore {
    directory: PathBuf,
    keys: SymmetricKeys,
    key_pair: AsymmetricKeyPair,
}

impl KeyStore {
    /// Load every key from `directory`, generating and persisting any that
    /// are missing.
    ///
    /// # Security
    ///
    /// - New files are created with `O_CREAT | O_EXCL` and mode 0o600 on Unix.
    /// - Key files that are symlinks are refused.
    /// - File read buffers are wrapped in `Zeroizing`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IoError`] for any read or write failure other
    /// than a missing file, and [`CryptoError::InvalidKeyFile`] for files
    /// that exist but cannot be parsed.
    pub fn initialize(directory: impl AsRef<Path>) -> CryptoResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        ensure_directory(&directory)?;

        let keys = SymmetricKeys {
            master: load_or_generate_symmetric(&directory, KeyType::Master)?,
            audit: load_or_generate_symmetric(&directory, KeyType::Audit)?,
            pii: load_or_generate_symmetric(&directory, KeyType::Pii)?,
            session: load_or_generate_symmetric(&directory, KeyType::Session)?,
            metadata: load_or_generate_symmetric(&directory, KeyType::Metadata)?,
        };
        let key_pair = load_or_generate_key_pair(&directory)?;

        info!(directory = %directory.display(), "Key store initialized");

        Ok(Self {
            directory,
            keys,
            key_pair,
        })
    }

    /// Key material for a key type.
    #[must_use]
    pub fn symmetric_key(&self, key_type: KeyType) -> &KeyMaterial {
        match key_type {
            KeyType::Master => &self.keys.master,
            KeyType::Audit => &self.keys.audit,
            KeyType::Pii => &self.keys.pii,
            KeyType::Session => &self.keys.session,
            KeyType::Metadata => &self.keys.metadata,
        }
    }

    /// The RSA pair.
    #[must_use]
    pub const fn key_pair(&self) -> &AsymmetricKeyPair {
        &self.key_pair
    }

    /// Directory the keys were loaded from.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Key types held by this store.
    #[must_use]
    pub fn key_types(&self) -> Vec<KeyType> {
        KeyType::ALL.to_vec()
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

fn io_err(e: &std::io::Error) -> CryptoError {
    CryptoError::IoError(e.to_string())
}

fn ensure_directory(dir: &Path) -> CryptoResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(|e| io_err(&e))
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir).map_err(|e| io_err(&e))
    }
}

/// Read a key file. `Ok(None)` means the file does not exist.
fn read_key_file(path: &Path) -> CryptoResult<Option<Zeroizing<Vec<u8>>>> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(CryptoError::IoError(format!(
            "refusing to read key file {}: path is a symlink",
            path.display()
        ))),
        Ok(_) => std::fs::read(path)
            .map(|bytes| Some(Zeroizing::new(bytes)))
            .map_err(|e| io_err(&e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(&e)),
    }
}

/// Atomically create a new key file. Returns `Ok(false)` if another writer
/// created it first.
fn write_new_key_file(path: &Path, contents: &[u8]) -> CryptoResult<bool> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    match options.open(path) {
        Ok(mut file) => {
            file.write_all(contents).map_err(|e| io_err(&e))?;
            file.sync_all().map_err(|e| io_err(&e))?;
            Ok(true)
        },
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(io_err(&e)),
    }
}

fn load_or_generate_symmetric(dir: &Path, key_type: KeyType) -> CryptoResult<KeyMaterial> {
    let path = dir.join(key_type.file_name());

    if let Some(bytes) = read_key_file(&path)? {
        debug!(key_type = %key_type, "Loaded existing key");
        return KeyMaterial::from_file(key_type, &path, &bytes);
    }

    let material = KeyMaterial::generate(key_type);
    let encoded = Zeroizing::new(
        serde_json::to_vec_pretty(&material.to_file())
            .map_err(|e| CryptoError::Internal(e.to_string()))?,
    );

    if write_new_key_file(&path, &encoded)? {
        info!(key_type = %key_type, "Generated new key");
        Ok(material)
    } else {
        // Lost a creation race; the winner's key is authoritative.
        let bytes = read_key_file(&path)?.ok_or_else(|| {
            CryptoError::IoError(format!("key file {} vanished", path.display()))
        })?;
        KeyMaterial::from_file(key_type, &path, &bytes)
    }
}

fn load_or_generate_key_pair(dir: &Path) -> CryptoResult<AsymmetricKeyPair> {
    let private_path = dir.join(RSA_PRIVATE_FILE);
    let public_path = dir.join(RSA_PUBLIC_FILE);

    let private_pem = read_key_file(&private_path)?;
    let public_pem = read_key_file(&public_path)?;

    match (private_pem, public_pem) {
        (Some(private_bytes), public_bytes) => {
            let pair = parse_private_pem(&private_path, &private_bytes)?;
            match public_bytes {
                Some(public_bytes) => check_public_matches(&public_path, &public_bytes, &pair)?,
                None => {
                    write_new_key_file(&public_path, pair.public_key_pem().as_bytes())?;
                    info!("Restored missing RSA public key from private key");
                },
            }
            debug!("Loaded existing RSA key pair");
            Ok(pair)
        },
        (None, Some(_)) => Err(CryptoError::InvalidKeyFile {
            path: private_path.display().to_string(),
            reason: "public key present but private key missing".to_string(),
        }),
        (None, None) => {
            let pair = AsymmetricKeyPair::generate()?;
            let private = pair.private_key_pem()?;
            if !write_new_key_file(&private_path, private.as_bytes())? {
                let bytes = read_key_file(&private_path)?.ok_or_else(|| {
                    CryptoError::IoError(format!("key file {} vanished", private_path.display()))
                })?;
                return parse_private_pem(&private_path, &bytes);
            }
            write_new_key_file(&public_path, pair.public_key_pem().as_bytes())?;
            info!(bits = RSA_KEY_BITS, "Generated new RSA key pair");
            Ok(pair)
        },
    }
}

fn parse_private_pem(path: &Path, bytes: &[u8]) -> CryptoResult<AsymmetricKeyPair> {
    let invalid = |reason: String| CryptoError::InvalidKeyFile {
        path: path.display().to_string(),
        reason,
    };
    let pem = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
    let key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| invalid(e.to_string()))?;
    AsymmetricKeyPair::from_private_key(key)
}

fn check_public_matches(
    path: &Path,
    bytes: &[u8],
    pair: &AsymmetricKeyPair,
) -> CryptoResult<()> {
    let invalid = |reason: String| CryptoError::InvalidKeyFile {
        path: path.display().to_string(),
        reason,
    };
    let pem = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
    let public = RsaPublicKey::from_public_key_pem(pem).map_err(|e| invalid(e.to_string()))?;
    if &public == pair.public_key() {
        Ok(())
    } else {
        Err(invalid("public key does not match private key".to_string()))
    }
}
