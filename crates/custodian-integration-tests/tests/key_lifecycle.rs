//! Key store lifecycle, persistence and configuration wiring.

use std::sync::Arc;

use custodian_audit::{AuditWriter, RegexPiiDetector};
use custodian_config::Config;
use custodian_crypto::{
    CryptoError, EncryptionConfig, EncryptionManager, KeyType, Plaintext,
};
use custodian_telemetry::{LogConfig, LogFormat};
use custodian_test::prelude::*;
use custodian_test::{TEST_SIGNING_SECRET, test_encryption_config};
use serde_json::json;

#[test]
fn test_keys_survive_restart() {
    let dir = test_key_dir();
    let first = test_encryption_manager(dir.path()).unwrap();
    let sealed = first
        .encrypt(&json!({"ssn": "123-45-6789"}), KeyType::Pii)
        .unwrap()
        .unwrap()
        .to_value()
        .unwrap();
    let rsa_sealed = first.encrypt_asymmetric("wrapped secret").unwrap();
    first.close();

    let second = test_encryption_manager(dir.path()).unwrap();
    assert_eq!(
        second.decrypt(&sealed, KeyType::Pii).unwrap(),
        json!({"ssn": "123-45-6789"})
    );
    assert_eq!(second.decrypt_asymmetric(&rsa_sealed).unwrap(), "wrapped secret");
}

#[test]
fn test_wrong_key_type_fails_authentication() {
    let dir = test_key_dir();
    let manager = test_encryption_manager(dir.path()).unwrap();

    let sealed = manager
        .encrypt(&json!("session token"), KeyType::Session)
        .unwrap()
        .unwrap()
        .to_value()
        .unwrap();

    assert!(matches!(
        manager.decrypt(&sealed, KeyType::Audit),
        Err(CryptoError::AuthenticationFailed)
    ));
}

#[test]
fn test_close_then_use_is_not_initialized() {
    let dir = test_key_dir();
    let manager = test_encryption_manager(dir.path()).unwrap();

    manager.close();
    manager.close();

    assert!(!manager.is_initialized());
    assert!(matches!(
        manager.encrypt(&json!("x"), KeyType::Metadata),
        Err(CryptoError::NotInitialized)
    ));
    // Keyless helpers keep working.
    assert_eq!(manager.hash(b"abc", None).len(), 64);
    assert!(!manager.validate_integrity().valid);

    manager.initialize().unwrap();
    assert!(manager.validate_integrity().valid);
}

#[test]
fn test_string_key_types_are_checked() {
    let dir = test_key_dir();
    let manager = test_encryption_manager(dir.path()).unwrap();

    assert!(manager.encrypt(&json!("x"), "pii").unwrap().is_some());
    assert!(matches!(
        manager.encrypt(&json!("x"), "billing"),
        Err(CryptoError::InvalidKeyType(_))
    ));
}

#[test]
fn test_bytes_round_trip() {
    let dir = test_key_dir();
    let manager = test_encryption_manager(dir.path()).unwrap();
    let bytes = [0_u8, 159, 146, 150, 255];

    let payload = manager.encrypt_bytes(&bytes, KeyType::Metadata).unwrap();
    let plain = manager.decrypt_payload(&payload, KeyType::Metadata).unwrap();

    assert_eq!(plain, Plaintext::Bytes(bytes.to_vec()));
}

#[test]
fn test_hmac_depends_on_signing_secret() {
    let dir = test_key_dir();
    let a = test_encryption_manager(dir.path()).unwrap();
    let b = EncryptionManager::new(
        EncryptionConfig::new(dir.path()).with_signing_secret(b"another-secret".to_vec()),
    );

    let mac = a.create_hmac(b"payload", None).unwrap();
    assert!(a.verify_hmac(b"payload", &mac, None));
    assert!(!b.verify_hmac(b"payload", &mac, None));
    assert!(b.verify_hmac(b"payload", &mac, Some(TEST_SIGNING_SECRET)));
}

#[tokio::test]
async fn test_components_from_config_file() {
    let keys = test_key_dir();
    let cfg_dir = tempfile::tempdir().unwrap();
    let cfg_path = cfg_dir.path().join("custodian.toml");
    std::fs::write(
        &cfg_path,
        format!(
            "[keys]\ndirectory = {:?}\n\n[crypto]\npbkdf2_iterations = 10000\n\
             signing_secret = \"file-secret\"\n\n[audit]\nretention_days = 90\n\
             encrypt_payloads = false\n\n[logging]\nformat = \"json\"\n",
            keys.path().display().to_string()
        ),
    )
    .unwrap();

    let config = Config::load_file(&cfg_path).unwrap();

    let manager = EncryptionManager::new(
        EncryptionConfig::new(&config.keys.directory)
            .with_pbkdf2_iterations(config.crypto.pbkdf2_iterations)
            .with_signing_secret(
                config
                    .crypto
                    .signing_secret
                    .clone()
                    .unwrap_or_default()
                    .into_bytes(),
            ),
    );
    manager.initialize().unwrap();
    assert_eq!(manager.key_directory(), keys.path());

    let pool = MockPool::new();
    let writer = AuditWriter::builder(pool.shared(), Arc::new(RegexPiiDetector::new()))
        .encryption(Arc::new(manager))
        .encrypt_payloads(config.audit.encrypt_payloads)
        .retention_days(config.audit.retention_days)
        .build();
    assert!(!writer.encrypts_payloads());
    assert_eq!(writer.retention_days(), 90);

    writer.store_audit_log(test_audit_entry()).await.unwrap();
    assert_eq!(pool.release_count(), 1);

    let log = LogConfig::from_section(&config.logging).unwrap();
    assert_eq!(log.format, LogFormat::Json);
}

#[test]
fn test_stats_report_all_key_types() {
    let dir = test_key_dir();
    let manager = EncryptionManager::new(test_encryption_config(dir.path()));

    assert!(!manager.encryption_stats().initialized);

    manager.initialize().unwrap();
    let stats = manager.encryption_stats();
    assert!(stats.initialized);
    assert_eq!(stats.keys.len(), KeyType::ALL.len());
    assert_eq!(stats.algorithms.symmetric, "aes-256-gcm");
}
