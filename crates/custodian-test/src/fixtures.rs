//! Test fixtures for common types.

use std::path::Path;
use std::sync::Arc;

use custodian_audit::{AuditLogEntry, InteractionData};
use custodian_crypto::{CryptoResult, EncryptionConfig, EncryptionManager};
use serde_json::{Value, json};

/// Signing secret used by [`test_encryption_manager`].
pub const TEST_SIGNING_SECRET: &[u8] = b"custodian-test-signing-secret";

/// Iteration count that keeps PBKDF2 fast in tests.
pub const TEST_PBKDF2_ITERATIONS: u32 = 1_000;

/// A fresh temporary directory for key files.
///
/// # Panics
///
/// Panics if the directory cannot be created.
#[must_use]
pub fn test_key_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("failed to create temp key directory")
}

/// Manager configuration over `key_dir` with a fixed signing secret.
#[must_use]
pub fn test_encryption_config(key_dir: &Path) -> EncryptionConfig {
    EncryptionConfig::new(key_dir)
        .with_signing_secret(TEST_SIGNING_SECRET.to_vec())
        .with_pbkdf2_iterations(TEST_PBKDF2_ITERATIONS)
}

/// An initialized manager over `key_dir`.
///
/// # Errors
///
/// Propagates key generation or load failures.
pub fn test_encryption_manager(key_dir: &Path) -> CryptoResult<Arc<EncryptionManager>> {
    let manager = EncryptionManager::new(test_encryption_config(key_dir));
    manager.initialize()?;
    Ok(Arc::new(manager))
}

/// An entry with no PII.
#[must_use]
pub fn test_audit_entry() -> AuditLogEntry {
    let mut entry = AuditLogEntry::new(
        "session-test",
        "What are your opening hours?",
        "We are open 9 to 5.",
    );
    entry.message_id = Some("msg_test_00000001".to_string());
    entry.confidence_score = Some(0.9);
    entry.response_time_ms = Some(120);
    entry.model_name = Some("test-model".to_string());
    entry
}

/// An entry whose query contains an email address and which carries a
/// client IP.
#[must_use]
pub fn test_audit_entry_with_pii() -> AuditLogEntry {
    let mut entry = AuditLogEntry::new(
        "session-pii",
        "My email is test@example.com",
        "Thanks, we will reply there.",
    );
    entry.ip_address = Some("192.168.1.1".to_string());
    entry.user_agent = Some("test-agent/1.0".to_string());
    entry
        .metadata
        .insert("channel".to_string(), Value::String("web".to_string()));
    entry
}

/// An interaction for
/// [`AuditWriter::log_interaction`](custodian_audit::AuditWriter::log_interaction).
#[must_use]
pub fn test_interaction() -> InteractionData {
    let mut data = InteractionData::new("session-test", "Hello", "Hi there");
    data.response_time_ms = Some(42);
    data
}

/// An `audit_logs` row as the database returns it.
#[must_use]
pub fn test_stored_row(id: i64, session_id: &str) -> Value {
    json!({
        "id": id,
        "session_id": session_id,
        "message_id": format!("msg_test_{id:08x}"),
        "user_query_redacted": "What are your opening hours?",
        "user_query_hash": "0".repeat(64),
        "final_response_redacted": "We are open 9 to 5.",
        "final_response_hash": "1".repeat(64),
        "confidence_score": 0.9,
        "accuracy_score": null,
        "response_time_ms": 120,
        "model_name": "test-model",
        "embedding_model": null,
        "retrieval_strategy": null,
        "user_agent": null,
        "ip_hash": null,
        "request_id": null,
        "pii_detected": false,
        "pii_types": [],
        "compliance_flags": {"pii_detected": false, "pii_types": [], "gdpr_relevant": false,
                             "ip_hashed": false, "encrypted": false, "retention_days": 2555},
        "metadata": {},
        "retention_until": "2031-03-01T00:00:00+00:00",
        "created_at": "2024-03-01T00:00:00+00:00"
    })
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; later calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
