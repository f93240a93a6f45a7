//! End-to-end tests for the audit writer and reader over a recording pool.

use std::sync::Arc;

use custodian_audit::{
    AuditError, AuditLogFilter, AuditLogId, AuditReader, AuditWriter, MAX_PAGE_SIZE, Pagination,
    PiiKind, RegexPiiDetector,
};
use custodian_crypto::CipherEngine;
use custodian_storage::{SqlType, SqlValue};
use custodian_test::prelude::*;
use serde_json::{Value, json};

// Positions in the audit insert parameter list.
const USER_QUERY_REDACTED: usize = 2;
const USER_QUERY_HASH: usize = 3;
const FINAL_RESPONSE_REDACTED: usize = 4;
const FINAL_RESPONSE_HASH: usize = 5;
const IP_HASH: usize = 13;
const PII_DETECTED: usize = 15;
const PII_TYPES: usize = 16;
const COMPLIANCE_FLAGS: usize = 17;
const METADATA: usize = 18;

fn writer(pool: &MockPool) -> AuditWriter {
    AuditWriter::builder(pool.shared(), Arc::new(RegexPiiDetector::new())).build()
}

fn audit_insert(pool: &MockPool) -> Vec<SqlValue> {
    pool.find("INSERT INTO audit_logs")
        .expect("audit insert was not executed")
        .params
}

fn text(value: &SqlValue) -> &str {
    match value {
        SqlValue::Text(s) => s,
        other => panic!("expected text, got {other:?}"),
    }
}

fn json_param(value: &SqlValue) -> &Value {
    match value {
        SqlValue::Json(v) => v,
        other => panic!("expected json, got {other:?}"),
    }
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_email_is_redacted_and_content_hashed() {
    init_test_logging();
    let pool = MockPool::new();

    let id = writer(&pool)
        .store_audit_log(test_audit_entry_with_pii())
        .await
        .unwrap();
    assert_eq!(id, AuditLogId::new(1));

    let params = audit_insert(&pool);
    let query = text(&params[USER_QUERY_REDACTED]);
    assert_eq!(query, "My email is [REDACTED_PII]");
    assert!(!query.contains("test@example.com"));

    let query_hash = text(&params[USER_QUERY_HASH]);
    let response_hash = text(&params[FINAL_RESPONSE_HASH]);
    assert!(is_sha256_hex(query_hash));
    assert!(is_sha256_hex(response_hash));
    assert_eq!(
        query_hash,
        CipherEngine::hash(b"My email is [REDACTED_PII]", None)
    );

    assert_eq!(params[PII_DETECTED], SqlValue::Bool(true));
    assert_eq!(params[PII_TYPES], SqlValue::TextArray(vec!["email".into()]));

    let ip_hash = text(&params[IP_HASH]);
    assert!(is_sha256_hex(ip_hash));
    assert_ne!(ip_hash, "192.168.1.1");

    let flags = json_param(&params[COMPLIANCE_FLAGS]);
    assert_eq!(flags["pii_detected"], json!(true));
    assert_eq!(flags["gdpr_relevant"], json!(true));
    assert_eq!(flags["ip_hashed"], json!(true));
    assert_eq!(flags["encrypted"], json!(false));
}

#[tokio::test]
async fn test_store_runs_one_transaction() {
    let pool = MockPool::new();

    writer(&pool)
        .store_audit_log(test_audit_entry())
        .await
        .unwrap();

    let statements = pool.statements();
    assert_eq!(statements.len(), 4);
    assert_eq!(statements[0], "BEGIN");
    assert!(statements[1].starts_with("INSERT INTO audit_logs"));
    assert!(statements[2].starts_with("INSERT INTO audit_session_stats"));
    assert_eq!(statements[3], "COMMIT");
    assert_eq!(pool.connect_count(), 1);
    assert_eq!(pool.release_count(), 1);

    let stats = pool.find("audit_session_stats").unwrap().params;
    assert_eq!(stats[0], SqlValue::Text("session-test".into()));
    assert_eq!(stats[1], SqlValue::Int(120));
    assert_eq!(stats[3], SqlValue::Int(0));
}

#[tokio::test]
async fn test_unscored_interactions_do_not_dilute_confidence() {
    let pool = MockPool::new();
    let writer = writer(&pool);

    for score in [Some(0.8), None, Some(0.2)] {
        let mut entry = test_audit_entry();
        entry.confidence_score = score;
        writer.store_audit_log(entry).await.unwrap();
    }

    let upserts: Vec<_> = pool
        .queries()
        .into_iter()
        .filter(|q| q.sql.starts_with("INSERT INTO audit_session_stats"))
        .collect();
    assert_eq!(upserts.len(), 3);
    assert_eq!(upserts[0].params[2], SqlValue::Float(0.8));
    assert_eq!(upserts[1].params[2], SqlValue::Null(SqlType::Float));
    assert_eq!(upserts[2].params[2], SqlValue::Float(0.2));

    // The running mean divides by scored interactions, so 0.8, none, 0.2
    // averages to 0.5 rather than 0.6.
    let sql = &upserts[0].sql;
    assert!(sql.contains("/ (audit_session_stats.confidence_samples + 1)"));
    assert!(!sql.contains("/ (audit_session_stats.total_interactions + 1)"));
}

#[tokio::test]
async fn test_insert_failure_is_store_failed_and_releases_once() {
    let pool = MockPool::new().failing_on("INSERT INTO audit_logs", "insert failed");

    let err = writer(&pool)
        .store_audit_log(test_audit_entry())
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::StoreFailed(_)));
    assert_eq!(err.to_string(), "Failed to store audit log");
    let cause = std::error::Error::source(&err).unwrap().to_string();
    assert!(cause.contains("insert failed"), "cause: {cause}");

    assert_eq!(pool.release_count(), 1);
    assert!(pool.executed("ROLLBACK"));
    assert!(!pool.executed("COMMIT"));
}

#[tokio::test]
async fn test_commit_failure_rolls_back() {
    let pool = MockPool::new().failing_on("COMMIT", "serialization failure");

    let err = writer(&pool)
        .store_audit_log(test_audit_entry())
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::StoreFailed(_)));
    assert_eq!(pool.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(pool.release_count(), 1);
}

#[tokio::test]
async fn test_connect_failure_is_store_failed() {
    let pool = MockPool::new().failing_connect("connection refused");

    let err = writer(&pool)
        .store_audit_log(test_audit_entry())
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::StoreFailed(_)));
    assert_eq!(pool.release_count(), 0);
    assert!(pool.statements().is_empty());
}

#[tokio::test]
async fn test_log_interaction_swallows_failures() {
    init_test_logging();
    let pool = MockPool::new().failing_on("INSERT INTO audit_logs", "disk full");

    let result = writer(&pool).log_interaction(test_interaction()).await;

    assert_eq!(result, None);
    assert_eq!(pool.release_count(), 1);
}

#[tokio::test]
async fn test_log_interaction_generates_message_id() {
    let pool = MockPool::new();

    let id = writer(&pool).log_interaction(test_interaction()).await;
    assert_eq!(id, Some(AuditLogId::new(1)));

    let params = audit_insert(&pool);
    match &params[1] {
        SqlValue::Text(message_id) => assert!(message_id.starts_with("msg_")),
        other => panic!("expected message id, got {other:?}"),
    }
}

#[test]
fn test_hash_ip() {
    assert_eq!(AuditWriter::hash_ip(None), None);

    let hashed = AuditWriter::hash_ip(Some("192.168.1.1")).unwrap();
    assert!(is_sha256_hex(&hashed));
    assert_ne!(hashed, "192.168.1.1");
}

#[tokio::test]
async fn test_custom_detector_is_used() {
    let pool = MockPool::new();
    let detector = Arc::new(MockPiiDetector::new().flagging("Bob", PiiKind::Email));
    let writer = AuditWriter::builder(pool.shared(), detector.clone()).build();

    let mut entry = test_audit_entry();
    entry.user_query = "Bob asked".to_string();
    writer.store_audit_log(entry).await.unwrap();

    let params = audit_insert(&pool);
    assert_eq!(text(&params[USER_QUERY_REDACTED]), "[REDACTED_PII] asked");
    assert_eq!(detector.call_count(), 2);
}

#[tokio::test]
async fn test_retention_is_applied() {
    let pool = MockPool::new();
    let writer = AuditWriter::builder(pool.shared(), Arc::new(RegexPiiDetector::new()))
        .retention_days(30)
        .build();

    writer.store_audit_log(test_audit_entry()).await.unwrap();

    let params = audit_insert(&pool);
    let (SqlValue::Timestamp(retention_until), SqlValue::Timestamp(created_at)) =
        (&params[19], &params[20])
    else {
        panic!("expected timestamps");
    };
    assert_eq!((*retention_until - *created_at).num_days(), 30);
    assert_eq!(json_param(&params[COMPLIANCE_FLAGS])["retention_days"], json!(30));
}

// ---------------------------------------------------------------------------
// Encryption at rest
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_encrypted_write_reads_back() {
    let dir = test_key_dir();
    let manager = test_encryption_manager(dir.path()).unwrap();
    let write_pool = MockPool::new();
    let writer = AuditWriter::builder(write_pool.shared(), Arc::new(RegexPiiDetector::new()))
        .encryption(manager.clone())
        .build();
    assert!(writer.encrypts_payloads());

    writer
        .store_audit_log(test_audit_entry_with_pii())
        .await
        .unwrap();

    let params = audit_insert(&write_pool);
    let sealed_query = text(&params[USER_QUERY_REDACTED]).to_string();
    assert!(!sealed_query.contains("REDACTED_PII"));
    assert_eq!(
        text(&params[USER_QUERY_HASH]),
        CipherEngine::hash(b"My email is [REDACTED_PII]", None)
    );
    assert_eq!(json_param(&params[METADATA])["encrypted"], json!(true));
    assert_eq!(json_param(&params[COMPLIANCE_FLAGS])["encrypted"], json!(true));

    // Feed the stored columns back through the reader.
    let mut row = test_stored_row(1, "session-pii");
    row["user_query_redacted"] = json!(sealed_query);
    row["final_response_redacted"] = json!(text(&params[FINAL_RESPONSE_REDACTED]));
    row["metadata"] = json_param(&params[METADATA]).clone();
    row["compliance_flags"] = json_param(&params[COMPLIANCE_FLAGS]).clone();
    let read_pool = MockPool::new().with_rows("FROM audit_logs", vec![row]);
    let reader = AuditReader::new(read_pool.shared());

    let logs = reader
        .get_audit_logs(&AuditLogFilter::new(), Pagination::default())
        .await
        .unwrap();
    let log = logs.into_iter().next().unwrap().decrypt_fields(&manager).unwrap();

    assert_eq!(log.user_query_redacted, "My email is [REDACTED_PII]");
    assert_eq!(log.final_response_redacted, "Thanks, we will reply there.");
    assert_eq!(log.metadata, json!({"channel": "web"}));
}

#[tokio::test]
async fn test_unencrypted_rows_pass_through_decryption() {
    let dir = test_key_dir();
    let manager = test_encryption_manager(dir.path()).unwrap();
    let write_pool = MockPool::new();
    let writer = writer(&write_pool);
    assert!(!writer.encrypts_payloads());

    let mut entry = test_audit_entry();
    entry.user_query = r#"{"encrypted": true}"#.to_string();
    entry.final_response = r#"{"encrypted": true, "note": "hi"}"#.to_string();
    writer.store_audit_log(entry).await.unwrap();

    let params = audit_insert(&write_pool);
    assert_eq!(text(&params[USER_QUERY_REDACTED]), r#"{"encrypted": true}"#);
    assert_eq!(json_param(&params[COMPLIANCE_FLAGS])["encrypted"], json!(false));

    let mut row = test_stored_row(1, "session-test");
    row["user_query_redacted"] = json!(text(&params[USER_QUERY_REDACTED]));
    row["final_response_redacted"] = json!(text(&params[FINAL_RESPONSE_REDACTED]));
    row["compliance_flags"] = json_param(&params[COMPLIANCE_FLAGS]).clone();
    row["metadata"] = json!({"encrypted": false, "channel": "web"});
    let read_pool = MockPool::new().with_rows("FROM audit_logs", vec![row]);
    let reader = AuditReader::new(read_pool.shared());

    let stored = reader
        .get_audit_logs(&AuditLogFilter::new(), Pagination::default())
        .await
        .unwrap()
        .remove(0);
    assert!(!stored.is_encrypted());
    let log = stored.clone().decrypt_fields(&manager).unwrap();

    assert_eq!(log, stored);
    assert_eq!(log.user_query_redacted, r#"{"encrypted": true}"#);
    assert_eq!(log.final_response_redacted, r#"{"encrypted": true, "note": "hi"}"#);
}

#[tokio::test]
async fn test_flagged_row_with_plain_text_fails_decryption() {
    let dir = test_key_dir();
    let manager = test_encryption_manager(dir.path()).unwrap();

    let mut row = test_stored_row(1, "session-test");
    row["compliance_flags"]["encrypted"] = json!(true);
    let read_pool = MockPool::new().with_rows("FROM audit_logs", vec![row]);
    let reader = AuditReader::new(read_pool.shared());
    let stored = reader
        .get_audit_logs(&AuditLogFilter::new(), Pagination::default())
        .await
        .unwrap()
        .remove(0);

    assert!(stored.is_encrypted());
    assert!(matches!(
        stored.decrypt_fields(&manager),
        Err(AuditError::Crypto(_))
    ));
}

#[tokio::test]
async fn test_encryption_failure_is_store_failed() {
    let dir = test_key_dir();
    let manager = test_encryption_manager(dir.path()).unwrap();
    manager.close();

    let pool = MockPool::new();
    let writer = AuditWriter::builder(pool.shared(), Arc::new(RegexPiiDetector::new()))
        .encryption(manager)
        .build();

    let err = writer
        .store_audit_log(test_audit_entry())
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::StoreFailed(_)));
    assert_eq!(pool.connect_count(), 0);
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_count_parses_text_result() {
    let pool = MockPool::new().with_rows("COUNT(*)", vec![json!({"count": "42"})]);
    let reader = AuditReader::new(pool.shared());

    let count = reader
        .get_audit_log_count(&AuditLogFilter::new())
        .await
        .unwrap();

    assert_eq!(count, 42);
    assert_eq!(pool.release_count(), 1);
}

#[tokio::test]
async fn test_count_with_filter() {
    let pool = MockPool::new().with_rows("COUNT(*)", vec![json!({"count": 3})]);
    let reader = AuditReader::new(pool.shared());

    let count = reader
        .get_audit_log_count(&AuditLogFilter::new().session("s1").pii_detected(true))
        .await
        .unwrap();
    assert_eq!(count, 3);

    let query = pool.find("COUNT(*)").unwrap();
    assert!(query.sql.ends_with("WHERE session_id = $1 AND pii_detected = $2"));
    assert_eq!(
        query.params,
        vec![SqlValue::Text("s1".into()), SqlValue::Bool(true)]
    );
}

#[tokio::test]
async fn test_rows_decode_newest_first() {
    let pool = MockPool::new().with_rows(
        "FROM audit_logs",
        vec![test_stored_row(8, "s1"), test_stored_row(7, "s1")],
    );
    let reader = AuditReader::new(pool.shared());

    let logs = reader
        .get_audit_logs(&AuditLogFilter::new().session("s1"), Pagination::default())
        .await
        .unwrap();

    let ids: Vec<i64> = logs.iter().map(|l| l.id.get()).collect();
    assert_eq!(ids, vec![8, 7]);
    let sql = pool.find("FROM audit_logs").unwrap().sql;
    assert!(sql.contains("ORDER BY created_at DESC"));
}

#[tokio::test]
async fn test_pagination_is_clamped() {
    let pool = MockPool::new();
    let reader = AuditReader::new(pool.shared());

    reader
        .get_audit_logs(&AuditLogFilter::new(), Pagination::new(5000, 10))
        .await
        .unwrap();
    reader
        .get_audit_logs(&AuditLogFilter::new(), Pagination::new(0, 0))
        .await
        .unwrap();

    let queries = pool.queries();
    assert_eq!(
        queries[0].params,
        vec![SqlValue::Int(i64::from(MAX_PAGE_SIZE)), SqlValue::Int(10)]
    );
    assert_eq!(queries[1].params, vec![SqlValue::Int(1), SqlValue::Int(0)]);
    assert!(queries[0].sql.ends_with("LIMIT $1 OFFSET $2"));
}

#[tokio::test]
async fn test_read_error_is_retrieval_failed() {
    let pool = MockPool::new().failing_on("FROM audit_logs", "statement timeout");
    let reader = AuditReader::new(pool.shared());

    let err = reader
        .get_audit_logs(&AuditLogFilter::new(), Pagination::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::RetrievalFailed(_)));
    assert_eq!(err.to_string(), "Failed to retrieve audit logs");
    assert_eq!(pool.release_count(), 1);
}

#[tokio::test]
async fn test_undecodable_row_is_retrieval_failed() {
    let pool = MockPool::new().with_rows("FROM audit_logs", vec![json!({"id": "not-a-number"})]);
    let reader = AuditReader::new(pool.shared());

    let err = reader
        .get_audit_logs(&AuditLogFilter::new(), Pagination::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::RetrievalFailed(_)));
}

#[tokio::test]
async fn test_session_stats() {
    let pool = MockPool::new().with_rows(
        "FROM audit_session_stats",
        vec![json!({
            "session_id": "s1",
            "total_interactions": 3,
            "total_response_time_ms": 360,
            "avg_confidence_score": 0.8,
            "confidence_samples": 2,
            "pii_detections": 1,
            "first_interaction_at": "2024-03-01T00:00:00+00:00",
            "last_interaction_at": "2024-03-01T00:05:00+00:00"
        })],
    );
    let reader = AuditReader::new(pool.shared());

    let stats = reader.get_session_stats("s1").await.unwrap().unwrap();
    assert_eq!(stats.total_interactions, 3);
    assert_eq!(stats.confidence_samples, 2);
    assert_eq!(stats.pii_detections, 1);

    let empty = AuditReader::new(MockPool::new().shared());
    assert!(empty.get_session_stats("unknown").await.unwrap().is_none());
}
