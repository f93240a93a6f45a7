//! Audit trail writer.
//!
//! Every entry is redacted, hashed and optionally encrypted before it reaches
//! the database, then persisted together with its session aggregates in one
//! transaction:
//!
//! ```text
//! BEGIN
//! INSERT INTO audit_logs ... RETURNING id
//! INSERT INTO audit_session_stats ... ON CONFLICT (session_id) DO UPDATE ...
//! COMMIT
//! ```
//!
//! Any failure after the connection is acquired issues `ROLLBACK`, releases
//! the connection and surfaces [`AuditError::StoreFailed`].

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use custodian_crypto::{CipherEngine, CryptoResult, EncryptionManager, KeyType};
use custodian_storage::{ConnectionPool, DbClient, SqlType, SqlValue, StorageError, StorageResult};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::entry::{AuditLogEntry, AuditLogId, ComplianceFlags, InteractionData};
use crate::error::{AuditError, AuditResult};
use crate::pii::PiiDetector;

/// Default retention: seven years.
pub const DEFAULT_RETENTION_DAYS: u32 = 2555;

const INSERT_AUDIT_LOG: &str = "INSERT INTO audit_logs (\
    session_id, message_id, user_query_redacted, user_query_hash, \
    final_response_redacted, final_response_hash, confidence_score, accuracy_score, \
    response_time_ms, model_name, embedding_model, retrieval_strategy, user_agent, \
    ip_hash, request_id, pii_detected, pii_types, compliance_flags, metadata, \
    retention_until, created_at) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
    $17, $18, $19, $20, $21) \
    RETURNING id";

// The confidence mean is weighted by `confidence_samples`, not by
// `total_interactions`: interactions without a score leave both untouched.
const UPSERT_SESSION_STATS: &str = "INSERT INTO audit_session_stats (\
    session_id, total_interactions, total_response_time_ms, avg_confidence_score, \
    confidence_samples, pii_detections, first_interaction_at, last_interaction_at) \
    VALUES ($1, 1, COALESCE($2, 0), $3, CASE WHEN $3 IS NULL THEN 0 ELSE 1 END, $4, $5, $5) \
    ON CONFLICT (session_id) DO UPDATE SET \
    total_interactions = audit_session_stats.total_interactions + 1, \
    total_response_time_ms = audit_session_stats.total_response_time_ms + COALESCE($2, 0), \
    avg_confidence_score = CASE WHEN $3 IS NULL THEN audit_session_stats.avg_confidence_score \
    ELSE (COALESCE(audit_session_stats.avg_confidence_score, 0) \
    * audit_session_stats.confidence_samples + $3) \
    / (audit_session_stats.confidence_samples + 1) END, \
    confidence_samples = audit_session_stats.confidence_samples \
    + CASE WHEN $3 IS NULL THEN 0 ELSE 1 END, \
    pii_detections = audit_session_stats.pii_detections + $4, \
    last_interaction_at = $5";

/// Row content after redaction, hashing and optional encryption.
#[derive(Debug, Clone)]
struct PreparedRow {
    session_id: String,
    message_id: Option<String>,
    user_query_redacted: String,
    user_query_hash: String,
    final_response_redacted: String,
    final_response_hash: String,
    confidence_score: Option<f64>,
    accuracy_score: Option<f64>,
    response_time_ms: Option<i64>,
    model_name: Option<String>,
    embedding_model: Option<String>,
    retrieval_strategy: Option<String>,
    user_agent: Option<String>,
    ip_hash: Option<String>,
    request_id: Option<String>,
    pii_detected: bool,
    pii_types: Vec<String>,
    compliance_flags: Value,
    metadata: Value,
    retention_until: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl PreparedRow {
    fn audit_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::from(self.session_id.as_str()),
            SqlValue::nullable(self.message_id.clone(), SqlType::Text),
            SqlValue::from(self.user_query_redacted.as_str()),
            SqlValue::from(self.user_query_hash.as_str()),
            SqlValue::from(self.final_response_redacted.as_str()),
            SqlValue::from(self.final_response_hash.as_str()),
            SqlValue::nullable(self.confidence_score, SqlType::Float),
            SqlValue::nullable(self.accuracy_score, SqlType::Float),
            SqlValue::nullable(self.response_time_ms, SqlType::Int),
            SqlValue::nullable(self.model_name.clone(), SqlType::Text),
            SqlValue::nullable(self.embedding_model.clone(), SqlType::Text),
            SqlValue::nullable(self.retrieval_strategy.clone(), SqlType::Text),
            SqlValue::nullable(self.user_agent.clone(), SqlType::Text),
            SqlValue::nullable(self.ip_hash.clone(), SqlType::Text),
            SqlValue::nullable(self.request_id.clone(), SqlType::Text),
            SqlValue::from(self.pii_detected),
            SqlValue::from(self.pii_types.clone()),
            SqlValue::from(self.compliance_flags.clone()),
            SqlValue::from(self.metadata.clone()),
            SqlValue::from(self.retention_until),
            SqlValue::from(self.created_at),
        ]
    }

    fn session_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::from(self.session_id.as_str()),
            SqlValue::nullable(self.response_time_ms, SqlType::Int),
            SqlValue::nullable(self.confidence_score, SqlType::Float),
            SqlValue::Int(i64::from(self.pii_detected)),
            SqlValue::from(self.created_at),
        ]
    }
}

/// Builder for [`AuditWriter`].
pub struct AuditWriterBuilder {
    pool: Arc<dyn ConnectionPool>,
    detector: Arc<dyn PiiDetector>,
    encryption: Option<Arc<EncryptionManager>>,
    encrypt_payloads: bool,
    retention_days: u32,
}

impl AuditWriterBuilder {
    /// Encrypt query, response and metadata with the `audit` key.
    #[must_use]
    pub fn encryption(mut self, manager: Arc<EncryptionManager>) -> Self {
        self.encryption = Some(manager);
        self
    }

    /// Toggle payload encryption. Only effective with an encryption manager.
    #[must_use]
    pub fn encrypt_payloads(mut self, enabled: bool) -> Self {
        self.encrypt_payloads = enabled;
        self
    }

    /// Days until a row becomes eligible for purge.
    #[must_use]
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Build the writer.
    #[must_use]
    pub fn build(self) -> AuditWriter {
        AuditWriter {
            pool: self.pool,
            detector: self.detector,
            encryption: self.encryption,
            encrypt_payloads: self.encrypt_payloads,
            retention_days: self.retention_days,
        }
    }
}

/// Persists audit entries.
pub struct AuditWriter {
    pool: Arc<dyn ConnectionPool>,
    detector: Arc<dyn PiiDetector>,
    encryption: Option<Arc<EncryptionManager>>,
    encrypt_payloads: bool,
    retention_days: u32,
}

impl AuditWriter {
    /// Start building a writer over `pool` with the given PII detector.
    #[must_use]
    pub fn builder(
        pool: Arc<dyn ConnectionPool>,
        detector: Arc<dyn PiiDetector>,
    ) -> AuditWriterBuilder {
        AuditWriterBuilder {
            pool,
            detector,
            encryption: None,
            encrypt_payloads: true,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// Retention applied to new rows.
    #[must_use]
    pub const fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Whether new rows will be encrypted.
    #[must_use]
    pub fn encrypts_payloads(&self) -> bool {
        self.encrypt_payloads && self.encryption.is_some()
    }

    /// Redact, hash, optionally encrypt, and persist one entry.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::StoreFailed`] if encryption fails, no connection
    /// can be acquired, or any statement fails. The transaction is rolled
    /// back and the connection released before returning.
    pub async fn store_audit_log(&self, entry: AuditLogEntry) -> AuditResult<AuditLogId> {
        let row = self.prepare(entry).map_err(AuditError::store)?;
        let mut client = self.pool.connect().await.map_err(AuditError::store)?;

        match persist(client.as_mut(), &row).await {
            Ok(id) => {
                client.release();
                debug!(
                    id = %id,
                    session_id = %row.session_id,
                    pii_detected = row.pii_detected,
                    "Audit log stored"
                );
                Ok(id)
            },
            Err(e) => {
                if let Err(rollback) = client.query("ROLLBACK", &[]).await {
                    warn!(error = %rollback, "Audit log rollback failed");
                }
                client.release();
                warn!(session_id = %row.session_id, error = %e, "Failed to store audit log");
                Err(AuditError::store(e))
            },
        }
    }

    /// Build an entry with a generated message id and store it.
    ///
    /// Never fails: any error is logged and collapsed to `None`, so audit
    /// unavailability cannot break the caller's request path.
    pub async fn log_interaction(&self, data: InteractionData) -> Option<AuditLogId> {
        let message_id = generate_message_id();
        let session_id = data.session_id.clone();

        match self.store_audit_log(data.into_entry(message_id.clone())).await {
            Ok(id) => Some(id),
            Err(e) => {
                let cause = std::error::Error::source(&e).map(ToString::to_string);
                error!(
                    session_id = %session_id,
                    message_id = %message_id,
                    error = %e,
                    cause = ?cause,
                    "Audit logging failed; continuing without an audit record"
                );
                None
            },
        }
    }

    /// One-way SHA-256 of an IP address. Missing or blank input yields `None`.
    #[must_use]
    pub fn hash_ip(ip: Option<&str>) -> Option<String> {
        ip.filter(|s| !s.trim().is_empty())
            .map(|s| CipherEngine::hash(s.as_bytes(), None))
    }

    /// Redact PII through the configured detector.
    #[must_use]
    pub fn redact_pii(&self, text: &str) -> String {
        self.detector.redact(text)
    }

    fn prepare(&self, entry: AuditLogEntry) -> CryptoResult<PreparedRow> {
        let query = self.detector.detect_and_redact(&entry.user_query);
        let response = self.detector.detect_and_redact(&entry.final_response);

        let pii_detected = query.has_redactions || response.has_redactions;
        let pii_types: Vec<String> = query
            .summary
            .kinds()
            .into_iter()
            .chain(response.summary.kinds())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let user_query_hash = CipherEngine::hash(query.redacted_text.as_bytes(), None);
        let final_response_hash = CipherEngine::hash(response.redacted_text.as_bytes(), None);
        let ip_hash = Self::hash_ip(entry.ip_address.as_deref());

        let created_at = Utc::now();
        let retention_until = TimeDelta::try_days(i64::from(self.retention_days))
            .and_then(|d| created_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let encryption = self.encryption.as_deref().filter(|_| self.encrypt_payloads);

        let compliance_flags = ComplianceFlags {
            pii_detected,
            pii_types: pii_types.clone(),
            gdpr_relevant: pii_detected || ip_hash.is_some(),
            ip_hashed: ip_hash.is_some(),
            encrypted: encryption.is_some(),
            retention_days: self.retention_days,
        };
        let compliance_flags = serde_json::to_value(&compliance_flags)
            .map_err(|e| custodian_crypto::CryptoError::Internal(e.to_string()))?;

        let mut user_query_redacted = query.redacted_text;
        let mut final_response_redacted = response.redacted_text;
        let mut metadata = Value::Object(entry.metadata);

        if let Some(manager) = encryption {
            user_query_redacted = seal_text(manager, user_query_redacted)?;
            final_response_redacted = seal_text(manager, final_response_redacted)?;
            if let Some(payload) = manager.encrypt(&metadata, KeyType::Audit)? {
                metadata = payload.to_value()?;
            }
        }

        Ok(PreparedRow {
            session_id: entry.session_id,
            message_id: entry.message_id,
            user_query_redacted,
            user_query_hash,
            final_response_redacted,
            final_response_hash,
            confidence_score: entry.confidence_score,
            accuracy_score: entry.accuracy_score,
            response_time_ms: entry.response_time_ms,
            model_name: entry.model_name,
            embedding_model: entry.embedding_model,
            retrieval_strategy: entry.retrieval_strategy,
            user_agent: entry.user_agent,
            ip_hash,
            request_id: entry.request_id,
            pii_detected,
            pii_types,
            compliance_flags,
            metadata,
            retention_until,
            created_at,
        })
    }
}

impl std::fmt::Debug for AuditWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditWriter")
            .field("encrypts_payloads", &self.encrypts_payloads())
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}

async fn persist(client: &mut dyn DbClient, row: &PreparedRow) -> StorageResult<AuditLogId> {
    client.query("BEGIN", &[]).await?;

    let inserted = client.query(INSERT_AUDIT_LOG, &row.audit_params()).await?;
    let id = inserted
        .first()
        .ok_or_else(|| StorageError::Decode("audit insert returned no id".to_string()))?
        .get_i64("id")?;

    client
        .query(UPSERT_SESSION_STATS, &row.session_params())
        .await?;

    client.query("COMMIT", &[]).await?;
    Ok(AuditLogId::new(id))
}

/// Text columns hold the payload as JSON text.
fn seal_text(manager: &EncryptionManager, text: String) -> CryptoResult<String> {
    match manager.encrypt(&Value::String(text), KeyType::Audit)? {
        Some(payload) => payload.to_json_string(),
        None => Ok(String::new()),
    }
}

fn generate_message_id() -> String {
    format!(
        "msg_{}_{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}
