//! Audit entry types.
//!
//! [`AuditLogEntry`] is what callers hand to the writer. [`StoredAuditLog`]
//! is what the reader returns: redacted text, content hashes, and the
//! compliance metadata the writer derived. Neither is ever updated in place.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use custodian_crypto::{EncryptedPayload, EncryptionManager, KeyType};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuditError, AuditResult};

/// Database-generated identifier of a stored audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AuditLogId(i64);

impl AuditLogId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AuditLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AuditLogId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

// Drivers return BIGSERIAL ids as numbers or as text.
impl<'de> Deserialize<'de> for AuditLogId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(id) => Ok(Self(id)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// One interaction to persist.
///
/// `ip_address` is hashed by the writer and never stored raw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Chat session.
    pub session_id: String,
    /// Message identifier, if the caller assigned one.
    pub message_id: Option<String>,
    /// User input, before redaction.
    pub user_query: String,
    /// Assistant output, before redaction.
    pub final_response: String,
    /// Model confidence in `[0, 1]`.
    pub confidence_score: Option<f64>,
    /// Offline accuracy score.
    pub accuracy_score: Option<f64>,
    /// End-to-end latency.
    pub response_time_ms: Option<i64>,
    /// Generating model.
    pub model_name: Option<String>,
    /// Embedding model used for retrieval.
    pub embedding_model: Option<String>,
    /// Retrieval strategy name.
    pub retrieval_strategy: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Client IP, raw.
    pub ip_address: Option<String>,
    /// Upstream request id.
    pub request_id: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AuditLogEntry {
    /// Entry with the required fields set.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        user_query: impl Into<String>,
        final_response: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_query: user_query.into(),
            final_response: final_response.into(),
            ..Self::default()
        }
    }
}

/// Input to [`AuditWriter::log_interaction`](crate::AuditWriter::log_interaction).
///
/// Same content as [`AuditLogEntry`] without a message id; one is generated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionData {
    /// Chat session.
    pub session_id: String,
    /// User input.
    pub query: String,
    /// Assistant output.
    pub response: String,
    /// Model confidence.
    pub confidence_score: Option<f64>,
    /// Accuracy score.
    pub accuracy_score: Option<f64>,
    /// Latency.
    pub response_time_ms: Option<i64>,
    /// Generating model.
    pub model_name: Option<String>,
    /// Embedding model.
    pub embedding_model: Option<String>,
    /// Retrieval strategy.
    pub retrieval_strategy: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Client IP, raw.
    pub ip_address: Option<String>,
    /// Upstream request id.
    pub request_id: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl InteractionData {
    /// Interaction with the required fields set.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        query: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            response: response.into(),
            ..Self::default()
        }
    }

    pub(crate) fn into_entry(self, message_id: String) -> AuditLogEntry {
        AuditLogEntry {
            session_id: self.session_id,
            message_id: Some(message_id),
            user_query: self.query,
            final_response: self.response,
            confidence_score: self.confidence_score,
            accuracy_score: self.accuracy_score,
            response_time_ms: self.response_time_ms,
            model_name: self.model_name,
            embedding_model: self.embedding_model,
            retrieval_strategy: self.retrieval_strategy,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            request_id: self.request_id,
            metadata: self.metadata,
        }
    }
}

/// Compliance metadata derived by the writer and stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    /// Any PII found in the query or response.
    pub pii_detected: bool,
    /// PII kinds found, sorted and de-duplicated.
    pub pii_types: Vec<String>,
    /// The row holds personal data subject to erasure requests.
    pub gdpr_relevant: bool,
    /// A client IP was supplied and stored only as a hash.
    pub ip_hashed: bool,
    /// Query, response and metadata were encrypted at rest.
    pub encrypted: bool,
    /// Retention period applied.
    pub retention_days: u32,
}

/// An audit row as read back from storage.
///
/// When the writer encrypted payloads, the redacted text and metadata fields
/// hold encrypted payload JSON; see [`decrypt_fields`](Self::decrypt_fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAuditLog {
    /// Row id.
    pub id: AuditLogId,
    /// Chat session.
    pub session_id: String,
    /// Message id.
    pub message_id: Option<String>,
    /// Redacted user input.
    pub user_query_redacted: String,
    /// SHA-256 of the redacted user input.
    pub user_query_hash: String,
    /// Redacted assistant output.
    pub final_response_redacted: String,
    /// SHA-256 of the redacted assistant output.
    pub final_response_hash: String,
    /// Model confidence.
    pub confidence_score: Option<f64>,
    /// Accuracy score.
    pub accuracy_score: Option<f64>,
    /// Latency.
    pub response_time_ms: Option<i64>,
    /// Generating model.
    pub model_name: Option<String>,
    /// Embedding model.
    pub embedding_model: Option<String>,
    /// Retrieval strategy.
    pub retrieval_strategy: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// SHA-256 of the client IP.
    pub ip_hash: Option<String>,
    /// Upstream request id.
    pub request_id: Option<String>,
    /// Any PII detected.
    #[serde(default)]
    pub pii_detected: bool,
    /// PII kinds detected.
    #[serde(default, deserialize_with = "null_as_default")]
    pub pii_types: Vec<String>,
    /// Compliance flags as stored.
    #[serde(default)]
    pub compliance_flags: Value,
    /// Metadata as stored (possibly an encrypted payload).
    #[serde(default)]
    pub metadata: Value,
    /// When the row becomes eligible for purge.
    pub retention_until: Option<DateTime<Utc>>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

impl StoredAuditLog {
    /// Whether the writer encrypted this row's payload fields, per its
    /// stored compliance flags.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        matches!(self.compliance_flags.get("encrypted"), Some(Value::Bool(true)))
    }

    /// Decrypt the query, response and metadata fields with the `audit` key.
    ///
    /// Rows not flagged as encrypted are returned unchanged, whatever their
    /// text contains. In flagged rows the text columns must hold payload
    /// JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Crypto`] if a field fails to decrypt, or
    /// [`AuditError::Serialization`] if a decrypted text field is not text.
    pub fn decrypt_fields(mut self, encryption: &EncryptionManager) -> AuditResult<Self> {
        if !self.is_encrypted() {
            return Ok(self);
        }
        self.user_query_redacted = decrypt_text(encryption, &self.user_query_redacted)?;
        self.final_response_redacted = decrypt_text(encryption, &self.final_response_redacted)?;
        self.metadata = encryption.decrypt(&self.metadata, KeyType::Audit)?;
        Ok(self)
    }
}

fn decrypt_text(encryption: &EncryptionManager, text: &str) -> AuditResult<String> {
    let payload = EncryptedPayload::from_json_text(text)?;
    match encryption.decrypt_payload(&payload, KeyType::Audit)?.into_value() {
        Value::String(s) => Ok(s),
        other => Err(AuditError::Serialization(format!(
            "expected text after decryption, got {other}"
        ))),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Per-session aggregates, upserted with every audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSessionStats {
    /// Chat session.
    pub session_id: String,
    /// Number of stored interactions.
    pub total_interactions: i64,
    /// Sum of response latencies.
    pub total_response_time_ms: i64,
    /// Mean of the confidence scores reported so far.
    pub avg_confidence_score: Option<f64>,
    /// Interactions that reported a confidence score.
    #[serde(default)]
    pub confidence_samples: i64,
    /// Interactions in which PII was detected.
    pub pii_detections: i64,
    /// First stored interaction.
    pub first_interaction_at: DateTime<Utc>,
    /// Most recent stored interaction.
    pub last_interaction_at: DateTime<Utc>,
}
