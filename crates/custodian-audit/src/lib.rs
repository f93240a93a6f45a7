//! Custodian Audit - PII-aware, transactional audit trail.
//!
//! This crate provides:
//! - [`AuditWriter`]: redacts PII, hashes content and client IPs, optionally
//!   encrypts payloads, and persists each entry with its session aggregates
//!   in one transaction
//! - [`AuditReader`]: filtered, paginated retrieval and counting
//! - [`PiiDetector`]: the detection capability the writer depends on, with
//!   a regex-based default ([`RegexPiiDetector`])
//!
//! # Error Policy
//!
//! [`AuditWriter::store_audit_log`] surfaces every failure as
//! [`AuditError::StoreFailed`]. [`AuditWriter::log_interaction`] logs and
//! swallows failures, returning `None`, so audit unavailability never blocks
//! the request that produced the interaction.
//!
//! # Expected Schema
//!
//! ```sql
//! CREATE TABLE audit_logs (
//!     id BIGSERIAL PRIMARY KEY,
//!     session_id TEXT NOT NULL,
//!     message_id TEXT,
//!     user_query_redacted TEXT NOT NULL,
//!     user_query_hash TEXT NOT NULL,
//!     final_response_redacted TEXT NOT NULL,
//!     final_response_hash TEXT NOT NULL,
//!     confidence_score DOUBLE PRECISION,
//!     accuracy_score DOUBLE PRECISION,
//!     response_time_ms BIGINT,
//!     model_name TEXT,
//!     embedding_model TEXT,
//!     retrieval_strategy TEXT,
//!     user_agent TEXT,
//!     ip_hash TEXT,
//!     request_id TEXT,
//!     pii_detected BOOLEAN NOT NULL DEFAULT FALSE,
//!     pii_types TEXT[],
//!     compliance_flags JSONB,
//!     metadata JSONB,
//!     retention_until TIMESTAMPTZ,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE TABLE audit_session_stats (
//!     session_id TEXT PRIMARY KEY,
//!     total_interactions BIGINT NOT NULL,
//!     total_response_time_ms BIGINT NOT NULL,
//!     avg_confidence_score DOUBLE PRECISION,
//!     confidence_samples BIGINT NOT NULL DEFAULT 0,
//!     pii_detections BIGINT NOT NULL,
//!     first_interaction_at TIMESTAMPTZ NOT NULL,
//!     last_interaction_at TIMESTAMPTZ NOT NULL
//! );
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod entry;
mod error;
pub mod pii;
mod reader;
mod writer;

pub use entry::{
    AuditLogEntry, AuditLogId, AuditSessionStats, ComplianceFlags, InteractionData,
    StoredAuditLog,
};
pub use error::{AuditError, AuditResult, StoreFailure};
pub use pii::{
    PiiDetection, PiiDetector, PiiKind, PiiRedaction, PiiScan, PiiSummary, RegexPiiDetector,
};
pub use reader::{AuditLogFilter, AuditReader, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, Pagination};
pub use writer::{AuditWriter, AuditWriterBuilder, DEFAULT_RETENTION_DAYS};
