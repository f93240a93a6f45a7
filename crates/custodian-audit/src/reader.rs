//! Audit trail reader.
//!
//! Filtered, paginated retrieval. Rows come back exactly as stored; fields
//! the writer encrypted stay encrypted until the caller runs
//! [`StoredAuditLog::decrypt_fields`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use custodian_storage::{ConnectionPool, QueryResult, SqlValue, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::{AuditSessionStats, StoredAuditLog};
use crate::error::{AuditError, AuditResult};

/// Page size used when the caller does not choose one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: u32 = 1000;

const AUDIT_COLUMNS: &str = "id, session_id, message_id, user_query_redacted, user_query_hash, \
    final_response_redacted, final_response_hash, confidence_score, accuracy_score, \
    response_time_ms, model_name, embedding_model, retrieval_strategy, user_agent, ip_hash, \
    request_id, pii_detected, pii_types, compliance_flags, metadata, retention_until, created_at";

const SESSION_STATS_QUERY: &str = "SELECT session_id, total_interactions, total_response_time_ms, \
    avg_confidence_score, confidence_samples, pii_detections, first_interaction_at, \
    last_interaction_at \
    FROM audit_session_stats WHERE session_id = $1";

/// Row selection. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogFilter {
    /// Only this session.
    pub session_id: Option<String>,
    /// `created_at >= start_date`.
    pub start_date: Option<DateTime<Utc>>,
    /// `created_at <= end_date`.
    pub end_date: Option<DateTime<Utc>>,
    /// Only this model.
    pub model_name: Option<String>,
    /// Only rows with (or without) detected PII.
    pub pii_detected: Option<bool>,
}

impl AuditLogFilter {
    /// Match every row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one session.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Restrict to an inclusive time range.
    #[must_use]
    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    /// Restrict to rows created at or after `start`.
    #[must_use]
    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    /// Restrict to rows created at or before `end`.
    #[must_use]
    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Restrict to one model.
    #[must_use]
    pub fn model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    /// Restrict by PII flag.
    #[must_use]
    pub fn pii_detected(mut self, detected: bool) -> Self {
        self.pii_detected = Some(detected);
        self
    }

    /// `WHERE` clause (empty when unconstrained) and its parameters,
    /// numbered from `$1`.
    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        let mut push = |column_op: &str, value: SqlValue| {
            params.push(value);
            conditions.push(format!("{column_op} ${}", params.len()));
        };

        if let Some(session_id) = &self.session_id {
            push("session_id =", SqlValue::from(session_id.as_str()));
        }
        if let Some(start) = self.start_date {
            push("created_at >=", SqlValue::from(start));
        }
        if let Some(end) = self.end_date {
            push("created_at <=", SqlValue::from(end));
        }
        if let Some(model) = &self.model_name {
            push("model_name =", SqlValue::from(model.as_str()));
        }
        if let Some(detected) = self.pii_detected {
            push("pii_detected =", SqlValue::from(detected));
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

/// Page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum rows to return.
    pub limit: u32,
    /// Rows to skip.
    pub offset: u64,
}

impl Pagination {
    /// Explicit window.
    #[must_use]
    pub const fn new(limit: u32, offset: u64) -> Self {
        Self { limit, offset }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, 0)
    }
}

/// Reads the audit trail.
pub struct AuditReader {
    pool: Arc<dyn ConnectionPool>,
    max_page_size: u32,
}

impl AuditReader {
    /// Reader over `pool` with the default page cap.
    #[must_use]
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            pool,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    /// Override the page cap (at least 1).
    #[must_use]
    pub fn with_max_page_size(mut self, max: u32) -> Self {
        self.max_page_size = max.max(1);
        self
    }

    /// Page cap in effect.
    #[must_use]
    pub const fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    /// Rows matching `filter`, newest first.
    ///
    /// The limit is clamped to `1..=max_page_size`. An empty page is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::RetrievalFailed`] on any database or decoding
    /// failure; no partial page is returned.
    pub async fn get_audit_logs(
        &self,
        filter: &AuditLogFilter,
        page: Pagination,
    ) -> AuditResult<Vec<StoredAuditLog>> {
        let (where_clause, mut params) = filter.where_clause();
        let limit = page.limit.clamp(1, self.max_page_size);

        params.push(SqlValue::from(limit));
        let limit_idx = params.len();
        params.push(SqlValue::Int(i64::try_from(page.offset).unwrap_or(i64::MAX)));
        let offset_idx = params.len();

        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs{where_clause} \
             ORDER BY created_at DESC, id DESC LIMIT ${limit_idx} OFFSET ${offset_idx}"
        );

        let result = self
            .run(&sql, &params)
            .await
            .map_err(AuditError::RetrievalFailed)?;
        let logs = result
            .rows
            .iter()
            .map(|row| row.decode::<StoredAuditLog>())
            .collect::<StorageResult<Vec<_>>>()
            .map_err(AuditError::RetrievalFailed)?;

        debug!(rows = logs.len(), limit, offset = page.offset, "Audit logs retrieved");
        Ok(logs)
    }

    /// Number of rows matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::RetrievalFailed`] on database failure or an
    /// unparseable count.
    pub async fn get_audit_log_count(&self, filter: &AuditLogFilter) -> AuditResult<u64> {
        let (where_clause, params) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) AS count FROM audit_logs{where_clause}");

        let result = self
            .run(&sql, &params)
            .await
            .map_err(AuditError::RetrievalFailed)?;
        let count = result
            .first()
            .ok_or_else(|| StorageError::Decode("count query returned no rows".to_string()))
            .and_then(|row| row.get_i64("count"))
            .and_then(|n| {
                u64::try_from(n).map_err(|_| StorageError::Decode(format!("negative count {n}")))
            })
            .map_err(AuditError::RetrievalFailed)?;

        debug!(count, "Audit log count retrieved");
        Ok(count)
    }

    /// Aggregates for one session, if it has any stored interactions.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::RetrievalFailed`] on database or decoding failure.
    pub async fn get_session_stats(
        &self,
        session_id: &str,
    ) -> AuditResult<Option<AuditSessionStats>> {
        let result = self
            .run(SESSION_STATS_QUERY, &[SqlValue::from(session_id)])
            .await
            .map_err(AuditError::RetrievalFailed)?;
        result
            .first()
            .map(|row| row.decode::<AuditSessionStats>())
            .transpose()
            .map_err(AuditError::RetrievalFailed)
    }

    async fn run(&self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult> {
        let mut client = self.pool.connect().await?;
        let result = client.query(sql, params).await;
        client.release();
        result
    }
}

impl std::fmt::Debug for AuditReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditReader")
            .field("max_page_size", &self.max_page_size)
            .finish_non_exhaustive()
    }
}
