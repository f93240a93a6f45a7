//! Mock implementations for testing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use custodian_audit::{PiiDetection, PiiDetector, PiiKind, PiiScan};
use custodian_storage::{
    ConnectionPool, DbClient, QueryResult, Row, SqlValue, StorageError, StorageResult,
};
use serde_json::{Map, Value};

/// A statement a [`MockPool`] client executed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    /// SQL text as passed.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<SqlValue>,
}

#[derive(Debug, Clone)]
enum Outcome {
    Rows(Vec<Row>),
    Affected(u64),
    Fail(String),
}

#[derive(Debug, Default)]
struct PoolState {
    scripts: Vec<(String, Outcome)>,
    connect_failure: Option<String>,
    queries: Vec<RecordedQuery>,
    connects: usize,
    releases: usize,
    next_id: i64,
}

impl PoolState {
    /// First scripted outcome whose fragment occurs in `sql`, else the
    /// default for that statement shape.
    fn outcome_for(&mut self, sql: &str) -> Outcome {
        if let Some((_, outcome)) = self.scripts.iter().find(|(f, _)| sql.contains(f.as_str())) {
            return outcome.clone();
        }

        let upper = sql.trim_start().to_ascii_uppercase();
        if upper.contains("RETURNING ID") {
            self.next_id = self.next_id.saturating_add(1);
            let mut columns = Map::new();
            columns.insert("id".to_string(), Value::from(self.next_id));
            Outcome::Rows(vec![Row::new(columns)])
        } else if upper.starts_with("SELECT") {
            Outcome::Rows(Vec::new())
        } else {
            Outcome::Affected(0)
        }
    }
}

/// In-memory [`ConnectionPool`] that records every statement.
///
/// Clones share state, so a test keeps one handle for assertions and gives
/// another to the code under test. Unscripted statements succeed:
/// `... RETURNING id` yields an incrementing id, `SELECT` yields no rows,
/// anything else affects zero rows.
///
/// # Example
///
/// ```rust,ignore
/// let pool = MockPool::new().failing_on("INSERT INTO audit_logs", "disk full");
/// let writer = AuditWriter::builder(pool.shared(), Arc::new(MockPiiDetector::new())).build();
/// assert!(writer.store_audit_log(entry).await.is_err());
/// assert_eq!(pool.release_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockPool {
    state: Arc<Mutex<PoolState>>,
}

impl MockPool {
    /// Create a pool with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// This pool as the trait object the audit crate expects.
    #[must_use]
    pub fn shared(&self) -> Arc<dyn ConnectionPool> {
        Arc::new(self.clone())
    }

    /// Return `rows` for statements containing `fragment`.
    #[must_use]
    pub fn with_rows(self, fragment: impl Into<String>, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => Row::new(map),
                other => {
                    let mut map = Map::new();
                    map.insert("value".to_string(), other);
                    Row::new(map)
                },
            })
            .collect();
        self.script(fragment.into(), Outcome::Rows(rows))
    }

    /// Report `count` affected rows for statements containing `fragment`.
    #[must_use]
    pub fn with_affected(self, fragment: impl Into<String>, count: u64) -> Self {
        self.script(fragment.into(), Outcome::Affected(count))
    }

    /// Fail statements containing `fragment` with [`StorageError::Query`].
    #[must_use]
    pub fn failing_on(self, fragment: impl Into<String>, message: impl Into<String>) -> Self {
        self.script(fragment.into(), Outcome::Fail(message.into()))
    }

    /// Fail every `connect` with [`StorageError::Connection`].
    #[must_use]
    pub fn failing_connect(self, message: impl Into<String>) -> Self {
        self.lock().connect_failure = Some(message.into());
        self
    }

    fn script(self, fragment: String, outcome: Outcome) -> Self {
        self.lock().scripts.push((fragment, outcome));
        self
    }

    /// Every statement executed, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.lock().queries.clone()
    }

    /// SQL text of every statement executed, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.lock().queries.iter().map(|q| q.sql.clone()).collect()
    }

    /// First executed statement containing `fragment`.
    #[must_use]
    pub fn find(&self, fragment: &str) -> Option<RecordedQuery> {
        self.lock()
            .queries
            .iter()
            .find(|q| q.sql.contains(fragment))
            .cloned()
    }

    /// Whether any executed statement contains `fragment`.
    #[must_use]
    pub fn executed(&self, fragment: &str) -> bool {
        self.find(fragment).is_some()
    }

    /// Successful `connect` calls.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// `release` calls.
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.lock().releases
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn connect(&self) -> StorageResult<Box<dyn DbClient>> {
        let mut state = self.lock();
        if let Some(message) = &state.connect_failure {
            return Err(StorageError::Connection(message.clone()));
        }
        state.connects = state.connects.saturating_add(1);
        Ok(Box::new(MockClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockClient {
    state: Arc<Mutex<PoolState>>,
}

#[async_trait]
impl DbClient for MockClient {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.queries.push(RecordedQuery {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        match state.outcome_for(sql) {
            Outcome::Rows(rows) => Ok(QueryResult::from_rows(rows)),
            Outcome::Affected(n) => Ok(QueryResult::affected(n)),
            Outcome::Fail(message) => Err(StorageError::Query(message)),
        }
    }

    fn release(self: Box<Self>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.releases = state.releases.saturating_add(1);
    }
}

/// [`PiiDetector`] that flags fixed substrings.
///
/// Every occurrence of a registered needle is reported with its kind.
#[derive(Debug, Clone, Default)]
pub struct MockPiiDetector {
    needles: Vec<(String, PiiKind)>,
    calls: Arc<Mutex<usize>>,
}

impl MockPiiDetector {
    /// A detector that finds nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag every occurrence of `needle` as `kind`.
    #[must_use]
    pub fn flagging(mut self, needle: impl Into<String>, kind: PiiKind) -> Self {
        self.needles.push((needle.into(), kind));
        self
    }

    /// Number of `detect` calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PiiDetector for MockPiiDetector {
    fn detect(&self, text: &str) -> PiiScan {
        {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            *calls = calls.saturating_add(1);
        }

        let detections = self
            .needles
            .iter()
            .filter(|(needle, _)| !needle.is_empty())
            .flat_map(|(needle, kind)| {
                text.match_indices(needle.as_str()).map(|(start, m)| PiiDetection {
                    kind: *kind,
                    start,
                    end: start.saturating_add(m.len()),
                })
            })
            .collect();
        PiiScan::from_detections(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_pool_records_and_counts() {
        let pool = MockPool::new().with_rows("FROM t", vec![serde_json::json!({"a": 1})]);

        let mut client = pool.connect().await.unwrap();
        let result = client
            .query("SELECT a FROM t WHERE b = $1", &[SqlValue::from("x")])
            .await
            .unwrap();
        client.release();

        assert_eq!(result.rows.len(), 1);
        assert_eq!(pool.connect_count(), 1);
        assert_eq!(pool.release_count(), 1);
        let recorded = pool.find("FROM t").unwrap();
        assert_eq!(recorded.params, vec![SqlValue::Text("x".into())]);
    }

    #[tokio::test]
    async fn test_mock_pool_defaults_and_failures() {
        let pool = MockPool::new().failing_on("COMMIT", "boom");
        let mut client = pool.connect().await.unwrap();

        let first = client.query("INSERT INTO t VALUES (1) RETURNING id", &[]).await.unwrap();
        let second = client.query("INSERT INTO t VALUES (2) RETURNING id", &[]).await.unwrap();
        assert_eq!(first.first().unwrap().get_i64("id").unwrap(), 1);
        assert_eq!(second.first().unwrap().get_i64("id").unwrap(), 2);

        let err = client.query("COMMIT", &[]).await.unwrap_err();
        assert!(matches!(err, StorageError::Query(ref m) if m == "boom"));
        client.release();
    }

    #[tokio::test]
    async fn test_mock_pool_connect_failure() {
        let pool = MockPool::new().failing_connect("refused");
        assert!(matches!(
            pool.connect().await,
            Err(StorageError::Connection(_))
        ));
        assert_eq!(pool.connect_count(), 0);
    }

    #[test]
    fn test_mock_detector_flags_needles() {
        let detector = MockPiiDetector::new().flagging("alice", PiiKind::Email);
        let redacted = detector.redact("alice met alice");
        assert_eq!(redacted, "[REDACTED_PII] met [REDACTED_PII]");
        assert_eq!(detector.call_count(), 1);
    }
}
