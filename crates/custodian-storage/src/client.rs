//! Connection pool and client traits, typed parameters and rows.
//!
//! The audit writer and reader speak only to [`ConnectionPool`] and
//! [`DbClient`]. A client is checked out per unit of work and handed back
//! with [`DbClient::release`], which consumes the box so a connection cannot
//! be released twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Column type of a parameter, carried by typed nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// `BOOLEAN`
    Bool,
    /// `BIGINT`
    Int,
    /// `DOUBLE PRECISION`
    Float,
    /// `TEXT`
    Text,
    /// `JSONB`
    Json,
    /// `TIMESTAMPTZ`
    Timestamp,
    /// `TEXT[]`
    TextArray,
}

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Typed SQL `NULL`.
    Null(SqlType),
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double.
    Float(f64),
    /// Text.
    Text(String),
    /// JSON document.
    Json(Value),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Text array.
    TextArray(Vec<String>),
}

impl SqlValue {
    /// `value` if present, otherwise a null of type `ty`.
    pub fn nullable<T: Into<Self>>(value: Option<T>, ty: SqlType) -> Self {
        value.map_or(Self::Null(ty), Into::into)
    }

    /// The column type of this value.
    #[must_use]
    pub const fn sql_type(&self) -> SqlType {
        match self {
            Self::Null(ty) => *ty,
            Self::Bool(_) => SqlType::Bool,
            Self::Int(_) => SqlType::Int,
            Self::Float(_) => SqlType::Float,
            Self::Text(_) => SqlType::Text,
            Self::Json(_) => SqlType::Json,
            Self::Timestamp(_) => SqlType::Timestamp,
            Self::TextArray(_) => SqlType::TextArray,
        }
    }

    /// Whether this is a null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<String>> for SqlValue {
    fn from(v: Vec<String>) -> Self {
        Self::TextArray(v)
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One result row, keyed by column name.
///
/// Timestamps arrive as RFC 3339 strings, JSON columns as JSON, arrays as
/// arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(Map<String, Value>);

impl Row {
    /// Wrap a column map.
    #[must_use]
    pub fn new(columns: Map<String, Value>) -> Self {
        Self(columns)
    }

    /// Raw column value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Integer column. Accepts a JSON number or a numeric string, as some
    /// drivers return `COUNT(*)` as text.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if the column is missing, null, or
    /// not an integer.
    pub fn get_i64(&self, column: &str) -> StorageResult<i64> {
        match self.0.get(column) {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                StorageError::Decode(format!("column {column}: {n} is not an integer"))
            }),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| {
                StorageError::Decode(format!("column {column}: '{s}' is not an integer"))
            }),
            Some(other) => Err(StorageError::Decode(format!(
                "column {column}: expected integer, got {other}"
            ))),
            None => Err(StorageError::Decode(format!("missing column {column}"))),
        }
    }

    /// Text column, if present and a string.
    #[must_use]
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    /// Column names in this row.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Deserialize the whole row into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if the row does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> StorageResult<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| StorageError::Decode(e.to_string()))
    }

    /// Consume into the column map.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Row {
    fn from(columns: Map<String, Value>) -> Self {
        Self(columns)
    }
}

/// Rows returned by a statement plus the affected-row count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Returned rows.
    pub rows: Vec<Row>,
    /// Rows returned or affected.
    pub row_count: u64,
}

impl QueryResult {
    /// A result carrying `rows`, with `row_count` set to their number.
    #[must_use]
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let row_count = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        Self { rows, row_count }
    }

    /// A result with no rows and the given affected count.
    #[must_use]
    pub fn affected(row_count: u64) -> Self {
        Self {
            rows: Vec::new(),
            row_count,
        }
    }

    /// First row, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A checked-out connection.
///
/// `BEGIN`, `COMMIT` and `ROLLBACK` are issued as ordinary statements.
#[async_trait]
pub trait DbClient: Send {
    /// Run one statement with positional (`$1`, `$2`, ...) parameters.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult>;

    /// Hand the connection back to its pool. A connection still inside a
    /// transaction is closed instead.
    fn release(self: Box<Self>);
}

/// Source of connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Check out a connection.
    async fn connect(&self) -> StorageResult<Box<dyn DbClient>>;
}
