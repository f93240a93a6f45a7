//! PostgreSQL adapter over `sqlx`.
//!
//! Parameters are bound with their declared types, typed nulls included, so
//! Postgres never has to guess a parameter type. Result columns are decoded
//! by type name into JSON values.
//!
//! | Column type | JSON |
//! |-------------|------|
//! | `BOOL` | bool |
//! | `INT2`, `INT4`, `INT8` | integer |
//! | `FLOAT4`, `FLOAT8` | number |
//! | `TEXT`, `VARCHAR`, `BPCHAR`, `NAME` | string |
//! | `JSON`, `JSONB` | as stored |
//! | `TIMESTAMPTZ`, `TIMESTAMP` | RFC 3339 string |
//! | `TEXT[]`, `VARCHAR[]` | array of strings |
//!
//! Other types (e.g. `NUMERIC`, `UUID`) must be cast in SQL.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, TypeInfo};
use tracing::{debug, warn};

use crate::client::{ConnectionPool, DbClient, QueryResult, Row, SqlType, SqlValue};
use crate::error::{StorageError, StorageResult};

/// Connection pool backed by `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PgConnectionPool {
    pool: PgPool,
}

impl PgConnectionPool {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the database is unreachable.
    pub async fn connect_url(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        debug!(max_connections, "PostgreSQL pool opened");
        Ok(Self { pool })
    }

    /// Underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionPool for PgConnectionPool {
    async fn connect(&self) -> StorageResult<Box<dyn DbClient>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Box::new(PgClient {
            conn,
            in_transaction: false,
        }))
    }
}

struct PgClient {
    conn: PoolConnection<Postgres>,
    /// A `BEGIN` succeeded and no `COMMIT` or `ROLLBACK` has since.
    in_transaction: bool,
}

#[async_trait]
impl DbClient for PgClient {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult> {
        let result = self.run(sql, params).await;
        if result.is_ok() {
            self.in_transaction = transaction_open_after(sql, self.in_transaction);
        }
        result
    }

    fn release(self: Box<Self>) {
        if self.in_transaction {
            // A session with an open transaction never goes back to the pool.
            warn!("Releasing connection with an open transaction, closing it");
            drop(self.conn.detach());
        } else {
            drop(self.conn);
        }
    }
}

impl PgClient {
    async fn run(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }

        if returns_rows(sql) {
            let rows = query
                .fetch_all(&mut *self.conn)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;
            let rows = rows.iter().map(decode_row).collect::<StorageResult<Vec<_>>>()?;
            Ok(QueryResult::from_rows(rows))
        } else {
            let done = query
                .execute(&mut *self.conn)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;
            Ok(QueryResult::affected(done.rows_affected()))
        }
    }
}

/// Transaction state after `sql` ran successfully.
fn transaction_open_after(sql: &str, open: bool) -> bool {
    let Some(first) = sql.split_whitespace().next() else {
        return open;
    };
    let first = first.trim_end_matches(';');
    if first.eq_ignore_ascii_case("BEGIN") || first.eq_ignore_ascii_case("START") {
        true
    } else if ["COMMIT", "ROLLBACK", "END", "ABORT"]
        .iter()
        .any(|kw| first.eq_ignore_ascii_case(kw))
    {
        // `ROLLBACK TO SAVEPOINT` keeps the outer transaction open.
        open && sql.to_ascii_uppercase().contains(" TO ")
    } else {
        open
    }
}

fn returns_rows(sql: &str) -> bool {
    let mut words = sql.split_whitespace();
    let Some(first) = words.next() else {
        return false;
    };
    first.eq_ignore_ascii_case("SELECT")
        || first.eq_ignore_ascii_case("WITH")
        || first.eq_ignore_ascii_case("VALUES")
        || words.any(|w| w.eq_ignore_ascii_case("RETURNING"))
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null(ty) => match ty {
            SqlType::Bool => query.bind(None::<bool>),
            SqlType::Int => query.bind(None::<i64>),
            SqlType::Float => query.bind(None::<f64>),
            SqlType::Text => query.bind(None::<String>),
            SqlType::Json => query.bind(None::<sqlx::types::Json<Value>>),
            SqlType::Timestamp => query.bind(None::<DateTime<Utc>>),
            SqlType::TextArray => query.bind(None::<Vec<String>>),
        },
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Json(v) => query.bind(sqlx::types::Json(v.clone())),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::TextArray(v) => query.bind(v.clone()),
    }
}

fn decode_row(row: &PgRow) -> StorageResult<Row> {
    let mut columns = Map::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let name = column.name();
        let type_name = column.type_info().name();

        let value = match type_name {
            "BOOL" => get::<bool>(row, idx, name)?.map(Value::Bool),
            "INT2" => get::<i16>(row, idx, name)?.map(Value::from),
            "INT4" => get::<i32>(row, idx, name)?.map(Value::from),
            "INT8" => get::<i64>(row, idx, name)?.map(Value::from),
            "FLOAT4" => get::<f32>(row, idx, name)?.map(Value::from),
            "FLOAT8" => get::<f64>(row, idx, name)?.map(Value::from),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                get::<String>(row, idx, name)?.map(Value::String)
            },
            "JSON" | "JSONB" => get::<Value>(row, idx, name)?,
            "TIMESTAMPTZ" => {
                get::<DateTime<Utc>>(row, idx, name)?.map(|t| Value::String(t.to_rfc3339()))
            },
            "TIMESTAMP" => get::<NaiveDateTime>(row, idx, name)?
                .map(|t| Value::String(t.and_utc().to_rfc3339())),
            "TEXT[]" | "VARCHAR[]" => get::<Vec<String>>(row, idx, name)?
                .map(|v| Value::Array(v.into_iter().map(Value::String).collect())),
            other => {
                return Err(StorageError::Decode(format!(
                    "column {name}: unsupported type {other}"
                )));
            },
        };

        columns.insert(name.to_string(), value.unwrap_or(Value::Null));
    }
    Ok(Row::new(columns))
}

fn get<'r, T>(row: &'r PgRow, idx: usize, name: &str) -> StorageResult<Option<T>>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(idx)
        .map_err(|e| StorageError::Decode(format!("column {name}: {e}")))
}
