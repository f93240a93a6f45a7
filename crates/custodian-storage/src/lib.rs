//! Custodian Storage - relational store interface.
//!
//! The audit trail persists through two small traits:
//!
//! - [`ConnectionPool`]: hands out connections
//! - [`DbClient`]: runs parameterized statements and is released exactly once
//!
//! Parameters are [`SqlValue`]s, typed nulls included. Results are
//! [`Row`]s keyed by column name, with typed accessors and serde decoding.
//!
//! # Feature Flags
//!
//! - **`postgres`** - [`PgConnectionPool`], backed by `sqlx`

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod client;
pub mod error;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use client::{ConnectionPool, DbClient, QueryResult, Row, SqlType, SqlValue};
pub use error::{StorageError, StorageResult};

#[cfg(feature = "postgres")]
pub use postgres::PgConnectionPool;
