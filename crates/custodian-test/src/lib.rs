//! Custodian Test - shared test utilities for the compliance core.
//!
//! Mocks and fixtures used as a dev-dependency across crates.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! custodian-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use custodian_test::{MockPiiDetector, MockPool, test_audit_entry};
//!
//! #[tokio::test]
//! async fn test_commit_failure_rolls_back() {
//!     let pool = MockPool::new().failing_on("COMMIT", "serialization failure");
//!     let writer = AuditWriter::builder(pool.shared(), Arc::new(MockPiiDetector::new())).build();
//!
//!     assert!(writer.store_audit_log(test_audit_entry()).await.is_err());
//!     assert!(pool.executed("ROLLBACK"));
//! }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
