//! Custodian Telemetry - logging setup for the compliance core.
//!
//! Every custodian crate emits `tracing` events; this crate installs the
//! subscriber that renders them. Formats are pretty, compact, JSON and full;
//! targets are stdout, stderr or rolling files.
//!
//! # Example
//!
//! ```rust,no_run
//! use custodian_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), custodian_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("custodian_audit=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("audit service started");
//! # Ok(())
//! # }
//! ```
//!
//! With the `config` feature, [`LogConfig::from_section`] builds a config
//! from the `[logging]` section of `custodian-config`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
