//! Prelude module - commonly used types for convenient import.
//!
//! Use `use custodian_telemetry::prelude::*;` to import all essential types.

// Errors
pub use crate::{TelemetryError, TelemetryResult};

// Logging configuration
pub use crate::{FileRotation, LogConfig, LogFormat, LogTarget};

// Setup
pub use crate::{setup_default_logging, setup_logging};
