//! Prelude module - commonly used types for convenient import.
//!
//! Use `use custodian_audit::prelude::*;` to import all essential types.

// Errors
pub use crate::{AuditError, AuditResult};

// Entries
pub use crate::{AuditLogEntry, AuditLogId, InteractionData, StoredAuditLog};

// Writing
pub use crate::{AuditWriter, PiiDetector, RegexPiiDetector};

// Reading
pub use crate::{AuditLogFilter, AuditReader, Pagination};
