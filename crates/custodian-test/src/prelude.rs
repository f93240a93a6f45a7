//! Prelude module - commonly used test utilities.
//!
//! Use `use custodian_test::prelude::*;` in test modules.

// Mocks
pub use crate::{MockPiiDetector, MockPool, RecordedQuery};

// Fixtures
pub use crate::{
    init_test_logging, test_audit_entry, test_audit_entry_with_pii, test_encryption_manager,
    test_interaction, test_key_dir, test_stored_row,
};
