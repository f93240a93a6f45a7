//! Self-test report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single self-test check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    /// Check name, e.g. `symmetric:audit` or `hmac`.
    pub name: String,
    /// Whether the sample round-tripped.
    pub passed: bool,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntegrityCheck {
    pub(crate) fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: None,
        }
    }

    pub(crate) fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

/// Aggregated self-test result. Produced without ever returning an error, so
/// health checks can call it unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// True when every check passed and no errors were recorded.
    pub valid: bool,
    /// Individual checks, in execution order.
    pub checks: Vec<IntegrityCheck>,
    /// Human-readable failures.
    pub errors: Vec<String>,
    /// When the report was produced.
    pub timestamp: DateTime<Utc>,
}

impl IntegrityReport {
    pub(crate) fn from_checks(checks: Vec<IntegrityCheck>, mut errors: Vec<String>) -> Self {
        errors.extend(checks.iter().filter(|c| !c.passed).map(|c| {
            format!(
                "{}: {}",
                c.name,
                c.detail.as_deref().unwrap_or("check failed")
            )
        }));

        Self {
            valid: errors.is_empty() && checks.iter().all(|c| c.passed),
            checks,
            errors,
            timestamp: Utc::now(),
        }
    }

    /// Names of the failed checks.
    pub fn failed_checks(&self) -> impl Iterator<Item = &str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
    }
}
