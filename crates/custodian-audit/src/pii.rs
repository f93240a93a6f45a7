//! PII detection capability.
//!
//! The writer depends only on the [`PiiDetector`] trait. Implementors supply
//! [`detect`](PiiDetector::detect); redaction is derived from the reported
//! spans. [`RegexPiiDetector`] is the default implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Text substituted for every detected span.
pub const REDACTION_MARKER: &str = "[REDACTED_PII]";

/// Category of personal data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    /// Email address.
    Email,
    /// Telephone number.
    Phone,
    /// US Social Security number.
    Ssn,
    /// Payment card number.
    CreditCard,
    /// IPv4 address.
    IpAddress,
}

impl PiiKind {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::IpAddress => "ip_address",
        }
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected span. Byte offsets into the scanned text; the matched value
/// itself is not retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiDetection {
    /// Category.
    pub kind: PiiKind,
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

/// Counts per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiSummary {
    /// Total detections.
    pub total: usize,
    /// Detections per kind.
    pub by_kind: BTreeMap<PiiKind, usize>,
}

impl PiiSummary {
    fn from_detections(detections: &[PiiDetection]) -> Self {
        let mut by_kind = BTreeMap::new();
        for d in detections {
            by_kind
                .entry(d.kind)
                .and_modify(|n: &mut usize| *n = n.saturating_add(1))
                .or_insert(1);
        }
        Self {
            total: detections.len(),
            by_kind,
        }
    }

    /// Kind names present, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.by_kind.keys().map(|k| k.as_str().to_string()).collect()
    }
}

/// Result of scanning text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiScan {
    /// Non-overlapping detections ordered by start offset.
    pub detections: Vec<PiiDetection>,
    /// Whether anything was found.
    pub has_detections: bool,
    /// Counts per kind.
    pub summary: PiiSummary,
}

impl PiiScan {
    /// Build a scan from detections, resolving overlaps by earliest start
    /// then longest span.
    #[must_use]
    pub fn from_detections(mut detections: Vec<PiiDetection>) -> Self {
        detections.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut kept: Vec<PiiDetection> = Vec::with_capacity(detections.len());
        for d in detections {
            if d.end <= d.start {
                continue;
            }
            if kept.last().is_none_or(|last| d.start >= last.end) {
                kept.push(d);
            }
        }

        Self {
            has_detections: !kept.is_empty(),
            summary: PiiSummary::from_detections(&kept),
            detections: kept,
        }
    }

    /// An empty scan.
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }
}

/// Redacted text plus what was removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiRedaction {
    /// Text with each detection replaced by [`REDACTION_MARKER`].
    pub redacted_text: String,
    /// Spans removed, as offsets into the original text.
    pub detections: Vec<PiiDetection>,
    /// Whether anything was replaced.
    pub has_redactions: bool,
    /// Counts per kind.
    pub summary: PiiSummary,
}

/// PII detection capability injected into the audit writer.
pub trait PiiDetector: Send + Sync {
    /// Find PII spans in `text`.
    fn detect(&self, text: &str) -> PiiScan;

    /// Replace every detection with [`REDACTION_MARKER`].
    fn redact(&self, text: &str) -> String {
        self.detect_and_redact(text).redacted_text
    }

    /// Detect and redact in one pass.
    fn detect_and_redact(&self, text: &str) -> PiiRedaction {
        let scan = self.detect(text);
        PiiRedaction {
            redacted_text: apply_redactions(text, &scan.detections),
            has_redactions: scan.has_detections,
            detections: scan.detections,
            summary: scan.summary,
        }
    }
}

/// Replace spans in `text`. Spans that are out of range, overlapping, or
/// not on character boundaries are skipped.
#[must_use]
pub fn apply_redactions(text: &str, detections: &[PiiDetection]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for d in detections {
        if d.start < cursor
            || d.end > text.len()
            || !text.is_char_boundary(d.start)
            || !text.is_char_boundary(d.end)
        {
            continue;
        }
        out.push_str(&text[cursor..d.start]);
        out.push_str(REDACTION_MARKER);
        cursor = d.end;
    }
    out.push_str(&text[cursor..]);
    out
}

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("invalid regex")
});
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b")
        .expect("invalid regex")
});
static SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("invalid regex"));
static CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").expect("invalid regex"));
static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b")
        .expect("invalid regex")
});

/// Pattern-based detector for emails, phone numbers, SSNs, Luhn-valid card
/// numbers and IPv4 addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexPiiDetector;

impl RegexPiiDetector {
    /// Create a detector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PiiDetector for RegexPiiDetector {
    fn detect(&self, text: &str) -> PiiScan {
        let mut found = Vec::new();
        let simple: [(&Regex, PiiKind); 4] = [
            (&EMAIL, PiiKind::Email),
            (&SSN, PiiKind::Ssn),
            (&PHONE, PiiKind::Phone),
            (&IPV4, PiiKind::IpAddress),
        ];
        for (re, kind) in simple {
            found.extend(re.find_iter(text).map(|m| PiiDetection {
                kind,
                start: m.start(),
                end: m.end(),
            }));
        }
        found.extend(
            CARD.find_iter(text)
                .filter(|m| luhn_valid(m.as_str()))
                .map(|m| PiiDetection {
                    kind: PiiKind::CreditCard,
                    start: m.start(),
                    end: m.end(),
                }),
        );
        PiiScan::from_detections(found)
    }
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    // Bounded: at most 19 digits, each contributing at most 9.
    #[allow(clippy::arithmetic_side_effects)]
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
