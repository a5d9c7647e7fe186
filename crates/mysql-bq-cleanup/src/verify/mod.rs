//! Verification policy.
//!
//! Pure decision logic: one inventory entry plus one destination count yields
//! one immutable [`VerificationResult`]. Nothing here touches a store.

use crate::source::TableInventoryEntry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default minimum destination/source ratio.
pub const DEFAULT_THRESHOLD: f64 = 0.90;

/// Whether a table's transfer is trustworthy enough to allow deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Verified,
    InsufficientCoverage,
    DestinationMissing,
    QueryFailed,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Verified => "verified",
            Verdict::InsufficientCoverage => "insufficient_coverage",
            Verdict::DestinationMissing => "destination_missing",
            Verdict::QueryFailed => "query_failed",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing one source table against the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub table_name: String,

    /// Exact source count. `None` only when the source count itself failed.
    pub source_row_count: Option<u64>,

    /// `None` when the destination table is absent or its count failed.
    pub destination_row_count: Option<u64>,

    /// destination / source. `None` when the source is empty or the
    /// destination count is unavailable.
    pub ratio: Option<f64>,

    pub verdict: Verdict,
}

impl VerificationResult {
    /// Apply the verification policy.
    ///
    /// An empty source table is verified whatever the destination holds,
    /// including no table at all. The threshold comparison is inclusive.
    pub fn decide(
        entry: &TableInventoryEntry,
        destination_count: Option<u64>,
        threshold: f64,
    ) -> Self {
        let (ratio, verdict) = match destination_count {
            _ if entry.is_empty() => (None, Verdict::Verified),
            None => (None, Verdict::DestinationMissing),
            Some(dest) => {
                let ratio = dest as f64 / entry.row_count as f64;
                let verdict = if ratio >= threshold {
                    Verdict::Verified
                } else {
                    Verdict::InsufficientCoverage
                };
                (Some(ratio), verdict)
            }
        };

        Self {
            table_name: entry.name.clone(),
            source_row_count: Some(entry.row_count),
            destination_row_count: destination_count,
            ratio,
            verdict,
        }
    }

    /// The destination could not be counted.
    pub fn query_failed(entry: &TableInventoryEntry) -> Self {
        Self {
            table_name: entry.name.clone(),
            source_row_count: Some(entry.row_count),
            destination_row_count: None,
            ratio: None,
            verdict: Verdict::QueryFailed,
        }
    }

    /// The source could not be counted, so nothing could be compared.
    pub fn source_failed(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            source_row_count: None,
            destination_row_count: None,
            ratio: None,
            verdict: Verdict::QueryFailed,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verdict == Verdict::Verified
    }
}

/// Free-function form of [`VerificationResult::decide`].
pub fn decide(
    entry: &TableInventoryEntry,
    destination_count: Option<u64>,
    threshold: f64,
) -> VerificationResult {
    VerificationResult::decide(entry, destination_count, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, rows: u64) -> TableInventoryEntry {
        TableInventoryEntry::new(name, rows, 0)
    }

    #[test]
    fn test_orders_within_tolerance() {
        let result = decide(&entry("orders", 100), Some(95), 0.90);
        assert_eq!(result.verdict, Verdict::Verified);
        assert_eq!(result.ratio, Some(0.95));
        assert_eq!(result.destination_row_count, Some(95));
    }

    #[test]
    fn test_reviews_insufficient() {
        let result = decide(&entry("reviews", 100), Some(50), 0.90);
        assert_eq!(result.verdict, Verdict::InsufficientCoverage);
        assert!(!result.is_verified());
    }

    #[test]
    fn test_absent_destination() {
        let result = decide(&entry("new_table", 10), None, 0.90);
        assert_eq!(result.verdict, Verdict::DestinationMissing);
        assert_eq!(result.ratio, None);
    }

    #[test]
    fn test_empty_source_is_verified() {
        for dest in [0, 1, 1_000_000] {
            let result = decide(&entry("empty", 0), Some(dest), 0.90);
            assert_eq!(result.verdict, Verdict::Verified);
            assert_eq!(result.ratio, None);
        }
    }

    #[test]
    fn test_empty_source_with_absent_destination() {
        let result = decide(&entry("staging_empty", 0), None, 0.90);
        assert_eq!(result.verdict, Verdict::Verified);
        assert_eq!(result.destination_row_count, None);
        assert_eq!(result.ratio, None);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let cases: &[(u64, u64, f64)] = &[
            (100, 90, 0.90),
            (10, 9, 0.90),
            (1000, 900, 0.90),
            (3, 2, 2.0 / 3.0),
            (7, 7, 1.0),
            (1, 1, 1.0),
            (1_000_000_007, 1_000_000_007, 1.0),
        ];
        for &(src, dest, threshold) in cases {
            let result = decide(&entry("t", src), Some(dest), threshold);
            assert_eq!(
                result.verdict,
                Verdict::Verified,
                "{}/{} at {}",
                dest,
                src,
                threshold
            );
        }
    }

    #[test]
    fn test_just_below_boundary() {
        let cases: &[(u64, u64, f64)] = &[
            (100, 89, 0.90),
            (1000, 899, 0.90),
            (7, 6, 1.0),
            (1_000_000_007, 1_000_000_006, 1.0),
        ];
        for &(src, dest, threshold) in cases {
            let result = decide(&entry("t", src), Some(dest), threshold);
            assert_eq!(result.verdict, Verdict::InsufficientCoverage);
        }
    }

    #[test]
    fn test_destination_larger_than_source() {
        let result = decide(&entry("events", 100), Some(250), 0.90);
        assert_eq!(result.verdict, Verdict::Verified);
        assert_eq!(result.ratio, Some(2.5));
    }

    #[test]
    fn test_query_failed_constructors() {
        let result = VerificationResult::query_failed(&entry("orders", 12));
        assert_eq!(result.verdict, Verdict::QueryFailed);
        assert_eq!(result.source_row_count, Some(12));
        assert_eq!(result.destination_row_count, None);

        let result = VerificationResult::source_failed("orders");
        assert_eq!(result.source_row_count, None);
    }

    #[test]
    fn test_verdict_serializes_snake_case() {
        let json = serde_json::to_string(&Verdict::InsufficientCoverage).unwrap();
        assert_eq!(json, "\"insufficient_coverage\"");
        assert_eq!(Verdict::DestinationMissing.to_string(), "destination_missing");
    }
}
