//! Cleanup executor.
//!
//! The only component that writes. Every truncation runs inside one source
//! transaction: count → `DELETE` → recount must be 0 → commit. Any failure
//! rolls back, leaving the table exactly as it was.

use crate::error::{CleanupError, Result};
use crate::source::{with_timeout, SourceStore, SourceTransaction};
use crate::verify::Verdict;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Cleanup status of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Succeeded,
    SkippedNotVerified,
    SkippedDryRun,
    FailedRolledBack,
}

impl CleanupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupStatus::Succeeded => "succeeded",
            CleanupStatus::SkippedNotVerified => "skipped_not_verified",
            CleanupStatus::SkippedDryRun => "skipped_dry_run",
            CleanupStatus::FailedRolledBack => "failed_rolled_back",
        }
    }
}

impl fmt::Display for CleanupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one cleanup decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub table_name: String,

    /// Whether a transaction was opened.
    pub attempted: bool,

    /// Pre-operation row count; set only for `succeeded`.
    pub rows_deleted: Option<u64>,

    pub status: CleanupStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl CleanupOutcome {
    fn skipped(table: &str, status: CleanupStatus) -> Self {
        Self {
            table_name: table.to_string(),
            attempted: false,
            rows_deleted: None,
            status,
            error_detail: None,
        }
    }

    fn succeeded(table: &str, rows: u64) -> Self {
        Self {
            table_name: table.to_string(),
            attempted: true,
            rows_deleted: Some(rows),
            status: CleanupStatus::Succeeded,
            error_detail: None,
        }
    }

    fn rolled_back(table: &str, detail: String) -> Self {
        Self {
            table_name: table.to_string(),
            attempted: true,
            rows_deleted: None,
            status: CleanupStatus::FailedRolledBack,
            error_detail: Some(detail),
        }
    }
}

/// Cleanup gating flags derived from the run mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupPolicy {
    /// Truncate regardless of verdict.
    pub force: bool,
    /// Never open a transaction.
    pub dry_run: bool,
}

/// Executes truncations against the source.
pub struct CleanupExecutor {
    source: Arc<dyn SourceStore>,
    write_timeout: Duration,
}

impl CleanupExecutor {
    pub fn new(source: Arc<dyn SourceStore>, write_timeout: Duration) -> Self {
        Self {
            source,
            write_timeout,
        }
    }

    /// Apply the cleanup decision for one table.
    pub async fn execute(&self, table: &str, verdict: Verdict, policy: CleanupPolicy) -> CleanupOutcome {
        let allowed = verdict == Verdict::Verified || policy.force;

        if policy.dry_run {
            let status = if allowed {
                info!("{}: dry run, would truncate", table);
                CleanupStatus::SkippedDryRun
            } else {
                CleanupStatus::SkippedNotVerified
            };
            return CleanupOutcome::skipped(table, status);
        }

        if !allowed {
            info!("{}: skipping cleanup, verdict {}", table, verdict);
            return CleanupOutcome::skipped(table, CleanupStatus::SkippedNotVerified);
        }

        if verdict != Verdict::Verified {
            warn!("{}: forcing cleanup despite verdict {}", table, verdict);
        }

        match self.truncate(table).await {
            Ok(rows) => {
                info!("{}: truncated {} rows", table, rows);
                CleanupOutcome::succeeded(table, rows)
            }
            Err(e) => {
                error!("{}: cleanup rolled back: {}", table, e);
                CleanupOutcome::rolled_back(table, e.to_string())
            }
        }
    }

    async fn truncate(&self, table: &str) -> Result<u64> {
        let timeout = self.write_timeout;
        let mut tx = with_timeout(timeout, "beginning transaction", self.source.begin()).await?;

        match self.delete_in(tx.as_mut(), table).await {
            // A failed commit leaves nothing applied.
            Ok(rows) => with_timeout(timeout, "commit", tx.commit())
                .await
                .map(|()| rows),
            Err(e) => match with_timeout(timeout, "rollback", tx.rollback()).await {
                Ok(()) => Err(e),
                Err(rollback) => Err(CleanupError::transaction(
                    table,
                    format!("{}; rollback also failed: {}", e, rollback),
                )),
            },
        }
    }

    async fn delete_in(&self, tx: &mut dyn SourceTransaction, table: &str) -> Result<u64> {
        let timeout = self.write_timeout;
        let operation = format!("cleanup of {}", table);

        let before = with_timeout(timeout, &operation, tx.count_rows(table)).await?;
        let deleted = with_timeout(timeout, &operation, tx.delete_all(table)).await?;
        let after = with_timeout(timeout, &operation, tx.count_rows(table)).await?;

        if after != 0 {
            return Err(CleanupError::transaction(
                table,
                format!("{} rows remain after delete", after),
            ));
        }
        if deleted != before {
            warn!(
                "{}: counted {} rows but deleted {}",
                table, before, deleted
            );
        }

        Ok(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySource;

    const NORMAL: CleanupPolicy = CleanupPolicy {
        force: false,
        dry_run: false,
    };
    const FORCE: CleanupPolicy = CleanupPolicy {
        force: true,
        dry_run: false,
    };
    const DRY_RUN: CleanupPolicy = CleanupPolicy {
        force: false,
        dry_run: true,
    };

    fn executor(source: &MemorySource) -> CleanupExecutor {
        CleanupExecutor::new(Arc::new(source.clone()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_verified_table_is_truncated() {
        let source = MemorySource::new().with_table("orders", 100);
        let outcome = executor(&source)
            .execute("orders", Verdict::Verified, NORMAL)
            .await;

        assert_eq!(outcome.status, CleanupStatus::Succeeded);
        assert_eq!(outcome.rows_deleted, Some(100));
        assert!(outcome.attempted);
        assert_eq!(source.rows("orders"), Some(0));
    }

    #[tokio::test]
    async fn test_unverified_table_is_untouched() {
        let source = MemorySource::new().with_table("reviews", 100);
        let outcome = executor(&source)
            .execute("reviews", Verdict::InsufficientCoverage, NORMAL)
            .await;

        assert_eq!(outcome.status, CleanupStatus::SkippedNotVerified);
        assert!(!outcome.attempted);
        assert_eq!(source.rows("reviews"), Some(100));
        assert_eq!(source.write_statements(), 0);
    }

    #[tokio::test]
    async fn test_force_ignores_verdict() {
        let source = MemorySource::new().with_table("new_table", 10);
        let outcome = executor(&source)
            .execute("new_table", Verdict::DestinationMissing, FORCE)
            .await;

        assert_eq!(outcome.status, CleanupStatus::Succeeded);
        assert_eq!(outcome.rows_deleted, Some(10));
    }

    #[tokio::test]
    async fn test_dry_run_issues_no_writes() {
        let source = MemorySource::new().with_table("orders", 100);
        let exec = executor(&source);

        let verified = exec.execute("orders", Verdict::Verified, DRY_RUN).await;
        assert_eq!(verified.status, CleanupStatus::SkippedDryRun);

        let unverified = exec
            .execute("orders", Verdict::InsufficientCoverage, DRY_RUN)
            .await;
        assert_eq!(unverified.status, CleanupStatus::SkippedNotVerified);

        assert_eq!(source.write_statements(), 0);
        assert_eq!(source.commits() + source.rollbacks(), 0);
        assert_eq!(source.rows("orders"), Some(100));
    }

    #[tokio::test]
    async fn test_delete_failure_rolls_back() {
        let source = MemorySource::new().with_table("orders", 100);
        source.fail_deletes_for("orders");

        let outcome = executor(&source)
            .execute("orders", Verdict::Verified, NORMAL)
            .await;

        assert_eq!(outcome.status, CleanupStatus::FailedRolledBack);
        assert!(outcome.error_detail.unwrap().contains("injected delete failure"));
        assert_eq!(outcome.rows_deleted, None);
        assert_eq!(source.rows("orders"), Some(100));
        assert_eq!(source.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_rows_left_after_delete_rolls_back() {
        let source = MemorySource::new().with_table("orders", 100);
        source.leave_rows_after_delete("orders", 3);

        let outcome = executor(&source)
            .execute("orders", Verdict::Verified, NORMAL)
            .await;

        assert_eq!(outcome.status, CleanupStatus::FailedRolledBack);
        assert!(outcome.error_detail.unwrap().contains("3 rows remain"));
        assert_eq!(source.rows("orders"), Some(100));
    }

    #[tokio::test]
    async fn test_commit_failure_changes_nothing() {
        let source = MemorySource::new().with_table("orders", 100);
        source.fail_commits(true);

        let outcome = executor(&source)
            .execute("orders", Verdict::Verified, NORMAL)
            .await;

        assert_eq!(outcome.status, CleanupStatus::FailedRolledBack);
        assert_eq!(source.rows("orders"), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_past_write_timeout_rolls_back() {
        let source = MemorySource::new().with_table("orders", 100);
        source.set_delete_delay(Duration::from_secs(60));
        let exec = CleanupExecutor::new(Arc::new(source.clone()), Duration::from_secs(2));

        let outcome = exec.execute("orders", Verdict::Verified, NORMAL).await;

        assert_eq!(outcome.status, CleanupStatus::FailedRolledBack);
        assert!(outcome.error_detail.unwrap().contains("timed out after 2s"));
        assert_eq!(source.rows("orders"), Some(100));
        assert_eq!(source.rollbacks(), 1);
        assert_eq!(source.commits(), 0);
    }

    #[tokio::test]
    async fn test_empty_table_truncates_zero_rows() {
        let source = MemorySource::new().with_table("empty", 0);
        let outcome = executor(&source)
            .execute("empty", Verdict::Verified, NORMAL)
            .await;

        assert_eq!(outcome.status, CleanupStatus::Succeeded);
        assert_eq!(outcome.rows_deleted, Some(0));
    }
}
