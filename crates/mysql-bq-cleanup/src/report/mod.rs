//! Run summary: the only artifact a run produces.

use crate::cleanup::{CleanupOutcome, CleanupStatus};
use crate::error::{Result, EXIT_CANCELLED, EXIT_NOTHING_INVENTORIED, EXIT_SUCCESS};
use crate::orchestrator::RunMode;
use crate::verify::{Verdict, VerificationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }
}

/// Everything known about one table at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub table_name: String,

    /// Exact source count, when it could be taken.
    pub source_row_count: Option<u64>,

    /// `None` only when the table was never started.
    pub verification: Option<VerificationResult>,

    /// `None` in verify-only mode and for tables never started.
    pub cleanup: Option<CleanupOutcome>,

    /// First error met while processing the table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableReport {
    /// A table skipped because the run was cancelled first.
    pub fn not_started(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            source_row_count: None,
            verification: None,
            cleanup: None,
            error: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.verification.is_some()
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.verification.as_ref().map(|v| v.verdict)
    }

    pub fn cleanup_status(&self) -> Option<CleanupStatus> {
        self.cleanup.as_ref().map(|c| c.status)
    }

    fn verdict_label(&self) -> &'static str {
        self.verdict().map(|v| v.as_str()).unwrap_or("not_started")
    }

    fn cleanup_label(&self, mode: RunMode) -> &'static str {
        match (&self.cleanup, self.is_started()) {
            (Some(c), _) => c.status.as_str(),
            (None, false) => "not_started",
            (None, true) if mode == RunMode::VerifyOnly => "verify_only",
            (None, true) => "-",
        }
    }
}

/// Tables per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub verified: usize,
    pub insufficient_coverage: usize,
    pub destination_missing: usize,
    pub query_failed: usize,
}

impl VerdictCounts {
    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Verified => self.verified += 1,
            Verdict::InsufficientCoverage => self.insufficient_coverage += 1,
            Verdict::DestinationMissing => self.destination_missing += 1,
            Verdict::QueryFailed => self.query_failed += 1,
        }
    }
}

/// Tables per cleanup status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupCounts {
    pub succeeded: usize,
    pub skipped_not_verified: usize,
    pub skipped_dry_run: usize,
    pub failed_rolled_back: usize,
}

impl CleanupCounts {
    fn record(&mut self, status: CleanupStatus) {
        match status {
            CleanupStatus::Succeeded => self.succeeded += 1,
            CleanupStatus::SkippedNotVerified => self.skipped_not_verified += 1,
            CleanupStatus::SkippedDryRun => self.skipped_dry_run += 1,
            CleanupStatus::FailedRolledBack => self.failed_rolled_back += 1,
        }
    }
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    pub mode: RunMode,

    pub threshold: f64,

    /// Fingerprint of the configuration the run used.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub status: RunStatus,

    /// Tables discovered, started or not.
    pub tables_total: usize,

    pub verdicts: VerdictCounts,

    pub cleanup: CleanupCounts,

    /// Tables never started because the run was cancelled.
    pub tables_not_processed: usize,

    /// Sum of `rows_deleted` over successful cleanups.
    pub rows_deleted: u64,

    /// Per-table results in discovery order.
    pub tables: Vec<TableReport>,
}

impl RunSummary {
    pub fn new(mode: RunMode, threshold: f64, config_hash: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            mode,
            threshold,
            config_hash: config_hash.into(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            tables_total: 0,
            verdicts: VerdictCounts::default(),
            cleanup: CleanupCounts::default(),
            tables_not_processed: 0,
            rows_deleted: 0,
            tables: Vec::new(),
        }
    }

    /// Add one table's report and update the totals.
    pub fn record(&mut self, report: TableReport) {
        self.tables_total += 1;
        match report.verdict() {
            Some(verdict) => self.verdicts.record(verdict),
            None => self.tables_not_processed += 1,
        }
        if let Some(outcome) = &report.cleanup {
            self.cleanup.record(outcome.status);
            if outcome.status == CleanupStatus::Succeeded {
                self.rows_deleted += outcome.rows_deleted.unwrap_or(0);
            }
        }
        self.tables.push(report);
    }

    /// Stamp the end of the run.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Process exit code for a finished run.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::Running | RunStatus::Completed => EXIT_SUCCESS,
            RunStatus::Cancelled => EXIT_CANCELLED,
            RunStatus::Failed => EXIT_NOTHING_INVENTORIED,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    /// Look up a table's report by name.
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table_name == name)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON summary to `path`.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Human-readable summary: one line per table, then totals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let width = self
            .tables
            .iter()
            .map(|t| t.table_name.len())
            .max()
            .unwrap_or(5)
            .max(5);

        let _ = writeln!(out, "\nCleanup run {} ({})", self.status.as_str(), self.mode);
        let _ = writeln!(out, "  Run ID: {}", self.run_id);
        let _ = writeln!(out, "  Duration: {:.2}s", self.duration_seconds());
        let _ = writeln!(out, "  Threshold: {:.2}", self.threshold);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  {:<width$}  {:>12}  {:>12}  {:>7}  {:<21}  {}",
            "TABLE",
            "SOURCE",
            "DESTINATION",
            "RATIO",
            "VERDICT",
            "CLEANUP",
            width = width
        );

        for table in &self.tables {
            let verification = table.verification.as_ref();
            let source = table
                .source_row_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string());
            let destination = verification
                .and_then(|v| v.destination_row_count)
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string());
            let ratio = verification
                .and_then(|v| v.ratio)
                .map(|r| format!("{:.3}", r))
                .unwrap_or_else(|| "-".to_string());

            let _ = writeln!(
                out,
                "  {:<width$}  {:>12}  {:>12}  {:>7}  {:<21}  {}",
                table.table_name,
                source,
                destination,
                ratio,
                table.verdict_label(),
                table.cleanup_label(self.mode),
                width = width
            );
            if let Some(err) = &table.error {
                let _ = writeln!(out, "      error: {}", err);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "  Tables: {}", self.tables_total);
        let _ = writeln!(
            out,
            "  Verdicts: {} verified, {} insufficient coverage, {} destination missing, {} query failed",
            self.verdicts.verified,
            self.verdicts.insufficient_coverage,
            self.verdicts.destination_missing,
            self.verdicts.query_failed
        );
        if self.mode != RunMode::VerifyOnly {
            let _ = writeln!(
                out,
                "  Cleanup: {} succeeded, {} skipped (not verified), {} skipped (dry run), {} rolled back",
                self.cleanup.succeeded,
                self.cleanup.skipped_not_verified,
                self.cleanup.skipped_dry_run,
                self.cleanup.failed_rolled_back
            );
            let _ = writeln!(out, "  Rows deleted: {}", self.rows_deleted);
        }
        if self.tables_not_processed > 0 {
            let _ = writeln!(out, "  Not started: {}", self.tables_not_processed);
        }

        out
    }

    /// Emit the summary as one structured event for log aggregation.
    pub fn log_record(&self) {
        info!(
            run_id = %self.run_id,
            mode = %self.mode,
            status = self.status.as_str(),
            tables_total = self.tables_total,
            verified = self.verdicts.verified,
            insufficient_coverage = self.verdicts.insufficient_coverage,
            destination_missing = self.verdicts.destination_missing,
            query_failed = self.verdicts.query_failed,
            succeeded = self.cleanup.succeeded,
            skipped_not_verified = self.cleanup.skipped_not_verified,
            skipped_dry_run = self.cleanup.skipped_dry_run,
            failed_rolled_back = self.cleanup.failed_rolled_back,
            tables_not_processed = self.tables_not_processed,
            rows_deleted = self.rows_deleted,
            duration_seconds = self.duration_seconds(),
            "run summary"
        );
    }
}
