//! Run modes and the per-table phase machine.

use crate::cleanup::CleanupPolicy;
use crate::error::{CleanupError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Operating mode, chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Truncate verified tables.
    #[default]
    Normal,
    /// Full pass with zero writes.
    DryRun,
    /// Inventory and verify only.
    VerifyOnly,
    /// Truncate every table regardless of verdict.
    Force,
}

impl RunMode {
    /// Build a mode from the three command-line flags; at most one may be set.
    pub fn from_flags(dry_run: bool, verify_only: bool, force: bool) -> Result<Self> {
        match (dry_run, verify_only, force) {
            (false, false, false) => Ok(RunMode::Normal),
            (true, false, false) => Ok(RunMode::DryRun),
            (false, true, false) => Ok(RunMode::VerifyOnly),
            (false, false, true) => Ok(RunMode::Force),
            _ => Err(CleanupError::Config(
                "--dry-run, --verify-only and --force are mutually exclusive".into(),
            )),
        }
    }

    /// Cleanup gating for this mode; `None` when cleanup never runs.
    pub fn cleanup_policy(&self) -> Option<CleanupPolicy> {
        match self {
            RunMode::Normal => Some(CleanupPolicy::default()),
            RunMode::DryRun => Some(CleanupPolicy {
                force: false,
                dry_run: true,
            }),
            RunMode::VerifyOnly => None,
            RunMode::Force => Some(CleanupPolicy {
                force: true,
                dry_run: false,
            }),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Normal => "normal",
            RunMode::DryRun => "dry-run",
            RunMode::VerifyOnly => "verify-only",
            RunMode::Force => "force",
        };
        f.write_str(s)
    }
}

/// Processing phase of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Inventorying,
    Verifying,
    CleaningUp,
    SkippingCleanup,
    Reporting,
    Done,
}

impl RunPhase {
    /// Legal transitions. `Inventorying → Reporting` covers a failed source
    /// count; `Verifying → Reporting` is the verify-only path.
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Inventorying)
                | (Inventorying, Verifying)
                | (Inventorying, Reporting)
                | (Verifying, CleaningUp)
                | (Verifying, SkippingCleanup)
                | (Verifying, Reporting)
                | (CleaningUp, Reporting)
                | (SkippingCleanup, Reporting)
                | (Reporting, Done)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks one table through its phases, refusing illegal transitions.
#[derive(Debug)]
pub struct PhaseTracker {
    table: String,
    phase: RunPhase,
}

impl PhaseTracker {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(CleanupError::Config(format!(
                "{}: illegal phase transition {} -> {}",
                self.table, self.phase, next
            )));
        }
        debug!("{}: {} -> {}", self.table, self.phase, next);
        self.phase = next;
        Ok(())
    }
}
