//! Run controller - main workflow coordinator.

mod mode;

pub use mode::{PhaseTracker, RunMode, RunPhase};

use crate::cleanup::CleanupExecutor;
use crate::config::Config;
use crate::destination::{BigQueryDestination, DestinationStore, RetryingDestination};
use crate::error::{CleanupError, Result};
use crate::report::{RunStatus, RunSummary, TableReport};
use crate::retry::RetryPolicy;
use crate::source::{InventoryReader, MysqlSource, SourceStore, TableMeta};
use crate::verify::VerificationResult;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What one run should do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub mode: RunMode,

    /// Restrict the run to one table.
    pub table: Option<String>,
}

impl RunRequest {
    pub fn new(mode: RunMode) -> Self {
        Self { mode, table: None }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }
}

/// Run controller.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceStore>,
    destination: Arc<dyn DestinationStore>,
}

/// Shared, read-only state handed to every table worker.
struct TableContext {
    reader: InventoryReader,
    destination: RetryingDestination,
    executor: CleanupExecutor,
    mode: RunMode,
    threshold: f64,
}

enum Slot {
    Spawned(String, JoinHandle<TableReport>),
    NotStarted(String),
}

impl Orchestrator {
    /// Connect to MySQL and BigQuery.
    pub async fn connect(config: Config) -> Result<Self> {
        let read_timeout = config.cleanup.read_timeout();

        // One connection per worker plus one for discovery.
        let source =
            MysqlSource::new(&config.source, config.cleanup.workers + 1, read_timeout).await?;
        let destination = BigQueryDestination::new(&config.destination, read_timeout).await?;

        Ok(Self::with_stores(
            config,
            Arc::new(source),
            Arc::new(destination),
        ))
    }

    /// Build a controller over already-connected stores.
    pub fn with_stores(
        config: Config,
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn DestinationStore>,
    ) -> Self {
        Self {
            config,
            source,
            destination,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.cleanup.max_retries,
            self.config.cleanup.retry_base_delay(),
            self.config.cleanup.retry_max_delay(),
        )
    }

    fn context(&self, mode: RunMode) -> Result<TableContext> {
        let cleanup = &self.config.cleanup;
        Ok(TableContext {
            reader: InventoryReader::new(
                self.source.clone(),
                &cleanup.exclude_tables,
                cleanup.read_timeout(),
            )?,
            destination: RetryingDestination::new(
                self.destination.clone(),
                self.retry_policy(),
                cleanup.read_timeout(),
            ),
            executor: CleanupExecutor::new(self.source.clone(), cleanup.write_timeout()),
            mode,
            threshold: cleanup.threshold,
        })
    }

    /// Release the source connection pool.
    pub async fn close(&self) {
        self.source.close().await;
    }

    /// Run one verification and cleanup pass.
    ///
    /// Errors are returned only for run-level failures: unreachable stores,
    /// rejected credentials, an unknown `--table`, an empty source, or a
    /// cancellation before any table started. Per-table failures are recorded
    /// in the summary.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> Result<RunSummary> {
        let mode = request.mode;
        let mut summary = RunSummary::new(mode, self.config.cleanup.threshold, self.config.hash());
        info!("Starting cleanup run {} (mode: {})", summary.run_id, mode);

        if cancel.is_cancelled() {
            return Err(CleanupError::Cancelled);
        }

        let ctx = Arc::new(self.context(mode)?);

        ctx.destination.ping().await?;

        let tables = ctx.reader.discover(request.table.as_deref()).await?;
        if tables.is_empty() {
            return Err(CleanupError::NothingInventoried);
        }

        let workers = self.config.cleanup.workers.max(1);
        info!("Processing {} tables with {} workers", tables.len(), workers);

        let slots = self.dispatch(&ctx, tables, workers, &cancel).await;

        for slot in slots {
            let report = match slot {
                Slot::Spawned(name, handle) => match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!("{}: worker task failed: {}", name, e);
                        TableReport {
                            table_name: name.clone(),
                            source_row_count: None,
                            verification: Some(VerificationResult::source_failed(name)),
                            cleanup: None,
                            error: Some(format!("worker task failed: {}", e)),
                        }
                    }
                },
                Slot::NotStarted(name) => TableReport::not_started(name),
            };
            summary.record(report);
        }

        let counted = summary
            .tables
            .iter()
            .filter(|t| t.source_row_count.is_some())
            .count();
        let status = if summary.tables_not_processed > 0 {
            warn!(
                "Run cancelled: {} tables not started",
                summary.tables_not_processed
            );
            RunStatus::Cancelled
        } else if counted == 0 {
            error!("No table could be counted in the source");
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        summary.finish(status);

        info!(
            "Cleanup {}: {} tables, {} verified, {} rows deleted in {:.1}s",
            summary.status.as_str(),
            summary.tables_total,
            summary.verdicts.verified,
            summary.rows_deleted,
            summary.duration_seconds()
        );
        summary.log_record();

        Ok(summary)
    }

    /// Start one worker per table, bounded by `workers` permits.
    ///
    /// Once `cancel` fires no further table is started; the rest are kept as
    /// not-started slots so every table still appears in the summary.
    async fn dispatch(
        &self,
        ctx: &Arc<TableContext>,
        tables: Vec<TableMeta>,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Vec<Slot> {
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut slots = Vec::with_capacity(tables.len());
        let mut stopped = false;

        for table in tables {
            if stopped || cancel.is_cancelled() {
                if !stopped {
                    info!("Cancellation requested, not starting further tables");
                    stopped = true;
                }
                slots.push(Slot::NotStarted(table.name));
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    stopped = true;
                    slots.push(Slot::NotStarted(table.name));
                    continue;
                }
            };

            // Cancellation may have arrived while waiting for a permit.
            if cancel.is_cancelled() {
                drop(permit);
                info!("Cancellation requested, not starting further tables");
                stopped = true;
                slots.push(Slot::NotStarted(table.name));
                continue;
            }

            let ctx = ctx.clone();
            let name = table.name.clone();
            let handle = tokio::spawn(async move {
                let report = ctx.process(table).await;
                drop(permit);
                report
            });
            slots.push(Slot::Spawned(name, handle));
        }

        slots
    }
}

impl TableContext {
    fn enter(tracker: &mut PhaseTracker, next: RunPhase) {
        if let Err(e) = tracker.advance(next) {
            error!("{}", e);
        }
    }

    /// count → count → decide → cleanup for one table.
    async fn process(&self, table: TableMeta) -> TableReport {
        let name = table.name.clone();
        let mut tracker = PhaseTracker::new(&name);

        Self::enter(&mut tracker, RunPhase::Inventorying);
        let entry = match self.reader.inventory(&table).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("{}: source count failed: {}", name, e);
                Self::enter(&mut tracker, RunPhase::Reporting);
                Self::enter(&mut tracker, RunPhase::Done);
                return TableReport {
                    table_name: name.clone(),
                    source_row_count: None,
                    verification: Some(VerificationResult::source_failed(name)),
                    cleanup: None,
                    error: Some(e.to_string()),
                };
            }
        };

        Self::enter(&mut tracker, RunPhase::Verifying);
        let mut error = None;
        let verification = match self.destination.row_count(&name).await {
            Ok(count) => VerificationResult::decide(&entry, count.rows(), self.threshold),
            Err(e) => {
                warn!(
                    "{}: destination count failed: {}",
                    self.destination.describe(&name),
                    e
                );
                error = Some(e.to_string());
                VerificationResult::query_failed(&entry)
            }
        };

        let destination = verification
            .destination_row_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        let ratio = verification
            .ratio
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "-".to_string());
        info!(
            "{}: source {} rows, destination {} rows, coverage {}: {}",
            name, entry.row_count, destination, ratio, verification.verdict
        );

        let cleanup = match self.mode.cleanup_policy() {
            None => None,
            Some(policy) => {
                let next = if verification.is_verified() || policy.force {
                    RunPhase::CleaningUp
                } else {
                    RunPhase::SkippingCleanup
                };
                Self::enter(&mut tracker, next);
                let outcome = self
                    .executor
                    .execute(&name, verification.verdict, policy)
                    .await;
                if error.is_none() {
                    error = outcome.error_detail.clone();
                }
                Some(outcome)
            }
        };

        Self::enter(&mut tracker, RunPhase::Reporting);
        Self::enter(&mut tracker, RunPhase::Done);

        TableReport {
            table_name: name,
            source_row_count: Some(entry.row_count),
            verification: Some(verification),
            cleanup,
            error,
        }
    }
}
