//! # mysql-bq-cleanup
//!
//! Post-load verification and cleanup for a MySQL staging database whose
//! tables have been transferred to BigQuery.
//!
//! Each run inventories the staging tables with exact row counts, compares
//! them with the same-named BigQuery tables, and truncates only the tables
//! whose destination coverage meets the configured threshold:
//!
//! - **Verification** is a pure decision over two counts and a threshold
//! - **Cleanup** runs in a source transaction and rolls back on any failure
//! - **Modes** `normal`, `dry-run`, `verify-only` and `force`
//! - **Per-table isolation**: one table's failure never stops the run
//!
//! ## Example
//!
//! ```rust,no_run
//! use mysql_bq_cleanup::{Config, Orchestrator, RunMode, RunRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mysql_bq_cleanup::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::connect(config).await?;
//!     let summary = orchestrator
//!         .run(RunRequest::new(RunMode::VerifyOnly), CancellationToken::new())
//!         .await?;
//!     println!("{}", summary.render_text());
//!     Ok(())
//! }
//! ```

pub mod cleanup;
pub mod config;
pub mod destination;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod source;
pub mod verify;

// Re-exports for convenient access
pub use cleanup::{CleanupExecutor, CleanupOutcome, CleanupPolicy, CleanupStatus};
pub use config::{CleanupConfig, Config, DestinationConfig, SourceConfig};
pub use destination::{BigQueryDestination, DestinationCount, DestinationStore};
pub use error::{CleanupError, Result};
pub use orchestrator::{Orchestrator, RunMode, RunPhase, RunRequest};
pub use report::{RunStatus, RunSummary, TableReport};
pub use retry::RetryPolicy;
pub use source::{InventoryReader, MysqlSource, SourceStore, TableInventoryEntry};
pub use verify::{decide, Verdict, VerificationResult};
