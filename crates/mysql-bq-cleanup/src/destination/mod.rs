//! Destination (BigQuery) read operations.
//!
//! The destination is only ever read: existence checks and row counts.

mod bigquery;

pub use bigquery::BigQueryDestination;

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::source::with_timeout;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Row count as seen by the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationCount {
    /// The table exists with this many rows.
    Present(u64),
    /// No table by that name exists in the dataset.
    Absent,
}

impl DestinationCount {
    /// Row count, or `None` when the table is absent.
    pub fn rows(&self) -> Option<u64> {
        match self {
            DestinationCount::Present(n) => Some(*n),
            DestinationCount::Absent => None,
        }
    }
}

/// Trait for destination read operations.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Check reachability and credentials.
    async fn ping(&self) -> Result<()>;

    /// Exact row count of the same-named destination table.
    async fn row_count(&self, table: &str) -> Result<DestinationCount>;

    /// Fully qualified name of `table`, for logs and reports.
    fn describe(&self, table: &str) -> String;
}

/// Wraps a destination with per-attempt deadlines and bounded retries.
pub struct RetryingDestination {
    inner: Arc<dyn DestinationStore>,
    policy: RetryPolicy,
    read_timeout: Duration,
}

impl RetryingDestination {
    pub fn new(inner: Arc<dyn DestinationStore>, policy: RetryPolicy, read_timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            read_timeout,
        }
    }
}

#[async_trait]
impl DestinationStore for RetryingDestination {
    async fn ping(&self) -> Result<()> {
        let inner = &self.inner;
        let timeout = self.read_timeout;
        self.policy
            .run("destination ping", move || async move {
                with_timeout(timeout, "destination ping", inner.ping()).await
            })
            .await
    }

    async fn row_count(&self, table: &str) -> Result<DestinationCount> {
        let label = self.inner.describe(table);
        let inner = &self.inner;
        let timeout = self.read_timeout;
        let operation = format!("counting rows of {}", label);
        let operation = operation.as_str();
        self.policy
            .run(&label, move || async move {
                with_timeout(timeout, operation, inner.row_count(table)).await
            })
            .await
    }

    fn describe(&self, table: &str) -> String {
        self.inner.describe(table)
    }
}
