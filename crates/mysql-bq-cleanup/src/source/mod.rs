//! MySQL source (staging) database operations.

mod mysql;
mod types;

pub use mysql::MysqlSource;
pub use types::*;

use crate::error::{CleanupError, Result};
use async_trait::async_trait;
use glob::Pattern;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Trait for source database operations.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// List user tables of the configured schema, ordered by name.
    async fn list_tables(&self) -> Result<Vec<TableMeta>>;

    /// Exact row count of a table.
    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Open a transaction on an exclusively checked-out connection.
    async fn begin(&self) -> Result<Box<dyn SourceTransaction>>;

    /// Close all connections.
    async fn close(&self);
}

/// An open source transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait SourceTransaction: Send {
    /// Exact row count as seen inside the transaction.
    async fn count_rows(&mut self, table: &str) -> Result<u64>;

    /// Delete every row of the table, returning the affected row count.
    async fn delete_all(&mut self, table: &str) -> Result<u64>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back the transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Await `fut`, mapping an elapsed deadline to [`CleanupError::Timeout`].
pub async fn with_timeout<T, F>(duration: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(CleanupError::Timeout {
            operation: operation.to_string(),
            seconds: duration.as_secs(),
        }),
    }
}

/// Compile `exclude_tables` globs, rejecting malformed ones.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                CleanupError::Config(format!("invalid exclude_tables pattern '{}': {}", p, e))
            })
        })
        .collect()
}

/// Source Inventory Reader.
///
/// Discovers candidate tables and takes the exact counts the verification
/// decision relies on. Never writes.
pub struct InventoryReader {
    source: Arc<dyn SourceStore>,
    exclude: Vec<Pattern>,
    read_timeout: Duration,
}

impl InventoryReader {
    pub fn new(
        source: Arc<dyn SourceStore>,
        exclude: &[String],
        read_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            source,
            exclude: compile_patterns(exclude)?,
            read_timeout,
        })
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|p| p.matches(name))
    }

    /// List the tables to process, optionally restricted to one name.
    pub async fn discover(&self, filter: Option<&str>) -> Result<Vec<TableMeta>> {
        info!("Scanning source tables...");
        let tables = with_timeout(self.read_timeout, "listing source tables", async {
            self.source.list_tables().await
        })
        .await?;

        let mut tables: Vec<TableMeta> = tables
            .into_iter()
            .filter(|t| !self.is_excluded(&t.name))
            .collect();

        if let Some(name) = filter {
            tables.retain(|t| t.name == name);
            if tables.is_empty() {
                return Err(CleanupError::TableNotFound(name.to_string()));
            }
        }

        info!("Found {} table(s) in source", tables.len());
        for table in &tables {
            info!(
                "  {}: ~{} rows ({:.2} MB)",
                table.name,
                table.estimated_rows,
                table.size_mb()
            );
        }

        Ok(tables)
    }

    /// Take the exact count of one discovered table.
    pub async fn inventory(&self, table: &TableMeta) -> Result<TableInventoryEntry> {
        let operation = format!("counting rows of {}", table.name);
        let row_count = with_timeout(self.read_timeout, &operation, async {
            self.source.count_rows(&table.name).await
        })
        .await?;

        Ok(TableInventoryEntry::new(
            &table.name,
            row_count,
            table.approximate_size_bytes,
        ))
    }
}
