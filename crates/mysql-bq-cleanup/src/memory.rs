//! In-memory source and destination stores.
//!
//! Both implement the store traits with injectable failures and record every
//! write statement, so runs can be exercised without MySQL or BigQuery.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::destination::{DestinationCount, DestinationStore};
use crate::error::{CleanupError, Result, Store};
use crate::source::{SourceStore, SourceTransaction, TableMeta};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy)]
struct MemoryTable {
    rows: u64,
    estimate: u64,
}

#[derive(Default)]
struct SourceState {
    tables: Mutex<BTreeMap<String, MemoryTable>>,
    count_failures: Mutex<HashSet<String>>,
    delete_failures: Mutex<HashSet<String>>,
    leftover_rows: Mutex<HashMap<String, u64>>,
    count_delay: Mutex<Duration>,
    delete_delay: Mutex<Duration>,
    unreachable: AtomicBool,
    closed: AtomicBool,
    fail_commit: AtomicBool,
    write_statements: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// In-memory staging database.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<SourceState>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table whose engine estimate equals its exact count.
    pub fn with_table(self, name: &str, rows: u64) -> Self {
        self.with_table_estimate(name, rows, rows)
    }

    /// Add a table with a separate (possibly stale) engine estimate.
    pub fn with_table_estimate(self, name: &str, rows: u64, estimate: u64) -> Self {
        lock(&self.state.tables).insert(name.to_string(), MemoryTable { rows, estimate });
        self
    }

    /// Make exact counts of `table` fail.
    pub fn fail_counts_for(&self, table: &str) {
        lock(&self.state.count_failures).insert(table.to_string());
    }

    /// Make `DELETE` on `table` fail.
    pub fn fail_deletes_for(&self, table: &str) {
        lock(&self.state.delete_failures).insert(table.to_string());
    }

    /// Have `DELETE` on `table` leave `rows` behind, as a concurrent insert would.
    pub fn leave_rows_after_delete(&self, table: &str, rows: u64) {
        lock(&self.state.leftover_rows).insert(table.to_string(), rows);
    }

    /// Make every commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.state.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay every exact count.
    pub fn set_count_delay(&self, delay: Duration) {
        *lock(&self.state.count_delay) = delay;
    }

    /// Delay every `DELETE`, after the statement is issued.
    pub fn set_delete_delay(&self, delay: Duration) {
        *lock(&self.state.delete_delay) = delay;
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Committed row count of `table`.
    pub fn rows(&self, table: &str) -> Option<u64> {
        lock(&self.state.tables).get(table).map(|t| t.rows)
    }

    /// Write statements issued, committed or not.
    pub fn write_statements(&self) -> usize {
        self.state.write_statements.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(CleanupError::connection(Store::Source, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn list_tables(&self) -> Result<Vec<TableMeta>> {
        self.check_reachable()?;
        Ok(lock(&self.state.tables)
            .iter()
            .map(|(name, t)| TableMeta {
                name: name.clone(),
                estimated_rows: t.estimate,
                approximate_size_bytes: t.rows * 128,
            })
            .collect())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        self.check_reachable()?;
        let delay = *lock(&self.state.count_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.state.count_failures).contains(table) {
            return Err(CleanupError::query(table, "injected count failure"));
        }
        self.rows(table)
            .ok_or_else(|| CleanupError::query(table, "table does not exist"))
    }

    async fn begin(&self) -> Result<Box<dyn SourceTransaction>> {
        self.check_reachable()?;
        Ok(Box::new(MemoryTransaction {
            source: self.clone(),
            staged: HashMap::new(),
        }))
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

/// Staged deletes, applied on commit and discarded otherwise.
struct MemoryTransaction {
    source: MemorySource,
    staged: HashMap<String, u64>,
}

#[async_trait]
impl SourceTransaction for MemoryTransaction {
    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        if let Some(rows) = self.staged.get(table) {
            return Ok(*rows);
        }
        self.source
            .rows(table)
            .ok_or_else(|| CleanupError::transaction(table, "table does not exist"))
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64> {
        self.source
            .state
            .write_statements
            .fetch_add(1, Ordering::SeqCst);
        if lock(&self.source.state.delete_failures).contains(table) {
            return Err(CleanupError::transaction(table, "injected delete failure"));
        }
        let delay = *lock(&self.source.state.delete_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let before = self.count_rows(table).await?;
        let leftover = lock(&self.source.state.leftover_rows)
            .get(table)
            .copied()
            .unwrap_or(0);
        self.staged.insert(table.to_string(), leftover);
        Ok(before)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.source.state.fail_commit.load(Ordering::SeqCst) {
            return Err(CleanupError::transaction("commit", "injected commit failure"));
        }
        let mut tables = lock(&self.source.state.tables);
        for (name, rows) in &self.staged {
            if let Some(table) = tables.get_mut(name) {
                table.rows = *rows;
                table.estimate = *rows;
            }
        }
        self.source.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.source.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory destination dataset.
#[derive(Default)]
pub struct MemoryDestination {
    tables: Mutex<HashMap<String, u64>>,
    transient_failures: Mutex<HashMap<String, u32>>,
    permanent_failures: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Mutex<Duration>,
    unreachable: AtomicBool,
    reject_credentials: AtomicBool,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, rows: u64) -> Self {
        lock(&self.tables).insert(name.to_string(), rows);
        self
    }

    /// Fail the next `times` counts of `table` with a retryable error.
    pub fn fail_transiently(&self, table: &str, times: u32) {
        lock(&self.transient_failures).insert(table.to_string(), times);
    }

    /// Fail every count of `table` with a non-retryable error.
    pub fn fail_permanently(&self, table: &str) {
        lock(&self.permanent_failures).insert(table.to_string());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    /// Delay every count.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Count attempts made for `table`.
    pub fn count_calls(&self, table: &str) -> u32 {
        lock(&self.calls).get(table).copied().unwrap_or(0)
    }

    fn check_access(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CleanupError::connection(Store::Destination, "connection refused"));
        }
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(CleanupError::Auth("memory destination rejected credentials".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    async fn ping(&self) -> Result<()> {
        self.check_access()
    }

    async fn row_count(&self, table: &str) -> Result<DestinationCount> {
        *lock(&self.calls).entry(table.to_string()).or_insert(0) += 1;

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_access()?;

        if lock(&self.permanent_failures).contains(table) {
            return Err(CleanupError::query(table, "injected permanent failure"));
        }
        {
            let mut transient = lock(&self.transient_failures);
            if let Some(remaining) = transient.get_mut(table) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CleanupError::transient(table, "injected transient failure"));
                }
            }
        }

        Ok(match lock(&self.tables).get(table) {
            Some(rows) => DestinationCount::Present(*rows),
            None => DestinationCount::Absent,
        })
    }

    fn describe(&self, table: &str) -> String {
        format!("memory.{}", table)
    }
}
