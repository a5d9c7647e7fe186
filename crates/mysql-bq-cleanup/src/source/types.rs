//! Source table metadata types.

use serde::{Deserialize, Serialize};

/// A table as listed by the source catalog, before an exact count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Table name.
    pub name: String,

    /// Storage-engine row estimate. Advisory only.
    pub estimated_rows: u64,

    /// Data plus index size in bytes. Advisory only.
    pub approximate_size_bytes: u64,
}

impl TableMeta {
    /// Approximate size in megabytes, for logs.
    pub fn size_mb(&self) -> f64 {
        self.approximate_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// One source table at scan time, with an exact row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInventoryEntry {
    /// Table name (unique within a run).
    pub name: String,

    /// Exact row count from `SELECT COUNT(*)`.
    pub row_count: u64,

    /// Data plus index size in bytes. Advisory only.
    pub approximate_size_bytes: u64,
}

impl TableInventoryEntry {
    pub fn new(name: impl Into<String>, row_count: u64, approximate_size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            row_count,
            approximate_size_bytes,
        }
    }

    /// Whether the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}
