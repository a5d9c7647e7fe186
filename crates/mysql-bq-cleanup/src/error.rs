//! Error types for the cleanup engine.

use std::fmt;
use thiserror::Error;

/// Exit code for a completed run.
pub const EXIT_SUCCESS: u8 = 0;
/// Configuration error (invalid YAML, missing fields, bad threshold).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// A store could not be reached before any table was processed.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Credentials were rejected before any table was processed.
pub const EXIT_AUTH_ERROR: u8 = 3;
/// The `--table` filter did not match any source table.
pub const EXIT_TABLE_NOT_FOUND: u8 = 4;
/// Not a single table could be inventoried.
pub const EXIT_NOTHING_INVENTORIED: u8 = 5;
/// The run was cancelled before it completed.
pub const EXIT_CANCELLED: u8 = 6;
/// File system error (config file, report file).
pub const EXIT_IO_ERROR: u8 = 7;

/// Which store an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// The MySQL staging database.
    Source,
    /// The BigQuery dataset.
    Destination,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Store::Source => write!(f, "source"),
            Store::Destination => write!(f, "destination"),
        }
    }
}

/// Main error type for verification and cleanup operations.
#[derive(Error, Debug)]
pub enum CleanupError {
    /// Configuration error (invalid YAML, missing fields, invalid mode combination)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store unreachable
    #[error("Cannot reach {store} store: {message}")]
    Connection { store: Store, message: String },

    /// Credentials rejected by a store
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Requested filter table does not exist in the source
    #[error("Table '{0}' not found in source database")]
    TableNotFound(String),

    /// Query failure; `retryable` marks transient failures
    #[error("Query failed for {table}: {message}")]
    Query {
        table: String,
        message: String,
        retryable: bool,
    },

    /// Cleanup write failed and was rolled back
    #[error("Transaction failed for {table}: {message}")]
    Transaction { table: String, message: String },

    /// A store call exceeded its deadline
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// Zero tables could be inventoried
    #[error("No tables could be inventoried from the source database")]
    NothingInventoried,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Run cancelled")]
    Cancelled,
}

impl CleanupError {
    /// Create a Connection error.
    pub fn connection(store: Store, message: impl fmt::Display) -> Self {
        CleanupError::Connection {
            store,
            message: message.to_string(),
        }
    }

    /// Create a transient (retryable) Query error.
    pub fn transient(table: impl Into<String>, message: impl fmt::Display) -> Self {
        CleanupError::Query {
            table: table.into(),
            message: message.to_string(),
            retryable: true,
        }
    }

    /// Create a permanent Query error.
    pub fn query(table: impl Into<String>, message: impl fmt::Display) -> Self {
        CleanupError::Query {
            table: table.into(),
            message: message.to_string(),
            retryable: false,
        }
    }

    /// Create a Transaction error.
    pub fn transaction(table: impl Into<String>, message: impl fmt::Display) -> Self {
        CleanupError::Transaction {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same read could succeed.
    ///
    /// Writes are never retried, so `Transaction` is not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CleanupError::Query {
                retryable: true,
                ..
            } | CleanupError::Timeout { .. }
                | CleanupError::Connection { .. }
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CleanupError::Config(_) | CleanupError::Yaml(_) | CleanupError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            CleanupError::Connection { .. }
            | CleanupError::Query { .. }
            | CleanupError::Timeout { .. }
            | CleanupError::Transaction { .. } => EXIT_CONNECTION_ERROR,
            CleanupError::Auth(_) => EXIT_AUTH_ERROR,
            CleanupError::TableNotFound(_) => EXIT_TABLE_NOT_FOUND,
            CleanupError::NothingInventoried => EXIT_NOTHING_INVENTORIED,
            CleanupError::Cancelled => EXIT_CANCELLED,
            CleanupError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for cleanup operations.
pub type Result<T> = std::result::Result<T, CleanupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_query_is_retryable() {
        assert!(CleanupError::transient("orders", "503 backend error").is_retryable());
        assert!(!CleanupError::query("orders", "invalid table name").is_retryable());
    }

    #[test]
    fn test_transaction_errors_are_never_retried() {
        let err = CleanupError::transaction("orders", "lock wait timeout");
        assert!(!err.is_retryable());
        assert_eq!(err.exit_code(), EXIT_CONNECTION_ERROR);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CleanupError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(CleanupError::Auth("x".into()).exit_code(), EXIT_AUTH_ERROR);
        assert_eq!(
            CleanupError::TableNotFound("orders".into()).exit_code(),
            EXIT_TABLE_NOT_FOUND
        );
        assert_eq!(
            CleanupError::NothingInventoried.exit_code(),
            EXIT_NOTHING_INVENTORIED
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(CleanupError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = CleanupError::connection(Store::Destination, "dns lookup failed");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Cannot reach destination store"));
        assert!(detailed.contains("dns lookup failed"));
    }
}
