//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MySQL staging store).
    pub source: SourceConfig,

    /// Destination configuration (BigQuery dataset).
    pub destination: DestinationConfig,

    /// Verification and cleanup behavior.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Source database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name. Only tables of this schema are inventoried.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Falls back to `MYSQL_PASSWORD` when empty.
    #[serde(default)]
    pub password: String,

    /// TLS mode (default: preferred).
    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// TLS mode for the MySQL connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslMode {
    Disabled,
    #[default]
    Preferred,
    Required,
}

/// Destination (BigQuery) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// GCP project. Taken from the service-account credentials when empty.
    #[serde(default)]
    pub project_id: String,

    /// Dataset holding the loaded tables (default: "bec_bq").
    #[serde(default = "default_dataset")]
    pub dataset: String,

    /// Path to a service-account JSON key file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,

    /// Inline service-account JSON. Read from
    /// `GOOGLE_APPLICATION_CREDENTIALS_JSON` when not set; never serialized.
    #[serde(default, skip_serializing)]
    pub credentials_json: Option<String>,

    /// BigQuery job location (e.g. "US", "asia-southeast1").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("project_id", &self.project_id)
            .field("dataset", &self.dataset)
            .field("credentials_file", &self.credentials_file)
            .field(
                "credentials_json",
                &self.credentials_json.as_ref().map(|_| "[REDACTED]"),
            )
            .field("location", &self.location)
            .finish()
    }
}

/// Verification and cleanup behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Minimum destination/source coverage ratio for a table to be verified.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Tables processed concurrently (1 = sequential).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deadline for every read (counts, metadata, connection checkout).
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Deadline for each statement of the cleanup transaction.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Retries for transient destination count failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubled on every further attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single retry delay.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Tables never inventoried (`*` wildcards).
    #[serde(default)]
    pub exclude_tables: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            workers: default_workers(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            exclude_tables: Vec::new(),
        }
    }
}

impl CleanupConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Largest worker pool allowed.
pub const MAX_WORKERS: usize = 8;

// Default value functions for serde
fn default_mysql_port() -> u16 {
    3306
}

fn default_dataset() -> String {
    "bec_bq".to_string()
}

fn default_threshold() -> f64 {
    crate::verify::DEFAULT_THRESHOLD
}

fn default_workers() -> usize {
    1
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_write_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}
