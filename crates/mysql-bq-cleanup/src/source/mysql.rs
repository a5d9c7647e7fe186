//! MySQL staging database implementation.
//!
//! Uses SQLx for connection pooling. Cleanup uses `DELETE` inside a transaction
//! because `TRUNCATE TABLE` commits implicitly and cannot be rolled back.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Row, Transaction};
use tracing::{debug, info};

use super::{SourceStore, SourceTransaction, TableMeta};
use crate::config::{SourceConfig, SslMode};
use crate::error::{CleanupError, Result, Store};

/// MySQL error codes that mean the credentials were rejected.
const AUTH_ERROR_CODES: &[&str] = &["1044", "1045", "1698"];

/// MySQL error codes worth retrying (lock wait timeout, deadlock).
const TRANSIENT_ERROR_CODES: &[&str] = &["1205", "1213"];

/// MySQL staging database.
pub struct MysqlSource {
    pool: MySqlPool,
    database: String,
}

impl MysqlSource {
    /// Connect to the source and check the connection with `SELECT 1`.
    pub async fn new(config: &SourceConfig, max_conns: usize, acquire_timeout: Duration) -> Result<Self> {
        let ssl_mode = match config.ssl_mode {
            SslMode::Disabled => MySqlSslMode::Disabled,
            SslMode::Preferred => MySqlSslMode::Preferred,
            SslMode::Required => MySqlSslMode::Required,
        };

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns.max(1) as u32)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| classify_connect(&e))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| classify_connect(&e))?;

        info!(
            "Connected to MySQL source: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }

    /// Quote a MySQL identifier.
    pub fn quote_ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn count_query(table: &str) -> String {
        format!("SELECT COUNT(*) AS cnt FROM {}", Self::quote_ident(table))
    }

    fn read_count(row: &MySqlRow, table: &str) -> Result<u64> {
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| CleanupError::query(table, e))?;
        u64::try_from(count).map_err(|_| CleanupError::query(table, "negative row count"))
    }
}

/// Map an error raised while connecting.
fn classify_connect(err: &sqlx::Error) -> CleanupError {
    if let Some(code) = database_code(err) {
        if AUTH_ERROR_CODES.contains(&code.as_str()) {
            return CleanupError::Auth(format!("MySQL rejected credentials: {}", err));
        }
    }
    CleanupError::connection(Store::Source, err)
}

/// Map an error raised by a statement against `table`.
fn classify(err: &sqlx::Error, table: &str) -> CleanupError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            CleanupError::connection(Store::Source, err)
        }
        _ => match database_code(err) {
            Some(code) if AUTH_ERROR_CODES.contains(&code.as_str()) => {
                CleanupError::Auth(format!("MySQL rejected credentials: {}", err))
            }
            Some(code) if TRANSIENT_ERROR_CODES.contains(&code.as_str()) => {
                CleanupError::transient(table, err)
            }
            _ => CleanupError::query(table, err),
        },
    }
}

fn database_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

#[async_trait]
impl SourceStore for MysqlSource {
    async fn list_tables(&self) -> Result<Vec<TableMeta>> {
        // CAST to CHAR to handle collation differences
        let query = r#"
            SELECT
                CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
                CAST(COALESCE(TABLE_ROWS, 0) AS UNSIGNED) AS TABLE_ROWS,
                CAST(COALESCE(DATA_LENGTH, 0) + COALESCE(INDEX_LENGTH, 0) AS UNSIGNED) AS size_bytes
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(&e, "INFORMATION_SCHEMA.TABLES"))?;

        let tables = rows
            .iter()
            .map(|row| {
                Ok(TableMeta {
                    name: row
                        .try_get::<String, _>("TABLE_NAME")
                        .map_err(|e| classify(&e, "INFORMATION_SCHEMA.TABLES"))?,
                    estimated_rows: row.try_get::<u64, _>("TABLE_ROWS").unwrap_or(0),
                    approximate_size_bytes: row.try_get::<u64, _>("size_bytes").unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Listed {} tables in {}", tables.len(), self.database);
        Ok(tables)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let row: MySqlRow = sqlx::query(&Self::count_query(table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(&e, table))?;

        Self::read_count(&row, table)
    }

    async fn begin(&self) -> Result<Box<dyn SourceTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CleanupError::connection(Store::Source, e))?;
        Ok(Box::new(MysqlTransaction { tx }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// A transaction pinned to one pooled connection.
pub struct MysqlTransaction {
    tx: Transaction<'static, MySql>,
}

#[async_trait]
impl SourceTransaction for MysqlTransaction {
    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        let row: MySqlRow = sqlx::query(&MysqlSource::count_query(table))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| CleanupError::transaction(table, e))?;

        MysqlSource::read_count(&row, table)
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64> {
        let query = format!("DELETE FROM {}", MysqlSource::quote_ident(table));
        let result = sqlx::query(&query)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| CleanupError::transaction(table, e))?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| CleanupError::transaction("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| CleanupError::transaction("rollback", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(MysqlSource::quote_ident("orders"), "`orders`");
        assert_eq!(MysqlSource::quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_count_query_quotes_table() {
        assert_eq!(
            MysqlSource::count_query("order items"),
            "SELECT COUNT(*) AS cnt FROM `order items`"
        );
    }

    #[test]
    fn test_io_errors_are_connection_errors() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(matches!(
            classify(&err, "orders"),
            CleanupError::Connection {
                store: Store::Source,
                ..
            }
        ));
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        assert!(classify(&sqlx::Error::PoolTimedOut, "orders").is_retryable());
    }

    #[test]
    fn test_decode_errors_are_permanent() {
        let err = sqlx::Error::ColumnNotFound("cnt".into());
        let classified = classify(&err, "orders");
        assert!(matches!(classified, CleanupError::Query { retryable: false, .. }));
    }

    #[test]
    fn test_catalog_decode_error_is_query_error() {
        let err = sqlx::Error::ColumnNotFound("TABLE_NAME".into());
        let classified = classify(&err, "INFORMATION_SCHEMA.TABLES");
        assert!(
            matches!(&classified, CleanupError::Query { table, .. } if table == "INFORMATION_SCHEMA.TABLES")
        );
    }
}
