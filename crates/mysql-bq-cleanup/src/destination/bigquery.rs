//! BigQuery destination over the REST API.
//!
//! Existence is checked with `tables.get`; counts run `SELECT COUNT(*)`
//! through `jobs.query` so rows still in the streaming buffer are included.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{DestinationCount, DestinationStore};
use crate::config::DestinationConfig;
use crate::error::{CleanupError, Result, Store};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/bigquery.readonly"];

/// BigQuery dataset holding the loaded tables.
pub struct BigQueryDestination {
    token_provider: Arc<dyn TokenProvider>,
    client: reqwest::Client,
    project_id: String,
    dataset: String,
    location: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for BigQueryDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryDestination")
            .field("token_provider", &"<TokenProvider>")
            .field("project_id", &self.project_id)
            .field("dataset", &self.dataset)
            .field("location", &self.location)
            .finish()
    }
}

/// `jobs.query` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

/// `jobs.query` / `jobs.getQueryResults` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<ResultRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultRow {
    f: Vec<ResultCell>,
}

#[derive(Debug, Deserialize)]
struct ResultCell {
    v: Option<serde_json::Value>,
}

/// BigQuery API error response.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    status: String,
}

impl BigQueryDestination {
    /// Resolve credentials, determine the project, and build the HTTP client.
    ///
    /// Credentials are taken from `credentials_file`, then `credentials_json`,
    /// then the ambient environment (`GOOGLE_APPLICATION_CREDENTIALS`,
    /// metadata server, gcloud).
    pub async fn new(config: &DestinationConfig, timeout: Duration) -> Result<Self> {
        let token_provider: Arc<dyn TokenProvider> = if let Some(path) = &config.credentials_file {
            let account = CustomServiceAccount::from_file(path).map_err(|e| {
                CleanupError::Auth(format!(
                    "Failed to load service account {}: {e}",
                    path.display()
                ))
            })?;
            Arc::new(account)
        } else if let Some(json) = &config.credentials_json {
            let account = CustomServiceAccount::from_json(json).map_err(|e| {
                CleanupError::Auth(format!("Failed to parse service account JSON: {e}"))
            })?;
            Arc::new(account)
        } else {
            gcp_auth::provider()
                .await
                .map_err(|e| CleanupError::Auth(format!("Failed to initialize GCP auth: {e}")))?
        };

        let project_id = if config.project_id.is_empty() {
            token_provider
                .project_id()
                .await
                .map_err(|e| {
                    CleanupError::Config(format!(
                        "destination.project_id not set and not available from credentials: {e}"
                    ))
                })?
                .to_string()
        } else {
            config.project_id.clone()
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CleanupError::Config(format!("Failed to create HTTP client: {e}")))?;

        info!(
            "Using BigQuery dataset: {}",
            config.dataset_ref(&project_id)
        );

        Ok(Self {
            token_provider,
            client,
            project_id,
            dataset: config.dataset.clone(),
            location: config.location.clone(),
            timeout,
        })
    }

    /// Gets an access token for the BigQuery API.
    async fn access_token(&self) -> Result<String> {
        let token = self
            .token_provider
            .token(SCOPES)
            .await
            .map_err(|e| CleanupError::Auth(format!("Failed to get GCP access token: {e}")))?;
        Ok(token.as_str().to_string())
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            API_BASE, self.project_id, self.dataset, table
        )
    }

    fn dataset_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}",
            API_BASE, self.project_id, self.dataset
        )
    }

    fn count_sql(&self, table: &str) -> String {
        format!(
            "SELECT COUNT(*) FROM `{}.{}.{}`",
            self.project_id,
            self.dataset,
            table.replace('`', "\\`")
        )
    }

    fn timeout_ms(&self) -> u64 {
        server_wait_ms(self.timeout)
    }

    async fn send(&self, request: reqwest::RequestBuilder, table: &str) -> Result<reqwest::Response> {
        let access_token = self.access_token().await?;
        request
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CleanupError::transient(table, format!("BigQuery request timed out: {e}"))
                } else {
                    CleanupError::connection(Store::Destination, e)
                }
            })
    }

    async fn query_count(&self, table: &str) -> Result<u64> {
        let request = QueryRequest {
            query: self.count_sql(table),
            use_legacy_sql: false,
            timeout_ms: self.timeout_ms(),
            location: self.location.clone(),
        };
        let url = format!("{}/projects/{}/queries", API_BASE, self.project_id);
        let response = self.send(self.client.post(&url).json(&request), table).await?;
        let mut body: QueryResponse = parse_response(response, table).await?;

        // The outer read deadline bounds this loop.
        while !body.job_complete {
            let job = body
                .job_reference
                .as_ref()
                .ok_or_else(|| CleanupError::query(table, "incomplete job without a job reference"))?;
            debug!("{}: waiting for BigQuery job {}", table, job.job_id);

            let url = format!(
                "{}/projects/{}/queries/{}",
                API_BASE, self.project_id, job.job_id
            );
            let mut params = vec![("timeoutMs", self.timeout_ms().to_string())];
            if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
                params.push(("location", location.clone()));
            }
            let response = self.send(self.client.get(&url).query(&params), table).await?;
            body = parse_response(response, table).await?;
        }

        parse_count(&body, table)
    }
}

#[async_trait]
impl DestinationStore for BigQueryDestination {
    async fn ping(&self) -> Result<()> {
        let response = self.send(self.client.get(self.dataset_url()), &self.dataset).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CleanupError::Config(format!(
                "BigQuery dataset {}.{} does not exist",
                self.project_id, self.dataset
            )));
        }
        let _: serde_json::Value = parse_response(response, &self.dataset).await?;
        info!("Connected to BigQuery dataset: {}.{}", self.project_id, self.dataset);
        Ok(())
    }

    async fn row_count(&self, table: &str) -> Result<DestinationCount> {
        let response = self.send(self.client.get(self.table_url(table)), table).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("{}: not found in BigQuery", self.describe(table));
            return Ok(DestinationCount::Absent);
        }
        let _: serde_json::Value = parse_response(response, table).await?;

        let rows = self.query_count(table).await?;
        Ok(DestinationCount::Present(rows))
    }

    fn describe(&self, table: &str) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset, table)
    }
}

/// How long BigQuery may hold a `jobs.query`/`getQueryResults` call open.
///
/// A third of the request deadline, so an unfinished job comes back with
/// `jobComplete: false` and is polled instead of tripping the client timeout.
fn server_wait_ms(timeout: Duration) -> u64 {
    u64::try_from((timeout / 3).as_millis()).unwrap_or(u64::MAX)
}

/// Decode a successful response or classify the failure.
async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    table: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| CleanupError::transient(table, format!("reading BigQuery response: {e}")))?;

    if status.is_success() {
        serde_json::from_str(&body)
            .map_err(|e| CleanupError::query(table, format!("unexpected BigQuery response: {e}")))
    } else {
        Err(classify_status(status, &body, table))
    }
}

/// Map a non-success HTTP status to an error.
///
/// 401/403 are credential problems, 429 and 5xx are transient, any other
/// status is a permanent query failure.
fn classify_status(status: StatusCode, body: &str, table: &str) -> CleanupError {
    let message = match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(r) if r.error.status.is_empty() => format!("{} ({})", r.error.message, status),
        Ok(r) => format!("{} ({})", r.error.message, r.error.status),
        Err(_) => format!("{} - {}", status, body),
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CleanupError::Auth(format!("BigQuery rejected credentials: {}", message))
        }
        StatusCode::TOO_MANY_REQUESTS => CleanupError::transient(table, message),
        s if s.is_server_error() => CleanupError::transient(table, message),
        _ => CleanupError::query(table, message),
    }
}

/// Extract the single integer cell of a `COUNT(*)` result.
fn parse_count(body: &QueryResponse, table: &str) -> Result<u64> {
    let cell = body
        .rows
        .first()
        .and_then(|row| row.f.first())
        .and_then(|cell| cell.v.as_ref())
        .ok_or_else(|| CleanupError::query(table, "COUNT(*) returned no rows"))?;

    // BigQuery encodes INT64 values as JSON strings.
    match cell {
        serde_json::Value::String(s) => s
            .parse::<u64>()
            .map_err(|e| CleanupError::query(table, format!("invalid count {:?}: {e}", s))),
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| CleanupError::query(table, format!("invalid count {}", n))),
        other => Err(CleanupError::query(
            table,
            format!("invalid count {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> QueryResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_count_string_cell() {
        let body = response(
            r#"{"jobComplete": true, "rows": [{"f": [{"v": "12345"}]}], "totalRows": "1"}"#,
        );
        assert_eq!(parse_count(&body, "orders").unwrap(), 12345);
    }

    #[test]
    fn test_parse_count_numeric_cell() {
        let body = response(r#"{"jobComplete": true, "rows": [{"f": [{"v": 7}]}]}"#);
        assert_eq!(parse_count(&body, "orders").unwrap(), 7);
    }

    #[test]
    fn test_parse_count_without_rows_fails() {
        let body = response(r#"{"jobComplete": true}"#);
        assert!(parse_count(&body, "orders").is_err());
    }

    #[test]
    fn test_incomplete_job_keeps_reference() {
        let body = response(
            r#"{"jobComplete": false, "jobReference": {"projectId": "p", "jobId": "job_1", "location": "US"}}"#,
        );
        assert!(!body.job_complete);
        let job = body.job_reference.unwrap();
        assert_eq!(job.job_id, "job_1");
        assert_eq!(job.location.as_deref(), Some("US"));
    }

    #[test]
    fn test_query_request_body() {
        let request = QueryRequest {
            query: "SELECT 1".to_string(),
            use_legacy_sql: false,
            timeout_ms: 30_000,
            location: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["useLegacySql"], false);
        assert_eq!(json["timeoutMs"], 30_000);
        assert!(json.get("location").is_none());
    }

    #[test]
    fn test_server_wait_is_shorter_than_request_deadline() {
        assert_eq!(server_wait_ms(Duration::from_secs(30)), 10_000);
        assert_eq!(server_wait_ms(Duration::from_secs(1)), 333);
        assert!(server_wait_ms(Duration::from_secs(45)) < 45_000);
    }

    #[test]
    fn test_classify_status() {
        let body = r#"{"error": {"code": 403, "message": "Access Denied", "status": "PERMISSION_DENIED"}}"#;
        let err = classify_status(StatusCode::FORBIDDEN, body, "orders");
        assert!(matches!(&err, CleanupError::Auth(m) if m.contains("Access Denied")));

        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "", "orders").is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "", "orders").is_retryable());

        let err = classify_status(StatusCode::BAD_REQUEST, "bad", "orders");
        assert!(matches!(err, CleanupError::Query { retryable: false, .. }));
    }
}
