//! End-to-end cleanup runs against the in-memory stores.
//!
//! Each test builds a staging fixture and a destination fixture, runs the
//! controller in one mode, and checks both the summary and the source rows.

use mysql_bq_cleanup::memory::{MemoryDestination, MemorySource};
use mysql_bq_cleanup::{
    CleanupStatus, Config, Orchestrator, RunMode, RunRequest, RunStatus, RunSummary, Verdict,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
source:
  host: rds.example.com
  database: bec
  user: admin
destination:
  project_id: bec-project
  dataset: bec_bq
cleanup:
  threshold: 0.90
  retry_base_delay_ms: 1
  retry_max_delay_ms: 2
"#;

fn config() -> Config {
    Config::from_yaml(CONFIG).unwrap()
}

fn staging() -> MemorySource {
    MemorySource::new()
        .with_table("orders", 100)
        .with_table("reviews", 100)
        .with_table("new_table", 10)
        .with_table("empty_table", 0)
}

fn warehouse() -> MemoryDestination {
    MemoryDestination::new()
        .with_table("orders", 95)
        .with_table("reviews", 50)
        .with_table("empty_table", 0)
}

async fn run_with(
    config: Config,
    source: &MemorySource,
    destination: MemoryDestination,
    request: RunRequest,
) -> RunSummary {
    let orchestrator =
        Orchestrator::with_stores(config, Arc::new(source.clone()), Arc::new(destination));
    orchestrator
        .run(request, CancellationToken::new())
        .await
        .unwrap()
}

async fn run(source: &MemorySource, mode: RunMode) -> RunSummary {
    run_with(config(), source, warehouse(), RunRequest::new(mode)).await
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_orders_within_tolerance_is_truncated() {
    let source = staging();
    let summary = run(&source, RunMode::Normal).await;

    let orders = summary.table("orders").unwrap();
    assert_eq!(orders.verdict(), Some(Verdict::Verified));
    let cleanup = orders.cleanup.as_ref().unwrap();
    assert!(cleanup.attempted);
    assert_eq!(cleanup.status, CleanupStatus::Succeeded);
    assert_eq!(cleanup.rows_deleted, Some(100));
    assert_eq!(source.rows("orders"), Some(0));
}

#[tokio::test]
async fn test_reviews_below_threshold_is_skipped() {
    let source = staging();
    let summary = run(&source, RunMode::Normal).await;

    let reviews = summary.table("reviews").unwrap();
    assert_eq!(reviews.verdict(), Some(Verdict::InsufficientCoverage));
    assert_eq!(reviews.cleanup_status(), Some(CleanupStatus::SkippedNotVerified));
    assert!(!reviews.cleanup.as_ref().unwrap().attempted);
    assert_eq!(source.rows("reviews"), Some(100));
}

#[tokio::test]
async fn test_missing_destination_forced() {
    let source = staging();
    let summary = run(&source, RunMode::Force).await;

    let new_table = summary.table("new_table").unwrap();
    assert_eq!(new_table.verdict(), Some(Verdict::DestinationMissing));
    let cleanup = new_table.cleanup.as_ref().unwrap();
    assert!(cleanup.attempted);
    assert_eq!(cleanup.rows_deleted, Some(10));
    assert_eq!(source.rows("new_table"), Some(0));
}

#[tokio::test]
async fn test_empty_source_table_is_verified() {
    let source = staging();
    let summary = run(&source, RunMode::VerifyOnly).await;

    let empty = summary.table("empty_table").unwrap();
    assert_eq!(empty.verdict(), Some(Verdict::Verified));
    assert_eq!(empty.verification.as_ref().unwrap().ratio, None);
}

#[tokio::test]
async fn test_empty_source_table_verified_without_destination_table() {
    let source = staging().with_table("staging_empty", 0);
    let summary = run(&source, RunMode::Normal).await;

    let empty = summary.table("staging_empty").unwrap();
    assert_eq!(empty.verdict(), Some(Verdict::Verified));
    assert_eq!(empty.verification.as_ref().unwrap().destination_row_count, None);
    assert_eq!(empty.cleanup_status(), Some(CleanupStatus::Succeeded));
    assert_eq!(empty.cleanup.as_ref().unwrap().rows_deleted, Some(0));
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test]
async fn test_normal_mode_never_writes_unverified_tables() {
    let source = staging();
    let summary = run(&source, RunMode::Normal).await;

    for table in &summary.tables {
        let attempted = table.cleanup.as_ref().map(|c| c.attempted).unwrap_or(false);
        if table.verdict() != Some(Verdict::Verified) {
            assert!(!attempted, "{} was attempted", table.table_name);
        }
    }
    // orders and empty_table
    assert_eq!(source.write_statements(), 2);
}

#[tokio::test]
async fn test_force_mode_attempts_every_table() {
    let source = staging();
    let summary = run(&source, RunMode::Force).await;

    assert!(summary
        .tables
        .iter()
        .all(|t| t.cleanup.as_ref().map(|c| c.attempted).unwrap_or(false)));
    assert_eq!(source.write_statements(), 4);
}

#[tokio::test]
async fn test_dry_run_leaves_every_count_unchanged() {
    let source = staging();
    let before: Vec<_> = ["orders", "reviews", "new_table", "empty_table"]
        .iter()
        .map(|t| source.rows(t))
        .collect();

    let summary = run(&source, RunMode::DryRun).await;

    let after: Vec<_> = ["orders", "reviews", "new_table", "empty_table"]
        .iter()
        .map(|t| source.rows(t))
        .collect();
    assert_eq!(before, after);
    assert_eq!(source.write_statements(), 0);
    for table in &summary.tables {
        assert!(!table.cleanup.as_ref().unwrap().attempted);
    }
}

#[tokio::test]
async fn test_verify_only_twice_is_identical() {
    let source = staging();
    let first = run(&source, RunMode::VerifyOnly).await;
    let second = run(&source, RunMode::VerifyOnly).await;

    let verifications = |s: &RunSummary| {
        s.tables
            .iter()
            .map(|t| t.verification.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(verifications(&first), verifications(&second));
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.config_hash, second.config_hash);
}

#[tokio::test]
async fn test_write_failure_mid_transaction_keeps_rows() {
    let source = staging();
    source.fail_deletes_for("orders");
    let summary = run(&source, RunMode::Force).await;

    let orders = summary.table("orders").unwrap();
    assert_eq!(orders.cleanup_status(), Some(CleanupStatus::FailedRolledBack));
    assert!(orders.cleanup.as_ref().unwrap().error_detail.is_some());
    assert_eq!(source.rows("orders"), Some(100));

    // failure is isolated to orders
    assert_eq!(source.rows("reviews"), Some(0));
    assert_eq!(summary.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_threshold_override() {
    let source = staging();
    let mut config = config();
    config.cleanup.threshold = 0.5;
    let summary = run_with(config, &source, warehouse(), RunRequest::new(RunMode::Normal)).await;

    // 50/100 meets a 0.5 threshold exactly
    assert_eq!(
        summary.table("reviews").unwrap().verdict(),
        Some(Verdict::Verified)
    );
    assert_eq!(source.rows("reviews"), Some(0));
}

#[tokio::test]
async fn test_excluded_tables_are_never_touched() {
    let source = staging().with_table("_meltano_state", 3);
    let mut config = config();
    config.cleanup.exclude_tables = vec!["_*".to_string()];
    let summary = run_with(config, &source, warehouse(), RunRequest::new(RunMode::Force)).await;

    assert!(summary.table("_meltano_state").is_none());
    assert_eq!(source.rows("_meltano_state"), Some(3));
}

#[tokio::test]
async fn test_summary_json_enumerates_every_table() {
    let source = staging();
    let summary = run(&source, RunMode::Normal).await;
    let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();

    assert_eq!(json["tables_total"], 4);
    assert_eq!(json["tables"].as_array().unwrap().len(), 4);
    assert_eq!(json["verdicts"]["verified"], 2);
    assert_eq!(json["verdicts"]["insufficient_coverage"], 1);
    assert_eq!(json["verdicts"]["destination_missing"], 1);
    assert_eq!(json["cleanup"]["succeeded"], 2);
    assert_eq!(json["rows_deleted"], 100);
}
