//! mysql-bq-cleanup CLI - verify staging tables against BigQuery and truncate them.

use clap::{ArgGroup, Parser};
use mysql_bq_cleanup::config::validate_threshold;
use mysql_bq_cleanup::{CleanupError, Config, Orchestrator, RunMode, RunRequest, RunSummary};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mysql-bq-cleanup")]
#[command(about = "Verify MySQL staging tables against BigQuery and truncate them safely")]
#[command(version)]
#[command(group(ArgGroup::new("mode").args(["dry_run", "verify_only", "force"])))]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Process only this table
    #[arg(long)]
    table: Option<String>,

    /// Verify and report without issuing any write
    #[arg(long)]
    dry_run: bool,

    /// Verify only; never enter cleanup
    #[arg(long)]
    verify_only: bool,

    /// Truncate every table regardless of verification verdict
    #[arg(long)]
    force: bool,

    /// Override the minimum destination/source coverage ratio
    #[arg(long)]
    threshold: Option<f64>,

    /// Override number of tables processed concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Output JSON summary to stdout
    #[arg(long)]
    output_json: bool,

    /// Also write the JSON summary to this file
    #[arg(long)]
    report_file: Option<PathBuf>,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, CleanupError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(CleanupError::Config)?;

    let mode = RunMode::from_flags(cli.dry_run, cli.verify_only, cli.force)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // Apply overrides
    if let Some(threshold) = cli.threshold {
        validate_threshold(threshold)?;
        config.cleanup.threshold = threshold;
    }
    if let Some(workers) = cli.workers {
        config.cleanup.workers = workers;
    }
    config.validate()?;

    if mode == RunMode::Force {
        info!("Force mode: tables are truncated regardless of verification verdict");
    }

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler();

    let orchestrator = Orchestrator::connect(config).await?;

    let mut request = RunRequest::new(mode);
    if let Some(table) = cli.table {
        request = request.with_table(table);
    }

    let result = orchestrator.run(request, cancel_token).await;
    orchestrator.close().await;
    let summary = result?;

    emit_summary(
        &mut std::io::stdout().lock(),
        &summary,
        cli.output_json,
        cli.report_file.as_deref(),
    )
}

/// Print the summary, then write the report file.
///
/// The summary reaches stdout even when the report file cannot be written.
fn emit_summary<W: Write>(
    out: &mut W,
    summary: &RunSummary,
    output_json: bool,
    report_file: Option<&Path>,
) -> Result<u8, CleanupError> {
    if output_json {
        writeln!(out, "{}", summary.to_json()?)?;
    } else {
        writeln!(out, "{}", summary.render_text())?;
    }
    out.flush()?;

    if let Some(path) = report_file {
        summary.write_to(path)?;
        info!("Wrote run summary to {:?}", path);
    }

    Ok(summary.exit_code())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (scheduler shutdown).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    eprintln!("Failed to setup {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!(
                "\nReceived {}. Finishing in-flight tables, starting no new ones...",
                name
            );
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight tables, starting no new ones...");
            token.cancel();
        }
    });

    cancel_token
}
