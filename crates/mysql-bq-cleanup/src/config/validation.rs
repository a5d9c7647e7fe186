//! Configuration validation.

use super::{Config, MAX_WORKERS};
use crate::error::{CleanupError, Result};
use crate::source::compile_patterns;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(CleanupError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(CleanupError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(CleanupError::Config("source.user is required".into()));
    }

    // Destination validation
    if config.destination.dataset.is_empty() {
        return Err(CleanupError::Config(
            "destination.dataset is required".into(),
        ));
    }
    if config.destination.dataset.contains('`') || config.destination.project_id.contains('`') {
        return Err(CleanupError::Config(
            "destination.project_id and destination.dataset must not contain backticks".into(),
        ));
    }

    validate_threshold(config.cleanup.threshold)?;

    let workers = config.cleanup.workers;
    if workers == 0 || workers > MAX_WORKERS {
        return Err(CleanupError::Config(format!(
            "cleanup.workers must be between 1 and {}, got {}",
            MAX_WORKERS, workers
        )));
    }
    if config.cleanup.read_timeout_secs == 0 {
        return Err(CleanupError::Config(
            "cleanup.read_timeout_secs must be at least 1".into(),
        ));
    }
    if config.cleanup.write_timeout_secs == 0 {
        return Err(CleanupError::Config(
            "cleanup.write_timeout_secs must be at least 1".into(),
        ));
    }
    if config.cleanup.retry_max_delay_ms < config.cleanup.retry_base_delay_ms {
        return Err(CleanupError::Config(
            "cleanup.retry_max_delay_ms must not be smaller than cleanup.retry_base_delay_ms"
                .into(),
        ));
    }

    compile_patterns(&config.cleanup.exclude_tables)?;

    Ok(())
}

/// Threshold must be a finite ratio in (0, 1].
pub fn validate_threshold(threshold: f64) -> Result<()> {
    if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
        return Err(CleanupError::Config(format!(
            "threshold must be greater than 0 and at most 1, got {}",
            threshold
        )));
    }
    Ok(())
}
