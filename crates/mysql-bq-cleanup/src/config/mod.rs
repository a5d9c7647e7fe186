//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::validate_threshold;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variable consulted when `source.password` is empty.
pub const MYSQL_PASSWORD_ENV: &str = "MYSQL_PASSWORD";

/// Environment variable holding inline service-account JSON.
pub const CREDENTIALS_JSON_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS_JSON";

impl Config {
    /// Load configuration from a YAML file, filling secrets from the environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Fill secrets that were left out of the file.
    pub fn apply_env(&mut self) {
        if self.source.password.is_empty() {
            if let Ok(password) = std::env::var(MYSQL_PASSWORD_ENV) {
                self.source.password = password;
            }
        }
        if self.destination.credentials_json.is_none() && self.destination.credentials_file.is_none()
        {
            self.destination.credentials_json = std::env::var(CREDENTIALS_JSON_ENV).ok();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA256 fingerprint of the effective configuration, secrets excluded.
    pub fn hash(&self) -> String {
        let mut redacted = self.clone();
        redacted.source.password.clear();
        redacted.destination.credentials_json = None;
        let yaml = serde_yaml::to_string(&redacted).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl DestinationConfig {
    /// Fully qualified dataset reference (`project.dataset`).
    pub fn dataset_ref(&self, project_id: &str) -> String {
        format!("{}.{}", project_id, self.dataset)
    }
}
