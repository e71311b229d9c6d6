//! Controller configuration
//!
//! Defaults match the upstream controller: one minute between status
//! polls of a non-terminal execution. An optional YAML file can override
//! individual values:
//!
//! ```yaml
//! workers: 8
//! requeue_interval_secs: 30
//! reconcile_timeout_secs: 20
//! backoff_base_ms: 500
//! backoff_max_secs: 300
//! conflict_retries: 3
//! ```

use crate::error::{ControllerError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Interval between status polls while an execution has not succeeded
pub const DEFAULT_REQUEUE_INTERVAL: Duration = Duration::from_secs(60);

/// Controller configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers
    pub workers: usize,

    /// Delay before re-reading a workflow whose execution has not succeeded
    pub requeue_interval: Duration,

    /// Deadline for a single reconcile pass
    pub reconcile_timeout: Duration,

    /// First retry delay after a failed pass, doubled per consecutive failure
    pub backoff_base: Duration,

    /// Upper bound for the retry delay
    pub backoff_max: Duration,

    /// Attempts for metadata patches that hit a version conflict
    pub conflict_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
            reconcile_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
            conflict_retries: 3,
        }
    }
}

/// On-disk form; every field is optional and merged over the defaults
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    workers: Option<usize>,
    requeue_interval_secs: Option<u64>,
    reconcile_timeout_secs: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_secs: Option<u64>,
    conflict_retries: Option<u32>,
}

impl ControllerConfig {
    /// Parse a YAML document and merge it over the defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ConfigFile = if yaml.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| ControllerError::InvalidConfiguration(e.to_string()))?
        };

        let defaults = Self::default();
        let config = Self {
            workers: file.workers.unwrap_or(defaults.workers),
            requeue_interval: file
                .requeue_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.requeue_interval),
            reconcile_timeout: file
                .reconcile_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_timeout),
            backoff_base: file
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_max: file
                .backoff_max_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_max),
            conflict_retries: file.conflict_retries.unwrap_or(defaults.conflict_retries),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfiguration(format!("{}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Set the number of workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the requeue interval for non-terminal executions
    pub fn with_requeue_interval(mut self, interval: Duration) -> Self {
        self.requeue_interval = interval;
        self
    }

    /// Set the per-pass deadline
    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    /// Set the retry backoff bounds
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfiguration(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(ControllerError::InvalidConfiguration(
                "reconcile timeout must be positive".to_string(),
            ));
        }
        if self.backoff_base.is_zero() || self.backoff_max < self.backoff_base {
            return Err(ControllerError::InvalidConfiguration(format!(
                "backoff bounds {:?}..{:?} are invalid",
                self.backoff_base, self.backoff_max
            )));
        }
        if self.conflict_retries == 0 {
            return Err(ControllerError::InvalidConfiguration(
                "conflict retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.requeue_interval, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_overrides_merge_over_defaults() {
        let config = ControllerConfig::from_yaml_str(
            "workers: 8\nrequeue_interval_secs: 30\nbackoff_base_ms: 250\n",
        )
        .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.requeue_interval, Duration::from_secs(30));
        assert_eq!(config.backoff_base, Duration::from_millis(250));
        assert_eq!(config.reconcile_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_empty_yaml_is_defaults() {
        let config = ControllerConfig::from_yaml_str("").unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ControllerConfig::from_yaml_str("requeue: 5\n").unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_validation() {
        assert!(ControllerConfig::default().with_workers(0).validate().is_err());
        assert!(
            ControllerConfig::default()
                .with_reconcile_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ControllerConfig::default()
                .with_backoff(Duration::from_secs(10), Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_from_missing_file() {
        let err = ControllerConfig::from_file("/nonexistent/tackle.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tackle.yaml"));
    }
}
