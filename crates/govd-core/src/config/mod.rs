//! Configuration parsing and validation.
//!
//! The governance service is configured from a TOML file (or programmatic
//! defaults). Validation is fail-closed: a config that parses but carries an
//! unusable value — an unknown timezone, a quorum outside `(0, 1]`, a zero
//! queue capacity — is refused at load time rather than surfacing as
//! misbehavior later.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::{AdmissionConfig, TIMESTAMP_SANITY_WINDOW_SECS};
use crate::clock::{ClockError, DayClock, DEFAULT_TIMEZONE};
use crate::lifecycle::{LifecycleConfig, DEFAULT_QUORUM_THRESHOLD};
use crate::queue::QueueConfig;

/// Default interval between expiration/stale sweeps, in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML failed to parse.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but carries an unusable value.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level governance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Reference timezone for all daily boundaries.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Minutes a request may stay pending or active before expiring.
    #[serde(default = "default_expiration_minutes")]
    pub expiration_minutes: u32,

    /// Approve fraction of the admin roster required for democratic
    /// approval.
    #[serde(default = "default_quorum_threshold")]
    pub quorum_threshold: f64,

    /// Seconds between background expiration/stale sweeps.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Half-width of the timestamp sanity window, in seconds.
    #[serde(default = "default_sanity_window_secs")]
    pub timestamp_sanity_window_secs: i64,

    /// Execution queue tunables.
    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
const fn default_expiration_minutes() -> u32 {
    crate::admission::DEFAULT_EXPIRATION_MINUTES
}
const fn default_quorum_threshold() -> f64 {
    DEFAULT_QUORUM_THRESHOLD
}
const fn default_cleanup_interval_secs() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}
const fn default_sanity_window_secs() -> i64 {
    TIMESTAMP_SANITY_WINDOW_SECS
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            expiration_minutes: default_expiration_minutes(),
            quorum_threshold: default_quorum_threshold(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            timestamp_sanity_window_secs: default_sanity_window_secs(),
            queue: QueueConfig::default(),
        }
    }
}

impl GovernanceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is invalid or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every field that could make the service misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.day_clock().map_err(|err| match err {
            ClockError::UnknownTimezone { name } => {
                ConfigError::Validation(format!("unknown timezone '{name}'"))
            },
        })?;
        if self.quorum_threshold <= 0.0 || self.quorum_threshold > 1.0 {
            return Err(ConfigError::Validation(format!(
                "quorum_threshold must be in (0, 1], got {}",
                self.quorum_threshold
            )));
        }
        if self.expiration_minutes == 0 {
            return Err(ConfigError::Validation(
                "expiration_minutes must be positive".to_string(),
            ));
        }
        if self.timestamp_sanity_window_secs <= 0 {
            return Err(ConfigError::Validation(
                "timestamp_sanity_window_secs must be positive".to_string(),
            ));
        }
        if self.queue.max_queue_size == 0 {
            return Err(ConfigError::Validation(
                "queue.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "queue.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.queue.rapid_threshold_secs < 0 {
            return Err(ConfigError::Validation(
                "queue.rapid_threshold_secs must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// The day clock this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::UnknownTimezone`] for an unresolvable name.
    pub fn day_clock(&self) -> Result<DayClock, ClockError> {
        DayClock::from_name(&self.timezone)
    }

    /// Admission tracker tunables derived from this configuration.
    #[must_use]
    pub const fn admission(&self) -> AdmissionConfig {
        AdmissionConfig {
            expiration_minutes: self.expiration_minutes,
            sanity_window_secs: self.timestamp_sanity_window_secs,
        }
    }

    /// Lifecycle tunables derived from this configuration.
    #[must_use]
    pub const fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            expiration_minutes: self.expiration_minutes,
            quorum_threshold: self.quorum_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GovernanceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.timezone, "America/Los_Angeles");
        assert_eq!(config.expiration_minutes, 10);
        assert_eq!(config.queue.max_queue_size, 1);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = GovernanceConfig::from_toml("").unwrap();
        assert_eq!(config.quorum_threshold, DEFAULT_QUORUM_THRESHOLD);
        assert_eq!(config.queue.poll_interval_ms, 2000);
    }

    #[test]
    fn partial_toml_overrides() {
        let config = GovernanceConfig::from_toml(
            r#"
            quorum_threshold = 0.6
            [queue]
            max_queue_size = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.quorum_threshold, 0.6);
        assert_eq!(config.queue.max_queue_size, 2);
        // Untouched fields keep defaults.
        assert_eq!(config.queue.rapid_threshold_secs, 5);
    }

    #[test]
    fn unknown_timezone_is_refused() {
        let err = GovernanceConfig::from_toml("timezone = \"Mars/Olympus\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn out_of_range_quorum_is_refused() {
        assert!(GovernanceConfig::from_toml("quorum_threshold = 0.0").is_err());
        assert!(GovernanceConfig::from_toml("quorum_threshold = 1.5").is_err());
        assert!(GovernanceConfig::from_toml("quorum_threshold = 1.0").is_ok());
    }

    #[test]
    fn zero_capacity_queue_is_refused() {
        let err = GovernanceConfig::from_toml("[queue]\nmax_queue_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
