//! Provisioning configuration

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// What happens to unrelated branches after a resource fails
///
/// Dependents of the failed resource are always skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Keep creating resources that do not depend on the failure
    ContinueIndependent,
    /// Issue no further creations
    HaltAll,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ContinueIndependent => "continue-independent",
            Self::HaltAll => "halt-all",
        })
    }
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "continue-independent" => Ok(Self::ContinueIndependent),
            "halt-all" => Ok(Self::HaltAll),
            other => Err(ConfigError::UnknownFailurePolicy(other.to_string())),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Failure handling for independent branches
    pub failure_policy: FailurePolicy,
    /// Maximum concurrent creations within a batch
    pub max_parallel: usize,
    /// Retry policy for transient provider errors
    pub retry: RetryPolicy,
}

impl ProvisionConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With failure policy
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// With max concurrent creations
    #[inline]
    #[must_use]
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` for malformed TOML or unknown keys,
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` when unreadable, otherwise as [`Self::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values the scheduler cannot run with
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == 0 {
            return Err(ConfigError::Invalid {
                field: "max_parallel",
                reason: "must be at least 1".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "retry.initial_backoff_ms",
                reason: "exceeds retry.max_backoff_ms".into(),
            });
        }
        Ok(())
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::HaltAll,
            max_parallel: 4,
            retry: RetryPolicy::default(),
        }
    }
}
