use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("event_capacity must be at least 1")]
    ZeroEventCapacity,
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tuning knobs for [`super::enrollment::EnrollmentService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Load-decide-write attempts before giving up with `Contention`.
    pub max_attempts: u32,
    /// Pause between a conflict and the next attempt.
    pub retry_backoff_ms: u64,
    /// Applied when a call does not bring its own timeout.
    pub default_timeout_ms: Option<u64>,
    /// Buffer size of the roster event broadcast.
    pub event_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff_ms: 0,
            default_timeout_ms: None,
            event_capacity: 256,
        }
    }
}

impl ServiceConfig {
    /// Parses a (possibly partial) JSON document; missing keys take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        Ok(())
    }
}
