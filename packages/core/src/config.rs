//! Worker configuration and process-wide defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Polling period in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 1500;
/// Maximum candidates fetched per poll.
pub const DEFAULT_SIZE: usize = 10;
/// Claim duration in milliseconds when neither job nor worker sets one.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Longest accepted claim duration, one century in milliseconds. Keeps every
/// expiration inside the four-digit-year timestamp layout.
pub const MAX_TIMEOUT_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Configuration for worker behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Polling period in milliseconds.
    pub interval: u64,
    /// Max jobs fetched per poll.
    pub size: usize,
    /// Default claim duration in milliseconds for jobs without their own.
    pub timeout: u64,
    /// Attempt ceiling; `None` retries expired claims forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL_MS,
            size: DEFAULT_SIZE,
            timeout: DEFAULT_TIMEOUT_MS,
            max_attempts: None,
        }
    }
}

impl WorkerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval == 0 {
            return Err(ValidationError::InvalidConfig("interval must be positive".into()));
        }
        if self.size == 0 {
            return Err(ValidationError::InvalidConfig("size must be positive".into()));
        }
        if self.timeout == 0 {
            return Err(ValidationError::InvalidConfig("timeout must be positive".into()));
        }
        if self.timeout > MAX_TIMEOUT_MS {
            return Err(ValidationError::InvalidConfig(format!(
                "timeout must be at most {} ms",
                MAX_TIMEOUT_MS
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(ValidationError::InvalidConfig("max_attempts must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = WorkerConfig::default();
        assert_eq!(config.interval(), Duration::from_millis(1500));
        assert_eq!(config.size, 10);
        assert_eq!(config.timeout, 10_000);
        assert_eq!(config.max_attempts, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: WorkerConfig = serde_json::from_str(r#"{"size": 3}"#).unwrap();
        assert_eq!(config.size, 3);
        assert_eq!(config.interval, DEFAULT_INTERVAL_MS);
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(WorkerConfig::default().with_size(0).validate().is_err());
        assert!(
            WorkerConfig::default()
                .with_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(WorkerConfig::default().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn timeout_is_capped() {
        let at_cap = WorkerConfig {
            timeout: MAX_TIMEOUT_MS,
            ..WorkerConfig::default()
        };
        assert!(at_cap.validate().is_ok());

        let huge = WorkerConfig::default().with_timeout(Duration::MAX);
        assert!(matches!(huge.validate(), Err(ValidationError::InvalidConfig(_))));
    }
}
