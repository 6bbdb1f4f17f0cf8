//! Dispatcher loop configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Dispatcher settings
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSettings {
    /// Maximum records claimed per poll cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl DispatcherSettings {
    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate dispatcher settings
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::InvalidPollInterval);
        }
        Ok(())
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_batch_size() -> u32 {
    50
}

fn default_poll_interval_ms() -> u64 {
    2000
}
