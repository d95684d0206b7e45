use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Concurrency ceiling and launch spacing for one kind of bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchConfig {
    pub concurrency_limit: usize,
    #[serde(default)]
    pub pace_delay_ms: u64,
}

impl BatchConfig {
    pub fn new(concurrency_limit: usize, pace_delay_ms: u64) -> Self {
        Self {
            concurrency_limit,
            pace_delay_ms,
        }
    }

    pub fn pace_delay(&self) -> Duration {
        Duration::from_millis(self.pace_delay_ms)
    }

    pub fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.concurrency_limit", field),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Backend endpoints in failover order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub urls: Vec<String>,
    /// Pause after a rotation before the new endpoint is used.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_settle_delay_ms() -> u64 {
    2000
}

impl EndpointConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::MissingField {
                field: "endpoints.urls".to_string(),
            });
        }
        Ok(())
    }
}
