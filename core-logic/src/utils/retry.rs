use crate::error::PhaseError;
use anyhow::Result;
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry policy. `max_attempts` counts the first try.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_exponential_base() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_base: default_exponential_base(),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            exponential_base: 1.0,
            jitter: false,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: base_delay_ms * 30,
            exponential_base: 2.0,
            jitter: true,
        }
    }

    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.base_delay_ms as f64 * self.exponential_base.powi(exponent);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        let delay_ms = if self.jitter {
            let rng_factor = rand::thread_rng().gen_range(0.5..=1.5);
            delay_ms * rng_factor
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

/// Attempt bookkeeping for one bounded phase.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt_count: u32,
    max_attempts: u32,
    last_error: Option<String>,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Count a failed attempt. Returns true while another attempt is allowed.
    pub fn record_failure(&mut self, error: &anyhow::Error) -> bool {
        if self.attempt_count < self.max_attempts {
            self.attempt_count += 1;
        }
        self.last_error = Some(format!("{:#}", error));
        !self.is_exhausted()
    }

    pub fn into_error(self, phase: &str) -> PhaseError {
        PhaseError::Exhausted {
            phase: phase.to_string(),
            attempts: self.attempt_count,
            last_error: self.last_error.unwrap_or_default(),
        }
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` attempts fail.
///
/// Exhaustion yields [`PhaseError::Exhausted`].
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut state = RetryState::new(config.max_attempts);

    loop {
        match operation().await {
            Ok(result) => {
                if state.attempt_count() > 0 {
                    debug!(
                        "{} succeeded on attempt {}",
                        operation_name,
                        state.attempt_count() + 1
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !state.record_failure(&e) {
                    warn!(
                        "{} failed after {} attempts: {:#}",
                        operation_name,
                        state.attempt_count(),
                        e
                    );
                    return Err(state.into_error(operation_name).into());
                }

                let delay = config.delay_after(state.attempt_count());
                warn!(
                    "{} failed (attempt {}/{}). Retrying in {:?}: {:#}",
                    operation_name,
                    state.attempt_count(),
                    state.max_attempts(),
                    delay,
                    e
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
