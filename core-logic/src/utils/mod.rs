//! # Utilities Module
//!
//! Orchestration building blocks shared by every chain crate.

pub mod endpoint_pool;
pub(crate) mod logger;
pub mod pacer;
pub mod retry;
pub mod runner;

pub use endpoint_pool::{EndpointHealth, EndpointPool};
pub use logger::{setup_logger, setup_quiet_logger};
pub use pacer::Pacer;
pub use retry::{with_retry, RetryConfig, RetryState};
pub use runner::{BatchReport, BoundedRunner, TaskOutcome};
