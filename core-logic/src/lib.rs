//! # Core Logic - Shared Orchestration Primitives
//!
//! This crate provides the chain-agnostic pieces the keeper crates build on:
//! bounded batch execution, endpoint failover, retry bookkeeping, error
//! classification, batch metrics and logging.
//!
//! ## Modules
//!
//! - [`config`] - Shared configuration sections (batch limits, endpoints)
//! - [`error`] - Typed errors and the [`ErrorKind`] recovery taxonomy
//! - [`metrics`] - Running counters for bulk operations
//! - [`traits`] - Collaborator traits ([`Notifier`])
//! - [`utils`] - Runner, pacer, endpoint pool, retry and logger

pub mod config;
pub mod error;
pub mod metrics;
pub mod traits;
pub mod utils;

pub use config::{BatchConfig, EndpointConfig};
pub use error::{classify, failed_endpoint, ConfigError, ErrorKind, NetworkError, PhaseError};
pub use metrics::{BatchMetrics, BatchSnapshot};
pub use traits::Notifier;
pub use utils::{
    setup_logger, setup_quiet_logger, with_retry, BatchReport, BoundedRunner, EndpointHealth,
    EndpointPool, Pacer, RetryConfig, RetryState, TaskOutcome,
};
