//! # Core Error Types
//!
//! Centralized error definitions for the core-logic crate.
//! All errors implement `std::error::Error` and `std::fmt::Display`.
//!
//! Network failures are tagged with an [`ErrorKind`] where they are created,
//! so recovery code switches on the kind instead of inspecting messages.

use thiserror::Error;

/// Recovery class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket, timeout or 5xx style failure. Rotate and retry.
    Transient,
    /// The endpoint asked us to slow down (HTTP 429 or equivalent).
    RateLimited,
    /// The queried thing does not exist.
    NotFound,
    /// Anything retrying on another endpoint will not fix.
    Fatal,
}

impl ErrorKind {
    /// True for the kinds that warrant an endpoint rotation.
    pub fn should_rotate(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::RateLimited)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

/// Configuration-related errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid endpoint URL format: '{url}'")]
    InvalidEndpointUrl { url: String },

    #[error("Missing required configuration field: '{field}'")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("I/O error reading {path}: {msg}")]
    IoError { path: String, msg: String },
}

/// Network and RPC-related errors
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Request timeout after {timeout_ms}ms to {endpoint}")]
    Timeout { timeout_ms: u64, endpoint: String },

    #[error("Rate limited by {endpoint}")]
    RateLimited { endpoint: String },

    #[error("Connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("HTTP error {status_code} from {endpoint}")]
    HttpError { status_code: u16, endpoint: String },

    #[error("RPC error {code} from {endpoint}: {message}")]
    Rpc {
        code: i64,
        message: String,
        endpoint: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/// JSON-RPC "node is behind / unhealthy" style codes that clear up on their own
/// or on another node.
const TRANSIENT_RPC_CODES: [i64; 3] = [-32004, -32005, -32014];

impl NetworkError {
    /// Classify an HTTP status returned by `endpoint`.
    pub fn from_status(status_code: u16, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        if status_code == 429 {
            NetworkError::RateLimited { endpoint }
        } else {
            NetworkError::HttpError {
                status_code,
                endpoint,
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::Timeout { .. } | NetworkError::ConnectionFailed { .. } => {
                ErrorKind::Transient
            }
            NetworkError::RateLimited { .. } => ErrorKind::RateLimited,
            NetworkError::HttpError { status_code, .. } => match *status_code {
                404 => ErrorKind::NotFound,
                429 => ErrorKind::RateLimited,
                408 | 500..=599 => ErrorKind::Transient,
                _ => ErrorKind::Fatal,
            },
            NetworkError::Rpc { code, .. } if TRANSIENT_RPC_CODES.contains(code) => {
                ErrorKind::Transient
            }
            NetworkError::Rpc { .. } | NetworkError::InvalidResponse { .. } => ErrorKind::Fatal,
        }
    }

    /// The endpoint the failing request went to.
    pub fn endpoint(&self) -> &str {
        match self {
            NetworkError::Timeout { endpoint, .. }
            | NetworkError::RateLimited { endpoint }
            | NetworkError::ConnectionFailed { endpoint, .. }
            | NetworkError::HttpError { endpoint, .. }
            | NetworkError::Rpc { endpoint, .. }
            | NetworkError::InvalidResponse { endpoint, .. } => endpoint,
        }
    }
}

/// A bounded phase ran out of attempts.
#[derive(Error, Debug, Clone)]
pub enum PhaseError {
    #[error("{phase} failed after {attempts} attempts. Last error: {last_error}")]
    Exhausted {
        phase: String,
        attempts: u32,
        last_error: String,
    },
}

/// Walk an error chain and return the kind of the first [`NetworkError`] found.
///
/// Errors that carry no network cause are [`ErrorKind::Fatal`].
pub fn classify(error: &anyhow::Error) -> ErrorKind {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<NetworkError>())
        .map(NetworkError::kind)
        .unwrap_or(ErrorKind::Fatal)
}

/// Endpoint of the first [`NetworkError`] in the chain, if there is one.
pub fn failed_endpoint(error: &anyhow::Error) -> Option<&str> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<NetworkError>())
        .map(NetworkError::endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            NetworkError::from_status(429, "rpc-a").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            NetworkError::from_status(503, "rpc-a").kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            NetworkError::from_status(404, "api").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            NetworkError::from_status(400, "api").kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_classify_walks_context() {
        let err = anyhow::Error::new(NetworkError::Timeout {
            timeout_ms: 30_000,
            endpoint: "rpc-b".to_string(),
        })
        .context("fetching round state");
        assert_eq!(classify(&err), ErrorKind::Transient);

        let plain = anyhow::anyhow!("too many requests");
        assert_eq!(classify(&plain), ErrorKind::Fatal);
    }

    #[test]
    fn test_failed_endpoint_walks_context() {
        let err = anyhow::Error::new(NetworkError::from_status(503, "https://relay.example.com"))
            .context("submitting close_bets");
        assert_eq!(failed_endpoint(&err), Some("https://relay.example.com"));
        assert_eq!(failed_endpoint(&anyhow::anyhow!("decode failed")), None);
    }

    #[test]
    fn test_rpc_code_classification() {
        let behind = NetworkError::Rpc {
            code: -32005,
            message: "Node is behind".to_string(),
            endpoint: "rpc-a".to_string(),
        };
        assert!(behind.kind().should_rotate());

        let invalid = NetworkError::Rpc {
            code: -32602,
            message: "Invalid params".to_string(),
            endpoint: "rpc-a".to_string(),
        };
        assert_eq!(invalid.kind(), ErrorKind::Fatal);
    }
}
