//! Error types for mcp-gateway.
//!
//! Each failure domain has its own enum. The router is the single place
//! where these are translated to JSON-RPC error codes, so every variant
//! carries a stable message suitable for machine matching.
//!
//! Error payloads never include session ids, principal identity, or any
//! other tenant's state.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors from credential validation and permission checks.
///
/// These intentionally do NOT include token values. Even in debug builds,
/// credentials must never appear in logs or error output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented, or the presented credential matched
    /// no configured token.
    #[error("Unauthorized")]
    Unauthorized,

    /// The principal is authenticated but lacks the permission a tool
    /// declares.
    #[error("Forbidden")]
    Forbidden,

    /// The configured auth method is not supported by this build.
    #[error("unsupported auth method: {method}")]
    UnsupportedMethod {
        /// The configured method name.
        method: String,
    },
}

/// Failures raised by tool handlers.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The arguments failed structural or domain validation.
    ///
    /// The router maps this to −32602. Handlers raising their own domain
    /// failures prefix the reason with `"Invalid params"` to land here.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The named tool is not registered.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// The handler failed.
    #[error("{message}")]
    Failed {
        /// Human-readable failure description.
        message: String,
        /// Structured detail forwarded in the error `data`, redacted of
        /// internals before it reaches the wire.
        detail: Option<serde_json::Value>,
    },
}

impl ToolError {
    /// Creates a handler failure with no structured detail.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            detail: None,
        }
    }
}

/// Admission rejections from the load balancer and request queue.
///
/// None of these invoke the tool handler and none feed the circuit
/// breaker's failure count.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// The session exhausted its token bucket.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The session's circuit breaker is open.
    #[error("Circuit breaker open")]
    CircuitOpen,

    /// The session is at its concurrency cap and no queue is configured.
    #[error("Too many concurrent requests")]
    Saturated,

    /// The overflow queue is at capacity.
    #[error("Request queue full")]
    QueueFull,

    /// The request aged out while queued.
    #[error("Request timeout in queue")]
    QueueTimeout,

    /// The server is draining and admits no new requests.
    #[error("Server shutting down")]
    Draining,
}

/// Errors in tool registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Tool names must be non-empty.
    #[error("tool name cannot be empty")]
    EmptyName,

    /// Tool names are unique within the registry.
    #[error("tool already registered: {name}")]
    Duplicate {
        /// The conflicting name.
        name: String,
    },
}

/// Server lifecycle errors, surfaced to the operator and never to clients.
#[derive(Error, Debug)]
pub enum ServerError {
    /// `start()` was called on a running server.
    #[error("server is already running")]
    AlreadyRunning,

    /// `stop()` was called on a stopped server.
    #[error("server is not running")]
    NotRunning,

    /// The transport failed to come up or tore down uncleanly.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// The underlying IO error, when one exists.
        #[source]
        source: Option<std::io::Error>,
    },
}

impl ServerError {
    /// Creates a transport error wrapping an IO failure.
    #[must_use]
    pub fn transport_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_messages_are_stable() {
        assert_eq!(AdmissionError::RateLimited.to_string(), "Rate limit exceeded");
        assert_eq!(AdmissionError::CircuitOpen.to_string(), "Circuit breaker open");
        assert_eq!(
            AdmissionError::QueueTimeout.to_string(),
            "Request timeout in queue"
        );
    }

    #[test]
    fn auth_messages_are_stable() {
        assert_eq!(AuthError::Unauthorized.to_string(), "Unauthorized");
        assert_eq!(AuthError::Forbidden.to_string(), "Forbidden");
    }

    #[test]
    fn invalid_params_carries_prefix() {
        let err = ToolError::InvalidParams("limit must be between 1 and 100".to_string());
        assert!(err.to_string().starts_with("Invalid params"));
    }

    /// Error messages must not leak token-shaped values.
    #[test]
    fn auth_errors_do_not_contain_credentials() {
        let msg = AuthError::Unauthorized.to_string();
        assert!(!msg.contains("Bearer"));
        assert!(!msg.contains("token"));
    }
}
