//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.
//! Every section is optional and falls back to defaults, so an empty
//! object `{}` is a valid configuration. Auth tokens are deserialised
//! directly into `SecretString` values.

use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Transport selection and endpoint settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Admission control settings.
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,

    /// Session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()?;
        self.auth.validate()?;
        self.load_balancer.validate()?;
        self.session.validate()?;
        Ok(())
    }
}

/// Which transport the server binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON on standard streams, one session per process.
    Stdio,
    /// JSON-RPC over HTTP POST, multi-session.
    Http,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Transport variant.
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,

    /// Bind host for the HTTP transport.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port for the HTTP transport.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request path for the HTTP transport.
    #[serde(default = "default_http_path")]
    pub path: String,

    /// Whether TLS is expected in front of the HTTP transport.
    ///
    /// Termination itself belongs to the operator's proxy.
    #[serde(default)]
    pub tls_enabled: bool,
}

impl TransportConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == TransportKind::Http && !self.path.starts_with('/') {
            return Err(ConfigError::ValidationError {
                message: format!("transport path must start with '/': {}", self.path),
            });
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            host: default_host(),
            port: default_port(),
            path: default_http_path(),
            tls_enabled: false,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// When false, all requests carry the anonymous principal with
    /// unrestricted permissions.
    #[serde(default)]
    pub enabled: bool,

    /// Credential method. Only `token` is supported.
    #[serde(default = "default_auth_method")]
    pub method: String,

    /// Static token entries.
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

impl AuthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.method != "token" {
            return Err(ConfigError::ValidationError {
                message: format!("unsupported auth method '{}'", self.method),
            });
        }

        if self.tokens.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "auth is enabled but no tokens are configured".to_string(),
            });
        }

        for token in &self.tokens {
            if token.principal.is_empty() {
                return Err(ConfigError::ValidationError {
                    message: "token principal cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: default_auth_method(),
            tokens: Vec::new(),
        }
    }
}

/// A single static token entry.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// The token value (stored securely).
    #[serde(deserialize_with = "deserialize_secret")]
    pub token: SecretString,

    /// Principal attached to sessions authenticated with this token.
    pub principal: String,

    /// Permissions granted to the principal.
    #[serde(default)]
    pub permissions: Vec<String>,
}

// Custom Debug that never reveals the token value
impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("token", &"[REDACTED]")
            .field("principal", &self.principal)
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancerConfig {
    /// When false, every request is admitted immediately.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sustained per-session request rate (token bucket refill).
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,

    /// Burst capacity of the per-session token bucket.
    #[serde(default = "default_burst")]
    pub burst: u64,

    /// Maximum in-flight requests per session.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Consecutive handler failures that trip the circuit breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Window within which failures count toward the threshold.
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,

    /// Time an open circuit waits before allowing a half-open probe.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Overflow queue capacity. Zero disables queueing: concurrency
    /// overflow is rejected synchronously.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Deadline for a queued request to begin dispatch.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,

    /// Handler deadline when a tool declares none.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Accepted for compatibility and surfaced in health output. The
    /// server never retries on a client's behalf.
    #[serde(default)]
    pub max_retries: u32,
}

impl LoadBalancerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.rate_per_sec <= 0.0 {
            return Err(ConfigError::ValidationError {
                message: "rate_per_sec must be positive".to_string(),
            });
        }
        if self.burst == 0 {
            return Err(ConfigError::ValidationError {
                message: "burst must be at least 1".to_string(),
            });
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::ValidationError {
                message: "max_concurrent must be at least 1".to_string(),
            });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError {
                message: "failure_threshold must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_per_sec: default_rate_per_sec(),
            burst: default_burst(),
            max_concurrent: default_max_concurrent(),
            failure_threshold: default_failure_threshold(),
            failure_window_ms: default_failure_window_ms(),
            cooldown_ms: default_cooldown_ms(),
            queue_capacity: default_queue_capacity(),
            queue_timeout_ms: default_queue_timeout_ms(),
            default_timeout_ms: default_timeout_ms(),
            max_retries: 0,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Idle window after which a session is reaped.
    #[serde(default = "default_session_timeout_ms")]
    pub timeout_ms: u64,
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "session timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_session_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional path to a JSON-lines audit log of request outcomes.
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: None,
        }
    }
}

const fn default_transport_kind() -> TransportKind {
    TransportKind::Stdio
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_http_path() -> String {
    "/mcp".to_string()
}

fn default_auth_method() -> String {
    "token".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_rate_per_sec() -> f64 {
    50.0
}

const fn default_burst() -> u64 {
    100
}

const fn default_max_concurrent() -> usize {
    10
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_failure_window_ms() -> u64 {
    30_000
}

const fn default_cooldown_ms() -> u64 {
    30_000
}

const fn default_queue_capacity() -> usize {
    1000
}

const fn default_queue_timeout_ms() -> u64 {
    30_000
}

const fn default_timeout_ms() -> u64 {
    5_000
}

const fn default_session_timeout_ms() -> u64 {
    300_000
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Deserialises a string into a `SecretString`.
fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::from(s))
}
