//! Authentication and permission scoping.
//!
//! # Security Architecture
//!
//! This module is the **only** place where credentials are handled.
//! Token values use [`secrecy::SecretString`] so that:
//!
//! - Tokens are zeroised when dropped
//! - Tokens cannot accidentally be logged via `Debug`
//! - Explicit `.expose_secret()` is required to access values
//!
//! ## Rules for Contributors
//!
//! 1. **NEVER** implement `Debug` that exposes token values
//! 2. **NEVER** include tokens in error messages
//! 3. **NEVER** log tokens, even at trace level
//!
//! A successful check attaches an [`AuthContext`] to the session; the
//! router consults it again on every dispatch for the tool's declared
//! permission. With auth disabled, every request carries the anonymous
//! principal with unrestricted permissions.

use std::collections::HashSet;

use secrecy::{ExposeSecret, SecretString};

use crate::config::AuthConfig;
use crate::error::AuthError;

/// Principal name used when authentication is disabled.
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

/// The identity and permission set attached to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Authenticated principal name.
    pub principal: String,
    /// Permissions granted to the principal.
    permissions: HashSet<String>,
    /// Anonymous contexts bypass permission checks entirely.
    unrestricted: bool,
}

impl AuthContext {
    /// Creates a context for an authenticated principal.
    #[must_use]
    pub fn new(principal: impl Into<String>, permissions: HashSet<String>) -> Self {
        Self {
            principal: principal.into(),
            permissions,
            unrestricted: false,
        }
    }

    /// The anonymous, unrestricted context used when auth is disabled.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            principal: ANONYMOUS_PRINCIPAL.to_string(),
            permissions: HashSet::new(),
            unrestricted: true,
        }
    }

    /// Whether this context holds the given permission.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.unrestricted || self.permissions.contains(permission)
    }

    /// Whether this is the anonymous context.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.unrestricted
    }
}

/// A configured token with its principal and permission grant.
struct TokenEntry {
    token: SecretString,
    principal: String,
    permissions: HashSet<String>,
}

/// Validates inbound credentials and scopes permissions.
pub struct AuthManager {
    enabled: bool,
    tokens: Vec<TokenEntry>,
}

impl AuthManager {
    /// Builds the manager from configuration.
    ///
    /// # Errors
    ///
    /// Fails when auth is enabled with a method other than `token`.
    pub fn from_config(config: AuthConfig) -> Result<Self, AuthError> {
        if config.enabled && config.method != "token" {
            return Err(AuthError::UnsupportedMethod {
                method: config.method,
            });
        }

        let tokens = config
            .tokens
            .into_iter()
            .map(|entry| TokenEntry {
                token: entry.token,
                principal: entry.principal,
                permissions: entry.permissions.into_iter().collect(),
            })
            .collect();

        Ok(Self {
            enabled: config.enabled,
            tokens,
        })
    }

    /// A manager that admits everyone as the anonymous principal.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tokens: Vec::new(),
        }
    }

    /// Whether credential checks are active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Validates a credential and produces the session's auth context.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] when auth is enabled and the
    /// credential is missing or matches no configured token.
    pub fn authenticate(&self, credential: Option<&str>) -> Result<AuthContext, AuthError> {
        if !self.enabled {
            return Ok(AuthContext::anonymous());
        }

        let presented = credential.ok_or(AuthError::Unauthorized)?;

        self.tokens
            .iter()
            .find(|entry| entry.token.expose_secret() == presented)
            .map(|entry| AuthContext::new(entry.principal.clone(), entry.permissions.clone()))
            .ok_or(AuthError::Unauthorized)
    }

    /// Checks the context against a tool's declared permission.
    ///
    /// Tools without a declared permission are callable by any
    /// authenticated principal.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] on insufficient permission.
    pub fn authorize(
        &self,
        context: &AuthContext,
        required_permission: Option<&str>,
    ) -> Result<(), AuthError> {
        let Some(permission) = required_permission else {
            return Ok(());
        };

        if context.has_permission(permission) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("enabled", &self.enabled)
            .field("tokens", &self.tokens.len())
            .finish()
    }
}
