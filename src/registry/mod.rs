//! Tool registry: the catalog of capabilities the server dispatches to.
//!
//! Two views are kept in lockstep over one store: the dispatch view
//! (name → descriptor) used by the router, and the discovery view (the
//! same set, with indexed text) used by ranking and gating. Descriptors
//! are shared via `Arc` so an in-flight dispatch never observes a
//! half-removed tool.
//!
//! The registry owns *structural* input validation only (see [`schema`]).
//! Domain validation belongs to the tool handler, which fails with a
//! reason prefixed `"Invalid params"`.

pub mod schema;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RegistryError, ToolError};

/// Future type returned by [`FnHandler`] closures.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;

/// A tool implementation, opaque to the core.
///
/// Handlers see only their parsed input and produce a value or a failure.
/// The router isolates each call behind a deadline; a handler that
/// outlives it is abandoned, not terminated.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invokes the tool with validated arguments.
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Adapter turning a closure into a [`ToolHandler`].
pub struct FnHandler<F>
where
    F: Fn(Value) -> HandlerFuture + Send + Sync,
{
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Value) -> HandlerFuture + Send + Sync,
{
    /// Wraps a closure returning a boxed future.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> HandlerFuture + Send + Sync,
{
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.f)(args).await
    }
}

/// A registered tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description, also indexed for discovery.
    pub description: String,
    /// JSON-Schema-compatible input description (type, properties,
    /// required).
    pub input_schema: Value,
    /// The implementation.
    pub handler: Arc<dyn ToolHandler>,
    /// Estimated context cost used by token-budget gating.
    pub estimated_tokens: Option<u32>,
    /// Permission a principal must hold to invoke this tool. Tools
    /// without one are callable by any authenticated principal.
    pub required_permission: Option<String>,
    /// Per-tool handler deadline overriding the configured default.
    pub timeout: Option<Duration>,
}

impl ToolDescriptor {
    /// Creates a descriptor with no token estimate, permission, or
    /// timeout override.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
            estimated_tokens: None,
            required_permission: None,
            timeout: None,
        }
    }

    /// Sets the estimated token cost.
    #[must_use]
    pub const fn with_estimated_tokens(mut self, tokens: u32) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    /// Declares the permission required to invoke this tool.
    #[must_use]
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = Some(permission.into());
        self
    }

    /// Overrides the handler deadline for this tool.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The descriptor minus its handler, as served by `tools/schema`.
    #[must_use]
    pub fn schema_view(&self) -> Value {
        let mut view = serde_json::json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        });
        if let Some(tokens) = self.estimated_tokens {
            view["estimatedTokens"] = tokens.into();
        }
        if let Some(permission) = &self.required_permission {
            view["requiredPermission"] = permission.clone().into();
        }
        view
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("estimated_tokens", &self.estimated_tokens)
            .field("required_permission", &self.required_permission)
            .finish_non_exhaustive()
    }
}

/// Thread-safe tool catalog.
///
/// Read-heavy, write-rare: lookups take a read lock, registration takes
/// the write lock briefly. Callers of [`ToolRegistry::list`] receive a
/// snapshot and must tolerate concurrent additions.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolDescriptor>>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty or already present.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register(&self, tool: ToolDescriptor) -> Result<(), RegistryError> {
        if tool.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let mut tools = self.tools.write().unwrap();
        if tools.contains_key(&tool.name) {
            return Err(RegistryError::Duplicate { name: tool.name });
        }
        tools.insert(tool.name.clone(), Arc::new(tool));
        Ok(())
    }

    /// Looks up a tool by name.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    /// Returns a snapshot of all tools, ordered by name.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<ToolDescriptor>> {
        let tools = self.tools.read().unwrap();
        let mut snapshot: Vec<_> = tools.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        snapshot
    }

    /// Removes a tool. In-flight dispatches holding the descriptor's
    /// `Arc` are unaffected.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn remove(&self, name: &str) -> bool {
        self.tools.write().unwrap().remove(name).is_some()
    }

    /// Number of registered tools.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    /// Whether the registry is empty.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.read().unwrap().is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Builds an echo handler, used in tests and smoke checks.
#[must_use]
pub fn echo_handler() -> Arc<dyn ToolHandler> {
    Arc::new(FnHandler::new(|args| {
        Box::pin(async move { Ok(args) }) as HandlerFuture
    }))
}
