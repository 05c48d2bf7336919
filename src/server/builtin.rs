//! Built-in tool catalog.
//!
//! Registered at startup, before any transport accepts a request:
//!
//! - `discover_tools` — rank tools against a query
//! - `provision_tools` — select a ranked subset within a token budget
//! - `system/info` — version and runtime
//! - `system/health` — server health snapshot
//! - `tools/list` — `[{name, description}]`
//! - `tools/schema` — one descriptor minus its handler
//!
//! Handlers hold a weak reference to the server state so the registry
//! inside that state never keeps it alive.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{health_snapshot, ServerInner};
use crate::discovery;
use crate::error::ToolError;
use crate::registry::{ToolDescriptor, ToolHandler};

/// Default result count for `discover_tools`.
const DEFAULT_DISCOVER_LIMIT: u64 = 10;

fn state_gone() -> ToolError {
    ToolError::failed("server state unavailable")
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::failed(format!("serialisation: {e}")))
}

struct DiscoverTools {
    server: Weak<ServerInner>,
}

#[async_trait]
impl ToolHandler for DiscoverTools {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let inner = self.server.upgrade().ok_or_else(state_gone)?;

        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if query.trim().is_empty() {
            return Err(ToolError::InvalidParams(
                "query must not be empty".to_string(),
            ));
        }
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_DISCOVER_LIMIT);

        let ranked = discovery::discover(&inner.registry, query, limit as usize);
        to_value(&ranked)
    }
}

struct ProvisionTools {
    server: Weak<ServerInner>,
}

#[async_trait]
impl ToolHandler for ProvisionTools {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let inner = self.server.upgrade().ok_or_else(state_gone)?;

        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let max_tokens = args
            .get("maxTokens")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ToolError::InvalidParams("maxTokens is required".to_string()))?;

        let selected = discovery::provision(&inner.registry, query, max_tokens);
        to_value(&selected)
    }
}

struct SystemInfo;

#[async_trait]
impl ToolHandler for SystemInfo {
    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "runtime": "tokio",
        }))
    }
}

struct SystemHealth {
    server: Weak<ServerInner>,
}

#[async_trait]
impl ToolHandler for SystemHealth {
    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        let inner = self.server.upgrade().ok_or_else(state_gone)?;
        to_value(&health_snapshot(&inner))
    }
}

struct ToolsList {
    server: Weak<ServerInner>,
}

#[async_trait]
impl ToolHandler for ToolsList {
    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        let inner = self.server.upgrade().ok_or_else(state_gone)?;
        let tools: Vec<Value> = inner
            .registry
            .list()
            .iter()
            .map(|tool| json!({"name": tool.name, "description": tool.description}))
            .collect();
        Ok(Value::Array(tools))
    }
}

struct ToolsSchema {
    server: Weak<ServerInner>,
}

#[async_trait]
impl ToolHandler for ToolsSchema {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let inner = self.server.upgrade().ok_or_else(state_gone)?;
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidParams("name is required".to_string()))?;

        inner
            .registry
            .get(name)
            .map(|tool| tool.schema_view())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }
}

pub(crate) fn register_builtins(inner: &Arc<ServerInner>) {
    let weak = || Arc::downgrade(inner);
    let registry = &inner.registry;

    registry
        .register(
            ToolDescriptor::new(
                "discover_tools",
                "Rank registered tools against a free-text query",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "minLength": 1},
                        "limit": {"type": "integer", "minimum": 1, "maximum": 100}
                    },
                    "required": ["query"]
                }),
                Arc::new(DiscoverTools { server: weak() }),
            )
            .with_estimated_tokens(120),
        )
        .expect("register discover_tools");

    registry
        .register(
            ToolDescriptor::new(
                "provision_tools",
                "Select ranked tools whose summed token cost fits a budget",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "maxTokens": {"type": "integer", "minimum": 0, "maximum": 100_000}
                    },
                    "required": ["query", "maxTokens"]
                }),
                Arc::new(ProvisionTools { server: weak() }),
            )
            .with_estimated_tokens(140),
        )
        .expect("register provision_tools");

    registry
        .register(
            ToolDescriptor::new(
                "system/info",
                "Server version and runtime information",
                json!({"type": "object", "properties": {}}),
                Arc::new(SystemInfo),
            )
            .with_estimated_tokens(40),
        )
        .expect("register system/info");

    registry
        .register(
            ToolDescriptor::new(
                "system/health",
                "Server health snapshot with session, admission, and transport counters",
                json!({"type": "object", "properties": {}}),
                Arc::new(SystemHealth { server: weak() }),
            )
            .with_estimated_tokens(80),
        )
        .expect("register system/health");

    registry
        .register(
            ToolDescriptor::new(
                "tools/list",
                "List registered tools with their descriptions",
                json!({"type": "object", "properties": {}}),
                Arc::new(ToolsList { server: weak() }),
            )
            .with_estimated_tokens(60),
        )
        .expect("register tools/list");

    registry
        .register(
            ToolDescriptor::new(
                "tools/schema",
                "Fetch one tool's descriptor without its handler",
                json!({
                    "type": "object",
                    "properties": {"name": {"type": "string"}},
                    "required": ["name"]
                }),
                Arc::new(ToolsSchema { server: weak() }),
            )
            .with_estimated_tokens(90),
        )
        .expect("register tools/schema");
}
