//! mcp-gateway: multi-transport MCP server core for AI agent platforms
//!
//! This library implements the JSON-RPC 2.0 request pipeline exposed to
//! language-model clients: transport framing, the `initialize`
//! handshake, session lifecycle, an authenticated and rate-limited
//! router, a tool registry with semantic discovery and token-budget
//! gating, and health reporting.
//!
//! # Architecture
//!
//! ```text
//! Transport ─▶ Session ─▶ Auth ─▶ Admission ─▶ Router ─▶ Tool handler
//!    stdio      lookup    token    rate limit             (opaque)
//!    http       create    scope    circuit breaker
//!                                  concurrency + queue
//! ```
//!
//! Tool handlers are opaque to the core: every descriptor carries its
//! handler, invoked polymorphically under a deadline. The orchestrators
//! and memory backends sitting behind those handlers are external
//! collaborators.
//!
//! # Modules
//!
//! - [`audit`] — JSON-lines audit logging of request outcomes
//! - [`auth`] — credential validation and permission scoping
//! - [`balance`] — rate limiting, circuit breaking, request queueing
//! - [`config`] — configuration loading and validation
//! - [`discovery`] — tool ranking and token-budget gating
//! - [`error`] — error types
//! - [`protocol`] — JSON-RPC 2.0 message types
//! - [`registry`] — tool catalog and structural validation
//! - [`server`] — composition, lifecycle, and the request router
//! - [`session`] — per-client session lifecycle
//! - [`transport`] — stdio and HTTP framing

pub mod audit;
pub mod auth;
pub mod balance;
pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
