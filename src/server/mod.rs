//! Server composition and lifecycle.
//!
//! A [`Server`] is a single value owning every sub-component: registry,
//! sessions, auth, load balancer, audit log, and transport counters.
//! There are no globals; construct one with [`Server::new`] and share it
//! by cloning (the inner state is reference-counted).
//!
//! # Lifecycle
//!
//! `start()` transitions Stopped → Running and spawns the session
//! reaper. `stop()` begins a drain: no new requests are admitted,
//! in-flight handlers get a grace period to complete, then sessions are
//! removed and transports observe the shutdown signal. Double start or
//! stop fails with a stable [`ServerError`] surfaced to the operator,
//! never to clients.

mod builtin;
mod router;

pub use router::{Handled, RequestContext};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditLogger};
use crate::auth::AuthManager;
use crate::balance::{BalancerMetrics, LoadBalancer};
use crate::config::{Config, TransportConfig};
use crate::error::{ConfigError, RegistryError, ServerError};
use crate::protocol::{ProtocolVersion, PROTOCOL_VERSION};
use crate::registry::{ToolDescriptor, ToolRegistry};
use crate::session::{SessionManager, SessionMetrics};
use crate::transport::{TransportCounters, TransportHealth};

/// How long `stop()` waits for in-flight handlers.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Poll interval while draining.
const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Stopped,
    Running,
    Draining,
}

pub(crate) struct ServerInner {
    pub(crate) transport_config: TransportConfig,
    pub(crate) registry: ToolRegistry,
    pub(crate) sessions: SessionManager,
    pub(crate) auth: AuthManager,
    pub(crate) balancer: LoadBalancer,
    pub(crate) audit: AuditLogger,
    pub(crate) counters: Arc<TransportCounters>,
    pub(crate) started_at: Instant,
    pub(crate) lifecycle: Mutex<Lifecycle>,
    pub(crate) stdio_session: Mutex<Option<String>>,
    shutdown_tx: watch::Sender<bool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl ServerInner {
    pub(crate) fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }
}

/// Health snapshot served by `system/health` and the HTTP probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// `running`, `draining`, or `stopped`.
    pub status: String,
    /// Milliseconds since construction.
    pub uptime_ms: u64,
    /// Protocol version the server speaks.
    pub protocol_version: ProtocolVersion,
    /// Session counters.
    pub sessions: SessionMetrics,
    /// Admission and outcome counters.
    pub balancer: BalancerMetrics,
    /// Transport byte and connection counters.
    pub transport: TransportHealth,
}

pub(crate) fn health_snapshot(inner: &ServerInner) -> HealthSnapshot {
    let status = match inner.lifecycle() {
        Lifecycle::Running => "running",
        Lifecycle::Draining => "draining",
        Lifecycle::Stopped => "stopped",
    };
    HealthSnapshot {
        status: status.to_string(),
        uptime_ms: u64::try_from(inner.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        protocol_version: PROTOCOL_VERSION,
        sessions: inner.sessions.metrics(),
        balancer: inner.balancer.metrics(),
        transport: inner.counters.health(),
    }
}

/// The MCP server core.
#[derive(Clone)]
pub struct Server {
    pub(crate) inner: Arc<ServerInner>,
}

impl Server {
    /// Builds a server from validated configuration and registers the
    /// built-in tool catalog.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when validation fails or the audit log
    /// cannot be opened.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let audit = match &config.logging.audit_log_path {
            Some(path) => {
                AuditLogger::new(path).map_err(|e| ConfigError::ValidationError {
                    message: format!("cannot open audit log {}: {e}", path.display()),
                })?
            }
            None => AuditLogger::disabled(),
        };

        let auth =
            AuthManager::from_config(config.auth).map_err(|e| ConfigError::ValidationError {
                message: e.to_string(),
            })?;

        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(ServerInner {
            transport_config: config.transport,
            registry: ToolRegistry::new(),
            sessions: SessionManager::new(Duration::from_millis(config.session.timeout_ms)),
            auth,
            balancer: LoadBalancer::new(config.load_balancer),
            audit,
            counters: Arc::new(TransportCounters::default()),
            started_at: Instant::now(),
            lifecycle: Mutex::new(Lifecycle::Stopped),
            stdio_session: Mutex::new(None),
            shutdown_tx,
            reaper: Mutex::new(None),
        });

        builtin::register_builtins(&inner);

        Ok(Self { inner })
    }

    /// Registers an application tool.
    ///
    /// Tools may be added at runtime; in-flight dispatches are
    /// unaffected by later additions or removals.
    ///
    /// # Errors
    ///
    /// Fails on an empty or duplicate name.
    pub fn register_tool(&self, tool: ToolDescriptor) -> Result<(), RegistryError> {
        self.inner.registry.register(tool)
    }

    /// The tool registry.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    /// Transport counters shared with the active transport.
    #[must_use]
    pub fn transport_counters(&self) -> Arc<TransportCounters> {
        Arc::clone(&self.inner.counters)
    }

    /// The configured transport settings.
    #[must_use]
    pub fn transport_config(&self) -> &TransportConfig {
        &self.inner.transport_config
    }

    /// Whether the server is accepting requests.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lifecycle() == Lifecycle::Running
    }

    /// A receiver that flips to `true` when `stop()` begins.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Transitions to Running and spawns the session reaper.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyRunning`] when not stopped.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn start(&self) -> Result<(), ServerError> {
        {
            let mut lifecycle = self.inner.lifecycle.lock().unwrap();
            if *lifecycle != Lifecycle::Stopped {
                return Err(ServerError::AlreadyRunning);
            }
            *lifecycle = Lifecycle::Running;
        }

        let reap_interval = (self.inner.sessions.timeout() / 4)
            .clamp(Duration::from_secs(1), Duration::from_secs(30));
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reap_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for session_id in inner.sessions.reap_expired() {
                    debug!(session = %session_id, "session expired");
                    inner.balancer.remove_session(&session_id);
                }
            }
        });
        *self.inner.reaper.lock().unwrap() = Some(handle);

        self.inner.audit.log_silent(&AuditEvent::server_started());
        info!(version = env!("CARGO_PKG_VERSION"), "server started");
        Ok(())
    }

    /// Drains and stops the server.
    ///
    /// No new requests are admitted once the drain begins; in-flight
    /// handlers get up to five seconds, after which sessions are
    /// removed regardless and the transports observe the shutdown
    /// signal.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`] when not running.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub async fn stop(&self) -> Result<(), ServerError> {
        {
            let mut lifecycle = self.inner.lifecycle.lock().unwrap();
            if *lifecycle != Lifecycle::Running {
                return Err(ServerError::NotRunning);
            }
            *lifecycle = Lifecycle::Draining;
        }

        let _ = self.inner.shutdown_tx.send(true);
        self.inner.balancer.drain_queue();

        let drain_started = Instant::now();
        while drain_started.elapsed() < DRAIN_GRACE {
            let in_flight: u32 = self
                .inner
                .sessions
                .active()
                .iter()
                .map(|s| s.in_flight())
                .sum();
            if in_flight == 0 {
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        if let Some(handle) = self.inner.reaper.lock().unwrap().take() {
            handle.abort();
        }
        self.inner.sessions.clear();
        *self.inner.stdio_session.lock().unwrap() = None;
        *self.inner.lifecycle.lock().unwrap() = Lifecycle::Stopped;

        self.inner.audit.log_silent(&AuditEvent::server_stopped());
        info!("server stopped");
        Ok(())
    }

    /// Current health snapshot.
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        health_snapshot(&self.inner)
    }

    /// Zeroes balancer counters on operator request.
    pub fn reset_metrics(&self) {
        self.inner.balancer.reset_metrics();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("lifecycle", &self.inner.lifecycle())
            .field("tools", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Server {
        Server::new(Config::default()).unwrap()
    }

    #[tokio::test]
    async fn double_start_fails() {
        let server = server();
        server.start().unwrap();
        assert!(matches!(server.start(), Err(ServerError::AlreadyRunning)));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_fails() {
        let server = server();
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
    }

    #[tokio::test]
    async fn start_stop_start_cycles() {
        let server = server();
        server.start().unwrap();
        server.stop().await.unwrap();
        server.start().unwrap();
        assert!(server.is_running());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn builtins_are_registered() {
        let server = server();
        for name in [
            "discover_tools",
            "provision_tools",
            "system/info",
            "system/health",
            "tools/list",
            "tools/schema",
        ] {
            assert!(server.registry().get(name).is_some(), "missing {name}");
        }
    }

    #[tokio::test]
    async fn health_reports_status() {
        let server = server();
        assert_eq!(server.health().status, "stopped");

        server.start().unwrap();
        let health = server.health();
        assert_eq!(health.status, "running");
        assert_eq!(health.protocol_version, PROTOCOL_VERSION);

        server.stop().await.unwrap();
        assert_eq!(server.health().status, "stopped");
    }

    #[tokio::test]
    async fn shutdown_signal_flips_on_stop() {
        let server = server();
        server.start().unwrap();
        let mut signal = server.shutdown_signal();
        assert!(!*signal.borrow());

        server.stop().await.unwrap();
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }
}
