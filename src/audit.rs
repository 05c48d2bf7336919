//! Audit logging of request outcomes.
//!
//! Each log entry is one JSON object per line:
//! - `timestamp`: seconds since epoch
//! - `event_type`: `request_completed`, `request_blocked`,
//!   `server_started`, `server_stopped`
//! - `session`: session id (operator-side only, never on the wire)
//! - `tool`: the dispatched tool, when one was resolved
//! - `code`: JSON-RPC error code for non-success outcomes
//! - `duration_ms`: dispatch time for completed requests

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::warn;

/// Type of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A request was dispatched and completed.
    RequestCompleted,
    /// A request was rejected before dispatch.
    RequestBlocked,
    /// Server started.
    ServerStarted,
    /// Server stopped.
    ServerStopped,
}

/// An audit event to be logged.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Seconds since epoch.
    pub timestamp: u64,

    /// Type of event.
    pub event_type: AuditEventType,

    /// Session the request arrived on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    /// The dispatched tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// JSON-RPC error code for non-success outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// Reason a request was blocked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Dispatch duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AuditEvent {
    fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
            event_type,
            session: None,
            tool: None,
            code: None,
            reason: None,
            duration_ms: None,
        }
    }

    /// Server start marker.
    #[must_use]
    pub fn server_started() -> Self {
        Self::new(AuditEventType::ServerStarted)
    }

    /// Server stop marker.
    #[must_use]
    pub fn server_stopped() -> Self {
        Self::new(AuditEventType::ServerStopped)
    }

    /// A dispatched request completing, successfully or not.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Duration in ms fits in u64
    pub fn request_completed(
        session: impl Into<String>,
        tool: impl Into<String>,
        code: Option<i64>,
        duration: Duration,
    ) -> Self {
        Self {
            session: Some(session.into()),
            tool: Some(tool.into()),
            code,
            duration_ms: Some(duration.as_millis() as u64),
            ..Self::new(AuditEventType::RequestCompleted)
        }
    }

    /// A request rejected before dispatch.
    #[must_use]
    pub fn request_blocked(
        session: impl Into<String>,
        tool: Option<String>,
        code: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            session: Some(session.into()),
            tool,
            code: Some(code),
            reason: Some(reason.into()),
            ..Self::new(AuditEventType::RequestBlocked)
        }
    }
}

/// Append-only JSON-lines audit writer.
///
/// A disabled logger swallows events, so call sites never branch.
#[derive(Debug)]
pub struct AuditLogger {
    writer: Option<Mutex<BufWriter<std::fs::File>>>,
}

impl AuditLogger {
    /// Opens (or creates) the audit log at `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns the IO error when the file cannot be opened.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Some(Mutex::new(BufWriter::new(file))),
        })
    }

    /// A logger that discards all events.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { writer: None }
    }

    /// Whether events are being persisted.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Writes an event, logging (not propagating) write failures.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn log_silent(&self, event: &AuditEvent) {
        let Some(writer) = &self.writer else {
            return;
        };

        let mut writer = writer.lock().unwrap();
        let result = serde_json::to_string(event)
            .map_err(std::io::Error::other)
            .and_then(|line| {
                writeln!(writer, "{line}")?;
                writer.flush()
            });

        if let Err(e) = result {
            warn!(error = %e, "failed to write audit event");
        }
    }
}
