//! Transport layer: framing bytes to JSON-RPC messages.
//!
//! Both variants hand each framed message to
//! [`Server::handle_message`](crate::server::Server::handle_message)
//! with a [`RequestContext`](crate::server::RequestContext) and write
//! the returned response back on the same channel:
//!
//! - [`stdio`] — newline-delimited JSON on standard streams, one
//!   logical session per process. Diagnostics go to standard error;
//!   standard output carries only protocol frames.
//! - [`http`] — one JSON-RPC object per POST to a fixed path, sessions
//!   bound by header.
//!
//! Shared [`TransportCounters`] feed the health probe.

pub mod http;
pub mod stdio;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Health probe payload for the active transport.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportHealth {
    /// False once the transport has recorded an error.
    pub healthy: bool,
    /// The most recent transport error, when one occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Bytes read from the channel.
    pub bytes_in: u64,
    /// Bytes written to the channel.
    pub bytes_out: u64,
    /// Open connections (1 for a live stdio pipe).
    pub active_connections: u64,
}

/// Atomic byte and connection counters shared between the server and
/// its active transport.
#[derive(Debug, Default)]
pub struct TransportCounters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    active_connections: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl TransportCounters {
    /// Records bytes read from the channel.
    pub fn add_bytes_in(&self, count: u64) {
        self.bytes_in.fetch_add(count, Ordering::Relaxed);
    }

    /// Records bytes written to the channel.
    pub fn add_bytes_out(&self, count: u64) {
        self.bytes_out.fetch_add(count, Ordering::Relaxed);
    }

    /// Marks a connection opened.
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a connection closed.
    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    /// Records a transport error for the health probe.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn record_error(&self, error: impl Into<String>) {
        *self.last_error.lock().unwrap() = Some(error.into());
    }

    /// Current probe snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn health(&self) -> TransportHealth {
        let error = self.last_error.lock().unwrap().clone();
        TransportHealth {
            healthy: error.is_none(),
            error,
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = TransportCounters::default();
        counters.add_bytes_in(100);
        counters.add_bytes_in(20);
        counters.add_bytes_out(50);
        counters.connection_opened();

        let health = counters.health();
        assert!(health.healthy);
        assert_eq!(health.bytes_in, 120);
        assert_eq!(health.bytes_out, 50);
        assert_eq!(health.active_connections, 1);
    }

    #[test]
    fn error_flips_healthy() {
        let counters = TransportCounters::default();
        counters.record_error("broken pipe");

        let health = counters.health();
        assert!(!health.healthy);
        assert_eq!(health.error.as_deref(), Some("broken pipe"));
    }

    #[test]
    fn connection_close_saturates_at_zero() {
        let counters = TransportCounters::default();
        counters.connection_closed();
        assert_eq!(counters.health().active_connections, 0);
    }
}
