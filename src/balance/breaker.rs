//! Per-session circuit breaker.
//!
//! Three states:
//!
//! - **Closed** — requests flow. Consecutive handler failures within the
//!   failure window trip the breaker to Open.
//! - **Open** — requests are rejected until the cooldown elapses, then
//!   the next attempt transitions to Half-Open.
//! - **Half-Open** — exactly one probe is allowed. Success closes the
//!   circuit and resets counters; failure reopens it and restarts the
//!   cooldown.
//!
//! Only handler outcomes feed the failure count. Protocol and admission
//! errors never reach [`CircuitBreaker::record_failure`].

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected.
    Open,
    /// A single probe is in flight.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    first_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    trips: u64,
}

/// Suppresses dispatch to a failing session until it recovers.
///
/// All transitions happen under one lock, so state changes are
/// linearizable per session.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    failure_window: Duration,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(failure_threshold: u32, failure_window: Duration, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            failure_window,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                first_failure_at: None,
                opened_at: None,
                probe_in_flight: false,
                trips: 0,
            }),
        }
    }

    /// Whether a request may pass right now.
    ///
    /// An open breaker whose cooldown has elapsed transitions to
    /// Half-Open here and admits the caller as the single probe.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn try_allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.cooldown);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Records a successful handler outcome.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.first_failure_at = None;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
        }
        inner.probe_in_flight = false;
    }

    /// Records a failed handler outcome.
    ///
    /// Returns `true` when this failure tripped the breaker to Open.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        match inner.state {
            CircuitState::HalfOpen => {
                // Failed probe: back to Open, cooldown restarts.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                inner.trips += 1;
                true
            }
            CircuitState::Open => false,
            CircuitState::Closed => {
                let window_expired = inner
                    .first_failure_at
                    .is_some_and(|at| now.duration_since(at) > self.failure_window);
                if window_expired || inner.first_failure_at.is_none() {
                    inner.first_failure_at = Some(now);
                    inner.consecutive_failures = 1;
                } else {
                    inner.consecutive_failures += 1;
                }

                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.trips += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// The current state, without side effects.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Number of Closed/Half-Open → Open transitions.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn trips(&self) -> u64 {
        self.inner.lock().unwrap().trips
    }

    /// Returns the breaker to Closed with counters cleared.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.first_failure_at = None;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.trips = 0;
    }
}
