//! Admission control and request accounting.
//!
//! The load balancer gates every dispatch with three checks, in order:
//!
//! 1. **Rate limit** — a per-session token bucket
//! 2. **Circuit breaker** — a per-session three-state machine fed by
//!    handler outcomes
//! 3. **Concurrency cap** — per-session in-flight limit, overflowing
//!    into the bounded [`queue::RequestQueue`] when one is configured
//!
//! Any failure yields a specific [`AdmissionError`] the router maps to
//! JSON-RPC −32000. Admission and protocol errors never feed the
//! breaker; only handler outcomes recorded through
//! [`LoadBalancer::record_end`] do.
//!
//! Timing runs from [`LoadBalancer::record_start`] to
//! [`LoadBalancer::record_end`]; one [`InFlight`] record exists per
//! dispatched request and is consumed exactly once.

pub mod breaker;
pub mod queue;
pub mod rate;

pub use breaker::{CircuitBreaker, CircuitState};
pub use queue::{QueueMetrics, QueueTicket, RequestPriority, RequestQueue};
pub use rate::TokenBucket;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::LoadBalancerConfig;
use crate::error::AdmissionError;

/// EWMA weight for `average_response_time_ms`.
const LATENCY_ALPHA: f64 = 0.1;

/// Window for the `requests_per_second` gauge.
const RPS_WINDOW: Duration = Duration::from_secs(60);

/// Outcome fed back at completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The handler produced a value.
    Success,
    /// The handler failed or timed out. Feeds the circuit breaker.
    Failure,
    /// The handler rejected its arguments. Counts as a failed request
    /// but, as a protocol error, never feeds the breaker.
    InvalidParams,
}

/// Admission decision for a request that passed rate and circuit checks.
#[derive(Debug)]
pub enum Admission {
    /// Dispatch immediately; a concurrency slot is held.
    Ready,
    /// The session is at its cap; await the ticket before dispatch. The
    /// slot is reserved by the dequeue, not the caller.
    Deferred(QueueTicket),
}

/// Per-session admission state, partitioned to avoid contention.
#[derive(Debug)]
struct SessionLimits {
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    in_flight: Mutex<usize>,
}

impl SessionLimits {
    fn new(config: &LoadBalancerConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config.burst, config.rate_per_sec),
            breaker: CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_millis(config.failure_window_ms),
                Duration::from_millis(config.cooldown_ms),
            ),
            in_flight: Mutex::new(0),
        }
    }

    /// Atomically claims a concurrency slot if one is free.
    fn try_reserve(&self, max_concurrent: usize) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap();
        if *in_flight >= max_concurrent {
            false
        } else {
            *in_flight += 1;
            true
        }
    }

    fn reserve_unchecked(&self) {
        *self.in_flight.lock().unwrap() += 1;
    }

    fn release(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        *in_flight = in_flight.saturating_sub(1);
    }

    fn in_flight(&self) -> usize {
        *self.in_flight.lock().unwrap()
    }
}

/// Metric record for one dispatched request.
///
/// Created at [`LoadBalancer::record_start`], consumed exactly once at
/// [`LoadBalancer::record_end`].
#[derive(Debug)]
pub struct InFlight {
    session_id: String,
    started: Instant,
}

impl InFlight {
    /// The session this record belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latency so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Default)]
struct LatencyTracker {
    ewma_ms: Option<f64>,
    completions: VecDeque<Instant>,
}

impl LatencyTracker {
    fn record(&mut self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        self.ewma_ms = Some(match self.ewma_ms {
            None => sample,
            Some(avg) => LATENCY_ALPHA.mul_add(sample, (1.0 - LATENCY_ALPHA) * avg),
        });

        let now = Instant::now();
        self.completions.push_back(now);
        while let Some(front) = self.completions.front() {
            if now.duration_since(*front) <= RPS_WINDOW {
                break;
            }
            self.completions.pop_front();
        }
    }

    fn requests_per_second(&self) -> f64 {
        let now = Instant::now();
        let recent = self
            .completions
            .iter()
            .filter(|at| now.duration_since(**at) <= RPS_WINDOW)
            .count();
        recent as f64 / RPS_WINDOW.as_secs_f64()
    }
}

/// Snapshot of balancer counters, surfaced by `system/health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancerMetrics {
    /// Requests dispatched since the last reset.
    pub total_requests: u64,
    /// Dispatched requests that succeeded.
    pub successful_requests: u64,
    /// Dispatched requests that failed (handler failures, timeouts,
    /// invalid params).
    pub failed_requests: u64,
    /// Requests rejected by the token bucket.
    pub rate_limited_requests: u64,
    /// Circuit transitions to Open.
    pub circuit_breaker_trips: u64,
    /// EWMA of dispatch latency, milliseconds.
    pub average_response_time_ms: f64,
    /// Completions over the last rolling minute, per second.
    pub requests_per_second: f64,
    /// Requests currently dispatched across all sessions.
    pub in_flight: usize,
    /// Overflow queue counters, when a queue is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueMetrics>,
    /// Milliseconds since epoch of the last operator reset.
    pub last_reset_ms: u64,
}

/// Admission gate, per-session limits, and outcome metrics.
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    limits: Mutex<HashMap<String, Arc<SessionLimits>>>,
    overflow: Option<RequestQueue>,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    rate_limited_requests: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    latency: Mutex<LatencyTracker>,
    last_reset: Mutex<SystemTime>,
}

impl LoadBalancer {
    /// Creates a balancer from configuration.
    #[must_use]
    pub fn new(config: LoadBalancerConfig) -> Self {
        let overflow = (config.queue_capacity > 0).then(|| {
            RequestQueue::new(
                config.queue_capacity,
                Duration::from_millis(config.queue_timeout_ms),
            )
        });
        Self {
            config,
            limits: Mutex::new(HashMap::new()),
            overflow,
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            rate_limited_requests: AtomicU64::new(0),
            circuit_breaker_trips: AtomicU64::new(0),
            latency: Mutex::new(LatencyTracker::default()),
            last_reset: Mutex::new(SystemTime::now()),
        }
    }

    /// The handler deadline for tools that declare none.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.config.default_timeout_ms)
    }

    /// The deadline a deferred request waits for its ticket.
    #[must_use]
    pub fn queue_deadline(&self) -> Duration {
        self.overflow
            .as_ref()
            .map_or(Duration::ZERO, RequestQueue::deadline)
    }

    fn limits_for(&self, session_id: &str) -> Arc<SessionLimits> {
        let mut limits = self.limits.lock().unwrap();
        Arc::clone(
            limits
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(SessionLimits::new(&self.config))),
        )
    }

    /// Admission gate: rate limit, circuit breaker, concurrency cap.
    ///
    /// On `Ready` the caller holds a concurrency slot and MUST follow
    /// with [`Self::record_start`] / [`Self::record_end`]. On
    /// `Deferred` the caller awaits the ticket; a resolved `Ok` means
    /// the dequeue reserved the slot on the caller's behalf.
    ///
    /// # Errors
    ///
    /// Returns the specific [`AdmissionError`] of the first failed check.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn should_allow(
        &self,
        session_id: &str,
        priority: RequestPriority,
    ) -> Result<Admission, AdmissionError> {
        let limits = self.limits_for(session_id);

        if !self.config.enabled {
            limits.reserve_unchecked();
            return Ok(Admission::Ready);
        }

        if !limits.bucket.try_acquire() {
            self.rate_limited_requests.fetch_add(1, Ordering::Relaxed);
            return Err(AdmissionError::RateLimited);
        }

        if !limits.breaker.try_allow() {
            return Err(AdmissionError::CircuitOpen);
        }

        if limits.try_reserve(self.config.max_concurrent) {
            return Ok(Admission::Ready);
        }

        match &self.overflow {
            Some(queue) => queue.push(session_id, priority).map(Admission::Deferred),
            None => Err(AdmissionError::Saturated),
        }
    }

    /// Starts timing a dispatched request.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn record_start(&self, session_id: &str) -> InFlight {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        InFlight {
            session_id: session_id.to_string(),
            started: Instant::now(),
        }
    }

    /// Completes timing, updates counters, feeds the breaker, releases
    /// the concurrency slot, and wakes the next queued request.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn record_end(&self, record: InFlight, outcome: RequestOutcome) {
        let latency = record.started.elapsed();
        let limits = self.limits_for(&record.session_id);

        match outcome {
            RequestOutcome::Success => {
                self.successful_requests.fetch_add(1, Ordering::Relaxed);
                limits.breaker.record_success();
            }
            RequestOutcome::Failure => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
                if limits.breaker.record_failure() {
                    self.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
                }
            }
            RequestOutcome::InvalidParams => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.latency.lock().unwrap().record(latency);
        limits.release();

        if let Some(queue) = &self.overflow {
            queue.pop_ready(
                |session_id| {
                    self.limits_for(session_id)
                        .try_reserve(self.config.max_concurrent)
                },
                |session_id| self.limits_for(session_id).release(),
            );
        }
    }

    /// In-flight requests for one session.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn in_flight(&self, session_id: &str) -> usize {
        self.limits
            .lock()
            .unwrap()
            .get(session_id)
            .map_or(0, |limits| limits.in_flight())
    }

    /// The session's circuit state, when the session has admission state.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn circuit_state(&self, session_id: &str) -> Option<CircuitState> {
        self.limits
            .lock()
            .unwrap()
            .get(session_id)
            .map(|limits| limits.breaker.state())
    }

    /// Drops per-session admission state for a removed session.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn remove_session(&self, session_id: &str) {
        self.limits.lock().unwrap().remove(session_id);
    }

    /// Fails all queued requests. Used during server stop.
    pub fn drain_queue(&self) {
        if let Some(queue) = &self.overflow {
            queue.drain();
        }
    }

    /// Snapshot of current counters.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[must_use]
    pub fn metrics(&self) -> BalancerMetrics {
        let latency = self.latency.lock().unwrap();
        let in_flight = self
            .limits
            .lock()
            .unwrap()
            .values()
            .map(|limits| limits.in_flight())
            .sum();
        let last_reset_ms = self
            .last_reset
            .lock()
            .unwrap()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

        BalancerMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            rate_limited_requests: self.rate_limited_requests.load(Ordering::Relaxed),
            circuit_breaker_trips: self.circuit_breaker_trips.load(Ordering::Relaxed),
            average_response_time_ms: latency.ewma_ms.unwrap_or(0.0),
            requests_per_second: latency.requests_per_second(),
            in_flight,
            queue: self.overflow.as_ref().map(RequestQueue::metrics),
            last_reset_ms,
        }
    }

    /// Zeroes the counters. Only invoked on explicit operator request;
    /// operational state (buckets, breaker positions) is untouched.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    pub fn reset_metrics(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.rate_limited_requests.store(0, Ordering::Relaxed);
        self.circuit_breaker_trips.store(0, Ordering::Relaxed);
        *self.latency.lock().unwrap() = LatencyTracker::default();
        *self.last_reset.lock().unwrap() = SystemTime::now();
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("enabled", &self.config.enabled)
            .field("max_concurrent", &self.config.max_concurrent)
            .field("queued", &self.overflow.as_ref().map(RequestQueue::depth))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoadBalancerConfig {
        serde_json::from_str("{}").unwrap()
    }

    fn strict_config() -> LoadBalancerConfig {
        serde_json::from_value(serde_json::json!({
            "rate_per_sec": 2.0,
            "burst": 2,
            "max_concurrent": 1,
            "failure_threshold": 3,
            "cooldown_ms": 50,
            "queue_capacity": 2,
            "queue_timeout_ms": 100
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn admits_within_burst_then_rate_limits() {
        let balancer = LoadBalancer::new(strict_config());

        for _ in 0..2 {
            let admission = balancer.should_allow("s1", RequestPriority::Normal);
            assert!(matches!(admission, Ok(Admission::Ready)));
            let record = balancer.record_start("s1");
            balancer.record_end(record, RequestOutcome::Success);
        }

        let third = balancer.should_allow("s1", RequestPriority::Normal);
        assert!(matches!(third, Err(AdmissionError::RateLimited)));
        assert_eq!(balancer.metrics().rate_limited_requests, 1);
    }

    #[tokio::test]
    async fn sessions_are_partitioned() {
        let balancer = LoadBalancer::new(strict_config());

        let _ = balancer.should_allow("a", RequestPriority::Normal).unwrap();
        let _ = balancer.should_allow("a", RequestPriority::Normal);
        // Session "b" has its own bucket.
        assert!(matches!(
            balancer.should_allow("b", RequestPriority::Normal),
            Ok(Admission::Ready)
        ));
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_recovers() {
        let balancer = LoadBalancer::new(strict_config());

        for _ in 0..3 {
            let _ = balancer.should_allow("s1", RequestPriority::Normal).unwrap();
            let record = balancer.record_start("s1");
            balancer.record_end(record, RequestOutcome::Failure);
        }

        assert_eq!(balancer.circuit_state("s1"), Some(CircuitState::Open));
        assert!(matches!(
            balancer.should_allow("s1", RequestPriority::Normal),
            Err(AdmissionError::CircuitOpen)
        ));
        assert_eq!(balancer.metrics().circuit_breaker_trips, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Half-open probe succeeds: circuit closes.
        let admission = balancer.should_allow("s1", RequestPriority::Normal);
        assert!(matches!(admission, Ok(Admission::Ready)));
        let record = balancer.record_start("s1");
        balancer.record_end(record, RequestOutcome::Success);
        assert_eq!(balancer.circuit_state("s1"), Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn invalid_params_does_not_feed_breaker() {
        let balancer = LoadBalancer::new(strict_config());

        for _ in 0..5 {
            let _ = balancer.should_allow("s1", RequestPriority::Normal).unwrap();
            let record = balancer.record_start("s1");
            balancer.record_end(record, RequestOutcome::InvalidParams);
        }

        // Bucket is drained but the circuit never opened.
        assert_eq!(balancer.circuit_state("s1"), Some(CircuitState::Closed));
        assert_eq!(balancer.metrics().failed_requests, 5);
    }

    #[tokio::test]
    async fn concurrency_overflow_defers_to_queue() {
        let balancer = LoadBalancer::new(strict_config());

        let first = balancer.should_allow("s1", RequestPriority::Normal).unwrap();
        assert!(matches!(first, Admission::Ready));
        let record = balancer.record_start("s1");

        let second = balancer.should_allow("s1", RequestPriority::Normal).unwrap();
        let Admission::Deferred(ticket) = second else {
            panic!("expected deferred admission");
        };

        assert_eq!(balancer.in_flight("s1"), 1);

        // Completing the first request wakes the queued one with a slot
        // already reserved.
        balancer.record_end(record, RequestOutcome::Success);
        assert_eq!(ticket.await.unwrap(), Ok(()));
        assert_eq!(balancer.in_flight("s1"), 1);
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_cap() {
        let balancer = LoadBalancer::new(strict_config());

        let _ready = balancer.should_allow("s1", RequestPriority::Normal).unwrap();
        for _ in 0..2 {
            match balancer.should_allow("s1", RequestPriority::Normal) {
                Ok(Admission::Deferred(_)) | Err(_) => {}
                Ok(Admission::Ready) => panic!("cap exceeded"),
            }
        }
        assert!(balancer.in_flight("s1") <= 1);
    }

    #[tokio::test]
    async fn disabled_balancer_admits_everything() {
        let mut cfg = config();
        cfg.enabled = false;
        let balancer = LoadBalancer::new(cfg);

        for _ in 0..50 {
            assert!(matches!(
                balancer.should_allow("s1", RequestPriority::Normal),
                Ok(Admission::Ready)
            ));
            let record = balancer.record_start("s1");
            balancer.record_end(record, RequestOutcome::Success);
        }
        assert_eq!(balancer.metrics().total_requests, 50);
    }

    #[tokio::test]
    async fn latency_ewma_is_recorded() {
        let balancer = LoadBalancer::new(config());

        let _ = balancer.should_allow("s1", RequestPriority::Normal).unwrap();
        let record = balancer.record_start("s1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        balancer.record_end(record, RequestOutcome::Success);

        let metrics = balancer.metrics();
        assert!(metrics.average_response_time_ms >= 5.0);
        assert!(metrics.requests_per_second > 0.0);
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let balancer = LoadBalancer::new(config());

        let _ = balancer.should_allow("s1", RequestPriority::Normal).unwrap();
        let record = balancer.record_start("s1");
        balancer.record_end(record, RequestOutcome::Failure);

        balancer.reset_metrics();
        let first = balancer.metrics();
        balancer.reset_metrics();
        let second = balancer.metrics();

        assert_eq!(first.total_requests, 0);
        assert_eq!(second.total_requests, 0);
        assert_eq!(first.failed_requests, second.failed_requests);
        assert!((first.average_response_time_ms - second.average_response_time_ms).abs() < 1e-9);
        // Only last_reset_ms may differ.
        assert!(second.last_reset_ms >= first.last_reset_ms);
    }
}
