//! Bounded overflow queue for concurrency-capped sessions.
//!
//! When a session is at its concurrency cap, the load balancer parks the
//! request here instead of rejecting it. Dequeue is driven by request
//! completion: highest priority first, FIFO within a priority, skipping
//! entries whose session is still at cap.
//!
//! Entries age out at the configured deadline and are answered with a
//! synthetic −32000 "Request timeout in queue" failure. A full queue
//! rejects synchronously; the transport reader is never blocked.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::AdmissionError;

/// Dispatch priority carried by queued requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    /// Background work.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Latency-sensitive work.
    High,
    /// Dispatched before everything else.
    Critical,
}

impl RequestPriority {
    /// All priorities, highest first. Dequeue scan order.
    pub const DESCENDING: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Parses a priority from request metadata, defaulting to Normal.
    ///
    /// Unrecognised values fall back to Normal rather than erroring.
    #[must_use]
    pub fn from_meta(value: Option<&serde_json::Value>) -> Self {
        value
            .and_then(|v| v.as_str())
            .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok())
            .unwrap_or_default()
    }

    const fn index(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

/// Signal delivered to a parked request when it may dispatch (or not).
pub type QueueSignal = oneshot::Sender<Result<(), AdmissionError>>;

/// Receiver half awaited by the router.
pub type QueueTicket = oneshot::Receiver<Result<(), AdmissionError>>;

struct QueueEntry {
    session_id: String,
    enqueued_at: Instant,
    signal: QueueSignal,
}

/// Queue counters surfaced by `system/health`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueMetrics {
    /// Entries currently parked.
    pub depth: usize,
    /// Entries rejected because the queue was full.
    pub drops: u64,
    /// Entries that aged out before dispatch.
    pub timeouts: u64,
}

/// Bounded FIFO with per-entry deadline and four priority lanes.
pub struct RequestQueue {
    capacity: usize,
    deadline: Duration,
    lanes: Mutex<[VecDeque<QueueEntry>; 4]>,
    drops: AtomicU64,
    timeouts: AtomicU64,
}

impl RequestQueue {
    /// Creates a queue with the given capacity and entry deadline.
    #[must_use]
    pub fn new(capacity: usize, deadline: Duration) -> Self {
        Self {
            capacity,
            deadline,
            lanes: Mutex::new([
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ]),
            drops: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// The per-entry deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Parks a request, returning the ticket the router awaits.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::QueueFull`] when at capacity after
    /// expired entries are swept.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn push(
        &self,
        session_id: impl Into<String>,
        priority: RequestPriority,
    ) -> Result<QueueTicket, AdmissionError> {
        let mut lanes = self.lanes.lock().unwrap();
        Self::sweep_locked(&mut lanes, self.deadline, &self.timeouts);

        let depth: usize = lanes.iter().map(VecDeque::len).sum();
        if depth >= self.capacity {
            self.drops.fetch_add(1, Ordering::Relaxed);
            return Err(AdmissionError::QueueFull);
        }

        let (tx, rx) = oneshot::channel();
        lanes[priority.index()].push_back(QueueEntry {
            session_id: session_id.into(),
            enqueued_at: Instant::now(),
            signal: tx,
        });
        Ok(rx)
    }

    /// Pops the next dispatchable entry and signals it.
    ///
    /// `try_reserve` must atomically claim a concurrency slot for the
    /// entry's session; entries it declines stay parked in order. If
    /// the entry's caller gave up between reservation and signal,
    /// `unreserve` returns the claimed slot and the scan continues.
    /// Returns `true` when an entry was dispatched.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn pop_ready<F, U>(&self, mut try_reserve: F, mut unreserve: U) -> bool
    where
        F: FnMut(&str) -> bool,
        U: FnMut(&str),
    {
        let mut lanes = self.lanes.lock().unwrap();
        Self::sweep_locked(&mut lanes, self.deadline, &self.timeouts);

        for priority in RequestPriority::DESCENDING {
            let lane = &mut lanes[priority.index()];
            let mut position = 0;
            while position < lane.len() {
                // Receivers dropped by callers that gave up are purged
                // in passing.
                if lane[position].signal.is_closed() {
                    lane.remove(position);
                    continue;
                }
                if try_reserve(&lane[position].session_id) {
                    let Some(entry) = lane.remove(position) else {
                        continue;
                    };
                    if entry.signal.send(Ok(())).is_ok() {
                        return true;
                    }
                    // Caller vanished after the reservation was made.
                    unreserve(&entry.session_id);
                    continue;
                }
                position += 1;
            }
        }
        false
    }

    /// Discards aged-out entries, answering each with the timeout error.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn sweep_expired(&self) {
        let mut lanes = self.lanes.lock().unwrap();
        Self::sweep_locked(&mut lanes, self.deadline, &self.timeouts);
    }

    fn sweep_locked(
        lanes: &mut [VecDeque<QueueEntry>; 4],
        deadline: Duration,
        timeouts: &AtomicU64,
    ) {
        for lane in lanes.iter_mut() {
            while let Some(front) = lane.front() {
                if front.enqueued_at.elapsed() <= deadline {
                    break;
                }
                if let Some(entry) = lane.pop_front() {
                    timeouts.fetch_add(1, Ordering::Relaxed);
                    let _ = entry.signal.send(Err(AdmissionError::QueueTimeout));
                }
            }
        }
    }

    /// Entries currently parked.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lanes.lock().unwrap().iter().map(VecDeque::len).sum()
    }

    /// Current queue counters.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            depth: self.depth(),
            drops: self.drops.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Fails every parked entry. Used during server stop.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn drain(&self) {
        let mut lanes = self.lanes.lock().unwrap();
        for lane in lanes.iter_mut() {
            while let Some(entry) = lane.pop_front() {
                let _ = entry.signal.send(Err(AdmissionError::Draining));
            }
        }
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("capacity", &self.capacity)
            .field("deadline", &self.deadline)
            .field("depth", &self.depth())
            .finish()
    }
}
