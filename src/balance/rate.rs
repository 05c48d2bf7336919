//! Per-session token bucket.
//!
//! # Algorithm
//!
//! - Bucket starts with `burst` tokens
//! - Each admitted request consumes one token
//! - Tokens are replenished at `rate_per_sec`
//! - An empty bucket rejects the request

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum tokens in the bucket (burst capacity).
    burst: u64,

    /// Current tokens available.
    tokens: Mutex<f64>,

    /// Tokens added per second.
    rate_per_sec: f64,

    /// Last time tokens were refilled.
    last_refill: Mutex<Instant>,
}

impl TokenBucket {
    /// Creates a bucket allowing `burst` immediate requests and a
    /// sustained `rate_per_sec` thereafter.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // burst as f64 is acceptable
    pub fn new(burst: u64, rate_per_sec: f64) -> Self {
        Self {
            burst,
            tokens: Mutex::new(burst as f64),
            rate_per_sec,
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// Attempts to consume a token.
    ///
    /// Returns `true` if the request is allowed, `false` if rate limited.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn try_acquire(&self) -> bool {
        self.refill();

        let mut tokens = self.tokens.lock().unwrap();
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Returns the current number of available tokens.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn available(&self) -> f64 {
        self.refill();
        *self.tokens.lock().unwrap()
    }

    /// Returns time until the next token is available.
    ///
    /// Returns `Duration::ZERO` if tokens are currently available.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn time_until_available(&self) -> Duration {
        let current = self.available();
        if current >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - current) / self.rate_per_sec)
        }
    }

    /// Refills tokens based on elapsed time.
    #[allow(clippy::significant_drop_tightening)] // Lock ordering is intentional
    #[allow(clippy::cast_precision_loss)] // burst as f64 is acceptable
    fn refill(&self) {
        let now = Instant::now();

        let mut last_refill = self.last_refill.lock().unwrap();
        let elapsed = now.duration_since(*last_refill);

        if elapsed.as_secs_f64() > 0.0 {
            let mut tokens = self.tokens.lock().unwrap();
            *tokens = (*tokens + elapsed.as_secs_f64() * self.rate_per_sec).min(self.burst as f64);
            *last_refill = now;
        }
    }

    /// Restores the bucket to its initial full state.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::cast_precision_loss)] // burst as f64 is acceptable
    pub fn reset(&self) {
        *self.tokens.lock().unwrap() = self.burst as f64;
        *self.last_refill.lock().unwrap() = Instant::now();
    }
}
