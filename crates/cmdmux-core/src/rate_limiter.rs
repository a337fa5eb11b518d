//! Token-bucket rate limiting for command dispatch.
//!
//! The bucket starts full (`capacity = rate`, at least one token) and refills
//! continuously at `rate` tokens per second. `acquire()` never fails: when
//! the bucket is empty the caller reserves the next token and sleeps until it
//! has been paid back. Time comes from tokio's monotonic clock, so paused-clock
//! tests drive it deterministically.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    /// May go negative while callers hold reservations.
    tokens: f64,
    last_refill: Instant,
}

/// Shared rate limiter state (clone-friendly via Arc).
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Tokens per second; `None` means unthrottled.
    rate: Option<f64>,
    capacity: f64,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Create a limiter granting `rate` operations per second.
    ///
    /// A non-finite or non-positive rate disables throttling.
    pub fn new(rate: f64) -> Self {
        let rate = (rate.is_finite() && rate > 0.0).then_some(rate);
        let capacity = rate.map(|r| r.max(1.0)).unwrap_or(f64::INFINITY);
        Self {
            rate,
            capacity,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
        }
    }

    /// A limiter that never delays
    pub fn unlimited() -> Self {
        Self::new(f64::INFINITY)
    }

    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Maximum burst size
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Wait until a token is available and consume it.
    pub async fn acquire(&self) {
        let Some(rate) = self.rate else {
            return;
        };

        let wait = {
            let mut bucket = self.bucket.lock();
            self.refill(&mut bucket, rate);
            bucket.tokens -= 1.0;
            if bucket.tokens >= 0.0 {
                None
            } else {
                Some(Duration::from_secs_f64(-bucket.tokens / rate))
            }
        };

        if let Some(wait) = wait {
            trace!(wait_ms = wait.as_millis() as u64, "[RateLimiter] Waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let Some(rate) = self.rate else {
            return true;
        };

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, rate);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Give back a token taken by `acquire()` that went unused.
    pub fn release(&self) {
        let Some(rate) = self.rate else {
            return;
        };

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, rate);
        bucket.tokens = (bucket.tokens + 1.0).min(self.capacity);
    }

    /// Tokens currently available (after refill), never negative.
    pub fn available_tokens(&self) -> f64 {
        let Some(rate) = self.rate else {
            return f64::INFINITY;
        };

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, rate);
        bucket.tokens.max(0.0)
    }

    fn refill(&self, bucket: &mut Bucket, rate: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rate).min(self.capacity);
        bucket.last_refill = now;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
