// src/rate_limiter.rs
// Token-bucket gate consulted before every outbound engine call

use crate::config::RateLimiterConfig;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with continuous time-based refill, capped at `capacity`.
/// Shared across worker tasks; `acquire` suspends cooperatively until the
/// requested tokens are available.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self::with_rate(config.capacity, config.refill_rate)
    }

    pub fn with_rate(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take `n` tokens, waiting as long as necessary. Requests larger than
    /// the bucket are clamped to `capacity` so they cannot wait forever.
    pub async fn acquire(&self, n: f64) {
        let n = n.min(self.capacity);
        loop {
            let wait_secs = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= n {
                    state.tokens -= n;
                    return;
                }
                (n - state.tokens) / self.refill_rate
            };
            // Lock released while sleeping so other tasks can queue up too
            sleep(Duration::from_secs_f64(wait_secs)).await;
        }
    }

    /// Tokens currently available (after refill).
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }
}
