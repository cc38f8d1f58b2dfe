//! Token-bucket rate limiter with an async acquire.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Tokens accrue at `refill_rate` per second up to `capacity`; each
/// request consumes one token. `acquire` suspends until a token is
/// available, which is the executor's rate-gating suspension point.
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// A limiter allowing `per_second` requests per second, with a burst
    /// capacity of one second's worth of tokens.
    pub fn per_second(per_second: u64) -> Self {
        let rate = per_second.max(1) as f64;
        Self {
            capacity: rate,
            refill_rate: rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().expect("rate limiter state");
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }

    /// Waits until one token is available and consumes it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}
