//! Per-tool token buckets.

use rago_core::tool::RateLimit;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    /// Starts full.
    pub fn new(limit: RateLimit) -> Self {
        let capacity = f64::from(limit.capacity);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: limit.refill_per_sec,
            last: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last = now;
    }

    /// Take one token, or report how long until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        let wait = if self.refill_per_sec > 0.0 {
            missing / self.refill_per_sec
        } else {
            f64::from(u32::MAX)
        };
        Err(Duration::from_secs_f64(wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn exhausts_then_refills() {
        let mut bucket = TokenBucket::new(RateLimit {
            capacity: 2,
            refill_per_sec: 1.0,
        });
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());

        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(1));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_capacity() {
        let mut bucket = TokenBucket::new(RateLimit {
            capacity: 1,
            refill_per_sec: 10.0,
        });
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }
}
