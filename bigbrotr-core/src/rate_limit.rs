//! Token-bucket rate limiting for inbound event volume per relay.

use std::time::{Duration, Instant};

/// A single-threaded token bucket. One instance per relay task; relay tasks
/// are never shared across threads, so no internal locking is needed.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// `rate` is the sustained tokens/sec; the bucket also allows a burst up
    /// to `rate` tokens.
    pub fn new(rate_per_sec: u32) -> Self {
        let capacity = rate_per_sec as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Attempt to consume `n` tokens. Returns `true` if allowed.
    pub fn try_consume(&mut self, n: u32) -> bool {
        self.refill();
        let n = n as f64;
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Time to wait until `n` tokens would be available, for callers that
    /// want to throttle instead of drop.
    pub fn wait_time(&mut self, n: u32) -> Duration {
        self.refill();
        let n = n as f64;
        if self.tokens >= n {
            Duration::ZERO
        } else {
            let deficit = n - self.tokens;
            Duration::from_secs_f64(deficit / self.refill_per_sec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_up_to_capacity() {
        let mut bucket = TokenBucket::new(1000);
        for _ in 0..1000 {
            assert!(bucket.try_consume(1));
        }
        assert!(!bucket.try_consume(1));
    }

    #[test]
    fn refills_over_time() {
        let mut bucket = TokenBucket::new(1000);
        assert!(bucket.try_consume(1000));
        assert!(!bucket.try_consume(1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(bucket.try_consume(1));
    }
}
