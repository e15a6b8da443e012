//! Token bucket for live-preview throttling
//!
//! Excess requests are refused immediately, never queued.

use crate::config::LivePreviewConfig;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Token bucket rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    tokens_per_second: f64,
    max_tokens: f64,
}

impl RateLimiter {
    /// Bucket refilling at `tokens_per_second`, holding at most `burst` tokens
    pub fn new(tokens_per_second: f64, burst: u32) -> Self {
        let max_tokens = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                last_update: Instant::now(),
            }),
            tokens_per_second,
            max_tokens,
        }
    }

    pub fn from_config(config: &LivePreviewConfig) -> Self {
        Self::new(config.rate_per_sec, config.burst)
    }

    /// Take a token if one is available
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();

        bucket.tokens = elapsed
            .mul_add(self.tokens_per_second, bucket.tokens)
            .min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
