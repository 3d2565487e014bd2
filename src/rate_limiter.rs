//! Token-bucket rate limiter, one per provider

use crate::context::RequestContext;
use crate::error::ProviderError;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Capacity equals the per-minute allowance; tokens refill continuously.
/// A limit of 0 disables limiting.
#[derive(Debug)]
pub struct TokenBucket {
    per_minute: u32,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn per_minute(per_minute: u32) -> Self {
        Self {
            per_minute,
            bucket: Mutex::new(Bucket {
                tokens: per_minute as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill_rate_per_sec(&self) -> f64 {
        self.per_minute as f64 / 60.0
    }

    /// Take one token now, or report how long until one is available.
    fn try_take(&self, now: Instant) -> Result<(), Duration> {
        if self.per_minute == 0 {
            return Ok(());
        }
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * self.refill_rate_per_sec()).min(self.per_minute as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate_per_sec()))
        }
    }

    /// Wait for a token, but never past the request deadline.
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<(), ProviderError> {
        loop {
            let wait = match self.try_take(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            if wait > ctx.remaining() {
                return Err(ProviderError::RateLimited);
            }
            tokio::select! {
                _ = ctx.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    pub fn available_tokens(&self) -> f64 {
        if self.per_minute == 0 {
            return f64::INFINITY;
        }
        let bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = Instant::now()
            .saturating_duration_since(bucket.last_refill)
            .as_secs_f64();
        (bucket.tokens + elapsed * self.refill_rate_per_sec()).min(self.per_minute as f64)
    }
}
