//! Per-client token bucket for spawn admission (§4.C). Generalizes the
//! corpus's token-bucket rate limiter to the single tier this pipeline
//! needs (one bucket per client key — `requestId` namespace or WS
//! `clientId`); no global/per-endpoint tiers are needed here.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use tt_core::config::RateLimitConfig as ConfigRateLimit;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(max_burst: f64) -> Self {
        Self {
            tokens: max_burst,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, tokens_per_second: f64, max_burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * tokens_per_second).min(max_burst);
        self.last_refill = now;
    }

    fn try_consume(&mut self, tokens_per_second: f64, max_burst: f64) -> Result<(), Duration> {
        self.refill(tokens_per_second, max_burst);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / tokens_per_second))
        }
    }
}

pub struct SpawnRateLimiter {
    tokens_per_second: f64,
    max_burst: f64,
    buckets: DashMap<String, TokenBucket>,
}

impl SpawnRateLimiter {
    pub fn new(config: &ConfigRateLimit) -> Self {
        let tokens_per_second = config.spawns_per_window as f64 / config.window_secs.max(1) as f64;
        Self {
            tokens_per_second,
            max_burst: config.burst.max(1.0),
            buckets: DashMap::new(),
        }
    }

    /// `Ok(())` admits the spawn; `Err(retry_after)` rejects it.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.max_burst));
        bucket.try_consume(self.tokens_per_second, self.max_burst)
    }
}
