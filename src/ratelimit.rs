//! Sliding-window rate limiting.
//!
//! Requests per client address are kept as timestamp-scored members of a
//! sorted set in the cache layer (`rate:<scope>:<address>`). Each check
//! evicts entries older than the sixty-second window, measures the
//! residual count and a five-second burst count, and only then records the
//! new request. The cache layer's in-process fallback makes this work with
//! no remote store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::cache::CacheStore;

const WINDOW_SECS: f64 = 60.0;
const BURST_WINDOW_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub per_minute: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the window frees up.
    pub reset_at: u64,
    pub retry_after_secs: u64,
}

pub struct RateLimiter {
    cache: Arc<CacheStore>,
    scope: String,
    sequence: AtomicU64,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheStore>, scope: impl Into<String>) -> Self {
        Self {
            cache,
            scope: scope.into(),
            sequence: AtomicU64::new(0),
        }
    }

    fn key(&self, address: &str) -> String {
        format!("rate:{}:{}", self.scope, address)
    }

    pub async fn check(&self, address: &str, limits: &RateLimits) -> RateDecision {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        self.check_at(address, limits, now).await
    }

    /// Deterministic entry point: the caller supplies the clock.
    pub async fn check_at(&self, address: &str, limits: &RateLimits, now: f64) -> RateDecision {
        let key = self.key(address);
        let window_start = now - WINDOW_SECS;

        self.cache.zremrangebyscore(&key, 0.0, window_start).await;
        let count = self.cache.zcard(&key).await as u32;
        let burst_count = self
            .cache
            .zrangebyscore(&key, now - BURST_WINDOW_SECS, now)
            .await
            .len() as u32;

        let minute_exceeded = count >= limits.per_minute;
        let burst_exceeded = burst_count >= limits.burst;
        if minute_exceeded || burst_exceeded {
            let reset_at = self.window_reset(&key, window_start, now).await;
            let retry_after_secs = if minute_exceeded {
                reset_at.saturating_sub(now as u64).max(1)
            } else {
                BURST_WINDOW_SECS as u64
            };
            tracing::warn!(
                address,
                scope = %self.scope,
                count,
                burst_count,
                "rate limit exceeded"
            );
            return RateDecision {
                allowed: false,
                limit: limits.per_minute,
                remaining: 0,
                reset_at,
                retry_after_secs,
            };
        }

        let member = format!(
            "{now:.6}:{}",
            self.sequence.fetch_add(1, Ordering::Relaxed)
        );
        self.cache
            .zadd(&key, &member, now, Some(Duration::from_secs(WINDOW_SECS as u64 + 1)))
            .await;

        RateDecision {
            allowed: true,
            limit: limits.per_minute,
            remaining: limits.per_minute.saturating_sub(count + 1),
            reset_at: now as u64 + WINDOW_SECS as u64,
            retry_after_secs: 0,
        }
    }

    /// The window frees up sixty seconds after the oldest retained
    /// request.
    async fn window_reset(&self, key: &str, window_start: f64, now: f64) -> u64 {
        let oldest = self
            .cache
            .zrangebyscore(key, window_start, now)
            .await
            .into_iter()
            .next()
            .and_then(|member| {
                member
                    .split(':')
                    .next()
                    .and_then(|ts| ts.parse::<f64>().ok())
            });
        match oldest {
            Some(ts) => (ts + WINDOW_SECS) as u64,
            None => now as u64 + WINDOW_SECS as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(CacheStore::in_memory(1024)), "export")
    }

    #[tokio::test]
    async fn nth_request_passes_and_next_is_denied() {
        let limiter = limiter();
        let limits = RateLimits {
            per_minute: 5,
            burst: 100,
        };
        // Spaced outside the burst window.
        for i in 0..5 {
            let decision = limiter
                .check_at("1.2.3.4", &limits, 1000.0 + i as f64 * 6.0)
                .await;
            assert!(decision.allowed, "request {i} should pass");
        }
        let denied = limiter.check_at("1.2.3.4", &limits, 1030.0).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        // Resets sixty seconds after the oldest retained request.
        assert_eq!(denied.reset_at, 1060);
    }

    #[tokio::test]
    async fn window_slides_after_oldest_expires() {
        let limiter = limiter();
        let limits = RateLimits {
            per_minute: 2,
            burst: 100,
        };
        assert!(limiter.check_at("a", &limits, 0.0).await.allowed);
        assert!(limiter.check_at("a", &limits, 10.0).await.allowed);
        assert!(!limiter.check_at("a", &limits, 20.0).await.allowed);
        // 61s later the first request has left the window.
        assert!(limiter.check_at("a", &limits, 61.0).await.allowed);
    }

    #[tokio::test]
    async fn burst_window_trips_separately() {
        let limiter = limiter();
        let limits = RateLimits {
            per_minute: 100,
            burst: 3,
        };
        for i in 0..3 {
            assert!(limiter.check_at("b", &limits, 500.0 + i as f64).await.allowed);
        }
        let denied = limiter.check_at("b", &limits, 503.0).await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 5);
        // Outside the burst window the per-minute limit still applies.
        assert!(limiter.check_at("b", &limits, 510.0).await.allowed);
    }

    #[tokio::test]
    async fn addresses_are_isolated() {
        let limiter = limiter();
        let limits = RateLimits {
            per_minute: 1,
            burst: 10,
        };
        assert!(limiter.check_at("x", &limits, 0.0).await.allowed);
        assert!(!limiter.check_at("x", &limits, 1.0).await.allowed);
        assert!(limiter.check_at("y", &limits, 1.0).await.allowed);
    }

    #[tokio::test]
    async fn remaining_counts_down() {
        let limiter = limiter();
        let limits = RateLimits {
            per_minute: 3,
            burst: 100,
        };
        assert_eq!(limiter.check_at("c", &limits, 0.0).await.remaining, 2);
        assert_eq!(limiter.check_at("c", &limits, 6.0).await.remaining, 1);
        assert_eq!(limiter.check_at("c", &limits, 12.0).await.remaining, 0);
    }
}
