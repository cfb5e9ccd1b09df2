//! Sliding-window rate limiting over the persisted store.
//!
//! The store performs the increment-or-reset atomically, so this layer only
//! interprets the returned count. Store failures fail open with a synthetic
//! single-hit result.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::error;

use crate::store::GuardStore;

/// Outcome of counting one request against a window.
#[derive(Debug, Clone, Copy)]
pub struct RateCheck {
    pub total_hits: i64,
    pub limit: i64,
    pub exceeded: bool,
    pub reset_time: DateTime<Utc>,
}

impl RateCheck {
    /// Seconds until the window resets, rounded up, never below zero.
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.reset_time - now).num_milliseconds().max(0);
        (millis + 999) / 1000
    }
}

pub struct RateLimiter {
    store: Arc<dyn GuardStore>,
    window_ms: i64,
    max_requests: i64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn GuardStore>, window_ms: i64, max_requests: i64) -> Self {
        Self {
            store,
            window_ms,
            max_requests,
        }
    }

    /// Count one request for (ip, endpoint) and report whether the limit is
    /// now exceeded. A store error is logged and reported as a fresh window
    /// so the request proceeds.
    pub async fn increment(&self, ip: &str, endpoint: &str) -> RateCheck {
        match self
            .store
            .upsert_rate_window(ip, endpoint, self.window_ms)
            .await
        {
            Ok(update) => RateCheck {
                total_hits: update.total_hits,
                limit: self.max_requests,
                exceeded: update.total_hits > self.max_requests,
                reset_time: update.reset_time,
            },
            Err(err) => {
                error!(ip = %ip, endpoint = %endpoint, error = %err, "rate window update failed, failing open");
                RateCheck {
                    total_hits: 1,
                    limit: self.max_requests,
                    exceeded: false,
                    reset_time: Utc::now() + Duration::milliseconds(self.window_ms),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn exceeds_only_past_the_limit() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store, 60_000, 3);

        for expected in 1..=3 {
            let check = limiter.increment("203.0.113.7", "/api/contact").await;
            assert_eq!(check.total_hits, expected);
            assert!(!check.exceeded);
        }

        let fourth = limiter.increment("203.0.113.7", "/api/contact").await;
        assert_eq!(fourth.total_hits, 4);
        assert!(fourth.exceeded);
        assert!(fourth.retry_after_seconds(Utc::now()) > 0);
    }

    #[tokio::test]
    async fn windows_are_keyed_per_ip_and_endpoint() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store, 60_000, 3);

        limiter.increment("203.0.113.7", "/api/contact").await;
        let other_ip = limiter.increment("198.51.100.2", "/api/contact").await;
        assert_eq!(other_ip.total_hits, 1);

        let other_endpoint = limiter.increment("203.0.113.7", "global").await;
        assert_eq!(other_endpoint.total_hits, 1);
    }

    #[test]
    fn retry_after_rounds_up_and_clamps_at_zero() {
        let now = Utc::now();
        let check = RateCheck {
            total_hits: 4,
            limit: 3,
            exceeded: true,
            reset_time: now + Duration::milliseconds(1_500),
        };
        assert_eq!(check.retry_after_seconds(now), 2);

        let past = RateCheck {
            reset_time: now - Duration::seconds(5),
            ..check
        };
        assert_eq!(past.retry_after_seconds(now), 0);
    }
}
