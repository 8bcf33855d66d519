//! Rate limiting implementation

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorLimiter};

use crate::config::RateLimitConfig;

/// Rate limiter for automation session opens
pub struct RateLimiter {
    /// Whether rate limiting is enabled
    enabled: AtomicBool,
    inner: DefaultDirectRateLimiter,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            enabled: AtomicBool::new(config.enabled),
            inner: GovernorLimiter::direct(quota),
        }
    }

    /// Try to acquire a permit without waiting
    pub fn try_acquire(&self) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return true;
        }
        self.inner.check().is_ok()
    }

    /// Wait until a permit is available
    pub async fn acquire(&self) {
        if self.enabled.load(Ordering::Relaxed) {
            self.inner.until_ready().await;
        }
    }

    /// Enable or disable rate limiting
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst_size: 2,
        });
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        limiter.set_enabled(false);
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_when_disabled_returns_immediately() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            requests_per_second: 1,
            burst_size: 1,
        });
        for _ in 0..10 {
            limiter.acquire().await;
        }
    }
}
