//! Failsafe mechanisms for the automation surface: retry and rate limiting

mod rate_limiter;
mod retry;

pub use rate_limiter::RateLimiter;
pub use retry::{RetryPolicy, with_retry};

use std::sync::Arc;

use crate::config::FailsafeConfig;

/// Combined failsafe applied around session acquisition
#[derive(Clone)]
pub struct Failsafe {
    /// Rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Retry policy
    pub retry_policy: RetryPolicy,
}

impl Failsafe {
    /// Create a new failsafe from configuration
    #[must_use]
    pub fn new(config: &FailsafeConfig) -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            retry_policy: RetryPolicy::new(&config.retry),
        }
    }

    /// Failsafe that neither waits nor retries
    #[must_use]
    pub fn disabled() -> Self {
        let mut config = FailsafeConfig::default();
        config.retry.enabled = false;
        config.rate_limit.enabled = false;
        Self::new(&config)
    }
}
