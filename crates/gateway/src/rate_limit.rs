//! RateLimit — a fixed-window limiter keyed by caller and endpoint, gated
//! behind `emulator.rate_limiting_enabled` so local development and test
//! suites can turn it off entirely rather than tuning around it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Window {
    started_at: Instant,
    count: u32,
}

/// `(limit, window)` — at most `limit` requests per `window` per
/// `(client_key, endpoint)` pair.
#[derive(Clone, Copy)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self { limit: 100, window: Duration::from_secs(60) }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self { windows: Arc::new(DashMap::new()), policy }
    }

    /// Checks and records one request for `client_key` against `endpoint`.
    /// Returns `Err(retry_after_secs)` once the window's budget is spent;
    /// a stale window is reset rather than carried forward.
    pub fn check(&self, client_key: &str, endpoint: &str) -> Result<(), u64> {
        let key = format!("{client_key}:{endpoint}");
        let now = Instant::now();

        let mut entry = self.windows.entry(key).or_insert_with(|| Window { started_at: now, count: 0 });

        if now.duration_since(entry.started_at) >= self.policy.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.policy.limit {
            let elapsed = now.duration_since(entry.started_at);
            let retry_after = self.policy.window.saturating_sub(elapsed).as_secs().max(1);
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(RateLimitPolicy { limit: 2, window: Duration::from_secs(60) });
        assert!(limiter.check("caller", "storage.get").is_ok());
        assert!(limiter.check("caller", "storage.get").is_ok());
        assert!(limiter.check("caller", "storage.get").is_err());
    }

    #[test]
    fn tracks_endpoints_independently() {
        let limiter = RateLimiter::new(RateLimitPolicy { limit: 1, window: Duration::from_secs(60) });
        assert!(limiter.check("caller", "storage.get").is_ok());
        assert!(limiter.check("caller", "storage.put").is_ok());
    }
}
