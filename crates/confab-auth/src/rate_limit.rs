//! Sliding-window rate limiter.
//!
//! Buckets are keyed by client host, or host+path when per-path limiting is
//! enabled. Each bucket holds `(window_start, count)`; an expired window
//! resets atomically under the bucket map lock. The limiter is advisory for
//! WebSocket connects (checked once on upgrade) and per-request for REST.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::AuthError;

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, (Instant, u32)>>,
    max_requests: u32,
    window: Duration,
    per_path: bool,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, per_path: bool) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_requests,
            window,
            per_path,
        }
    }

    /// Record a request and decide whether it is allowed.
    pub fn check(&self, host: &str, path: &str) -> Result<(), AuthError> {
        let key = if self.per_path && !path.is_empty() {
            format!("{host}:{path}")
        } else {
            host.to_string()
        };

        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            // A poisoned lock means a panic elsewhere; fail open like the
            // rest of the limiter's error handling.
            Err(poisoned) => {
                warn!("rate-limit bucket lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };

        match buckets.get_mut(&key) {
            Some((window_start, count)) => {
                let elapsed = now.duration_since(*window_start);
                if elapsed > self.window {
                    *window_start = now;
                    *count = 1;
                    Ok(())
                } else if *count >= self.max_requests {
                    let retry_after = self.window.saturating_sub(elapsed).as_secs() + 1;
                    Err(AuthError::RateLimited { retry_after })
                } else {
                    *count += 1;
                    Ok(())
                }
            }
            None => {
                buckets.insert(key, (now, 1));
                Ok(())
            }
        }
    }

    /// Drop all buckets. Used by config reload.
    pub fn reset(&self) {
        match self.buckets.lock() {
            Ok(mut buckets) => buckets.clear(),
            Err(poisoned) => {
                warn!("rate-limit bucket lock was poisoned, recovering");
                poisoned.into_inner().clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_after_limit_with_retry_hint() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60), false);
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1", "/ws").is_ok());
        }
        match limiter.check("10.0.0.1", "/ws") {
            Err(AuthError::RateLimited { retry_after }) => assert!(retry_after >= 1),
            other => panic!("expected rate limited, got {other:?}"),
        }
        // A different host is unaffected.
        assert!(limiter.check("10.0.0.2", "/ws").is_ok());
    }

    #[test]
    fn counter_is_monotonic_within_window() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60), false);
        let mut last = 0;
        for _ in 0..10 {
            limiter.check("h", "").unwrap();
            let buckets = limiter.buckets.lock().unwrap();
            let (_, count) = buckets["h"];
            assert!(count > last);
            last = count;
        }
    }

    #[test]
    fn window_expiry_resets_count() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10), false);
        assert!(limiter.check("h", "").is_ok());
        assert!(limiter.check("h", "").is_err());
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check("h", "").is_ok());
    }

    #[test]
    fn per_path_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), true);
        assert!(limiter.check("h", "/a").is_ok());
        assert!(limiter.check("h", "/b").is_ok());
        assert!(limiter.check("h", "/a").is_err());
    }
}
