//! Fixed one-minute-window per-IP API rate limiter (§4.F, §5).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

const WINDOW: Duration = Duration::seconds(60);
const CLEANUP_THRESHOLD: usize = 128;
const CLEANUP_IDLE: Duration = Duration::seconds(180);

struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

pub struct ApiRateLimiter {
    limit_per_minute: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl ApiRateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        ApiRateLimiter {
            limit_per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `Ok(())` if `key` has budget left in the current window,
    /// else `Err(60)` — the window is a fixed 60 s, so the retry hint is too.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> Result<(), u64> {
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");

        if windows.len() > CLEANUP_THRESHOLD {
            windows.retain(|_, w| now - w.started_at < CLEANUP_IDLE);
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now - window.started_at >= WINDOW {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= self.limit_per_minute {
            return Err(60);
        }

        window.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let limiter = ApiRateLimiter::new(2);
        let now = Utc::now();
        assert!(limiter.check("1.1.1.1", now).is_ok());
        assert!(limiter.check("1.1.1.1", now).is_ok());
        assert!(limiter.check("1.1.1.1", now).is_err());
    }

    #[test]
    fn window_resets_after_60_seconds() {
        let limiter = ApiRateLimiter::new(1);
        let now = Utc::now();
        assert!(limiter.check("1.1.1.1", now).is_ok());
        assert!(limiter.check("1.1.1.1", now).is_err());
        let later = now + Duration::seconds(61);
        assert!(limiter.check("1.1.1.1", later).is_ok());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = ApiRateLimiter::new(1);
        let now = Utc::now();
        assert!(limiter.check("1.1.1.1", now).is_ok());
        assert!(limiter.check("2.2.2.2", now).is_ok());
    }
}
