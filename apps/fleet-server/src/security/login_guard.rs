//! Login brute-force guard, independent of the generic API limiter (§4.F).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

const BLOCK_DURATION: Duration = Duration::seconds(60);
const WINDOW: Duration = Duration::seconds(60);
const CLEANUP_THRESHOLD: usize = 128;
const CLEANUP_IDLE: Duration = Duration::seconds(180);

struct Entry {
    consecutive_failures: u32,
    blocked_till: Option<DateTime<Utc>>,
    window_started_at: DateTime<Utc>,
    window_count: u32,
    last_seen: DateTime<Utc>,
}

pub struct LoginGuard {
    burst: u32,
    rate_per_minute: u32,
    entries: Mutex<HashMap<String, Entry>>,
}

impl LoginGuard {
    pub fn new(burst: u32, rate_per_minute: u32) -> Self {
        LoginGuard {
            burst,
            rate_per_minute,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `Err(retry_after_secs)` if `key` is currently blocked or has
    /// exhausted `login_rate_per_minute` for the current window. Counts this
    /// attempt against the window when allowed.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> Result<(), u64> {
        let mut entries = self.entries.lock().expect("login guard lock poisoned");

        if entries.len() > CLEANUP_THRESHOLD {
            entries.retain(|_, e| now - e.last_seen < CLEANUP_IDLE);
        }

        let entry = entries.entry(key.to_string()).or_insert(Entry {
            consecutive_failures: 0,
            blocked_till: None,
            window_started_at: now,
            window_count: 0,
            last_seen: now,
        });
        entry.last_seen = now;

        if let Some(blocked_till) = entry.blocked_till {
            if now < blocked_till {
                return Err((blocked_till - now).num_seconds().max(0) as u64);
            }
        }

        if now - entry.window_started_at >= WINDOW {
            entry.window_started_at = now;
            entry.window_count = 0;
        }

        if entry.window_count >= self.rate_per_minute {
            let retry_after = WINDOW - (now - entry.window_started_at);
            return Err(retry_after.num_seconds().max(0) as u64);
        }

        entry.window_count += 1;
        Ok(())
    }

    pub fn record_failure(&self, key: &str, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().expect("login guard lock poisoned");
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            consecutive_failures: 0,
            blocked_till: None,
            window_started_at: now,
            window_count: 0,
            last_seen: now,
        });
        entry.last_seen = now;
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.burst {
            entry.blocked_till = Some(now + BLOCK_DURATION);
            entry.consecutive_failures = 0;
        }
    }

    pub fn record_success(&self, key: &str, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().expect("login guard lock poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.consecutive_failures = 0;
            entry.blocked_till = None;
            entry.last_seen = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_burst_consecutive_failures() {
        let guard = LoginGuard::new(5, 100);
        let now = Utc::now();
        for _ in 0..5 {
            assert!(guard.check("1.1.1.1", now).is_ok());
            guard.record_failure("1.1.1.1", now);
        }
        assert!(guard.check("1.1.1.1", now).is_err());
    }

    #[test]
    fn unblocks_after_60_seconds() {
        let guard = LoginGuard::new(1, 100);
        let now = Utc::now();
        guard.record_failure("1.1.1.1", now);
        assert!(guard.check("1.1.1.1", now).is_err());
        let later = now + Duration::seconds(61);
        assert!(guard.check("1.1.1.1", later).is_ok());
    }

    #[test]
    fn success_clears_failure_count() {
        let guard = LoginGuard::new(2, 100);
        let now = Utc::now();
        guard.record_failure("1.1.1.1", now);
        guard.record_success("1.1.1.1", now);
        guard.record_failure("1.1.1.1", now);
        assert!(guard.check("1.1.1.1", now).is_ok());
    }

    #[test]
    fn rate_limit_blocks_independent_of_burst() {
        let guard = LoginGuard::new(100, 2);
        let now = Utc::now();
        assert!(guard.check("1.1.1.1", now).is_ok());
        assert!(guard.check("1.1.1.1", now).is_ok());
        assert!(guard.check("1.1.1.1", now).is_err());
        let later = now + Duration::seconds(61);
        assert!(guard.check("1.1.1.1", later).is_ok());
    }
}
