//! Sliding-window limiter for login attempts

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Failed-or-not, every attempt inside the window counts.
pub struct LoginRateLimiter {
    attempts: DashMap<String, Vec<u64>>,
    window_seconds: u64,
    max_attempts: u32,
    last_cleanup: AtomicU64,
}

impl LoginRateLimiter {
    pub fn new(window_seconds: u64, max_attempts: u32) -> Self {
        Self {
            attempts: DashMap::new(),
            window_seconds,
            max_attempts,
            last_cleanup: AtomicU64::new(0),
        }
    }

    /// Check whether another attempt for `key` is allowed and record it
    pub fn check_and_record(&self, key: &str) -> bool {
        self.check_at(key, now_secs())
    }

    fn check_at(&self, key: &str, now: u64) -> bool {
        // Must run before the entry guard is taken: retain locks every shard
        self.cleanup_at(now);

        let cutoff = now.saturating_sub(self.window_seconds);
        let mut entry = self.attempts.entry(key.to_lowercase()).or_default();

        entry.retain(|&ts| ts > cutoff);
        if entry.len() >= self.max_attempts as usize {
            return false;
        }

        entry.push(now);
        true
    }

    /// Drop keys with no attempts left in the window, at most once per window
    fn cleanup_at(&self, now: u64) {
        let last = self.last_cleanup.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.window_seconds {
            return;
        }
        if self
            .last_cleanup
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let cutoff = now.saturating_sub(self.window_seconds);
        self.attempts.retain(|_, attempts| {
            attempts.retain(|&ts| ts > cutoff);
            !attempts.is_empty()
        });
    }

    /// Forget attempts for `key` (after a successful sign-in)
    pub fn reset(&self, key: &str) {
        self.attempts.remove(&key.to_lowercase());
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
