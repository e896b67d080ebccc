//! Fixed-window rate limiter shared across webhook endpoints.

use std::collections::HashMap;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub window_ms: u64,
    pub max_requests: u32,
    pub max_tracked_keys: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 120,
            max_tracked_keys: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    window_start_ms: u64,
    count: u32,
}

/// Admits at most `max_requests` per `window_ms` per key. Tracked keys are
/// capped; pruning drops stale windows first, and if the table is still
/// full it is cleared entirely rather than letting one hot path starve
/// admission for everyone else.
pub struct FixedWindowRateLimiter {
    config: RateLimiterConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key` and report whether it exceeds the
    /// window budget.
    pub fn is_limited(&self, key: &str, now_ms: u64) -> bool {
        let mut windows = self.windows.lock();

        if !windows.contains_key(key) && windows.len() >= self.config.max_tracked_keys {
            let window_ms = self.config.window_ms;
            windows.retain(|_, w| now_ms.saturating_sub(w.window_start_ms) < window_ms);
            if windows.len() >= self.config.max_tracked_keys {
                tracing::warn!(
                    tracked = windows.len(),
                    "rate limiter key table full after prune; clearing"
                );
                windows.clear();
            }
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            window_start_ms: now_ms,
            count: 0,
        });

        if now_ms.saturating_sub(window.window_start_ms) >= self.config.window_ms {
            window.window_start_ms = now_ms;
            window.count = 0;
        }

        window.count = window.count.saturating_add(1);
        window.count > self.config.max_requests
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
