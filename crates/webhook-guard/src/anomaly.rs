//! Bounded counters and the shared webhook anomaly tracker.

use std::collections::HashMap;

use axum::http::StatusCode;
use parking_lot::Mutex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bounded counter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    started_ms: u64,
    count: u64,
}

/// A counter table bounded in key count and (optionally) entry age.
pub struct BoundedCounter {
    max_keys: usize,
    ttl_ms: Option<u64>,
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl BoundedCounter {
    pub fn new(max_keys: usize, ttl_ms: Option<u64>) -> Self {
        Self {
            max_keys,
            ttl_ms,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Increment `key` and return the new count.
    pub fn increment(&self, key: &str, now_ms: u64) -> u64 {
        let mut entries = self.entries.lock();

        if let Some(ttl) = self.ttl_ms {
            if !entries.contains_key(key) && entries.len() >= self.max_keys {
                entries.retain(|_, e| now_ms.saturating_sub(e.started_ms) < ttl);
            }
        }
        if !entries.contains_key(key) && entries.len() >= self.max_keys {
            entries.clear();
        }

        let entry = entries.entry(key.to_string()).or_insert(CounterEntry {
            started_ms: now_ms,
            count: 0,
        });
        if let Some(ttl) = self.ttl_ms {
            if now_ms.saturating_sub(entry.started_ms) >= ttl {
                entry.started_ms = now_ms;
                entry.count = 0;
            }
        }
        entry.count += 1;
        entry.count
    }

    pub fn get(&self, key: &str) -> u64 {
        self.entries.lock().get(key).map(|e| e.count).unwrap_or(0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Anomaly tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Status codes worth counting on a webhook path. 2xx/3xx traffic is
/// normal and never tracked.
pub fn is_tracked_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        401 | 403 | 404 | 408 | 413 | 415 | 429
    ) || status.is_server_error()
}

/// Per-endpoint anomaly counter. Counts never block the next request; they
/// log a summary line every `log_every` increments so a misbehaving caller
/// is visible without flooding the log.
pub struct AnomalyTracker {
    counter: BoundedCounter,
    log_every: u64,
}

impl AnomalyTracker {
    pub fn new(max_keys: usize, ttl_ms: Option<u64>, log_every: u64) -> Self {
        Self {
            counter: BoundedCounter::new(max_keys, ttl_ms),
            log_every: log_every.max(1),
        }
    }

    /// Record a response status for `key`. `message_fn` renders the cadence
    /// log line given the running count.
    pub fn record<F>(&self, key: &str, status: StatusCode, now_ms: u64, message_fn: F)
    where
        F: FnOnce(u64) -> String,
    {
        if !is_tracked_status(status) {
            return;
        }
        let count = self.counter.increment(key, now_ms);
        if count % self.log_every == 0 {
            tracing::warn!(key = %key, status = status.as_u16(), "{}", message_fn(count));
        }
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counter.get(key)
    }
}

impl Default for AnomalyTracker {
    fn default() -> Self {
        Self::new(4096, Some(6 * 60 * 60 * 1000), 25)
    }
}
