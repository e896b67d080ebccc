//! Replay dedup cache keyed on `(event_name, message_id)`.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Default replay window: five minutes.
pub const DEFAULT_REPLAY_WINDOW_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_REPLAY_MAX_KEYS: usize = 5000;

/// TTL-bounded first-sight cache. `check_and_insert` returns `true` exactly
/// once per key within the window; webhook retries and provider redeliveries
/// collapse to a single handled event.
pub struct ReplayCache {
    window_ms: u64,
    max_keys: usize,
    seen: Mutex<HashMap<String, u64>>,
}

impl ReplayCache {
    pub fn new(window_ms: u64, max_keys: usize) -> Self {
        Self {
            window_ms,
            max_keys,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// `true` = first sight (process the event), `false` = replay (drop).
    pub fn check_and_insert(&self, key: &str, now_ms: u64) -> bool {
        let mut seen = self.seen.lock();

        if let Some(&ts) = seen.get(key) {
            if now_ms.saturating_sub(ts) < self.window_ms {
                return false;
            }
        }

        if !seen.contains_key(key) && seen.len() >= self.max_keys {
            let window_ms = self.window_ms;
            seen.retain(|_, ts| now_ms.saturating_sub(*ts) < window_ms);
            if seen.len() >= self.max_keys {
                seen.clear();
            }
        }

        seen.insert(key.to_string(), now_ms);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW_MS, DEFAULT_REPLAY_MAX_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sight_true_then_false() {
        let c = ReplayCache::new(1000, 16);
        assert!(c.check_and_insert("e:m1", 0));
        assert!(!c.check_and_insert("e:m1", 1));
        assert!(!c.check_and_insert("e:m1", 999));
    }

    #[test]
    fn expired_key_is_first_sight_again() {
        let c = ReplayCache::new(1000, 16);
        assert!(c.check_and_insert("e:m1", 0));
        assert!(c.check_and_insert("e:m1", 1000));
    }

    #[test]
    fn capacity_prunes_stale_entries() {
        let c = ReplayCache::new(1000, 2);
        assert!(c.check_and_insert("a", 0));
        assert!(c.check_and_insert("b", 0));
        assert!(c.check_and_insert("c", 2000));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn capacity_clears_when_everything_is_fresh() {
        let c = ReplayCache::new(10_000, 2);
        assert!(c.check_and_insert("a", 0));
        assert!(c.check_and_insert("b", 0));
        assert!(c.check_and_insert("c", 1));
        assert_eq!(c.len(), 1);
    }
}
