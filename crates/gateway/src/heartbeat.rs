//! Gateway heartbeat: a timestamp the RPC surface reports for liveness.

use std::sync::atomic::{AtomicI64, Ordering};

pub struct Heartbeat {
    last_beat_ms: AtomicI64,
}

impl Heartbeat {
    pub fn new() -> Self {
        let hb = Self {
            last_beat_ms: AtomicI64::new(0),
        };
        hb.beat();
        hb
    }

    pub fn beat(&self) {
        self.last_beat_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_beat_ms(&self) -> i64 {
        self.last_beat_ms.load(Ordering::Relaxed)
    }

    pub fn age_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.last_beat_ms()
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beat_updates_timestamp() {
        let hb = Heartbeat::new();
        let first = hb.last_beat_ms();
        assert!(first > 0);
        hb.beat();
        assert!(hb.last_beat_ms() >= first);
        assert!(hb.age_ms() >= 0);
    }
}
