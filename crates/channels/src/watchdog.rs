//! Reconnect health tracking for WebSocket-mode monitors.
//!
//! Two layers: a hello-stall tracker that forces a fresh identify after
//! repeated silent reconnects, and a coarse watchdog that force-stops a
//! monitor whose transport never comes back at all.

use parking_lot::Mutex;

pub const HELLO_TIMEOUT_MS: u64 = 30_000;
pub const MAX_CONSECUTIVE_HELLO_STALLS: u32 = 3;
pub const RECONNECT_STALL_TIMEOUT_MS: u64 = 300_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resume state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session resume bookkeeping for a gateway connection. Cleared to force a
/// fresh identify.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeState {
    pub session_id: Option<String>,
    pub resume_gateway_url: Option<String>,
    pub sequence: Option<u64>,
}

impl ResumeState {
    pub fn clear(&mut self) {
        *self = ResumeState::default();
    }

    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hello stall tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Counts consecutive reconnects that never produced a hello. After
/// [`MAX_CONSECUTIVE_HELLO_STALLS`], the caller must clear its
/// [`ResumeState`] and identify from scratch.
#[derive(Debug, Default)]
pub struct HelloStallTracker {
    consecutive_stalls: u32,
}

impl HelloStallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stalled hello. Returns `true` when the stall budget is
    /// exhausted and resume state must be dropped.
    pub fn record_stall(&mut self) -> bool {
        self.consecutive_stalls += 1;
        self.consecutive_stalls >= MAX_CONSECUTIVE_HELLO_STALLS
    }

    /// A hello arrived; the connection is healthy again.
    pub fn record_hello(&mut self) {
        self.consecutive_stalls = 0;
    }

    pub fn stalls(&self) -> u32 {
        self.consecutive_stalls
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconnect watchdog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Armed on every observed disconnect, disarmed on observed connectivity.
/// When the armed deadline passes, the monitor is considered wedged and
/// must be force-stopped.
pub struct ReconnectWatchdog {
    timeout_ms: u64,
    armed_at_ms: Mutex<Option<u64>>,
}

impl ReconnectWatchdog {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            armed_at_ms: Mutex::new(None),
        }
    }

    /// Arm the watchdog (idempotent: the earliest arm time sticks).
    pub fn arm(&self, now_ms: u64) {
        let mut armed = self.armed_at_ms.lock();
        if armed.is_none() {
            *armed = Some(now_ms);
        }
    }

    pub fn disarm(&self) {
        *self.armed_at_ms.lock() = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at_ms.lock().is_some()
    }

    /// Whether the armed deadline has passed.
    pub fn expired(&self, now_ms: u64) -> bool {
        self.armed_at_ms
            .lock()
            .is_some_and(|armed| now_ms.saturating_sub(armed) >= self.timeout_ms)
    }
}

impl Default for ReconnectWatchdog {
    fn default() -> Self {
        Self::new(RECONNECT_STALL_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stall_budget_forces_fresh_identify() {
        let mut tracker = HelloStallTracker::new();
        assert!(!tracker.record_stall());
        assert!(!tracker.record_stall());
        assert!(tracker.record_stall());
    }

    #[test]
    fn hello_resets_stall_count() {
        let mut tracker = HelloStallTracker::new();
        tracker.record_stall();
        tracker.record_stall();
        tracker.record_hello();
        assert_eq!(tracker.stalls(), 0);
        assert!(!tracker.record_stall());
    }

    #[test]
    fn resume_state_clear() {
        let mut state = ResumeState {
            session_id: Some("s1".into()),
            resume_gateway_url: Some("wss://resume".into()),
            sequence: Some(42),
        };
        assert!(state.can_resume());
        state.clear();
        assert!(!state.can_resume());
        assert_eq!(state, ResumeState::default());
    }

    #[test]
    fn watchdog_arm_is_sticky_until_disarm() {
        let dog = ReconnectWatchdog::new(1000);
        dog.arm(0);
        dog.arm(900); // later arm does not extend the deadline
        assert!(!dog.expired(999));
        assert!(dog.expired(1000));
        dog.disarm();
        assert!(!dog.expired(10_000));
        assert!(!dog.is_armed());
    }
}
