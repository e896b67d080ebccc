//! Reconnect pacing for a runtime's gateway connection.
//!
//! Delays double from `initial_delay` up to `max_delay`. The jitter is
//! deterministic but derived from the runtime identity, so a fleet of
//! runtimes restarting together (gateway redeploy, host reboot) fans out
//! across the window instead of stampeding the gateway in lockstep.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Ceiling for the doubling schedule.
    pub max_delay: Duration,
    /// Give up after this many consecutive failures; `0` retries forever.
    pub max_attempts: u32,
    /// Identity-derived spread; two runtimes never share a jitter series.
    jitter_seed: u64,
}

impl ReconnectPolicy {
    /// Policy for a runtime serving `agent_id`, with the default schedule
    /// (1 s doubling to 60 s, unlimited attempts).
    pub fn for_runtime(agent_id: &str) -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 0,
            jitter_seed: identity_seed(agent_id),
        }
    }

    /// Delay before the given attempt (0-indexed): doubled base, capped,
    /// plus up to 25% identity-spread jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as u64;
        let cap_ms = self.max_delay.as_millis() as u64;
        let backed_off = base_ms
            .checked_shl(attempt.min(32))
            .unwrap_or(u64::MAX)
            .min(cap_ms);

        let jitter_span = backed_off / 4;
        let jitter = if jitter_span == 0 {
            0
        } else {
            mix(self.jitter_seed, attempt) % (jitter_span + 1)
        };
        Duration::from_millis(backed_off + jitter)
    }

    /// Whether the given attempt number exhausts the retry budget.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

/// FNV-1a over the agent id. Stable across restarts: the same runtime
/// always lands on the same slot of the jitter window.
fn identity_seed(agent_id: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in agent_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Spread the seed per attempt (splitmix64 finalizer). Not cryptographic;
/// just enough to decorrelate consecutive attempts.
fn mix(seed: u64, attempt: u32) -> u64 {
    let mut z = seed.wrapping_add(u64::from(attempt).wrapping_mul(0x9e37_79b9_7f4a_7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let p = ReconnectPolicy::for_runtime("codex");
        assert_eq!(p.initial_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(60));
        assert_eq!(p.max_attempts, 0); // retry forever
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let p = ReconnectPolicy::for_runtime("codex");
        // Compare lower bounds: jitter only ever adds.
        assert!(p.delay_for_attempt(0) >= Duration::from_secs(1));
        assert!(p.delay_for_attempt(1) >= Duration::from_secs(2));
        assert!(p.delay_for_attempt(2) >= Duration::from_secs(4));
        // Far past the cap: never exceeds max_delay + 25% jitter.
        assert!(p.delay_for_attempt(40) <= Duration::from_millis(75_000));
    }

    #[test]
    fn shift_overflow_saturates_at_the_cap() {
        let p = ReconnectPolicy::for_runtime("codex");
        let d = p.delay_for_attempt(u32::MAX);
        assert!(d >= p.max_delay);
        assert!(d <= Duration::from_millis(75_000));
    }

    #[test]
    fn jitter_is_identity_spread() {
        assert_ne!(identity_seed("codex"), identity_seed("claw"));
        let a = ReconnectPolicy::for_runtime("codex");
        let b = ReconnectPolicy::for_runtime("claw");
        // Same schedule, different runtimes: the jitter series diverge
        // somewhere in the first attempts.
        let diverged = (0..16).any(|n| a.delay_for_attempt(n) != b.delay_for_attempt(n));
        assert!(diverged);
        // And the series is stable for one identity.
        assert_eq!(
            a.delay_for_attempt(3),
            ReconnectPolicy::for_runtime("codex").delay_for_attempt(3)
        );
    }

    #[test]
    fn should_give_up_when_limited() {
        let p = ReconnectPolicy {
            max_attempts: 5,
            ..ReconnectPolicy::for_runtime("codex")
        };
        assert!(!p.should_give_up(4));
        assert!(p.should_give_up(5));
        assert!(p.should_give_up(6));
    }

    #[test]
    fn unlimited_never_gives_up() {
        let p = ReconnectPolicy::for_runtime("codex");
        assert!(!p.should_give_up(1_000_000));
    }
}
