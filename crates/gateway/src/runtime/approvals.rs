//! Exec approval coordinator — the two-phase register/wait protocol.
//!
//! Phase 1 registers the approval server-side and returns `{id, expiry}`
//! (possibly with a final decision when auto-rules applied). Phase 2 waits
//! for a human decision. Registration completes before the agent ever
//! reports "approval-pending"; otherwise an out-of-band `/approve` races an
//! orphan id. A missing or expired approval is the typed `None` decision,
//! never an exception for control flow.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use oc_acp_protocol::{
    ApprovalRegistration, ApprovalRequest, DEFAULT_APPROVAL_TIMEOUT_MS,
};
use oc_domain::{Error, Result};

struct ApprovalEntry {
    request: ApprovalRequest,
    expires_at_ms: i64,
    decision: Option<String>,
    waiters: Vec<oneshot::Sender<Option<String>>>,
}

pub struct ApprovalCoordinator {
    entries: Mutex<HashMap<String, ApprovalEntry>>,
    default_timeout_ms: u64,
}

impl ApprovalCoordinator {
    pub fn new(default_timeout_ms: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_timeout_ms,
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Auto-decision rules applied at registration. An ask mode of `"off"`
    /// short-circuits to approval; everything else waits for a human.
    fn auto_decision(request: &ApprovalRequest) -> Option<String> {
        match request.ask.as_deref() {
            Some("off") | Some("never") => Some("approved".to_string()),
            _ => None,
        }
    }

    /// Phase 1. Idempotent per id: re-registering returns the original
    /// registration (and its decision, if one landed in the meantime).
    pub fn register(&self, request: ApprovalRequest) -> ApprovalRegistration {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(&request.id) {
            return ApprovalRegistration {
                id: request.id,
                expires_at_ms: entry.expires_at_ms,
                decision: entry.decision.clone(),
            };
        }

        let timeout_ms = request.timeout_ms.unwrap_or(self.default_timeout_ms);
        let expires_at_ms = Self::now_ms() + timeout_ms as i64;
        let decision = Self::auto_decision(&request);

        tracing::info!(
            id = %request.id,
            command = %request.command,
            auto = decision.is_some(),
            "exec approval registered"
        );

        let registration = ApprovalRegistration {
            id: request.id.clone(),
            expires_at_ms,
            decision: decision.clone(),
        };
        entries.insert(
            request.id.clone(),
            ApprovalEntry {
                request,
                expires_at_ms,
                decision,
                waiters: Vec::new(),
            },
        );
        registration
    }

    /// Resolve an approval with a domain decision string ("approved",
    /// "denied", operator-defined values). Wakes all waiters. `false` when
    /// the id is unknown.
    pub fn resolve(&self, id: &str, decision: impl Into<String>) -> bool {
        let decision = decision.into();
        let mut entries = self.entries.lock();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.decision = Some(decision.clone());
                for waiter in entry.waiters.drain(..) {
                    let _ = waiter.send(Some(decision.clone()));
                }
                true
            }
            None => false,
        }
    }

    /// Phase 2. Resolves with the decision, or fails with
    /// "approval expired or not found" — which callers map to `None`
    /// (ask-fallback applies).
    pub async fn wait_decision(&self, id: &str) -> Result<String> {
        let rx = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| Error::ToolInput("approval expired or not found".into()))?;

            if let Some(decision) = &entry.decision {
                let decision = decision.clone();
                entries.remove(id);
                return Ok(decision);
            }
            if entry.expires_at_ms <= Self::now_ms() {
                entries.remove(id);
                return Err(Error::ToolInput("approval expired or not found".into()));
            }

            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            rx
        };

        let remaining = {
            let entries = self.entries.lock();
            entries
                .get(id)
                .map(|e| (e.expires_at_ms - Self::now_ms()).max(0) as u64)
                .unwrap_or(0)
        };

        let decision = tokio::time::timeout(std::time::Duration::from_millis(remaining), rx).await;
        match decision {
            Ok(Ok(Some(decision))) => {
                self.entries.lock().remove(id);
                Ok(decision)
            }
            Ok(Ok(None)) | Ok(Err(_)) | Err(_) => {
                self.entries.lock().remove(id);
                Err(Error::ToolInput("approval expired or not found".into()))
            }
        }
    }

    /// Remove expired entries, failing their waiters with the null
    /// decision.
    pub fn sweep(&self) {
        let now = Self::now_ms();
        let mut entries = self.entries.lock();
        entries.retain(|id, entry| {
            if entry.expires_at_ms <= now && entry.decision.is_none() {
                tracing::debug!(id = %id, "approval expired");
                for waiter in entry.waiters.drain(..) {
                    let _ = waiter.send(None);
                }
                false
            } else {
                true
            }
        });
    }

    /// Drop approvals belonging to a cancelled run.
    pub fn cancel_session(&self, session_key: &str) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| {
            let belongs = entry.request.session_key.as_deref() == Some(session_key);
            if belongs {
                for waiter in entry.waiters.drain(..) {
                    let _ = waiter.send(None);
                }
            }
            !belongs
        });
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.decision.is_none())
            .map(|e| e.request.clone())
            .collect()
    }
}

impl Default for ApprovalCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVAL_TIMEOUT_MS)
    }
}

/// Agent-side helper: map the wait outcome to the typed decision, where
/// "expired or not found" is `None` and the ask fallback applies.
pub async fn wait_decision_or_null(
    coordinator: &ApprovalCoordinator,
    id: &str,
) -> Result<Option<String>> {
    match coordinator.wait_decision(id).await {
        Ok(decision) => Ok(Some(decision)),
        Err(Error::ToolInput(msg)) if msg.contains("approval expired or not found") => Ok(None),
        Err(e) => Err(Error::Other(format!(
            "Exec approval registration failed: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: id.into(),
            command: "rm -rf target".into(),
            command_argv: None,
            env: None,
            cwd: "/work".into(),
            node_id: None,
            host: Default::default(),
            security: None,
            ask: Some("always".into()),
            agent_id: Some("claw".into()),
            resolved_path: None,
            session_key: Some("agent:claw:main".into()),
            turn_source: None,
            timeout_ms: Some(5_000),
            two_phase: true,
        }
    }

    #[test]
    fn register_is_idempotent() {
        let c = ApprovalCoordinator::default();
        let first = c.register(request("ap1"));
        let second = c.register(request("ap1"));
        assert_eq!(first.expires_at_ms, second.expires_at_ms);
        assert!(second.decision.is_none());
    }

    #[test]
    fn reregistering_surfaces_landed_decision() {
        let c = ApprovalCoordinator::default();
        c.register(request("ap1"));
        assert!(c.resolve("ap1", "approved"));
        let again = c.register(request("ap1"));
        assert_eq!(again.decision.as_deref(), Some("approved"));
    }

    #[test]
    fn auto_approves_ask_off() {
        let c = ApprovalCoordinator::default();
        let mut req = request("ap2");
        req.ask = Some("off".into());
        let reg = c.register(req);
        assert_eq!(reg.decision.as_deref(), Some("approved"));
    }

    #[tokio::test]
    async fn wait_resolves_on_decision() {
        let c = std::sync::Arc::new(ApprovalCoordinator::default());
        c.register(request("ap3"));

        let waiter = {
            let c = c.clone();
            tokio::spawn(async move { c.wait_decision("ap3").await })
        };
        tokio::task::yield_now().await;
        assert!(c.resolve("ap3", "denied"));
        assert_eq!(waiter.await.unwrap().unwrap(), "denied");
    }

    #[tokio::test]
    async fn missing_id_maps_to_null_decision() {
        let c = ApprovalCoordinator::default();
        let decision = wait_decision_or_null(&c, "ghost").await.unwrap();
        assert!(decision.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_null_decision() {
        let c = ApprovalCoordinator::default();
        let mut req = request("ap4");
        req.timeout_ms = Some(0);
        c.register(req);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let decision = wait_decision_or_null(&c, "ap4").await.unwrap();
        assert!(decision.is_none());
    }

    #[test]
    fn sweep_fails_waiters_with_null() {
        let c = ApprovalCoordinator::default();
        let mut req = request("ap5");
        req.timeout_ms = Some(0);
        c.register(req);
        std::thread::sleep(std::time::Duration::from_millis(5));
        c.sweep();
        assert!(c.pending().is_empty());
    }

    #[test]
    fn cancel_session_drops_its_approvals() {
        let c = ApprovalCoordinator::default();
        c.register(request("ap6"));
        let mut other = request("ap7");
        other.session_key = Some("agent:other:main".into());
        c.register(other);

        c.cancel_session("agent:claw:main");
        let pending = c.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "ap7");
    }
}
