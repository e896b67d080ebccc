//! In-memory registry of connected out-of-process agent runtimes.
//!
//! Each connected runtime has a writer sink; `node.invoke`-style RPCs mint
//! a request id, park a oneshot waiter, push the request down the sink, and
//! resolve when the runtime answers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use oc_acp_protocol::{RpcRequest, RpcResponse, WsFrame};
use oc_domain::{Error, Result};

/// Messages the gateway can push to a runtime's WS writer task.
pub type RuntimeSink = mpsc::Sender<WsFrame>;

pub struct ConnectedRuntime {
    pub agent_id: String,
    pub session_key: String,
    pub runtime: String,
    pub version: String,
    pub connected_at: DateTime<Utc>,
    sink: RuntimeSink,
}

/// Summary returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub agent_id: String,
    pub session_key: String,
    pub runtime: String,
    pub version: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RuntimeRegistry {
    runtimes: RwLock<HashMap<String, ConnectedRuntime>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>,
    next_id: AtomicU64,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runtime connection. A newer connection for the same agent
    /// replaces the old one.
    pub fn register(
        &self,
        agent_id: &str,
        session_key: &str,
        runtime: &str,
        version: &str,
        sink: RuntimeSink,
    ) {
        let replaced = self
            .runtimes
            .write()
            .insert(
                agent_id.to_string(),
                ConnectedRuntime {
                    agent_id: agent_id.to_string(),
                    session_key: session_key.to_string(),
                    runtime: runtime.to_string(),
                    version: version.to_string(),
                    connected_at: Utc::now(),
                    sink,
                },
            )
            .is_some();
        if replaced {
            tracing::info!(agent = %agent_id, "runtime reconnected; previous connection replaced");
        }
    }

    /// Remove a runtime, but only if the stored entry still belongs to this
    /// session (a replaced connection must not unregister its successor).
    pub fn unregister(&self, agent_id: &str, session_key: &str) {
        let mut runtimes = self.runtimes.write();
        if runtimes
            .get(agent_id)
            .is_some_and(|r| r.session_key == session_key)
        {
            runtimes.remove(agent_id);
        }
    }

    pub fn list(&self) -> Vec<RuntimeInfo> {
        let mut infos: Vec<RuntimeInfo> = self
            .runtimes
            .read()
            .values()
            .map(|r| RuntimeInfo {
                agent_id: r.agent_id.clone(),
                session_key: r.session_key.clone(),
                runtime: r.runtime.clone(),
                version: r.version.clone(),
                connected_at: r.connected_at,
            })
            .collect();
        infos.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        infos
    }

    pub fn is_connected(&self, agent_id: &str) -> bool {
        self.runtimes.read().contains_key(agent_id)
    }

    /// Invoke a method on a connected runtime and await its response.
    pub async fn invoke(
        &self,
        agent_id: &str,
        method: &str,
        params: serde_json::Value,
        timeout: std::time::Duration,
    ) -> Result<RpcResponse> {
        let sink = self
            .runtimes
            .read()
            .get(agent_id)
            .map(|r| r.sink.clone())
            .ok_or_else(|| Error::ToolInput(format!("no runtime connected for agent `{agent_id}`")))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = WsFrame::Request(RpcRequest {
            id,
            method: method.to_string(),
            params,
        });
        if sink.send(frame).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::Http(format!("runtime `{agent_id}` connection gone")));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => {
                self.pending.lock().remove(&id);
                Err(Error::Http(format!("runtime `{agent_id}` dropped the request")))
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::Timeout(format!(
                    "runtime `{agent_id}` did not answer {method} in time"
                )))
            }
        }
    }

    /// Route a response frame back to its parked waiter. `false` when no
    /// waiter is registered for the id.
    pub fn resolve_response(&self, resp: RpcResponse) -> bool {
        match self.pending.lock().remove(&resp.id) {
            Some(waiter) => waiter.send(resp).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (RuntimeSink, mpsc::Receiver<WsFrame>) {
        mpsc::channel(8)
    }

    #[tokio::test]
    async fn register_list_unregister() {
        let registry = RuntimeRegistry::new();
        let (tx, _rx) = sink();
        registry.register("codex", "agent:codex:acp:a", "acp", "0.1.0", tx);
        assert!(registry.is_connected("codex"));
        assert_eq!(registry.list().len(), 1);

        // A stale session key cannot unregister the live connection.
        registry.unregister("codex", "agent:codex:acp:other");
        assert!(registry.is_connected("codex"));

        registry.unregister("codex", "agent:codex:acp:a");
        assert!(!registry.is_connected("codex"));
    }

    #[tokio::test]
    async fn invoke_round_trip() {
        let registry = std::sync::Arc::new(RuntimeRegistry::new());
        let (tx, mut rx) = sink();
        registry.register("codex", "k", "acp", "0.1.0", tx);

        // Fake runtime: answer the first request.
        let reg = registry.clone();
        tokio::spawn(async move {
            if let Some(WsFrame::Request(req)) = rx.recv().await {
                reg.resolve_response(RpcResponse::ok(
                    req.id,
                    serde_json::json!({"echo": req.method}),
                ));
            }
        });

        let resp = registry
            .invoke(
                "codex",
                "agent.status",
                serde_json::json!({}),
                std::time::Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["echo"], "agent.status");
    }

    #[tokio::test]
    async fn invoke_unknown_agent_fails() {
        let registry = RuntimeRegistry::new();
        let err = registry
            .invoke(
                "ghost",
                "m",
                serde_json::json!({}),
                std::time::Duration::from_millis(10),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no runtime connected"));
    }

    #[tokio::test]
    async fn invoke_times_out_without_answer() {
        let registry = RuntimeRegistry::new();
        let (tx, _rx) = sink();
        registry.register("codex", "k", "acp", "0.1.0", tx);
        let err = registry
            .invoke(
                "codex",
                "m",
                serde_json::json!({}),
                std::time::Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
