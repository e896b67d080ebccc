//! WebSocket envelope for out-of-process agent runtimes.
//!
//! Runtimes connect to the gateway, introduce themselves, and then exchange
//! RPC frames and pushed agent events over the same socket.

use serde::{Deserialize, Serialize};

use crate::events::AgentEvent;
use crate::rpc::{RpcRequest, RpcResponse};

/// Max pushed event payload size in bytes (4 MB). Runtimes should truncate
/// larger results before sending.
pub const MAX_EVENT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsFrame {
    /// Runtime → Gateway: initial handshake.
    RuntimeHello {
        agent_id: String,
        runtime: String,
        version: String,
    },

    /// Gateway → Runtime: handshake accepted.
    GatewayWelcome {
        session_key: String,
        gateway_version: String,
    },

    /// Either direction: an RPC call.
    Request(RpcRequest),

    /// Either direction: an RPC result.
    Response(RpcResponse),

    /// Runtime → Gateway: a pushed agent event for an active turn.
    Event {
        session_key: String,
        event: AgentEvent,
    },

    /// Bidirectional heartbeat.
    Ping { timestamp: i64 },
    Pong { timestamp: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips() {
        let frame = WsFrame::RuntimeHello {
            agent_id: "codex".into(),
            runtime: "acp".into(),
            version: "0.1.0".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"runtime_hello\""));
        let back: WsFrame = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, WsFrame::RuntimeHello { .. }));
    }

    #[test]
    fn event_frame_nests_agent_event() {
        let frame = WsFrame::Event {
            session_key: "agent:codex:acp:x".into(),
            event: AgentEvent::Final { text: "done".into() },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"]["type"], "final");
    }
}
