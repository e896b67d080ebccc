//! Reference out-of-process agent runtime.
//!
//! Connects to the gateway's ACP WebSocket leg, accepts dispatched turns,
//! and streams back a tool-call line plus an echoed final reply. Useful for
//! end-to-end testing the spawn/bind/dispatch path without an LLM.
//!
//! Usage:
//!   OPENCLAW_GATEWAY_TOKEN=secret oc-echo-runtime ws://127.0.0.1:18789/acp/ws
//!
//! Env vars:
//!   OPENCLAW_GATEWAY_TOKEN — auth token (must match the gateway)
//!   OPENCLAW_AGENT_ID      — agent id to announce (default: "echo")

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use oc_acp_protocol::{AgentEvent, ToolCallStatus};
use oc_acp_sdk::{RuntimeClient, TurnHandler, TurnSink};

struct EchoHandler;

#[async_trait::async_trait]
impl TurnHandler for EchoHandler {
    async fn run_turn(&self, session_key: String, task: String, sink: TurnSink) {
        tracing::info!(session_key = %session_key, "turn received");
        sink.emit(AgentEvent::ToolCall {
            tool_call_id: "echo-1".into(),
            tool_name: "echo".into(),
            status: ToolCallStatus::Completed,
            summary: format!("echoing {} bytes", task.len()),
            allow_edit: true,
        })
        .await;
        sink.emit(AgentEvent::Final {
            text: format!("echo: {task}"),
        })
        .await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let gateway_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:18789/acp/ws".into());
    let agent_id = std::env::var("OPENCLAW_AGENT_ID").unwrap_or_else(|_| "echo".into());

    let mut client = RuntimeClient::new(gateway_url, agent_id);
    client.token = std::env::var("OPENCLAW_GATEWAY_TOKEN").ok();

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c.cancel();
    });

    match client.run(Arc::new(EchoHandler), shutdown).await {
        Err(oc_acp_sdk::RuntimeError::Shutdown) => Ok(()),
        Err(e) => Err(e.into()),
        Ok(()) => Ok(()),
    }
}
