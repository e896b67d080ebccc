//! WebSocket leg for out-of-process agent runtimes.
//!
//! A runtime connects to `GET /acp/ws?token=…&agent=…`, sends a
//! `runtime_hello`, and receives a `gateway_welcome` carrying a freshly
//! minted ACP session key. The connection then registers in the runtime
//! registry so `node.invoke` can push requests at it; pushed agent events
//! and heartbeats are handled in the reader loop. The endpoint
//! self-authenticates via the token query parameter, so it lives outside
//! the bearer-auth router layer.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use oc_acp_protocol::WsFrame;
use oc_sessions::{session_key, SessionScope};

use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    agent: Option<String>,
}

pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(expected) = &state.auth_token_hash {
        let provided = query.token.as_deref().unwrap_or("");
        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(expected.as_slice())) {
            return (StatusCode::UNAUTHORIZED, "invalid token\n").into_response();
        }
    }
    let agent_hint = query.agent.clone();
    ws.on_upgrade(move |socket| serve_runtime(state, socket, agent_hint))
}

async fn serve_runtime(state: AppState, socket: WebSocket, agent_hint: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    // ── Handshake ────────────────────────────────────────────────────
    let (agent_id, runtime, version) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsFrame>(&text) {
                Ok(WsFrame::RuntimeHello {
                    agent_id,
                    runtime,
                    version,
                }) => break (agent_id, runtime, version),
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "unparseable frame before hello");
                    continue;
                }
            },
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return,
        }
    };

    if !state.config.acp.allowed_agents.contains(&agent_id) {
        tracing::warn!(agent = %agent_id, "runtime for unlisted agent rejected");
        let _ = sink.send(Message::Close(None)).await;
        return;
    }
    if let Some(hint) = agent_hint {
        if hint != agent_id {
            tracing::debug!(hint = %hint, agent = %agent_id, "agent query hint differs from hello");
        }
    }

    let key = session_key(&agent_id, &SessionScope::fresh_acp());
    if let Err(e) = state.sessions.resolve_or_create(&key, true) {
        tracing::error!(error = %e, "session mint failed");
        return;
    }

    let welcome = WsFrame::GatewayWelcome {
        session_key: key.clone(),
        gateway_version: env!("CARGO_PKG_VERSION").into(),
    };
    if sink
        .send(Message::Text(
            serde_json::to_string(&welcome).unwrap_or_default(),
        ))
        .await
        .is_err()
    {
        return;
    }
    tracing::info!(agent = %agent_id, runtime = %runtime, version = %version, session_key = %key, "runtime connected");

    // ── Writer task + registry handle ────────────────────────────────
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsFrame>(64);
    state
        .runtimes
        .register(&agent_id, &key, &runtime, &version, outbound_tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // ── Reader loop ──────────────────────────────────────────────────
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "runtime socket error");
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<WsFrame>(&text) {
                Ok(WsFrame::Ping { timestamp }) => {
                    let _ = outbound_tx.send(WsFrame::Pong { timestamp }).await;
                }
                Ok(WsFrame::Event { session_key, event }) => {
                    state.heartbeat.beat();
                    tracing::debug!(session_key = %session_key, "runtime event received");
                    if event.is_terminal() {
                        let _ = state.sessions.update(&session_key, |_| {});
                    }
                }
                Ok(WsFrame::Request(req)) => {
                    let resp = crate::api::rpc::dispatch(&state, req).await;
                    let _ = outbound_tx.send(WsFrame::Response(resp)).await;
                }
                Ok(WsFrame::Response(resp)) => {
                    if !state.runtimes.resolve_response(resp) {
                        tracing::trace!("response with no parked waiter");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "unparseable runtime frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.runtimes.unregister(&agent_id, &key);
    writer.abort();
    tracing::info!(agent = %agent_id, session_key = %key, "runtime disconnected");
}
