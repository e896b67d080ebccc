//! Runtime client — WebSocket lifecycle, handshake, and turn dispatch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use oc_acp_protocol::{AgentEvent, RpcRequest, RpcResponse, WsFrame};

use crate::reconnect::ReconnectPolicy;

#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("shutdown requested")]
    Shutdown,
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Sink a turn handler streams events into. Every event is forwarded to the
/// gateway tagged with the turn's session key. The sink also carries the
/// turn's cancellation: once the connection that dispatched the turn is
/// gone, the token fires and further events are dropped — there is nowhere
/// left to deliver them.
#[derive(Clone)]
pub struct TurnSink {
    session_key: String,
    tx: mpsc::Sender<WsFrame>,
    cancel: CancellationToken,
}

impl TurnSink {
    /// Whether the dispatching connection has gone away. Long-running
    /// handlers should poll this and bail out early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the turn is cancelled; for `select!`-style handlers.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub async fn emit(&self, event: AgentEvent) {
        if self.cancel.is_cancelled() {
            tracing::debug!(session_key = %self.session_key, "event dropped: turn cancelled");
            return;
        }
        let frame = WsFrame::Event {
            session_key: self.session_key.clone(),
            event,
        };
        if self.tx.send(frame).await.is_err() {
            tracing::debug!(session_key = %self.session_key, "event dropped: connection gone");
        }
    }
}

/// What the embedding runtime implements: run one agent turn, streaming
/// events into the sink. The final/error event terminates the turn.
#[async_trait::async_trait]
pub trait TurnHandler: Send + Sync + 'static {
    async fn run_turn(&self, session_key: String, task: String, sink: TurnSink);
}

/// A configured runtime client ready to connect to the gateway.
pub struct RuntimeClient {
    pub gateway_ws_url: String,
    pub token: Option<String>,
    pub agent_id: String,
    pub runtime: String,
    pub version: String,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl RuntimeClient {
    pub fn new(gateway_ws_url: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            gateway_ws_url: gateway_ws_url.into(),
            token: None,
            runtime: "acp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::for_runtime(&agent_id),
            agent_id,
        }
    }

    /// Connect, handshake, serve turns. Reconnects per the pacing policy;
    /// returns only on fatal error, exhaustion, or shutdown.
    pub async fn run(
        self,
        handler: Arc<dyn TurnHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), RuntimeError> {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Err(RuntimeError::Shutdown);
            }

            let result = tokio::select! {
                r = self.connect_and_serve(&handler) => r,
                _ = shutdown.cancelled() => {
                    tracing::info!(agent_id = %self.agent_id, "shutdown requested");
                    return Err(RuntimeError::Shutdown);
                }
            };

            match result {
                Ok(handshake_completed) => {
                    tracing::info!(
                        agent_id = %self.agent_id,
                        handshake_completed,
                        "connection closed"
                    );
                    // Pacing resets only after a completed handshake, not a
                    // bare TCP connect.
                    if handshake_completed {
                        attempt = 0;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        agent_id = %self.agent_id,
                        attempt,
                        error = %e,
                        "connection lost"
                    );
                }
            }

            if self.reconnect.should_give_up(attempt) {
                tracing::error!(agent_id = %self.agent_id, attempts = attempt, "giving up");
                return Err(RuntimeError::ReconnectExhausted(attempt));
            }

            let delay = self.reconnect.delay_for_attempt(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Err(RuntimeError::Shutdown),
            }
            attempt += 1;
        }
    }

    /// One connection lifecycle. `Ok(true)` when the handshake completed
    /// before the connection closed.
    async fn connect_and_serve(
        &self,
        handler: &Arc<dyn TurnHandler>,
    ) -> Result<bool, anyhow::Error> {
        let url = self.build_url();
        tracing::info!(url = %url, agent_id = %self.agent_id, "connecting to gateway");

        let (ws, _response) = tokio_tungstenite::connect_async(&url).await?;
        let (mut sink, mut stream) = ws.split();

        let hello = WsFrame::RuntimeHello {
            agent_id: self.agent_id.clone(),
            runtime: self.runtime.clone(),
            version: self.version.clone(),
        };
        sink.send(Message::Text(serde_json::to_string(&hello)?)).await?;

        let welcome = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    if let Ok(WsFrame::GatewayWelcome { session_key, .. }) =
                        serde_json::from_str(&text)
                    {
                        return Ok(session_key);
                    }
                }
            }
            Err(anyhow::anyhow!("connection closed before welcome"))
        })
        .await;

        let session_key: String = match welcome {
            Ok(Ok(k)) => k,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("gateway welcome timeout")),
        };
        tracing::info!(agent_id = %self.agent_id, session_key = %session_key, "welcomed");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsFrame>(64);
        // Root token for every turn this connection dispatches; cancelled on
        // teardown so in-flight turns stop instead of running detached.
        let turn_cancel = CancellationToken::new();

        // Heartbeat.
        let ping_tx = outbound_tx.clone();
        let ping_interval = self.heartbeat_interval;
        let ping_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            loop {
                interval.tick().await;
                let frame = WsFrame::Ping {
                    timestamp: Utc::now().timestamp_millis(),
                };
                if ping_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        // Writer.
        let writer_task = tokio::spawn(async move {
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

        // Reader: dispatch agent.dispatch requests to the handler.
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsFrame>(&text) {
                    Ok(WsFrame::Request(req)) => {
                        self.dispatch(req, handler, &outbound_tx, &turn_cancel).await;
                    }
                    Ok(WsFrame::Ping { timestamp }) => {
                        let _ = outbound_tx.send(WsFrame::Pong { timestamp }).await;
                    }
                    Ok(WsFrame::Pong { .. }) => {}
                    Ok(_) => tracing::debug!("ignoring frame: {text}"),
                    Err(e) => tracing::debug!(error = %e, "failed to parse frame"),
                },
                Message::Close(_) => {
                    tracing::info!("gateway closed connection");
                    break;
                }
                _ => {}
            }
        }

        // Teardown: abort every in-flight turn dispatched on this
        // connection, then the helper tasks.
        turn_cancel.cancel();
        ping_task.abort();
        writer_task.abort();
        Ok(true)
    }

    async fn dispatch(
        &self,
        req: RpcRequest,
        handler: &Arc<dyn TurnHandler>,
        outbound_tx: &mpsc::Sender<WsFrame>,
        turn_cancel: &CancellationToken,
    ) {
        match req.method.as_str() {
            "agent.dispatch" => {
                let session_key = req.params["sessionKey"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let task = req.params["task"].as_str().unwrap_or_default().to_string();
                if session_key.is_empty() || task.is_empty() {
                    let resp = RpcResponse::err(req.id, "invalid_params", "sessionKey and task required");
                    let _ = outbound_tx.send(WsFrame::Response(resp)).await;
                    return;
                }

                let _ = outbound_tx
                    .send(WsFrame::Response(RpcResponse::ok(
                        req.id,
                        serde_json::json!({"status": "accepted"}),
                    )))
                    .await;

                let cancel = turn_cancel.child_token();
                let sink = TurnSink {
                    session_key: session_key.clone(),
                    tx: outbound_tx.clone(),
                    cancel: cancel.clone(),
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = handler.run_turn(session_key.clone(), task, sink) => {}
                        _ = cancel.cancelled() => {
                            tracing::debug!(session_key = %session_key, "turn aborted: connection closed");
                        }
                    }
                });
            }
            other => {
                let resp = RpcResponse::err(req.id, "unknown_method", format!("unknown method: {other}"));
                let _ = outbound_tx.send(WsFrame::Response(resp)).await;
            }
        }
    }

    fn build_url(&self) -> String {
        let base = &self.gateway_ws_url;
        let sep = if base.contains('?') { "&" } else { "?" };
        match &self.token {
            Some(token) => format!("{base}{sep}token={token}&agent={}", self.agent_id),
            None => format!("{base}{sep}agent={}", self.agent_id),
        }
    }
}
