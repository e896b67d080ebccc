//! Discord channel plugin (WebSocket gateway transport).
//!
//! Each account monitor owns one gateway connection: hello/heartbeat
//! bookkeeping, identify-vs-resume, and message dispatch. Repeated hello
//! stalls clear the resume state to force a fresh identify; a monitor whose
//! transport never recovers is force-stopped by the reconnect watchdog.
//! Close code 4014 ("disallowed intents") is fatal for the monitor, never
//! for the process.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use oc_domain::config::ChannelConfig;
use oc_domain::inbound::{
    ChatType, InboundMessage, OutboundReceipt, OutboundRequest, SenderRef,
};
use oc_domain::{ChannelId, Error, Result};

use crate::registry::{
    AccountContext, AccountGateway, ChannelAction, ChannelCapabilities, ChannelPlugin,
    MessagingAdapter, PluginMeta, ProbeResult, ResolvedAccount, TransportKind,
};
use crate::watchdog::{
    HelloStallTracker, ReconnectWatchdog, ResumeState, HELLO_TIMEOUT_MS,
};

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const API_BASE: &str = "https://discord.com/api/v10";
const DEFAULT_INTENTS: u64 = 1 << 0 | 1 << 9 | 1 << 12 | 1 << 15; // guilds, guild+dm messages, content

/// Close codes that end the monitor instead of reconnecting.
const FATAL_CLOSE_CODES: &[(u16, &str)] = &[
    (4004, "authentication failed"),
    (4013, "invalid intents"),
    (4014, "disallowed intents"),
];

fn bot_token(account: &ResolvedAccount) -> Result<String> {
    account
        .config
        .get("token")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| {
            Error::Config(format!("discord account `{}` has no token", account.account_id))
        })
}

fn now_ms() -> u64 {
    oc_webhook_guard::now_ms()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event projection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn project_message_create(
    data: &serde_json::Value,
    account_id: &str,
    bot_user_id: Option<&str>,
) -> Option<InboundMessage> {
    let author = data.get("author")?;
    let author_id = author.get("id")?.as_str()?.to_string();
    // The bot's own messages echo back over the gateway.
    if bot_user_id == Some(author_id.as_str()) {
        return None;
    }
    let content = data.get("content")?.as_str()?.to_string();
    let channel_id = data.get("channel_id")?.as_str()?.to_string();
    let guild_id = data.get("guild_id").and_then(|v| v.as_str()).map(String::from);

    let was_mentioned = bot_user_id.is_some_and(|bot| {
        data.get("mentions")
            .and_then(|m| m.as_array())
            .is_some_and(|mentions| {
                mentions
                    .iter()
                    .any(|m| m.get("id").and_then(|v| v.as_str()) == Some(bot))
            })
    });

    Some(InboundMessage {
        channel: ChannelId::Discord,
        account_id: account_id.to_string(),
        chat_type: if guild_id.is_some() {
            ChatType::Group
        } else {
            ChatType::Direct
        },
        conversation_id: channel_id,
        group_id: guild_id,
        thread_id: None,
        sender: SenderRef {
            id: author_id,
            username: author.get("username").and_then(|v| v.as_str()).map(String::from),
            e164: None,
            name: author
                .get("global_name")
                .and_then(|v| v.as_str())
                .map(String::from),
        },
        text: content,
        message_id: data.get("id").and_then(|v| v.as_str()).map(String::from),
        event_name: Some("MESSAGE_CREATE".into()),
        was_mentioned,
        timestamp_ms: None,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum ConnectionOutcome {
    /// The socket closed after a working session; reconnect (resumable).
    Closed { code: Option<u16>, reason: String },
    /// No hello arrived in time.
    HelloStalled,
    /// The monitor was cancelled.
    Cancelled,
}

struct DiscordGateway;

impl DiscordGateway {
    async fn run_connection(
        &self,
        ctx: &AccountContext,
        resume: &mut ResumeState,
        bot_user_id: Option<&str>,
    ) -> Result<ConnectionOutcome> {
        let token = bot_token(&ctx.account)?;
        let intents = ctx
            .account
            .config
            .get("intents")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_INTENTS);
        let url = resume
            .resume_gateway_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());

        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| Error::Http(format!("gateway connect: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        // ── Hello ────────────────────────────────────────────────────
        let hello = tokio::time::timeout(Duration::from_millis(HELLO_TIMEOUT_MS), async {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    let frame: serde_json::Value = serde_json::from_str(&text).ok()?;
                    if frame.get("op").and_then(|v| v.as_u64()) == Some(10) {
                        return frame
                            .pointer("/d/heartbeat_interval")
                            .and_then(|v| v.as_u64());
                    }
                }
            }
            None
        })
        .await;

        let heartbeat_interval_ms = match hello {
            Ok(Some(interval)) => interval,
            Ok(None) | Err(_) => return Ok(ConnectionOutcome::HelloStalled),
        };

        ctx.status.connected();

        // ── Identify or resume ───────────────────────────────────────
        let payload = if resume.can_resume() {
            json!({
                "op": 6,
                "d": {
                    "token": token,
                    "session_id": resume.session_id,
                    "seq": resume.sequence,
                }
            })
        } else {
            json!({
                "op": 2,
                "d": {
                    "token": token,
                    "intents": intents,
                    "properties": {"os": std::env::consts::OS, "browser": "openclaw", "device": "openclaw"},
                }
            })
        };
        sink.send(Message::Text(payload.to_string()))
            .await
            .map_err(|e| Error::Http(format!("identify send: {e}")))?;

        // ── Session loop ─────────────────────────────────────────────
        let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_interval_ms));
        heartbeat.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(ConnectionOutcome::Cancelled);
                }
                _ = heartbeat.tick() => {
                    let beat = json!({"op": 1, "d": resume.sequence});
                    if sink.send(Message::Text(beat.to_string())).await.is_err() {
                        return Ok(ConnectionOutcome::Closed {
                            code: None,
                            reason: "heartbeat send failed".into(),
                        });
                    }
                }
                msg = stream.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            return Ok(ConnectionOutcome::Closed {
                                code: None,
                                reason: format!("socket error: {e}"),
                            })
                        }
                        None => {
                            return Ok(ConnectionOutcome::Closed {
                                code: None,
                                reason: "stream ended".into(),
                            })
                        }
                    };
                    match msg {
                        Message::Text(text) => {
                            let frame: serde_json::Value = match serde_json::from_str(&text) {
                                Ok(f) => f,
                                Err(_) => continue,
                            };
                            if let Some(seq) = frame.get("s").and_then(|v| v.as_u64()) {
                                resume.sequence = Some(seq);
                            }
                            match frame.get("op").and_then(|v| v.as_u64()) {
                                Some(0) => {
                                    let event = frame.get("t").and_then(|v| v.as_str()).unwrap_or("");
                                    match event {
                                        "READY" => {
                                            resume.session_id = frame
                                                .pointer("/d/session_id")
                                                .and_then(|v| v.as_str())
                                                .map(String::from);
                                            resume.resume_gateway_url = frame
                                                .pointer("/d/resume_gateway_url")
                                                .and_then(|v| v.as_str())
                                                .map(|u| format!("{u}/?v=10&encoding=json"));
                                        }
                                        "MESSAGE_CREATE" => {
                                            if let Some(data) = frame.get("d") {
                                                if let Some(inbound) = project_message_create(
                                                    data,
                                                    &ctx.account.account_id,
                                                    bot_user_id,
                                                ) {
                                                    ctx.status.event_seen();
                                                    ctx.events.push(inbound);
                                                }
                                            }
                                        }
                                        _ => {}
                                    }
                                }
                                Some(1) => {
                                    let beat = json!({"op": 1, "d": resume.sequence});
                                    let _ = sink.send(Message::Text(beat.to_string())).await;
                                }
                                Some(7) => {
                                    return Ok(ConnectionOutcome::Closed {
                                        code: None,
                                        reason: "server requested reconnect".into(),
                                    });
                                }
                                Some(9) => {
                                    let resumable = frame
                                        .get("d")
                                        .and_then(|v| v.as_bool())
                                        .unwrap_or(false);
                                    if !resumable {
                                        resume.clear();
                                    }
                                    return Ok(ConnectionOutcome::Closed {
                                        code: None,
                                        reason: "invalid session".into(),
                                    });
                                }
                                _ => {}
                            }
                        }
                        Message::Close(frame) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_default();
                            return Ok(ConnectionOutcome::Closed { code, reason });
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl AccountGateway for DiscordGateway {
    async fn probe(&self, account: &ResolvedAccount, timeout: Duration) -> ProbeResult {
        let token = match bot_token(account) {
            Ok(t) => t,
            Err(e) => return ProbeResult::failed(e.to_string()),
        };
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => return ProbeResult::failed(e.to_string()),
        };
        let resp = tokio::time::timeout(
            timeout,
            client
                .get(format!("{API_BASE}/users/@me"))
                .header("authorization", format!("Bot {token}"))
                .send(),
        )
        .await;
        match resp {
            Ok(Ok(r)) if r.status().is_success() => {
                let body: serde_json::Value = r.json().await.unwrap_or_default();
                ProbeResult::ok_with_bot(
                    body.get("id").and_then(|v| v.as_str()).map(String::from),
                )
            }
            Ok(Ok(r)) => ProbeResult::failed(format!("users/@me returned {}", r.status())),
            Ok(Err(e)) => ProbeResult::failed(e.to_string()),
            Err(_) => ProbeResult::failed(format!(
                "probe timed out after {}ms",
                timeout.as_millis()
            )),
        }
    }

    async fn start_account(&self, ctx: AccountContext) -> Result<()> {
        let mut resume = ResumeState::default();
        let mut stalls = HelloStallTracker::new();
        let watchdog = ReconnectWatchdog::default();
        let bot_user_id = ctx.bot_open_id.clone();
        let mut backoff = Duration::from_secs(1);

        loop {
            if ctx.cancel.is_cancelled() {
                ctx.status.disconnected("cancelled");
                return Ok(());
            }
            if watchdog.expired(now_ms()) {
                ctx.status.disconnected("reconnect watchdog expired");
                return Err(Error::Channel {
                    channel: "discord".into(),
                    message: "reconnect stalled; monitor force-stopped".into(),
                });
            }

            match self
                .run_connection(&ctx, &mut resume, bot_user_id.as_deref())
                .await
            {
                Ok(ConnectionOutcome::Cancelled) => {
                    ctx.status.disconnected("cancelled");
                    return Ok(());
                }
                Ok(ConnectionOutcome::HelloStalled) => {
                    ctx.status.disconnected("hello stalled");
                    watchdog.arm(now_ms());
                    if stalls.record_stall() {
                        tracing::warn!(
                            account = %ctx.account.account_id,
                            stalls = stalls.stalls(),
                            "repeated hello stalls; forcing fresh identify"
                        );
                        resume.clear();
                        stalls.record_hello();
                    }
                }
                Ok(ConnectionOutcome::Closed { code, reason }) => {
                    ctx.status.disconnected(format!(
                        "WebSocket connection closed ({}: {reason})",
                        code.map(|c| c.to_string()).unwrap_or_else(|| "?".into())
                    ));
                    watchdog.arm(now_ms());
                    stalls.record_hello();
                    if let Some(code) = code {
                        if let Some((_, label)) =
                            FATAL_CLOSE_CODES.iter().find(|(c, _)| *c == code)
                        {
                            return Err(Error::Channel {
                                channel: "discord".into(),
                                message: format!("gateway closed {code}: {label}"),
                            });
                        }
                    }
                }
                Err(e) => {
                    ctx.status.error(e.to_string());
                    watchdog.arm(now_ms());
                    tracing::warn!(account = %ctx.account.account_id, error = %e, "gateway connection failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = ctx.cancel.cancelled() => {
                    ctx.status.disconnected("cancelled");
                    return Ok(());
                }
            }
            backoff = (backoff * 2).min(Duration::from_secs(60));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messaging adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct DiscordMessaging;

impl DiscordMessaging {
    async fn call(
        &self,
        account: &ResolvedAccount,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let token = bot_token(account)?;
        let client = reqwest::Client::new();
        let mut req = client
            .request(method, format!("{API_BASE}{path}"))
            .header("authorization", format!("Bot {token}"));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Http(format!("discord API: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http(format!("discord API {status}")));
        }
        resp.json()
            .await
            .map_err(|e| Error::Http(format!("decoding response: {e}")))
    }
}

#[async_trait::async_trait]
impl MessagingAdapter for DiscordMessaging {
    async fn send(
        &self,
        account: &ResolvedAccount,
        req: &OutboundRequest,
    ) -> Result<OutboundReceipt> {
        let mut body = json!({"content": req.text.clone().unwrap_or_default()});
        if let Some(reply_to) = &req.reply_to_message_id {
            body["message_reference"] = json!({"message_id": reply_to});
        }
        let target = req.thread_id.as_deref().unwrap_or(&req.to);
        let result = self
            .call(
                account,
                reqwest::Method::POST,
                &format!("/channels/{target}/messages"),
                Some(body),
            )
            .await?;
        Ok(OutboundReceipt {
            message_id: result
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn edit(
        &self,
        account: &ResolvedAccount,
        message_id: &str,
        req: &OutboundRequest,
    ) -> Result<OutboundReceipt> {
        let target = req.thread_id.as_deref().unwrap_or(&req.to);
        self.call(
            account,
            reqwest::Method::PATCH,
            &format!("/channels/{target}/messages/{message_id}"),
            Some(json!({"content": req.text.clone().unwrap_or_default()})),
        )
        .await?;
        Ok(OutboundReceipt {
            message_id: message_id.to_string(),
        })
    }

    async fn create_thread(
        &self,
        account: &ResolvedAccount,
        parent_conversation_id: &str,
        title: &str,
    ) -> Result<String> {
        let result = self
            .call(
                account,
                reqwest::Method::POST,
                &format!("/channels/{parent_conversation_id}/threads"),
                Some(json!({"name": title, "type": 11})),
            )
            .await?;
        result
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Http("thread creation returned no id".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DiscordPlugin {
    gateway: Arc<DiscordGateway>,
    messaging: Arc<DiscordMessaging>,
}

impl DiscordPlugin {
    pub fn new() -> Self {
        Self {
            gateway: Arc::new(DiscordGateway),
            messaging: Arc::new(DiscordMessaging),
        }
    }
}

impl Default for DiscordPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChannelPlugin for DiscordPlugin {
    fn id(&self) -> ChannelId {
        ChannelId::Discord
    }

    fn meta(&self) -> PluginMeta {
        PluginMeta {
            label: "Discord",
            docs_path: "/channels/discord",
            blurb: "Gateway WebSocket + REST",
        }
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            chat_types: &[ChatType::Direct, ChatType::Group],
            media: true,
            supports_buttons: true,
        }
    }

    fn resolve_account(&self, cfg: &ChannelConfig, account_id: &str) -> Result<ResolvedAccount> {
        let config = cfg
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("discord account `{account_id}` not configured")))?;
        let account = ResolvedAccount {
            account_id: account_id.to_string(),
            transport: TransportKind::WebSocket,
            config,
        };
        bot_token(&account)?;
        Ok(account)
    }

    fn actions(&self, _cfg: &ChannelConfig) -> Vec<ChannelAction> {
        vec![
            ChannelAction::Send,
            ChannelAction::Edit,
            ChannelAction::Delete,
            ChannelAction::React,
            ChannelAction::TopicCreate,
        ]
    }

    fn normalize_target(&self, raw: &str) -> String {
        let raw = raw.trim();
        raw.strip_prefix("channel:")
            .or_else(|| raw.strip_prefix("discord:"))
            .unwrap_or(raw)
            .to_string()
    }

    fn messaging(&self) -> Option<Arc<dyn MessagingAdapter>> {
        Some(self.messaging.clone())
    }

    fn gateway(&self) -> Option<Arc<dyn AccountGateway>> {
        Some(self.gateway.clone())
    }
}
