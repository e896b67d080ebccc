//! Feishu (Lark) channel plugin (webhook transport).
//!
//! Each account opens its own HTTP listener and applies the shared webhook
//! guards: method/content-type filters, fixed-window rate limiting keyed by
//! `(path, client)`, bounded body reads, replay dedup on
//! `(event_type, message_id)`, and anomaly counting for rejected requests.
//! The listener socket is owned by the monitor and released on cancellation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use serde_json::json;

use oc_domain::config::ChannelConfig;
use oc_domain::inbound::{ChatType, InboundMessage, OutboundReceipt, OutboundRequest, SenderRef};
use oc_domain::{ChannelId, Error, Result};
use oc_webhook_guard::{
    apply_basic_guards, apply_security_headers, client_key, now_ms, read_json_body,
    AnomalyTracker, BodyLimits, FixedWindowRateLimiter, ReplayCache,
};

use crate::registry::{
    AccountContext, AccountGateway, ChannelAction, ChannelCapabilities, ChannelPlugin,
    MessagingAdapter, PluginMeta, ProbeResult, ResolvedAccount, TransportKind,
};
use crate::supervisor::AccountStatusHandle;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Account config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct HookConfig {
    verification_token: String,
    host: String,
    port: u16,
    path: String,
    reaction_notifications: String,
}

fn hook_config(account: &ResolvedAccount) -> Result<HookConfig> {
    let cfg = &account.config;
    let verification_token = cfg
        .get("verificationToken")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "feishu account `{}` has no verificationToken",
                account.account_id
            ))
        })?
        .to_string();
    Ok(HookConfig {
        verification_token,
        host: cfg
            .get("webhookHost")
            .and_then(|v| v.as_str())
            .unwrap_or("127.0.0.1")
            .to_string(),
        port: cfg
            .get("webhookPort")
            .and_then(|v| v.as_u64())
            .unwrap_or(9890) as u16,
        path: cfg
            .get("webhookPath")
            .and_then(|v| v.as_str())
            .unwrap_or("/feishu/events")
            .to_string(),
        reaction_notifications: cfg
            .get("reactionNotifications")
            .and_then(|v| v.as_str())
            .unwrap_or("own")
            .to_string(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event projection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn project_message_event(
    event: &serde_json::Value,
    account_id: &str,
) -> Option<InboundMessage> {
    let message = event.get("message")?;
    let chat_id = message.get("chat_id")?.as_str()?.to_string();
    let chat_type = match message.get("chat_type").and_then(|v| v.as_str()) {
        Some("p2p") => ChatType::Direct,
        _ => ChatType::Group,
    };
    let content = message.get("content").and_then(|v| v.as_str())?;
    let text = serde_json::from_str::<serde_json::Value>(content)
        .ok()
        .and_then(|c| c.get("text").and_then(|t| t.as_str()).map(String::from))?;

    let sender_id = event
        .pointer("/sender/sender_id/open_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mentions = message.get("mentions").and_then(|v| v.as_array());
    let was_mentioned = mentions.is_some_and(|m| !m.is_empty());

    Some(InboundMessage {
        channel: ChannelId::Feishu,
        account_id: account_id.to_string(),
        chat_type,
        conversation_id: chat_id.clone(),
        group_id: (chat_type == ChatType::Group).then_some(chat_id),
        thread_id: message
            .get("thread_id")
            .and_then(|v| v.as_str())
            .map(String::from),
        sender: SenderRef {
            id: sender_id,
            ..Default::default()
        },
        text,
        message_id: message
            .get("message_id")
            .and_then(|v| v.as_str())
            .map(String::from),
        event_name: Some("im.message.receive_v1".into()),
        was_mentioned,
        timestamp_ms: message
            .get("create_time")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok()),
    })
}

/// Validate a reaction event before synthesizing a user-visible event.
///
/// `own` mode requires the reacted-to message to be the bot's; when the bot
/// open id has not resolved yet, the event is logged and dropped rather
/// than buffered. The `Typing` emoji is provider chrome, never surfaced.
pub(crate) fn validate_reaction(
    event: &serde_json::Value,
    bot_open_id: Option<&str>,
    mode: &str,
) -> Option<String> {
    if mode == "none" {
        return None;
    }
    let emoji = event
        .pointer("/reaction_type/emoji_type")
        .and_then(|v| v.as_str())?;
    if emoji.eq_ignore_ascii_case("typing") {
        return None;
    }
    if mode == "own" {
        let Some(bot) = bot_open_id else {
            tracing::debug!("reaction before bot open id resolved; dropping");
            return None;
        };
        let owner = event
            .pointer("/message_owner/open_id")
            .and_then(|v| v.as_str());
        if owner != Some(bot) {
            return None;
        }
    }
    Some(emoji.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct HookState {
    account_id: String,
    path: String,
    verification_token: String,
    reaction_notifications: String,
    bot_open_id: Option<String>,
    events: Arc<crate::events::EventQueue>,
    status: AccountStatusHandle,
    replay: ReplayCache,
    limiter: FixedWindowRateLimiter,
    anomalies: AnomalyTracker,
}

fn hook_response(state: &HookState, client: &str, status: StatusCode, body: serde_json::Value) -> Response {
    if !status.is_success() {
        let key = format!("{}:{client}", state.path);
        state.anomalies.record(&key, status, now_ms(), |count| {
            format!("feishu webhook rejected {count} requests ({status})")
        });
    }
    let mut response = (status, Json(body)).into_response();
    apply_security_headers(response.headers_mut(), "application/json");
    response
}

async fn handle_webhook(
    State(state): State<Arc<HookState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let client = client_key(&addr.to_string());
    let rate_key = format!("{}:{client}", state.path);

    if let Some(status) = apply_basic_guards(
        &Method::POST,
        &headers,
        &[Method::POST],
        Some((&state.limiter, rate_key.as_str())),
        true,
    ) {
        return hook_response(&state, &client, status, json!({"error": "rejected"}));
    }

    let payload = match read_json_body(&headers, body, &BodyLimits::default()).await {
        Ok(v) => v,
        Err(e) => {
            return hook_response(
                &state,
                &client,
                e.status(),
                json!({"error": e.message()}),
            )
        }
    };

    // Verification token rides in the event envelope.
    let token = payload
        .get("token")
        .or_else(|| payload.pointer("/header/token"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if !oc_webhook_guard::verify_shared_secret(&state.verification_token, token) {
        return hook_response(
            &state,
            &client,
            StatusCode::UNAUTHORIZED,
            json!({"error": "verification token mismatch"}),
        );
    }

    // URL verification challenge.
    if payload.get("type").and_then(|v| v.as_str()) == Some("url_verification") {
        let challenge = payload.get("challenge").cloned().unwrap_or(json!(""));
        return hook_response(&state, &client, StatusCode::OK, json!({"challenge": challenge}));
    }

    let event_type = payload
        .pointer("/header/event_type")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let event = payload.get("event").cloned().unwrap_or(json!({}));

    // Replay dedup on (event, message or event id).
    let dedup_id = event
        .pointer("/message/message_id")
        .or_else(|| payload.pointer("/header/event_id"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if !dedup_id.is_empty() {
        let key = format!("{event_type}:{dedup_id}");
        if !state.replay.check_and_insert(&key, now_ms()) {
            return hook_response(&state, &client, StatusCode::OK, json!({"deduped": true}));
        }
    }

    match event_type {
        "im.message.receive_v1" => {
            if let Some(inbound) = project_message_event(&event, &state.account_id) {
                state.status.event_seen();
                state.events.push(inbound);
            }
        }
        "im.message.message_read_v1" | "im.message.reaction.deleted_v1" => {
            // Read receipts and reaction removals are noise.
        }
        "im.chat.member.bot.added_v1" => {
            tracing::info!(account = %state.account_id, "bot added to chat");
        }
        "im.chat.member.bot.deleted_v1" => {
            tracing::info!(account = %state.account_id, "bot removed from chat");
        }
        "im.message.reaction.created_v1" => {
            if let Some(emoji) = validate_reaction(
                &event,
                state.bot_open_id.as_deref(),
                &state.reaction_notifications,
            ) {
                let inbound = InboundMessage {
                    channel: ChannelId::Feishu,
                    account_id: state.account_id.clone(),
                    chat_type: ChatType::Direct,
                    conversation_id: event
                        .pointer("/message_owner/chat_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    group_id: None,
                    thread_id: None,
                    sender: SenderRef {
                        id: event
                            .pointer("/operator/open_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        ..Default::default()
                    },
                    text: format!("[reaction] {emoji}"),
                    message_id: event
                        .get("message_id")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    event_name: Some("im.message.reaction.created_v1".into()),
                    was_mentioned: false,
                    timestamp_ms: None,
                };
                state.status.event_seen();
                state.events.push(inbound);
            }
        }
        "card.action.trigger" => {
            if let Some(value) = event.pointer("/action/value") {
                let inbound = InboundMessage {
                    channel: ChannelId::Feishu,
                    account_id: state.account_id.clone(),
                    chat_type: ChatType::Direct,
                    conversation_id: event
                        .pointer("/context/open_chat_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    group_id: None,
                    thread_id: None,
                    sender: SenderRef {
                        id: event
                            .pointer("/operator/open_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        ..Default::default()
                    },
                    text: format!("[card] {value}"),
                    message_id: payload
                        .pointer("/header/event_id")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    event_name: Some("card.action.trigger".into()),
                    was_mentioned: false,
                    timestamp_ms: None,
                };
                state.status.event_seen();
                state.events.push(inbound);
            }
        }
        other => {
            tracing::debug!(event_type = %other, "unhandled feishu event");
        }
    }

    hook_response(&state, &client, StatusCode::OK, json!({"ok": true}))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway (webhook monitor)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FeishuGateway;

#[async_trait::async_trait]
impl AccountGateway for FeishuGateway {
    async fn probe(&self, account: &ResolvedAccount, _timeout: Duration) -> ProbeResult {
        // Webhook mode has nothing remote to probe; config sanity is the
        // preflight.
        match hook_config(account) {
            Ok(_) => ProbeResult::ok_with_bot(
                account
                    .config
                    .get("botOpenId")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            ),
            Err(e) => ProbeResult::failed(e.to_string()),
        }
    }

    async fn start_account(&self, ctx: AccountContext) -> Result<()> {
        let hook = hook_config(&ctx.account)?;
        let state = Arc::new(HookState {
            account_id: ctx.account.account_id.clone(),
            path: hook.path.clone(),
            verification_token: hook.verification_token,
            reaction_notifications: hook.reaction_notifications,
            bot_open_id: ctx.bot_open_id.clone(),
            events: ctx.events.clone(),
            status: ctx.status.clone(),
            replay: ReplayCache::default(),
            limiter: FixedWindowRateLimiter::default(),
            anomalies: AnomalyTracker::default(),
        });

        let app = Router::new()
            .route(&hook.path, post(handle_webhook))
            .with_state(state);

        let addr = format!("{}:{}", hook.host, hook.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Channel {
                channel: "feishu".into(),
                message: format!("binding {addr}: {e}"),
            })?;
        tracing::info!(account = %ctx.account.account_id, addr = %addr, path = %hook.path, "feishu webhook listening");
        ctx.status.connected();

        let cancel = ctx.cancel.clone();
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await });

        let result = served.await;
        ctx.status.disconnected("cancelled");
        result.map_err(|e| Error::Channel {
            channel: "feishu".into(),
            message: format!("webhook server: {e}"),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messaging adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Provider codes meaning "the target message is gone"; edits falling on
/// them must fall back to a fresh send.
pub const MESSAGE_GONE_CODES: &[i64] = &[230011, 231003];

struct FeishuMessaging;

impl FeishuMessaging {
    async fn call(
        &self,
        account: &ResolvedAccount,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let base = account
            .config
            .get("apiBaseUrl")
            .and_then(|v| v.as_str())
            .unwrap_or("https://open.feishu.cn/open-apis");
        let token = account
            .config
            .get("tenantAccessToken")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let client = reqwest::Client::new();
        let resp = client
            .request(method, format!("{base}{path}"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("feishu API: {e}")))?;
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("decoding response: {e}")))?;
        let code = payload.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
        if code != 0 {
            let msg = payload.get("msg").and_then(|v| v.as_str()).unwrap_or("?");
            return Err(Error::Http(format!("feishu API code {code}: {msg}")));
        }
        Ok(payload["data"].clone())
    }
}

#[async_trait::async_trait]
impl MessagingAdapter for FeishuMessaging {
    async fn send(
        &self,
        account: &ResolvedAccount,
        req: &OutboundRequest,
    ) -> Result<OutboundReceipt> {
        let content = json!({"text": req.text.clone().unwrap_or_default()}).to_string();
        let body = json!({
            "receive_id": req.to,
            "msg_type": "text",
            "content": content,
        });
        let data = self
            .call(
                account,
                reqwest::Method::POST,
                "/im/v1/messages?receive_id_type=chat_id",
                body,
            )
            .await?;
        Ok(OutboundReceipt {
            message_id: data
                .get("message_id")
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
        let content = json!({"text": req.text.clone().unwrap_or_default()}).to_string();
        self.call(
            account,
            reqwest::Method::PUT,
            &format!("/im/v1/messages/{message_id}"),
            json!({"msg_type": "text", "content": content}),
        )
        .await?;
        Ok(OutboundReceipt {
            message_id: message_id.to_string(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FeishuPlugin {
    gateway: Arc<FeishuGateway>,
    messaging: Arc<FeishuMessaging>,
}

impl FeishuPlugin {
    pub fn new() -> Self {
        Self {
            gateway: Arc::new(FeishuGateway),
            messaging: Arc::new(FeishuMessaging),
        }
    }
}

impl Default for FeishuPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChannelPlugin for FeishuPlugin {
    fn id(&self) -> ChannelId {
        ChannelId::Feishu
    }

    fn meta(&self) -> PluginMeta {
        PluginMeta {
            label: "Feishu",
            docs_path: "/channels/feishu",
            blurb: "Lark open platform over event webhooks",
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
            .ok_or_else(|| Error::Config(format!("feishu account `{account_id}` not configured")))?;
        let account = ResolvedAccount {
            account_id: account_id.to_string(),
            transport: TransportKind::Webhook,
            config,
        };
        hook_config(&account)?;
        Ok(account)
    }

    fn actions(&self, _cfg: &ChannelConfig) -> Vec<ChannelAction> {
        vec![
            ChannelAction::Send,
            ChannelAction::Edit,
            ChannelAction::Delete,
            ChannelAction::React,
            ChannelAction::RenameGroup,
            ChannelAction::AddParticipant,
            ChannelAction::RemoveParticipant,
            ChannelAction::LeaveGroup,
        ]
    }

    fn messaging(&self) -> Option<Arc<dyn MessagingAdapter>> {
        Some(self.messaging.clone())
    }

    fn gateway(&self) -> Option<Arc<dyn AccountGateway>> {
        Some(self.gateway.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_group_message() {
        let event = json!({
            "sender": {"sender_id": {"open_id": "ou_sender"}},
            "message": {
                "message_id": "om_1",
                "chat_id": "oc_g",
                "chat_type": "group",
                "content": "{\"text\": \"hello team\"}",
                "mentions": [{"key": "@_user_1"}],
                "create_time": "1700000000000"
            }
        });
        let m = project_message_event(&event, "default").unwrap();
        assert_eq!(m.chat_type, ChatType::Group);
        assert_eq!(m.conversation_id, "oc_g");
        assert_eq!(m.text, "hello team");
        assert!(m.was_mentioned);
        assert_eq!(m.sender.id, "ou_sender");
        assert_eq!(m.timestamp_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn project_p2p_message_is_direct() {
        let event = json!({
            "sender": {"sender_id": {"open_id": "ou_s"}},
            "message": {
                "message_id": "om_2",
                "chat_id": "oc_dm",
                "chat_type": "p2p",
                "content": "{\"text\": \"hi\"}"
            }
        });
        let m = project_message_event(&event, "default").unwrap();
        assert_eq!(m.chat_type, ChatType::Direct);
        assert!(m.group_id.is_none());
        assert!(!m.was_mentioned);
    }

    #[test]
    fn reaction_typing_is_suppressed() {
        let event = json!({
            "reaction_type": {"emoji_type": "Typing"},
            "message_owner": {"open_id": "bot-1"}
        });
        assert!(validate_reaction(&event, Some("bot-1"), "own").is_none());
    }

    #[test]
    fn reaction_own_mode_requires_bot_message() {
        let own = json!({
            "reaction_type": {"emoji_type": "THUMBSUP"},
            "message_owner": {"open_id": "bot-1"}
        });
        let other = json!({
            "reaction_type": {"emoji_type": "THUMBSUP"},
            "message_owner": {"open_id": "someone-else"}
        });
        assert_eq!(validate_reaction(&own, Some("bot-1"), "own").as_deref(), Some("THUMBSUP"));
        assert!(validate_reaction(&other, Some("bot-1"), "own").is_none());
    }

    #[test]
    fn reaction_dropped_when_bot_id_unresolved() {
        let event = json!({
            "reaction_type": {"emoji_type": "THUMBSUP"},
            "message_owner": {"open_id": "bot-1"}
        });
        assert!(validate_reaction(&event, None, "own").is_none());
    }

    #[test]
    fn resolve_account_requires_verification_token() {
        let plugin = FeishuPlugin::new();
        let mut cfg = ChannelConfig::default();
        cfg.accounts.insert(
            "main".into(),
            json!({"verificationToken": "vt", "webhookPort": 9890}),
        );
        cfg.accounts.insert("broken".into(), json!({}));
        assert!(plugin.resolve_account(&cfg, "main").is_ok());
        assert!(plugin.resolve_account(&cfg, "broken").is_err());
    }

    #[test]
    fn message_gone_codes() {
        assert!(MESSAGE_GONE_CODES.contains(&230011));
        assert!(MESSAGE_GONE_CODES.contains(&231003));
    }
}
