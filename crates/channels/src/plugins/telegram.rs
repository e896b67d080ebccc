//! Telegram channel plugin (long-poll transport).
//!
//! One monitor per bot token runs a `getUpdates` long-poll loop with
//! exponential backoff on network errors. Telegram's API is notoriously
//! unhappy on broken dual-stack networks, so every request goes through the
//! IPv4-fallback retry in [`crate::netfix`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use oc_domain::config::ChannelConfig;
use oc_domain::inbound::{
    ChatType, InboundMessage, OutboundReceipt, OutboundRequest, SenderRef,
};
use oc_domain::{ChannelId, Error, Result};

use crate::netfix::{with_ipv4_fallback, NetworkHygiene, NetworkTuning};
use crate::registry::{
    AccountContext, AccountGateway, ChannelAction, ChannelCapabilities, ChannelPlugin,
    MessagingAdapter, PluginMeta, ProbeResult, ResolvedAccount, TransportKind,
};

const LONG_POLL_SECONDS: u64 = 50;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

fn api_base(account: &ResolvedAccount) -> String {
    account
        .config
        .get("apiBaseUrl")
        .and_then(|v| v.as_str())
        .unwrap_or("https://api.telegram.org")
        .trim_end_matches('/')
        .to_string()
}

fn bot_token(account: &ResolvedAccount) -> Result<String> {
    account
        .config
        .get("botToken")
        .or_else(|| account.config.get("token"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::Config(format!(
            "telegram account `{}` has no botToken",
            account.account_id
        )))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Update projection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Project one Telegram update into the normalized inbound shape. Returns
/// `None` for updates that carry no routable message.
pub(crate) fn project_update(
    update: &serde_json::Value,
    account_id: &str,
    bot_username: Option<&str>,
) -> Option<InboundMessage> {
    let message = update.get("message").or_else(|| update.get("channel_post"))?;
    let chat = message.get("chat")?;
    let chat_id = chat.get("id")?;
    let chat_kind = chat.get("type").and_then(|v| v.as_str()).unwrap_or("private");
    let text = message.get("text").and_then(|v| v.as_str())?.to_string();

    let from = message.get("from");
    let sender = SenderRef {
        id: from
            .and_then(|f| f.get("id"))
            .map(|v| v.to_string())
            .unwrap_or_default(),
        username: from
            .and_then(|f| f.get("username"))
            .and_then(|v| v.as_str())
            .map(String::from),
        e164: None,
        name: from
            .and_then(|f| f.get("first_name"))
            .and_then(|v| v.as_str())
            .map(String::from),
    };

    let was_mentioned = bot_username
        .map(|u| text.contains(&format!("@{u}")))
        .unwrap_or(false);

    let chat_type = if chat_kind == "private" {
        ChatType::Direct
    } else {
        ChatType::Group
    };

    Some(InboundMessage {
        channel: ChannelId::Telegram,
        account_id: account_id.to_string(),
        chat_type,
        conversation_id: chat_id.to_string(),
        group_id: (chat_type == ChatType::Group).then(|| chat_id.to_string()),
        thread_id: message
            .get("message_thread_id")
            .map(|v| v.to_string()),
        sender,
        text,
        message_id: message.get("message_id").map(|v| v.to_string()),
        event_name: Some("message".into()),
        was_mentioned,
        timestamp_ms: message
            .get("date")
            .and_then(|v| v.as_i64())
            .map(|s| s * 1000),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway (long-poll monitor)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TelegramGateway {
    hygiene: Arc<NetworkHygiene>,
}

impl TelegramGateway {
    async fn call_api(
        &self,
        account: &ResolvedAccount,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/bot{}/{method}", api_base(account), bot_token(account)?);
        let base_client = NetworkTuning::default().build_client()?;
        with_ipv4_fallback(&self.hygiene, base_client, |client| {
            let url = url.clone();
            let body = body.clone();
            async move {
                let resp = client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| Error::Http(format!("fetch failed: {e}")))?;
                let status = resp.status();
                let payload: serde_json::Value = resp
                    .json()
                    .await
                    .map_err(|e| Error::Http(format!("decoding response: {e}")))?;
                if !status.is_success() || payload.get("ok") != Some(&json!(true)) {
                    return Err(Error::Http(format!(
                        "telegram API {status}: {}",
                        payload.get("description").and_then(|d| d.as_str()).unwrap_or("?")
                    )));
                }
                Ok(payload["result"].clone())
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl AccountGateway for TelegramGateway {
    async fn probe(&self, account: &ResolvedAccount, timeout: Duration) -> ProbeResult {
        let me = tokio::time::timeout(timeout, self.call_api(account, "getMe", json!({}))).await;
        match me {
            Ok(Ok(result)) => ProbeResult::ok_with_bot(
                result.get("username").and_then(|v| v.as_str()).map(String::from),
            ),
            Ok(Err(e)) => ProbeResult::failed(e.to_string()),
            Err(_) => ProbeResult::failed(format!(
                "probe timed out after {}ms",
                timeout.as_millis()
            )),
        }
    }

    async fn start_account(&self, ctx: AccountContext) -> Result<()> {
        let account = &ctx.account;
        let bot_username = ctx.bot_open_id.clone();
        let mut offset: i64 = 0;
        let mut backoff = Duration::from_secs(1);

        ctx.status.connected();
        loop {
            if ctx.cancel.is_cancelled() {
                ctx.status.disconnected("cancelled");
                return Ok(());
            }

            let poll = self.call_api(
                account,
                "getUpdates",
                json!({"offset": offset, "timeout": LONG_POLL_SECONDS}),
            );
            let updates = tokio::select! {
                r = poll => r,
                _ = ctx.cancel.cancelled() => {
                    ctx.status.disconnected("cancelled");
                    return Ok(());
                }
            };

            match updates {
                Ok(result) => {
                    backoff = Duration::from_secs(1);
                    for update in result.as_array().cloned().unwrap_or_default() {
                        if let Some(id) = update.get("update_id").and_then(|v| v.as_i64()) {
                            offset = offset.max(id + 1);
                        }
                        if let Some(message) = project_update(
                            &update,
                            &account.account_id,
                            bot_username.as_deref(),
                        ) {
                            ctx.status.event_seen();
                            ctx.events.push(message);
                        }
                    }
                }
                Err(e) => {
                    ctx.status.error(e.to_string());
                    tracing::warn!(
                        account = %account.account_id,
                        error = %e,
                        backoff_s = backoff.as_secs(),
                        "telegram poll failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = ctx.cancel.cancelled() => {
                            ctx.status.disconnected("cancelled");
                            return Ok(());
                        }
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messaging adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TelegramMessaging {
    gateway: Arc<TelegramGateway>,
}

#[async_trait::async_trait]
impl MessagingAdapter for TelegramMessaging {
    async fn send(
        &self,
        account: &ResolvedAccount,
        req: &OutboundRequest,
    ) -> Result<OutboundReceipt> {
        let mut body = json!({
            "chat_id": req.to,
            "text": req.text.clone().unwrap_or_default(),
        });
        if let Some(reply_to) = &req.reply_to_message_id {
            body["reply_to_message_id"] = json!(reply_to);
        }
        if let Some(thread) = &req.thread_id {
            body["message_thread_id"] = json!(thread);
        }
        let result = self.gateway.call_api(account, "sendMessage", body).await?;
        Ok(OutboundReceipt {
            message_id: result
                .get("message_id")
                .map(|v| v.to_string())
                .unwrap_or_default(),
        })
    }

    async fn edit(
        &self,
        account: &ResolvedAccount,
        message_id: &str,
        req: &OutboundRequest,
    ) -> Result<OutboundReceipt> {
        let body = json!({
            "chat_id": req.to,
            "message_id": message_id,
            "text": req.text.clone().unwrap_or_default(),
        });
        self.gateway.call_api(account, "editMessageText", body).await?;
        Ok(OutboundReceipt {
            message_id: message_id.to_string(),
        })
    }

    async fn delete(&self, account: &ResolvedAccount, message_id: &str) -> Result<()> {
        // Deleting requires the original chat id; callers encode it in the id
        // as `<chat>:<message>` when they intend to delete.
        let (chat_id, msg_id) = message_id
            .split_once(':')
            .ok_or_else(|| Error::ToolInput("delete target must be chat:message".into()))?;
        self.gateway
            .call_api(
                account,
                "deleteMessage",
                json!({"chat_id": chat_id, "message_id": msg_id}),
            )
            .await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TelegramPlugin {
    gateway: Arc<TelegramGateway>,
    messaging: Arc<TelegramMessaging>,
}

impl TelegramPlugin {
    pub fn new() -> Self {
        Self::with_hygiene(Arc::new(NetworkHygiene::new()))
    }

    /// Strict-mode constructor: the hygiene record is injected rather than
    /// process-ambient.
    pub fn with_hygiene(hygiene: Arc<NetworkHygiene>) -> Self {
        let gateway = Arc::new(TelegramGateway { hygiene });
        Self {
            messaging: Arc::new(TelegramMessaging {
                gateway: gateway.clone(),
            }),
            gateway,
        }
    }
}

impl Default for TelegramPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChannelPlugin for TelegramPlugin {
    fn id(&self) -> ChannelId {
        ChannelId::Telegram
    }

    fn meta(&self) -> PluginMeta {
        PluginMeta {
            label: "Telegram",
            docs_path: "/channels/telegram",
            blurb: "Bot API over long-poll",
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
            .ok_or_else(|| Error::Config(format!("telegram account `{account_id}` not configured")))?;
        let account = ResolvedAccount {
            account_id: account_id.to_string(),
            transport: TransportKind::LongPoll,
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
            ChannelAction::Poll,
            ChannelAction::TopicCreate,
        ]
    }

    fn normalize_target(&self, raw: &str) -> String {
        let raw = raw.trim();
        raw.strip_prefix("telegram:").unwrap_or(raw).to_string()
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
    fn project_private_message() {
        let update = json!({
            "update_id": 100,
            "message": {
                "message_id": 7,
                "date": 1700000000,
                "chat": {"id": 42, "type": "private"},
                "from": {"id": 9, "username": "alice", "first_name": "Alice"},
                "text": "hi there"
            }
        });
        let m = project_update(&update, "default", None).unwrap();
        assert_eq!(m.channel, ChannelId::Telegram);
        assert_eq!(m.chat_type, ChatType::Direct);
        assert_eq!(m.conversation_id, "42");
        assert_eq!(m.sender.username.as_deref(), Some("alice"));
        assert_eq!(m.text, "hi there");
        assert_eq!(m.message_id.as_deref(), Some("7"));
        assert_eq!(m.timestamp_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn project_group_message_detects_mention() {
        let update = json!({
            "message": {
                "message_id": 8,
                "chat": {"id": -100, "type": "supergroup"},
                "from": {"id": 9},
                "text": "@clawbot status please"
            }
        });
        let m = project_update(&update, "default", Some("clawbot")).unwrap();
        assert_eq!(m.chat_type, ChatType::Group);
        assert_eq!(m.group_id.as_deref(), Some("-100"));
        assert!(m.was_mentioned);
    }

    #[test]
    fn non_message_updates_are_skipped() {
        let update = json!({"update_id": 1, "edited_message": {"text": "x"}});
        assert!(project_update(&update, "default", None).is_none());
    }

    #[test]
    fn resolve_account_requires_token() {
        let plugin = TelegramPlugin::new();
        let mut cfg = ChannelConfig::default();
        cfg.accounts
            .insert("main".into(), json!({"botToken": "123:abc"}));
        cfg.accounts.insert("broken".into(), json!({}));
        assert!(plugin.resolve_account(&cfg, "main").is_ok());
        assert!(plugin.resolve_account(&cfg, "broken").is_err());
        assert!(plugin.resolve_account(&cfg, "missing").is_err());
    }

    #[test]
    fn normalize_target_strips_prefix() {
        let plugin = TelegramPlugin::new();
        assert_eq!(plugin.normalize_target(" telegram:42 "), "42");
        assert_eq!(plugin.normalize_target("42"), "42");
    }
}
