//! In-process registry of channel plugins.
//!
//! A plugin bundles everything the gateway needs to host one provider:
//! identity and capabilities, account listing/resolution, the messaging
//! adapter, and the per-account gateway hook the supervisor drives. The
//! registry snapshot is immutable for a process run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use oc_domain::config::ChannelConfig;
use oc_domain::inbound::{ChatType, OutboundReceipt, OutboundRequest};
use oc_domain::{ChannelId, Result};

use crate::events::EventQueue;
use crate::supervisor::AccountStatusHandle;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct PluginMeta {
    pub label: &'static str,
    pub docs_path: &'static str,
    pub blurb: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelCapabilities {
    pub chat_types: &'static [ChatType],
    pub media: bool,
    pub supports_buttons: bool,
}

/// Actions a plugin's messaging adapter can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    Send,
    Edit,
    Delete,
    React,
    Poll,
    TopicCreate,
    RenameGroup,
    AddParticipant,
    RemoveParticipant,
    LeaveGroup,
}

/// How an account's monitor consumes events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Webhook,
    LongPoll,
}

/// A channel account resolved from config, ready to start.
#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    pub account_id: String,
    pub transport: TransportKind,
    /// Channel-specific record (token, webhook host/port/path, …).
    pub config: serde_json::Value,
}

/// Preflight probe outcome.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub ok: bool,
    pub bot_open_id: Option<String>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn ok_with_bot(bot_open_id: Option<String>) -> Self {
        Self {
            ok: true,
            bot_open_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            bot_open_id: None,
            error: Some(error.into()),
        }
    }
}

/// Everything a monitor task gets from the supervisor. The supervisor owns
/// the cancellation root; the monitor must honor it and release all
/// resources before returning.
pub struct AccountContext {
    pub channel: ChannelId,
    pub account: ResolvedAccount,
    pub cancel: CancellationToken,
    pub events: Arc<EventQueue>,
    pub status: AccountStatusHandle,
    /// Bot identity discovered during preflight, when the probe surfaced one.
    pub bot_open_id: Option<String>,
}

/// Outbound messaging surface of a plugin.
#[async_trait::async_trait]
pub trait MessagingAdapter: Send + Sync {
    async fn send(&self, account: &ResolvedAccount, req: &OutboundRequest) -> Result<OutboundReceipt>;

    async fn edit(
        &self,
        account: &ResolvedAccount,
        message_id: &str,
        req: &OutboundRequest,
    ) -> Result<OutboundReceipt> {
        let _ = message_id;
        self.send(account, req).await
    }

    async fn delete(&self, account: &ResolvedAccount, message_id: &str) -> Result<()> {
        let _ = (account, message_id);
        Err(oc_domain::Error::ToolInput("delete not supported".into()))
    }

    async fn react(&self, account: &ResolvedAccount, message_id: &str, emoji: &str) -> Result<()> {
        let _ = (account, message_id, emoji);
        Err(oc_domain::Error::ToolInput("react not supported".into()))
    }

    /// Create a thread under a conversation; returns the new conversation
    /// id. Channels without threads report unsupported and callers fall
    /// back to the parent conversation.
    async fn create_thread(
        &self,
        account: &ResolvedAccount,
        parent_conversation_id: &str,
        title: &str,
    ) -> Result<String> {
        let _ = (account, parent_conversation_id, title);
        Err(oc_domain::Error::ToolInput("threads not supported".into()))
    }
}

/// Per-account lifecycle hooks the supervisor drives.
#[async_trait::async_trait]
pub trait AccountGateway: Send + Sync {
    /// Cheap connectivity/credential check, run sequentially at startup.
    async fn probe(&self, account: &ResolvedAccount, timeout: Duration) -> ProbeResult;

    /// Run the account's monitor until cancellation or a fatal error.
    async fn start_account(&self, ctx: AccountContext) -> Result<()>;
}

/// A registered channel plugin.
#[async_trait::async_trait]
pub trait ChannelPlugin: Send + Sync {
    fn id(&self) -> ChannelId;
    fn meta(&self) -> PluginMeta;
    fn capabilities(&self) -> ChannelCapabilities;

    fn list_account_ids(&self, cfg: &ChannelConfig) -> Vec<String> {
        cfg.list_account_ids()
    }

    fn resolve_account(&self, cfg: &ChannelConfig, account_id: &str) -> Result<ResolvedAccount>;

    fn actions(&self, cfg: &ChannelConfig) -> Vec<ChannelAction>;

    fn supports_buttons(&self, _cfg: &ChannelConfig) -> bool {
        self.capabilities().supports_buttons
    }

    /// Normalize a raw outbound target into the provider's canonical form.
    fn normalize_target(&self, raw: &str) -> String {
        raw.trim().to_string()
    }

    fn messaging(&self) -> Option<Arc<dyn MessagingAdapter>> {
        None
    }

    /// The supervisor hook. Plugins without one are config/messaging-only.
    fn gateway(&self) -> Option<Arc<dyn AccountGateway>> {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable plugin set for a process run.
pub struct ChannelRegistry {
    plugins: HashMap<ChannelId, Arc<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    /// The built-in plugin set.
    pub fn builtin() -> Self {
        Self::with_plugins(vec![
            Arc::new(crate::plugins::telegram::TelegramPlugin::new()),
            Arc::new(crate::plugins::discord::DiscordPlugin::new()),
            Arc::new(crate::plugins::feishu::FeishuPlugin::new()),
            Arc::new(crate::plugins::web::WebPlugin::new()),
        ])
    }

    /// Registry with an arbitrary plugin set. Property tests substitute
    /// scripted plugins through this constructor.
    pub fn with_plugins(plugins: Vec<Arc<dyn ChannelPlugin>>) -> Self {
        let mut map = HashMap::new();
        for plugin in plugins {
            let id = plugin.id();
            if map.insert(id, plugin).is_some() {
                tracing::warn!(channel = %id, "duplicate plugin registration; last wins");
            }
        }
        Self { plugins: map }
    }

    pub fn get(&self, id: ChannelId) -> Option<&Arc<dyn ChannelPlugin>> {
        self.plugins.get(&id)
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.plugins.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_stable_ids() {
        let reg = ChannelRegistry::builtin();
        let ids = reg.ids();
        assert!(ids.contains(&ChannelId::Telegram));
        assert!(ids.contains(&ChannelId::Discord));
        assert!(ids.contains(&ChannelId::Feishu));
        assert!(ids.contains(&ChannelId::Web));
    }

    #[test]
    fn lookup_by_id() {
        let reg = ChannelRegistry::builtin();
        assert_eq!(reg.get(ChannelId::Telegram).unwrap().id(), ChannelId::Telegram);
        assert!(reg.get(ChannelId::Zalo).is_none());
    }
}
