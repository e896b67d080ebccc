//! In-process web channel.
//!
//! The browser UI posts messages straight into the gateway's HTTP surface,
//! so this plugin has no transport of its own: the monitor just parks until
//! cancellation, and the messaging adapter hands replies to an in-memory
//! outbox the HTTP layer drains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use oc_domain::config::ChannelConfig;
use oc_domain::inbound::{ChatType, OutboundReceipt, OutboundRequest};
use oc_domain::{ChannelId, Result};

use crate::registry::{
    AccountContext, AccountGateway, ChannelAction, ChannelCapabilities, ChannelPlugin,
    MessagingAdapter, PluginMeta, ProbeResult, ResolvedAccount, TransportKind,
};

/// Replies waiting for the browser to poll, keyed by conversation.
#[derive(Default)]
pub struct WebOutbox {
    messages: Mutex<HashMap<String, Vec<OutboundRequest>>>,
    counter: Mutex<u64>,
}

impl WebOutbox {
    pub fn drain(&self, conversation_id: &str) -> Vec<OutboundRequest> {
        self.messages
            .lock()
            .remove(conversation_id)
            .unwrap_or_default()
    }

    fn push(&self, req: OutboundRequest) -> String {
        let mut counter = self.counter.lock();
        *counter += 1;
        let message_id = format!("web-{}", *counter);
        self.messages
            .lock()
            .entry(req.to.clone())
            .or_default()
            .push(req);
        message_id
    }
}

struct WebMessaging {
    outbox: Arc<WebOutbox>,
}

#[async_trait::async_trait]
impl MessagingAdapter for WebMessaging {
    async fn send(
        &self,
        _account: &ResolvedAccount,
        req: &OutboundRequest,
    ) -> Result<OutboundReceipt> {
        let message_id = self.outbox.push(req.clone());
        Ok(OutboundReceipt { message_id })
    }
}

struct WebGateway;

#[async_trait::async_trait]
impl AccountGateway for WebGateway {
    async fn probe(&self, _account: &ResolvedAccount, _timeout: Duration) -> ProbeResult {
        ProbeResult::ok_with_bot(None)
    }

    async fn start_account(&self, ctx: AccountContext) -> Result<()> {
        ctx.status.connected();
        ctx.cancel.cancelled().await;
        ctx.status.disconnected("cancelled");
        Ok(())
    }
}

pub struct WebPlugin {
    outbox: Arc<WebOutbox>,
    messaging: Arc<WebMessaging>,
    gateway: Arc<WebGateway>,
}

impl WebPlugin {
    pub fn new() -> Self {
        let outbox = Arc::new(WebOutbox::default());
        Self {
            messaging: Arc::new(WebMessaging {
                outbox: outbox.clone(),
            }),
            gateway: Arc::new(WebGateway),
            outbox,
        }
    }

    pub fn outbox(&self) -> Arc<WebOutbox> {
        self.outbox.clone()
    }
}

impl Default for WebPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChannelPlugin for WebPlugin {
    fn id(&self) -> ChannelId {
        ChannelId::Web
    }

    fn meta(&self) -> PluginMeta {
        PluginMeta {
            label: "Web",
            docs_path: "/channels/web",
            blurb: "Browser chat served by the gateway itself",
        }
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            chat_types: &[ChatType::Direct],
            media: false,
            supports_buttons: false,
        }
    }

    fn resolve_account(&self, cfg: &ChannelConfig, account_id: &str) -> Result<ResolvedAccount> {
        let config = cfg
            .accounts
            .get(account_id)
            .cloned()
            .unwrap_or(serde_json::json!({}));
        Ok(ResolvedAccount {
            account_id: account_id.to_string(),
            transport: TransportKind::LongPoll,
            config,
        })
    }

    fn actions(&self, _cfg: &ChannelConfig) -> Vec<ChannelAction> {
        vec![ChannelAction::Send]
    }

    fn messaging(&self) -> Option<Arc<dyn MessagingAdapter>> {
        Some(self.messaging.clone())
    }

    fn gateway(&self) -> Option<Arc<dyn AccountGateway>> {
        Some(self.gateway.clone())
    }
}
