//! Inbound message routing: policy gate → session resolution → agent turn
//! → ACP delivery back over the originating channel.
//!
//! The router drains the supervisor's bounded event queue; each message is
//! handled in its own task (fire-and-forget with error logging) so a slow
//! agent turn never blocks the queue.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use oc_channels::events::EventQueue;
use oc_channels::policy::{
    evaluate_dm_policy, evaluate_group_policy, PolicyDecision, PolicyInput,
};
use oc_channels::registry::ChannelRegistry;
use oc_domain::config::Config;
use oc_domain::inbound::{ChatType, InboundMessage};
use oc_domain::{Error, Result};
use oc_sessions::{session_key, SessionScope, SessionStore};

use crate::runtime::delivery::DeliveryCoordinator;
use crate::runtime::{run_with_model_fallback, AgentRuntime, TurnRequest};

pub struct MessageRouter {
    config: Arc<Config>,
    registry: Arc<ChannelRegistry>,
    sessions: Arc<SessionStore>,
    runtime: Arc<dyn AgentRuntime>,
    events: Arc<EventQueue>,
    agent_id: String,
}

impl MessageRouter {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<ChannelRegistry>,
        sessions: Arc<SessionStore>,
        runtime: Arc<dyn AgentRuntime>,
        events: Arc<EventQueue>,
        agent_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            sessions,
            runtime,
            events,
            agent_id: agent_id.into(),
        })
    }

    /// Drain the queue until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                m = self.events.pop() => m,
                _ = cancel.cancelled() => {
                    tracing::info!("message router stopped");
                    return;
                }
            };
            let router = self.clone();
            tokio::spawn(async move {
                if let Err(e) = router.handle_message(message).await {
                    tracing::error!(error = %e, "inbound message handling failed");
                }
            });
        }
    }

    /// Authorize, route, run, and deliver one inbound message.
    pub async fn handle_message(&self, message: InboundMessage) -> Result<()> {
        let Some(channel_cfg) = self.config.channels.get(message.channel) else {
            tracing::debug!(channel = %message.channel, "message for unconfigured channel dropped");
            return Ok(());
        };

        // ── Policy gate ──────────────────────────────────────────────
        let input = PolicyInput {
            cfg: channel_cfg,
            chat_type: message.chat_type,
            group_id: message.group_id.as_deref(),
            sender: &message.sender,
            require_mention_override: None,
            case_insensitive_groups: false,
            enforce_chat_allowlist: true,
        };
        let decision = match message.chat_type {
            ChatType::Group => evaluate_group_policy(&input),
            ChatType::Direct => evaluate_dm_policy(&input),
        };
        let require_mention = match decision {
            PolicyDecision::Allow { require_mention } => require_mention,
            PolicyDecision::Deny(reason) => {
                tracing::debug!(
                    channel = %message.channel,
                    reason = reason.as_str(),
                    "inbound message denied"
                );
                return Ok(());
            }
        };
        if message.chat_type == ChatType::Group && require_mention && !message.was_mentioned {
            return Ok(());
        }

        // ── Session resolution ───────────────────────────────────────
        let key = session_key(
            &self.agent_id,
            &SessionScope::Conversation {
                channel: message.channel,
                conversation_id: message.conversation_id.clone(),
            },
        );
        let (entry, is_new) = self.sessions.resolve_or_create(&key, false)?;

        let agent_cfg = self
            .config
            .agents
            .get(&self.agent_id)
            .cloned()
            .unwrap_or_default();
        let chain = agent_cfg.model_chain(&self.config.models)?;

        // Pre-run persistence: list callers see the in-flight model.
        self.sessions.update(&key, |e| {
            e.model = Some(chain.primary.model.clone());
            e.model_provider = Some(chain.primary.provider.clone());
            e.system_sent = true;
            e.last_provider = Some(message.channel.to_string());
            e.last_to = Some(message.conversation_id.clone());
        })?;

        // ── Agent turn ───────────────────────────────────────────────
        let request = TurnRequest {
            session_key: key.clone(),
            session_id: entry.session_id.clone(),
            agent_id: self.agent_id.clone(),
            task: message.text.clone(),
            model: chain.primary.clone(),
            cli_session_id: entry.cli_session_id_for(&chain.primary.provider, is_new),
            cwd: agent_cfg.cwd.clone(),
            system_prompt: None,
        };
        let (outcome, served_model) =
            run_with_model_fallback(self.runtime.as_ref(), &chain, &request).await?;

        self.sessions.update(&key, |e| {
            e.model = Some(served_model.model.clone());
            e.model_provider = Some(served_model.provider.clone());
        })?;

        // ── Delivery ─────────────────────────────────────────────────
        let plugin = self
            .registry
            .get(message.channel)
            .ok_or_else(|| Error::Channel {
                channel: message.channel.to_string(),
                message: "no plugin registered".into(),
            })?;
        let messaging = plugin.messaging().ok_or_else(|| Error::Channel {
            channel: message.channel.to_string(),
            message: "plugin has no messaging adapter".into(),
        })?;
        let account = plugin.resolve_account(channel_cfg, &message.account_id)?;

        let mut coordinator = DeliveryCoordinator::new(
            messaging,
            account,
            plugin.normalize_target(&message.conversation_id),
            message.thread_id.clone(),
        );
        for event in &outcome.events {
            coordinator.handle_event(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::ScriptedRuntime;
    use oc_channels::plugins::web::WebPlugin;
    use oc_domain::inbound::SenderRef;
    use oc_domain::ChannelId;
    use oc_domain::config::ChannelConfig;

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            channel: ChannelId::Web,
            account_id: "default".into(),
            chat_type: ChatType::Direct,
            conversation_id: "conv-1".into(),
            group_id: None,
            thread_id: None,
            sender: SenderRef {
                id: "visitor".into(),
                ..Default::default()
            },
            text: text.into(),
            message_id: Some("m1".into()),
            event_name: Some("message".into()),
            was_mentioned: false,
            timestamp_ms: None,
        }
    }

    fn fixture() -> (Arc<MessageRouter>, Arc<WebPlugin>, Arc<SessionStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.models.primary = Some("claude-opus-4-6".into());
        config.channels.channels.insert(
            ChannelId::Web,
            ChannelConfig {
                enabled: true,
                ..Default::default()
            },
        );

        let web = Arc::new(WebPlugin::new());
        let registry = Arc::new(ChannelRegistry::with_plugins(vec![web.clone()]));
        let sessions = Arc::new(SessionStore::open(dir.path()).unwrap());
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.script_reply("claude-opus-4-6", "the answer");

        let router = MessageRouter::new(
            Arc::new(config),
            registry,
            sessions.clone(),
            runtime,
            Arc::new(EventQueue::default()),
            "claw",
        );
        (router, web, sessions, dir)
    }

    #[tokio::test]
    async fn dm_flows_end_to_end() {
        let (router, web, sessions, _dir) = fixture();
        router.handle_message(message("hello there")).await.unwrap();

        let replies = web.outbox().drain("conv-1");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text.as_deref(), Some("the answer"));

        let entry = sessions.get("agent:claw:web:conv-1").unwrap();
        assert_eq!(entry.model.as_deref(), Some("claude-opus-4-6"));
        assert_eq!(entry.last_provider.as_deref(), Some("web"));
        assert_eq!(entry.last_to.as_deref(), Some("conv-1"));
        assert!(entry.system_sent);
    }

    #[tokio::test]
    async fn repeated_dms_reuse_the_session() {
        let (router, _web, sessions, _dir) = fixture();
        router.handle_message(message("one")).await.unwrap();
        let first = sessions.get("agent:claw:web:conv-1").unwrap().session_id;
        router.handle_message(message("two")).await.unwrap();
        let second = sessions.get("agent:claw:web:conv-1").unwrap().session_id;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unconfigured_channel_is_dropped_silently() {
        let (router, web, _sessions, _dir) = fixture();
        let mut m = message("hi");
        m.channel = ChannelId::Signal;
        router.handle_message(m).await.unwrap();
        assert!(web.outbox().drain("conv-1").is_empty());
    }

    #[tokio::test]
    async fn group_without_mention_is_dropped() {
        let (router, web, _sessions, _dir) = fixture();
        let mut m = message("hi all");
        m.chat_type = ChatType::Group;
        m.group_id = Some("g1".into());
        // Open policy allows, but requireMention defaults to true.
        router.handle_message(m).await.unwrap();
        assert!(web.outbox().drain("conv-1").is_empty());
    }
}
