//! Production [`SpawnDispatcher`]: threads through the channel's messaging
//! adapter, task dispatch through the agent runtime with delivery back to
//! the bound conversation.

use std::sync::Arc;

use oc_channels::registry::ChannelRegistry;
use oc_domain::config::Config;
use oc_domain::inbound::OutboundRequest;
use oc_domain::{ChannelId, Error, Result};
use oc_sessions::SessionStore;

use crate::runtime::subagents::{DispatchRequest, SpawnDispatcher};
use crate::runtime::{run_with_model_fallback, AgentRuntime, TurnRequest};

pub struct ChannelSpawnDispatcher {
    config: Arc<Config>,
    registry: Arc<ChannelRegistry>,
    runtime: Arc<dyn AgentRuntime>,
    sessions: Arc<SessionStore>,
}

impl ChannelSpawnDispatcher {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<ChannelRegistry>,
        runtime: Arc<dyn AgentRuntime>,
        sessions: Arc<SessionStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            runtime,
            sessions,
        })
    }

    /// Session keys look like `agent:<agentId>:<scope>`.
    fn agent_of(session_key: &str) -> String {
        session_key
            .split(':')
            .nth(1)
            .unwrap_or("main")
            .to_string()
    }
}

#[async_trait::async_trait]
impl SpawnDispatcher for ChannelSpawnDispatcher {
    async fn create_thread(
        &self,
        channel: ChannelId,
        account_id: &str,
        parent_conversation_id: &str,
        title: &str,
    ) -> Result<String> {
        let plugin = self.registry.get(channel).ok_or_else(|| Error::Channel {
            channel: channel.to_string(),
            message: "no plugin registered".into(),
        })?;
        let cfg = self
            .config
            .channels
            .get(channel)
            .cloned()
            .unwrap_or_default();
        let account = plugin.resolve_account(&cfg, account_id)?;
        let messaging = plugin.messaging().ok_or_else(|| Error::Channel {
            channel: channel.to_string(),
            message: "no messaging adapter".into(),
        })?;

        match messaging
            .create_thread(&account, parent_conversation_id, title)
            .await
        {
            Ok(thread_id) => Ok(thread_id),
            Err(Error::ToolInput(_)) => {
                tracing::debug!(channel = %channel, "channel has no threads; binding parent conversation");
                Ok(parent_conversation_id.to_string())
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch(&self, req: DispatchRequest) -> Result<()> {
        let agent_id = Self::agent_of(&req.session_key);
        let agent_cfg = self
            .config
            .agents
            .get(&agent_id)
            .cloned()
            .unwrap_or_default();
        let chain = agent_cfg.model_chain(&self.config.models)?;
        let (entry, is_new) = self.sessions.resolve_or_create(&req.session_key, false)?;

        let turn = TurnRequest {
            session_key: req.session_key.clone(),
            session_id: entry.session_id.clone(),
            agent_id,
            task: req.task.clone(),
            model: chain.primary.clone(),
            cli_session_id: entry.cli_session_id_for(&chain.primary.provider, is_new),
            cwd: agent_cfg.cwd.clone(),
            system_prompt: None,
        };

        // Fire-and-forget: the child's first turn runs off the spawn path.
        let runtime = self.runtime.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let outcome = match run_with_model_fallback(runtime.as_ref(), &chain, &turn).await {
                Ok((outcome, _)) => outcome,
                Err(e) => {
                    tracing::error!(session_key = %turn.session_key, error = %e, "spawned turn failed");
                    return;
                }
            };
            if !req.deliver {
                return;
            }
            let target = req.to.strip_prefix("channel:").unwrap_or(&req.to);
            let Some(plugin) = registry.get(req.channel) else {
                return;
            };
            let Some(messaging) = plugin.messaging() else {
                return;
            };
            let cfg = config.channels.get(req.channel).cloned().unwrap_or_default();
            let Ok(account) = plugin.resolve_account(&cfg, &req.account_id) else {
                return;
            };
            let _ = messaging
                .send(
                    &account,
                    &OutboundRequest {
                        to: target.to_string(),
                        text: Some(outcome.final_text),
                        thread_id: req.thread_id.clone(),
                        ..Default::default()
                    },
                )
                .await;
        });
        Ok(())
    }
}
