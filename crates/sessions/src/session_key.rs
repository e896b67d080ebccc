//! Session key computation.
//!
//! Key template: `agent:<agentId>:<scope>` where `scope` is one of
//! - `main`                           (the agent's primary session)
//! - `acp:<opaque>`                   (ACP-spawned child)
//! - `subagent:<opaque>`              (in-process subagent child)
//! - `cron:<jobId>`                   (scheduled run)
//! - `<channel>:<conversationId>`     (channel conversation binding)

use oc_domain::ChannelId;

/// The scope half of a session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    Main,
    Acp { token: String },
    Subagent { token: String },
    Cron { job_id: String },
    Conversation {
        channel: ChannelId,
        conversation_id: String,
    },
}

impl SessionScope {
    /// Mint a fresh opaque ACP scope.
    pub fn fresh_acp() -> Self {
        SessionScope::Acp {
            token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Mint a fresh opaque subagent scope.
    pub fn fresh_subagent() -> Self {
        SessionScope::Subagent {
            token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

impl std::fmt::Display for SessionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionScope::Main => f.write_str("main"),
            SessionScope::Acp { token } => write!(f, "acp:{token}"),
            SessionScope::Subagent { token } => write!(f, "subagent:{token}"),
            SessionScope::Cron { job_id } => write!(f, "cron:{job_id}"),
            SessionScope::Conversation {
                channel,
                conversation_id,
            } => write!(f, "{channel}:{conversation_id}"),
        }
    }
}

/// Compute the stable session key for an agent + scope.
pub fn session_key(agent_id: &str, scope: &SessionScope) -> String {
    format!("agent:{agent_id}:{scope}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_scope() {
        assert_eq!(session_key("claw", &SessionScope::Main), "agent:claw:main");
    }

    #[test]
    fn cron_scope_is_deterministic() {
        let scope = SessionScope::Cron {
            job_id: "daily-digest".into(),
        };
        assert_eq!(session_key("claw", &scope), "agent:claw:cron:daily-digest");
    }

    #[test]
    fn conversation_scope_embeds_channel() {
        let scope = SessionScope::Conversation {
            channel: ChannelId::Web,
            conversation_id: "c42".into(),
        };
        assert_eq!(session_key("claw", &scope), "agent:claw:web:c42");
    }

    #[test]
    fn acp_scopes_are_unique() {
        let a = session_key("codex", &SessionScope::fresh_acp());
        let b = session_key("codex", &SessionScope::fresh_acp());
        assert!(a.starts_with("agent:codex:acp:"));
        assert_ne!(a, b);
    }

    #[test]
    fn subagent_scopes_are_unique() {
        let a = session_key("claw", &SessionScope::fresh_subagent());
        assert!(a.starts_with("agent:claw:subagent:"));
        assert_ne!(a, session_key("claw", &SessionScope::fresh_subagent()));
    }
}
