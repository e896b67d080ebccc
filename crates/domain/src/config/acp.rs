use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ACP (out-of-process agent runtimes)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcpConfig {
    /// Agent ids that may be spawned over ACP.
    #[serde(default)]
    pub allowed_agents: Vec<String>,
    /// Agent used when a spawn request names none.
    #[serde(default)]
    pub default_agent: Option<String>,
}

/// Thread-binding behavior for a channel: whether spawned children may be
/// bound to freshly created threads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadBindingsConfig {
    /// Must be `true` for ACP-runtime thread spawns on this channel.
    #[serde(default)]
    pub spawn_acp_sessions: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deny_acp_thread_spawns() {
        let tb = ThreadBindingsConfig::default();
        assert!(!tb.spawn_acp_sessions);
    }

    #[test]
    fn parses_from_json() {
        let acp: AcpConfig = serde_json::from_str(
            r#"{"allowedAgents": ["codex", "claw"], "defaultAgent": "claw"}"#,
        )
        .unwrap();
        assert_eq!(acp.allowed_agents, vec!["codex", "claw"]);
        assert_eq!(acp.default_agent.as_deref(), Some("claw"));
    }
}
