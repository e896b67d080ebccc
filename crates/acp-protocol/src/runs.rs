//! Subagent run records and the `sessions_spawn` tool surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpawnRuntime {
    #[default]
    Subagent,
    Acp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpawnMode {
    #[default]
    Run,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    #[default]
    Keep,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    #[default]
    Inherit,
    Require,
}

/// Attachment snapshotted by value into a spawn request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnAttachment {
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// `sessions_spawn` tool input.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SpawnParams {
    pub task: String,
    #[serde(default)]
    pub runtime: SpawnRuntime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub mode: SpawnMode,
    #[serde(default)]
    pub thread: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub cleanup: CleanupMode,
    #[serde(default)]
    pub sandbox: SandboxMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<SpawnAttachment>,
}

/// One tracked child run in the in-memory subagent registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentRunRecord {
    pub run_id: String,
    pub child_session_key: String,
    pub requester_session_key: String,
    /// Human-readable requester label for announcements.
    pub requester_display_key: String,
    pub task: String,
    pub cleanup: CleanupMode,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expects_completion_message: bool,
    #[serde(default)]
    pub announce_retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_params_default_runtime_and_mode() {
        let p: SpawnParams =
            serde_json::from_str(r#"{"task": "Investigate flaky tests"}"#).unwrap();
        assert_eq!(p.runtime, SpawnRuntime::Subagent);
        assert_eq!(p.mode, SpawnMode::Run);
        assert_eq!(p.cleanup, CleanupMode::Keep);
        assert!(!p.thread);
    }

    #[test]
    fn spawn_params_parse_acp_session_thread() {
        let p: SpawnParams = serde_json::from_str(
            r#"{"task": "t", "runtime": "acp", "agentId": "codex",
                "mode": "session", "thread": true, "cleanup": "delete"}"#,
        )
        .unwrap();
        assert_eq!(p.runtime, SpawnRuntime::Acp);
        assert_eq!(p.mode, SpawnMode::Session);
        assert_eq!(p.cleanup, CleanupMode::Delete);
        assert!(p.thread);
    }
}
