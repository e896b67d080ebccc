//! Exec approval wire types (`exec.approval.request` / `waitDecision`).

use serde::{Deserialize, Serialize};

pub const DEFAULT_APPROVAL_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_APPROVAL_TIMEOUT_MS: u64 = 10 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalHost {
    #[default]
    Gateway,
    Node,
}

/// Where the turn requesting the approval came from, for routing the ask
/// back to a human.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSource {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Phase 1 payload: register an approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_argv: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<std::collections::HashMap<String, String>>,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default)]
    pub host: ApprovalHost,
    /// Security mode label from the agent's sandbox config.
    #[serde(default)]
    pub security: Option<String>,
    /// Ask mode label ("always", "on-miss", …); opaque to the coordinator.
    #[serde(default)]
    pub ask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_source: Option<TurnSource>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub two_phase: bool,
}

/// Phase 1 result. When `decision` is present the request was resolved at
/// registration time (auto-approve rules) and no wait is needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRegistration {
    pub id: String,
    pub expires_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}
