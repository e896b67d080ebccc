//! Agent event stream — what a running agent turn emits, and what the
//! delivery coordinator projects into chat actions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Started,
    Updated,
    Completed,
    Failed,
}

/// Events emitted during an agent turn (runtime-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant text.
    TextDelta { text: String },

    /// A tool call lifecycle event. `summary` is the user-visible one-liner;
    /// updates with `allow_edit` rewrite the original chat message in place.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        status: ToolCallStatus,
        summary: String,
        #[serde(default)]
        allow_edit: bool,
    },

    /// Out-of-band metadata (`usage_update`, `available_commands_update`, …).
    Meta {
        tag: String,
        #[serde(default)]
        data: serde_json::Value,
    },

    /// Terminal event: the assistant's final text for this turn.
    Final { text: String },

    /// Terminal event: the turn failed.
    Error { message: String },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Final { .. } | AgentEvent::Error { .. })
    }
}

/// Token usage reported via `Meta { tag: "usage_update" }` payloads.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Display metadata for formatting a tool-call summary, keyed by tool name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDisplay {
    pub emoji: String,
    pub title: String,
    pub label: String,
    /// Argument keys worth surfacing in the summary line.
    #[serde(default)]
    pub detail_keys: Vec<String>,
}

impl ToolDisplay {
    /// Render a one-line summary for a tool call with the given arguments.
    pub fn summarize(&self, args: &serde_json::Value) -> String {
        let details: Vec<String> = self
            .detail_keys
            .iter()
            .filter_map(|k| {
                args.get(k).map(|v| match v {
                    serde_json::Value::String(s) => format!("{k}={s}"),
                    other => format!("{k}={other}"),
                })
            })
            .collect();
        if details.is_empty() {
            format!("{} {}", self.emoji, self.title)
        } else {
            format!("{} {} ({})", self.emoji, self.title, details.join(", "))
        }
    }
}
