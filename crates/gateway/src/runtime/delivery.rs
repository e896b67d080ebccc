//! ACP delivery coordinator — projects an agent event stream into chat
//! send/edit actions.
//!
//! One coordinator per active turn. Tool-call events edit their original
//! chat message in place, keyed by `tool_call_id`; identical payloads are
//! suppressed; assistant text is buffered and flushed once at the terminal
//! event. When the provider reports the edit target is gone, exactly one
//! replacement message is sent and the cache repointed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use oc_acp_protocol::AgentEvent;
use oc_channels::registry::{MessagingAdapter, ResolvedAccount};
use oc_domain::inbound::OutboundRequest;
use oc_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Buffer assistant text; emit once per turn at the terminal event.
    #[default]
    FinalOnly,
    /// Emit assistant text deltas as they arrive.
    Streaming,
}

/// Meta tags never surfaced to chat.
fn default_hidden_tags() -> HashSet<String> {
    ["usage_update", "available_commands_update"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Directive tags like `[[reply_to_current]]`: consumed by the gateway,
/// never shown. A final text reducing to directives only still produces a
/// structured message with an empty text block.
pub fn strip_directive_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[[") {
        out.push_str(&rest[..start]);
        match rest[start..].find("]]") {
            Some(end) => rest = &rest[start + end + 2..],
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Whether a messaging error means the edit target no longer exists.
pub fn is_message_gone(error: &oc_domain::Error) -> bool {
    let msg = error.to_string();
    let lower = msg.to_ascii_lowercase();
    lower.contains("message not found")
        || lower.contains("withdrawn")
        || oc_channels::plugins::feishu::MESSAGE_GONE_CODES
            .iter()
            .any(|code| msg.contains(&code.to_string()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DeliveryCoordinator {
    messaging: Arc<dyn MessagingAdapter>,
    account: ResolvedAccount,
    to: String,
    thread_id: Option<String>,
    mode: DeliveryMode,
    hidden_tags: HashSet<String>,
    /// tool_call_id → last chat message id.
    edit_keys: HashMap<String, String>,
    /// Suppression hashes of the last-delivered payload per key.
    last_hash: HashMap<String, [u8; 32]>,
    buffered_text: String,
    flushed: bool,
}

impl DeliveryCoordinator {
    pub fn new(
        messaging: Arc<dyn MessagingAdapter>,
        account: ResolvedAccount,
        to: impl Into<String>,
        thread_id: Option<String>,
    ) -> Self {
        Self {
            messaging,
            account,
            to: to.into(),
            thread_id,
            mode: DeliveryMode::FinalOnly,
            hidden_tags: default_hidden_tags(),
            edit_keys: HashMap::new(),
            last_hash: HashMap::new(),
            buffered_text: String::new(),
            flushed: false,
        }
    }

    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    fn payload_hash(text: &str) -> [u8; 32] {
        Sha256::digest(text.as_bytes()).into()
    }

    fn outbound(&self, text: String) -> OutboundRequest {
        OutboundRequest {
            to: self.to.clone(),
            text: Some(text),
            thread_id: self.thread_id.clone(),
            ..Default::default()
        }
    }

    /// Project one event. Events for one coordinator are handled strictly
    /// in order; no two sends for the same tool call can interleave.
    pub async fn handle_event(&mut self, event: &AgentEvent) -> Result<()> {
        match event {
            AgentEvent::TextDelta { text } => match self.mode {
                DeliveryMode::FinalOnly => {
                    self.buffered_text.push_str(text);
                    Ok(())
                }
                DeliveryMode::Streaming => {
                    self.messaging
                        .send(&self.account, &self.outbound(text.clone()))
                        .await?;
                    Ok(())
                }
            },
            AgentEvent::ToolCall {
                tool_call_id,
                summary,
                allow_edit,
                ..
            } => self.deliver_tool_line(tool_call_id, summary, *allow_edit).await,
            AgentEvent::Meta { tag, .. } => {
                if !self.hidden_tags.contains(tag) {
                    tracing::debug!(tag = %tag, "unhandled meta event");
                }
                Ok(())
            }
            AgentEvent::Final { text } => self.flush_final(text).await,
            AgentEvent::Error { message } => {
                self.messaging
                    .send(&self.account, &self.outbound(format!("Error: {message}")))
                    .await?;
                Ok(())
            }
        }
    }

    async fn deliver_tool_line(
        &mut self,
        tool_call_id: &str,
        summary: &str,
        allow_edit: bool,
    ) -> Result<()> {
        let hash = Self::payload_hash(summary);
        if self.last_hash.get(tool_call_id) == Some(&hash) {
            return Ok(());
        }

        let existing = self.edit_keys.get(tool_call_id).cloned();
        match existing {
            Some(message_id) if allow_edit => {
                match self
                    .messaging
                    .edit(&self.account, &message_id, &self.outbound(summary.to_string()))
                    .await
                {
                    Ok(receipt) => {
                        self.edit_keys
                            .insert(tool_call_id.to_string(), receipt.message_id);
                    }
                    Err(e) if is_message_gone(&e) => {
                        tracing::debug!(tool_call_id, error = %e, "edit target gone; sending replacement");
                        let receipt = self
                            .messaging
                            .send(&self.account, &self.outbound(summary.to_string()))
                            .await?;
                        self.edit_keys
                            .insert(tool_call_id.to_string(), receipt.message_id);
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => {
                let receipt = self
                    .messaging
                    .send(&self.account, &self.outbound(summary.to_string()))
                    .await?;
                self.edit_keys
                    .insert(tool_call_id.to_string(), receipt.message_id);
            }
        }

        self.last_hash.insert(tool_call_id.to_string(), hash);
        Ok(())
    }

    async fn flush_final(&mut self, terminal_text: &str) -> Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;

        let mut text = std::mem::take(&mut self.buffered_text);
        if !terminal_text.is_empty() {
            text = terminal_text.to_string();
        }
        // Directive-only content still yields a message object; the text
        // block is blanked, never shown and never absent.
        let cleaned = strip_directive_tags(&text);
        self.messaging
            .send(&self.account, &self.outbound(cleaned))
            .await?;
        Ok(())
    }
}
