//! Normalized inbound-event metadata.
//!
//! Channel monitors project provider SDK payloads into these types at the
//! monitor boundary; nothing downstream ever sees a provider-shaped event.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;

/// Where in a channel a message arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

/// The sender of an inbound message, with every identity facet a channel
/// might expose. Policy matching keys off these fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderRef {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    /// E.164 phone number, for phone-keyed channels (WhatsApp, Signal).
    #[serde(default)]
    pub e164: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A normalized inbound message event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: ChannelId,
    pub account_id: String,
    pub chat_type: ChatType,
    /// Reply container: the conversation the reply goes back to.
    pub conversation_id: String,
    /// Group/space/guild id for group messages; `None` for DMs.
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub sender: SenderRef,
    pub text: String,
    /// Platform-native message id, used for replay dedup and reply threading.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Provider event name (e.g. `im.message.receive_v1`), used with
    /// `message_id` as the dedup key.
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub was_mentioned: bool,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
}

impl InboundMessage {
    pub fn is_direct(&self) -> bool {
        self.chat_type == ChatType::Direct
    }

    /// Dedup key: `(event_name, message_id)`. `None` when the provider gave
    /// us no message id to key on.
    pub fn dedup_key(&self) -> Option<String> {
        let message_id = self.message_id.as_deref()?;
        let event = self.event_name.as_deref().unwrap_or("message");
        Some(format!("{event}:{message_id}"))
    }
}

/// Outbound message request handed to a channel's messaging adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub to: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub card: Option<serde_json::Value>,
    #[serde(default)]
    pub reply_to_message_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// What a messaging adapter reports back after a send/edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundReceipt {
    pub message_id: String,
}
