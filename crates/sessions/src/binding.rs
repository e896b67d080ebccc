//! Session binding service — attaches freshly spawned child sessions to a
//! thread or conversation on the originating channel.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use oc_domain::ChannelId;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindTargetKind {
    Session,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BindingStatus {
    #[default]
    Active,
    Released,
}

/// The conversation a binding attaches to. `parent_conversation_id` is set
/// when the bound conversation is a thread spawned off another one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindConversation {
    pub channel: ChannelId,
    pub account_id: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_conversation_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BindRequest {
    pub target_session_key: String,
    pub target_kind: BindTargetKind,
    /// `"child"` for spawned children bound under a parent conversation.
    pub placement: String,
    pub conversation: BindConversation,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBinding {
    pub binding_id: String,
    pub target_session_key: String,
    pub target_kind: BindTargetKind,
    pub placement: String,
    pub conversation: BindConversation,
    pub status: BindingStatus,
    pub bound_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory registry of active bindings.
pub struct SessionBindingService {
    bindings: RwLock<HashMap<String, SessionBinding>>,
}

impl SessionBindingService {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub fn bind(&self, req: BindRequest) -> SessionBinding {
        let binding = SessionBinding {
            binding_id: uuid::Uuid::new_v4().to_string(),
            target_session_key: req.target_session_key,
            target_kind: req.target_kind,
            placement: req.placement,
            conversation: req.conversation,
            status: BindingStatus::Active,
            bound_at: Utc::now(),
            metadata: req.metadata,
        };
        tracing::debug!(
            binding_id = %binding.binding_id,
            session_key = %binding.target_session_key,
            conversation = %binding.conversation.conversation_id,
            "session bound"
        );
        self.bindings
            .write()
            .insert(binding.binding_id.clone(), binding.clone());
        binding
    }

    pub fn get(&self, binding_id: &str) -> Option<SessionBinding> {
        self.bindings.read().get(binding_id).cloned()
    }

    /// Active bindings whose conversation (or parent) matches.
    pub fn for_conversation(&self, channel: ChannelId, conversation_id: &str) -> Vec<SessionBinding> {
        self.bindings
            .read()
            .values()
            .filter(|b| {
                b.status == BindingStatus::Active
                    && b.conversation.channel == channel
                    && (b.conversation.conversation_id == conversation_id
                        || b.conversation.parent_conversation_id.as_deref()
                            == Some(conversation_id))
            })
            .cloned()
            .collect()
    }

    /// Active binding for a session key, if any.
    pub fn for_session(&self, session_key: &str) -> Option<SessionBinding> {
        self.bindings
            .read()
            .values()
            .find(|b| b.status == BindingStatus::Active && b.target_session_key == session_key)
            .cloned()
    }

    pub fn release(&self, binding_id: &str) -> bool {
        let mut bindings = self.bindings.write();
        match bindings.get_mut(binding_id) {
            Some(b) => {
                b.status = BindingStatus::Released;
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.bindings
            .read()
            .values()
            .filter(|b| b.status == BindingStatus::Active)
            .count()
    }
}

impl Default for SessionBindingService {
    fn default() -> Self {
        Self::new()
    }
}
