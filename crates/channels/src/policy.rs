//! Group/DM policy evaluation.
//!
//! Decides whether an inbound message is authorized before anything is
//! routed to an agent. Denials are silent drops at the channel edge; the
//! caller may log them.

use std::collections::HashSet;

use parking_lot::Mutex;

use oc_domain::config::{ChannelConfig, GroupPolicy, GroupRules};
use oc_domain::inbound::{ChatType, SenderRef};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    GroupPolicyDisabled,
    GroupChatNotAllowed,
    GroupPolicyAllowlistEmpty,
    GroupPolicyAllowlistUnauthorized,
    DmNotAllowed,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::GroupPolicyDisabled => "group-policy-disabled",
            DenyReason::GroupChatNotAllowed => "group-chat-not-allowed",
            DenyReason::GroupPolicyAllowlistEmpty => "group-policy-allowlist-empty",
            DenyReason::GroupPolicyAllowlistUnauthorized => "group-policy-allowlist-unauthorized",
            DenyReason::DmNotAllowed => "dm-not-allowed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow { require_mention: bool },
    Deny(DenyReason),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PolicyInput<'a> {
    pub cfg: &'a ChannelConfig,
    pub chat_type: ChatType,
    pub group_id: Option<&'a str>,
    pub sender: &'a SenderRef,
    pub require_mention_override: Option<bool>,
    /// Match group ids case-insensitively (some providers are sloppy).
    pub case_insensitive_groups: bool,
    /// Treat an empty effective allowlist as a denial instead of open.
    pub enforce_chat_allowlist: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Group evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluate the group decision table. Top match wins.
pub fn evaluate_group_policy(input: &PolicyInput<'_>) -> PolicyDecision {
    let is_group = input.chat_type == ChatType::Group;
    let policy = input.cfg.effective_group_policy();

    if policy == GroupPolicy::Disabled && is_group {
        return PolicyDecision::Deny(DenyReason::GroupPolicyDisabled);
    }
    if policy == GroupPolicy::Open {
        return PolicyDecision::Allow {
            require_mention: resolve_require_mention(input, None),
        };
    }

    // Allowlist (explicit or implied by a non-empty groups table).
    if !is_group {
        // DM policy is evaluated by the DM path.
        return PolicyDecision::Allow {
            require_mention: resolve_require_mention(input, None),
        };
    }

    let group_rules = resolve_group_rules(input);
    let group_rules = match group_rules {
        Some(rules) => rules,
        None => return PolicyDecision::Deny(DenyReason::GroupChatNotAllowed),
    };

    let effective_allow_from: &[String] = if group_rules.allow_from.is_empty() {
        &input.cfg.allow_from
    } else {
        &group_rules.allow_from
    };

    if effective_allow_from.is_empty() {
        if input.enforce_chat_allowlist {
            return PolicyDecision::Deny(DenyReason::GroupPolicyAllowlistEmpty);
        }
    } else if !effective_allow_from
        .iter()
        .any(|key| sender_matches(key, input.sender))
    {
        return PolicyDecision::Deny(DenyReason::GroupPolicyAllowlistUnauthorized);
    }

    PolicyDecision::Allow {
        require_mention: resolve_require_mention(input, group_rules.require_mention),
    }
}

/// Evaluate DM authorization against the channel-level allowlist. An empty
/// list means DMs are open.
pub fn evaluate_dm_policy(input: &PolicyInput<'_>) -> PolicyDecision {
    if input.cfg.allow_from.is_empty() {
        return PolicyDecision::Allow {
            require_mention: false,
        };
    }
    if input
        .cfg
        .allow_from
        .iter()
        .any(|key| sender_matches(key, input.sender))
    {
        PolicyDecision::Allow {
            require_mention: false,
        }
    } else {
        PolicyDecision::Deny(DenyReason::DmNotAllowed)
    }
}

fn resolve_group_rules<'a>(input: &'a PolicyInput<'_>) -> Option<&'a GroupRules> {
    let groups = &input.cfg.groups;
    if let Some(group_id) = input.group_id {
        if let Some(rules) = groups.get(group_id) {
            return Some(rules);
        }
        if input.case_insensitive_groups {
            let lowered = group_id.to_ascii_lowercase();
            if let Some((_, rules)) = groups
                .iter()
                .find(|(k, _)| k.to_ascii_lowercase() == lowered)
            {
                return Some(rules);
            }
        }
    }
    groups.get("*")
}

/// `requireMention` resolution chain: group rules, channel default, caller
/// override, then `true`.
fn resolve_require_mention(input: &PolicyInput<'_>, group_value: Option<bool>) -> bool {
    group_value
        .or(input.cfg.require_mention)
        .or(input.require_mention_override)
        .unwrap_or(true)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sender matching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Keys already warned about, so the unprefixed-key deprecation fires at
/// most once per distinct key.
static WARNED_KEYS: Mutex<Option<HashSet<String>>> = Mutex::new(None);

/// Match one allowlist key against a sender. Keys may carry a typed prefix
/// (`id:`, `e164:`, `username:`, `name:`) or be `*`. Unprefixed keys match
/// as `id:` for back-compat and log a deprecation warning once per key.
pub fn sender_matches(key: &str, sender: &SenderRef) -> bool {
    let key = key.trim();
    if key.is_empty() {
        return false;
    }
    if key == "*" {
        return true;
    }

    let (kind, value) = match key.split_once(':') {
        Some((kind, value)) if matches!(kind, "id" | "e164" | "username" | "name") => {
            (kind, value)
        }
        _ => {
            warn_unprefixed(key);
            ("id", key)
        }
    };

    let value = value.trim().to_lowercase();
    match kind {
        "id" => sender.id.trim().to_lowercase() == value,
        "e164" => sender
            .e164
            .as_deref()
            .is_some_and(|v| v.trim().to_lowercase() == value),
        "username" => sender.username.as_deref().is_some_and(|v| {
            v.trim().trim_start_matches('@').to_lowercase()
                == value.trim_start_matches('@')
        }),
        "name" => sender
            .name
            .as_deref()
            .is_some_and(|v| v.trim().to_lowercase() == value),
        _ => false,
    }
}

fn warn_unprefixed(key: &str) {
    let mut warned = WARNED_KEYS.lock();
    let set = warned.get_or_insert_with(HashSet::new);
    if set.insert(key.to_string()) {
        tracing::warn!(
            key = %key,
            "unprefixed allowFrom key matched as `id:`; prefix it explicitly (id:/e164:/username:/name:)"
        );
    }
}

/// The tool names a sender may use in a group, resolved from the group's
/// per-sender overrides with fallback to the group-wide list. `None` = no
/// restriction.
pub fn sender_tools<'a>(rules: &'a GroupRules, sender: &SenderRef) -> Option<&'a [String]> {
    for (key, tools) in &rules.tools_by_sender {
        if sender_matches(key, sender) {
            return Some(tools.as_slice());
        }
    }
    rules.tools.as_deref()
}
