use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-channel config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a channel treats group messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    Open,
    Allowlist,
    Disabled,
}

/// Per-group rules under `groups`. The key `"*"` is a wildcard entry used
/// when no exact group id matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRules {
    #[serde(default)]
    pub require_mention: Option<bool>,
    #[serde(default)]
    pub allow_from: Vec<String>,
    /// Tool names usable in this group; `None` = no restriction.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    /// Per-sender tool overrides keyed by typed sender key.
    #[serde(default)]
    pub tools_by_sender: HashMap<String, Vec<String>>,
}

/// Configuration for one channel. The `accounts` records stay opaque here;
/// each plugin knows its own shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub default_account: Option<String>,
    #[serde(default)]
    pub group_policy: Option<GroupPolicy>,
    /// Channel-level mention default, overridable per group.
    #[serde(default)]
    pub require_mention: Option<bool>,
    /// Channel-level DM sender allowlist (typed sender keys).
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default)]
    pub groups: HashMap<String, GroupRules>,
    /// Account id → channel-specific record (tokens, webhook settings, …).
    #[serde(default)]
    pub accounts: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub thread_bindings: crate::config::ThreadBindingsConfig,
}

impl ChannelConfig {
    /// Account ids to start monitors for. Falls back to the single default
    /// account when no explicit accounts are configured.
    pub fn list_account_ids(&self) -> Vec<String> {
        if self.accounts.is_empty() {
            vec![self
                .default_account
                .clone()
                .unwrap_or_else(|| crate::channel::DEFAULT_ACCOUNT.into())]
        } else {
            let mut ids: Vec<String> = self.accounts.keys().cloned().collect();
            ids.sort();
            ids
        }
    }

    /// Effective group policy: explicit value wins; otherwise a non-empty
    /// `groups` table implies `allowlist`, and nothing at all implies `open`.
    pub fn effective_group_policy(&self) -> GroupPolicy {
        match self.group_policy {
            Some(p) => p,
            None if !self.groups.is_empty() => GroupPolicy::Allowlist,
            None => GroupPolicy::Open,
        }
    }
}

/// All channels, keyed by channel id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(flatten)]
    pub channels: HashMap<ChannelId, ChannelConfig>,
}

impl ChannelsConfig {
    pub fn get(&self, id: ChannelId) -> Option<&ChannelConfig> {
        self.channels.get(&id)
    }

    /// Channels that are enabled in config, in stable order.
    pub fn enabled(&self) -> Vec<(ChannelId, &ChannelConfig)> {
        let mut out: Vec<_> = self
            .channels
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(id, c)| (*id, c))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_accounts_defaults_to_sentinel() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.list_account_ids(), vec!["default"]);
    }

    #[test]
    fn list_accounts_sorted() {
        let mut cfg = ChannelConfig::default();
        cfg.accounts.insert("beta".into(), serde_json::json!({}));
        cfg.accounts.insert("alpha".into(), serde_json::json!({}));
        assert_eq!(cfg.list_account_ids(), vec!["alpha", "beta"]);
    }

    #[test]
    fn implicit_allowlist_when_groups_present() {
        let mut cfg = ChannelConfig::default();
        assert_eq!(cfg.effective_group_policy(), GroupPolicy::Open);
        cfg.groups.insert("g1".into(), GroupRules::default());
        assert_eq!(cfg.effective_group_policy(), GroupPolicy::Allowlist);
    }

    #[test]
    fn channels_parse_from_json() {
        let cfg: ChannelsConfig = serde_json::from_str(
            r#"{
                "telegram": {"enabled": true, "defaultAccount": "main"},
                "feishu": {"groupPolicy": "disabled"}
            }"#,
        )
        .unwrap();
        assert!(cfg.get(ChannelId::Telegram).unwrap().enabled);
        assert_eq!(
            cfg.get(ChannelId::Feishu).unwrap().group_policy,
            Some(GroupPolicy::Disabled)
        );
        assert_eq!(cfg.enabled().len(), 1);
    }
}
