//! Channel identifiers — the closed set of chat providers the gateway can
//! host accounts for.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A chat provider integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    Telegram,
    Slack,
    Discord,
    Matrix,
    Feishu,
    Googlechat,
    Msteams,
    Nextcloudtalk,
    Zalo,
    Bluebubbles,
    Signal,
    Whatsapp,
    Imessage,
    Web,
}

impl ChannelId {
    pub const ALL: [ChannelId; 14] = [
        ChannelId::Telegram,
        ChannelId::Slack,
        ChannelId::Discord,
        ChannelId::Matrix,
        ChannelId::Feishu,
        ChannelId::Googlechat,
        ChannelId::Msteams,
        ChannelId::Nextcloudtalk,
        ChannelId::Zalo,
        ChannelId::Bluebubbles,
        ChannelId::Signal,
        ChannelId::Whatsapp,
        ChannelId::Imessage,
        ChannelId::Web,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::Telegram => "telegram",
            ChannelId::Slack => "slack",
            ChannelId::Discord => "discord",
            ChannelId::Matrix => "matrix",
            ChannelId::Feishu => "feishu",
            ChannelId::Googlechat => "googlechat",
            ChannelId::Msteams => "msteams",
            ChannelId::Nextcloudtalk => "nextcloudtalk",
            ChannelId::Zalo => "zalo",
            ChannelId::Bluebubbles => "bluebubbles",
            ChannelId::Signal => "signal",
            ChannelId::Whatsapp => "whatsapp",
            ChannelId::Imessage => "imessage",
            ChannelId::Web => "web",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelId::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| crate::Error::Config(format!("unknown channel: {s}")))
    }
}

/// Normalize an account id: trim, lowercase, `"default"` when omitted or
/// empty.
pub fn normalize_account_id(raw: Option<&str>) -> String {
    match raw {
        Some(s) => {
            let s = s.trim().to_ascii_lowercase();
            if s.is_empty() {
                DEFAULT_ACCOUNT.into()
            } else {
                s
            }
        }
        None => DEFAULT_ACCOUNT.into(),
    }
}

/// Sentinel account id used when a channel config names no account.
pub const DEFAULT_ACCOUNT: &str = "default";
