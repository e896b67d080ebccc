use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which interface the gateway binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    #[default]
    Loopback,
    Lan,
    Tailnet,
    Custom,
}

impl BindMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindMode::Loopback => "loopback",
            BindMode::Lan => "lan",
            BindMode::Tailnet => "tailnet",
            BindMode::Custom => "custom",
        }
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self, BindMode::Loopback)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub bind: BindMode,
    /// Bind host for `bind = "custom"`; ignored otherwise.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub auth: GatewayAuthConfig,
    #[serde(default)]
    pub control_ui: ControlUiConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: BindMode::Loopback,
            host: None,
            port: d_port(),
            auth: GatewayAuthConfig::default(),
            control_ui: ControlUiConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// The concrete address the listener binds.
    pub fn bind_host(&self) -> String {
        match self.bind {
            BindMode::Loopback => "127.0.0.1".into(),
            BindMode::Lan | BindMode::Tailnet => "0.0.0.0".into(),
            BindMode::Custom => self
                .host
                .clone()
                .unwrap_or_else(|| "127.0.0.1".into()),
        }
    }
}

fn d_port() -> u16 {
    18789
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    #[default]
    Token,
    Device,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    #[serde(default)]
    pub mode: GatewayAuthMode,
    /// Inline token. Prefer `tokenEnv` in anything beyond a scratch setup.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "d_token_env")]
    pub token_env: String,
}

impl Default for GatewayAuthConfig {
    fn default() -> Self {
        Self {
            mode: GatewayAuthMode::Token,
            token: None,
            token_env: d_token_env(),
        }
    }
}

impl GatewayAuthConfig {
    /// Resolve the effective token: inline config value first, then the
    /// named environment variable.
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(t) = &self.token {
            if !t.is_empty() {
                return Some(t.clone());
            }
        }
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

fn d_token_env() -> String {
    "OPENCLAW_GATEWAY_TOKEN".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control UI
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ControlUiConfig {
    /// Origins accepted by the browser origin check. `"*"` (trim-tolerant)
    /// accepts anything.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Legacy fallback: when no Origin header is present, accept a Host
    /// header matching the bind address. Off unless explicitly enabled.
    #[serde(default)]
    pub allow_legacy_host_header: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_18789() {
        let g = GatewayConfig::default();
        assert_eq!(g.bind, BindMode::Loopback);
        assert_eq!(g.port, 18789);
        assert_eq!(g.bind_host(), "127.0.0.1");
    }

    #[test]
    fn lan_binds_all_interfaces() {
        let g = GatewayConfig {
            bind: BindMode::Lan,
            ..Default::default()
        };
        assert_eq!(g.bind_host(), "0.0.0.0");
    }

    #[test]
    fn custom_uses_configured_host() {
        let g = GatewayConfig {
            bind: BindMode::Custom,
            host: Some("192.168.1.7".into()),
            ..Default::default()
        };
        assert_eq!(g.bind_host(), "192.168.1.7");
    }

    #[test]
    fn token_resolution_prefers_inline() {
        let auth = GatewayAuthConfig {
            token: Some("tok".into()),
            ..Default::default()
        };
        assert_eq!(auth.resolve_token().as_deref(), Some("tok"));
    }

    #[test]
    fn bind_mode_parses_from_json() {
        let g: GatewayConfig =
            serde_json::from_str(r#"{"bind":"lan","auth":{"mode":"token","token":"tok"}}"#)
                .unwrap();
        assert_eq!(g.bind, BindMode::Lan);
        assert_eq!(g.auth.token.as_deref(), Some("tok"));
        assert_eq!(g.port, 18789);
    }
}
