mod acp;
mod agents;
mod channels;
mod cron;
mod gateway;

pub use acp::*;
pub use agents::*;
pub use channels::*;
pub use cron::*;
pub use gateway::*;

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    /// Agent definitions (key = agent id).
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub acp: AcpConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub meta: MetaConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_touched_at: Option<DateTime<Utc>>,
}

impl Config {
    /// Parse `openclaw.json`. An absent file yields the defaults; malformed
    /// JSON is a hard error.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(Error::Json)?;
        std::fs::write(path, json).map_err(Error::Io)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Migration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Apply in-place migrations, returning one human-readable line per
    /// change. Currently: seed control-UI origins when the gateway binds a
    /// non-loopback interface and no origins are configured — otherwise the
    /// browser origin check would lock the operator out of their own UI.
    pub fn migrate(&mut self) -> Vec<String> {
        let mut changes = Vec::new();

        if !self.gateway.bind.is_loopback() && self.gateway.control_ui.allowed_origins.is_empty() {
            let port = self.gateway.port;
            let mut origins = vec![
                format!("http://localhost:{port}"),
                format!("http://127.0.0.1:{port}"),
            ];
            if self.gateway.bind == BindMode::Custom {
                if let Some(host) = &self.gateway.host {
                    if !host.is_empty() {
                        origins.push(format!("http://{host}:{port}"));
                    }
                }
            }
            changes.push(format!(
                "gateway.controlUi.allowedOrigins: seeded {origins:?} (bind={})",
                self.gateway.bind.as_str()
            ));
            self.gateway.control_ui.allowed_origins = origins;
        }

        changes
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.gateway.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "gateway.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.gateway.bind == BindMode::Custom
            && self.gateway.host.as_deref().unwrap_or("").is_empty()
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "gateway.host".into(),
                message: "bind=custom requires a host".into(),
            });
        }

        if !self.gateway.bind.is_loopback() && self.gateway.auth.resolve_token().is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "gateway.auth".into(),
                message: format!(
                    "bind={} exposes the gateway beyond loopback; configure auth.token or {}",
                    self.gateway.bind.as_str(),
                    self.gateway.auth.token_env
                ),
            });
        }

        if let Some(agent) = &self.acp.default_agent {
            if !self.acp.allowed_agents.contains(agent) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: "acp.defaultAgent".into(),
                    message: format!("default agent `{agent}` is not in acp.allowedAgents"),
                });
            }
        }

        for (id, agent) in &self.agents {
            if let Some(model) = &agent.model {
                if parse_model_ref(model).is_err() {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        field: format!("agents.{id}.model"),
                        message: format!("malformed model reference: `{model}`"),
                    });
                }
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn lan_bind_without_auth_is_an_error() {
        let mut cfg = Config::default();
        cfg.gateway.bind = BindMode::Lan;
        // Point token_env at something that can't be set in this environment.
        cfg.gateway.auth.token_env = "OPENCLAW_TEST_UNSET_TOKEN".into();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "gateway.auth" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn migration_seeds_origins_for_lan_bind() {
        let mut cfg: Config = serde_json::from_str(
            r#"{"gateway":{"bind":"lan","auth":{"mode":"token","token":"tok"}}}"#,
        )
        .unwrap();
        let changes = cfg.migrate();

        assert_eq!(
            cfg.gateway.control_ui.allowed_origins,
            vec![
                "http://localhost:18789".to_string(),
                "http://127.0.0.1:18789".to_string(),
            ]
        );
        assert_eq!(changes.len(), 1);
        assert!(changes[0].contains("gateway.controlUi.allowedOrigins"));
        assert!(changes[0].contains("bind=lan"));
    }

    #[test]
    fn migration_respects_existing_origins() {
        let mut cfg = Config::default();
        cfg.gateway.bind = BindMode::Lan;
        cfg.gateway.control_ui.allowed_origins = vec!["http://example.test".into()];
        assert!(cfg.migrate().is_empty());
        assert_eq!(
            cfg.gateway.control_ui.allowed_origins,
            vec!["http://example.test".to_string()]
        );
    }

    #[test]
    fn migration_skips_loopback_bind() {
        let mut cfg = Config::default();
        assert!(cfg.migrate().is_empty());
        assert!(cfg.gateway.control_ui.allowed_origins.is_empty());
    }

    #[test]
    fn migration_adds_custom_bind_host_origin() {
        let mut cfg = Config::default();
        cfg.gateway.bind = BindMode::Custom;
        cfg.gateway.host = Some("10.0.0.5".into());
        cfg.migrate();
        assert!(cfg
            .gateway
            .control_ui
            .allowed_origins
            .contains(&"http://10.0.0.5:18789".to_string()));
    }

    #[test]
    fn load_absent_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("openclaw.json")).unwrap();
        assert_eq!(cfg.gateway.port, 18789);
    }

    #[test]
    fn load_malformed_json_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openclaw.json");
        std::fs::write(&path, "{nope").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
