//! Secrets apply plan.
//!
//! A plan replaces plaintext secret values in `openclaw.json` with ref
//! envelopes pointing at an external secret source, optionally scrubbing
//! `.env`, auth profiles, and the legacy `auth.json`. Application is
//! idempotent: re-applying a plan yields byte-identical config modulo
//! `meta.lastTouchedAt`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use oc_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub source: String,
    pub provider: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTarget {
    #[serde(rename = "type")]
    pub kind: String,
    /// Dotted config path ending at the secret leaf (e.g.
    /// `channels.telegram.accounts.main.botToken`).
    pub path: String,
    #[serde(default)]
    pub path_segments: Option<Vec<String>>,
    #[serde(default)]
    pub provider_id: Option<String>,
    pub r#ref: SecretRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOptions {
    #[serde(default)]
    pub scrub_env: bool,
    #[serde(default)]
    pub scrub_auth_profiles_for_provider_targets: bool,
    #[serde(default)]
    pub scrub_legacy_auth_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsPlan {
    pub version: u32,
    pub protocol_version: u32,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub generated_by: Option<String>,
    pub targets: Vec<PlanTarget>,
    #[serde(default)]
    pub options: Option<PlanOptions>,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub replaced: Vec<String>,
    pub already_applied: Vec<String>,
    pub scrubbed_env_lines: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Secret-bearing leaf names a plan may target. Refusing everything else
/// keeps a malformed plan from rewriting structure.
const ALLOWED_LEAVES: &[&str] = &[
    "token",
    "botToken",
    "apiKey",
    "appSecret",
    "verificationToken",
    "tenantAccessToken",
    "webhookSecret",
    "password",
];

fn segments_of(target: &PlanTarget) -> Vec<String> {
    match &target.path_segments {
        Some(segs) => segs.clone(),
        None => target.path.split('.').map(String::from).collect(),
    }
}

fn validate_target(target: &PlanTarget) -> Result<Vec<String>> {
    let segments = segments_of(target);
    if segments.is_empty() {
        return Err(Error::Config(format!("empty target path: `{}`", target.path)));
    }
    if segments
        .iter()
        .any(|s| s == "__proto__" || s == "constructor" || s == "prototype")
    {
        return Err(Error::Config(format!(
            "refusing prototype-polluting path: `{}`",
            target.path
        )));
    }
    let leaf = segments.last().map(String::as_str).unwrap_or_default();
    if !ALLOWED_LEAVES.contains(&leaf) {
        return Err(Error::Config(format!(
            "target path does not end at a known secret leaf: `{}`",
            target.path
        )));
    }
    Ok(segments)
}

fn lookup_mut<'a>(root: &'a mut Value, segments: &[String]) -> Option<&'a mut Value> {
    let mut cursor = root;
    for segment in segments {
        cursor = cursor.as_object_mut()?.get_mut(segment)?;
    }
    Some(cursor)
}

fn ref_envelope(secret_ref: &SecretRef) -> Value {
    serde_json::json!({
        "$secret": {
            "source": secret_ref.source,
            "provider": secret_ref.provider,
            "id": secret_ref.id,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Application
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn load_plan(path: &Path) -> Result<SecretsPlan> {
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    let plan: SecretsPlan = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("parsing plan {}: {e}", path.display())))?;
    if plan.version != 1 || plan.protocol_version != 1 {
        return Err(Error::Config(format!(
            "unsupported plan version {}/{}",
            plan.version, plan.protocol_version
        )));
    }
    Ok(plan)
}

/// Apply a plan to a parsed config document. Returns the migrated plaintext
/// values (for `.env` scrubbing) alongside the report.
pub fn apply_to_config(
    config: &mut Value,
    plan: &SecretsPlan,
) -> Result<(ApplyReport, Vec<String>)> {
    let mut report = ApplyReport::default();
    let mut migrated_plaintexts = Vec::new();

    for target in &plan.targets {
        let segments = validate_target(target)?;
        let Some(slot) = lookup_mut(config, &segments) else {
            tracing::warn!(path = %target.path, "plan target not present in config; skipping");
            continue;
        };

        let envelope = ref_envelope(&target.r#ref);
        if *slot == envelope {
            report.already_applied.push(target.path.clone());
            continue;
        }
        if let Some(plaintext) = slot.as_str() {
            migrated_plaintexts.push(plaintext.to_string());
        }
        *slot = envelope;
        report.replaced.push(target.path.clone());
    }

    Ok((report, migrated_plaintexts))
}

/// Scrub `.env` lines whose value matches a migrated plaintext. Returns the
/// rewritten content and the number of removed lines.
pub fn scrub_env(content: &str, migrated: &[String]) -> (String, usize) {
    let migrated: HashSet<&str> = migrated.iter().map(String::as_str).collect();
    let mut kept = Vec::new();
    let mut removed = 0;
    for line in content.lines() {
        let value = line.split_once('=').map(|(_, v)| v.trim());
        let scrub = value
            .map(|v| migrated.contains(v.trim_matches('"').trim_matches('\'')))
            .unwrap_or(false);
        if scrub {
            removed += 1;
        } else {
            kept.push(line);
        }
    }
    let mut out = kept.join("\n");
    if content.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    (out, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_json(path: &str) -> SecretsPlan {
        serde_json::from_value(serde_json::json!({
            "version": 1,
            "protocolVersion": 1,
            "generatedAt": "2026-07-01T00:00:00Z",
            "generatedBy": "openclaw secrets plan",
            "targets": [{
                "type": "config",
                "path": path,
                "ref": {"source": "vault", "provider": "op", "id": "item-1"}
            }]
        }))
        .unwrap()
    }

    fn config_with_token() -> Value {
        serde_json::json!({
            "channels": {
                "telegram": {
                    "accounts": {"main": {"botToken": "123:plaintext"}}
                }
            }
        })
    }

    #[test]
    fn replaces_plaintext_with_ref_envelope() {
        let mut config = config_with_token();
        let plan = plan_json("channels.telegram.accounts.main.botToken");
        let (report, migrated) = apply_to_config(&mut config, &plan).unwrap();

        assert_eq!(report.replaced.len(), 1);
        assert_eq!(migrated, vec!["123:plaintext".to_string()]);
        let slot = &config["channels"]["telegram"]["accounts"]["main"]["botToken"];
        assert_eq!(slot["$secret"]["provider"], "op");
    }

    #[test]
    fn apply_is_idempotent() {
        let mut config = config_with_token();
        let plan = plan_json("channels.telegram.accounts.main.botToken");
        apply_to_config(&mut config, &plan).unwrap();
        let first = config.clone();
        let (report, migrated) = apply_to_config(&mut config, &plan).unwrap();

        assert!(report.replaced.is_empty());
        assert_eq!(report.already_applied.len(), 1);
        assert!(migrated.is_empty());
        assert_eq!(config, first);
    }

    #[test]
    fn refuses_non_leaf_targets() {
        let mut config = config_with_token();
        let plan = plan_json("channels.telegram.accounts.main.baseUrl");
        assert!(apply_to_config(&mut config, &plan).is_err());
    }

    #[test]
    fn refuses_proto_segments() {
        let mut config = config_with_token();
        let plan = plan_json("__proto__.botToken");
        assert!(apply_to_config(&mut config, &plan).is_err());
    }

    #[test]
    fn missing_target_is_skipped_not_fatal() {
        let mut config = serde_json::json!({});
        let plan = plan_json("channels.zalo.accounts.main.botToken");
        let (report, _) = apply_to_config(&mut config, &plan).unwrap();
        assert!(report.replaced.is_empty());
        assert!(report.already_applied.is_empty());
    }

    #[test]
    fn env_scrub_removes_matching_values_only() {
        let env = "KEEP=safe\nTELEGRAM_TOKEN=123:plaintext\nQUOTED=\"123:plaintext\"\n";
        let (out, removed) = scrub_env(env, &["123:plaintext".to_string()]);
        assert_eq!(removed, 2);
        assert_eq!(out, "KEEP=safe\n");
    }

    #[test]
    fn plan_version_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, r#"{"version": 2, "protocolVersion": 1, "targets": []}"#).unwrap();
        assert!(load_plan(&path).is_err());
    }
}
