//! `openclaw secrets apply` — apply a secrets plan to the config file.

use std::path::Path;

use crate::secrets::{apply_to_config, load_plan, scrub_env};

pub fn apply(
    config_path: &Path,
    state_dir: &Path,
    plan_path: &Path,
    write: bool,
) -> anyhow::Result<bool> {
    let plan = load_plan(plan_path)?;
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", config_path.display()))?;
    let mut config: serde_json::Value = serde_json::from_str(&raw)?;

    let (report, migrated) = apply_to_config(&mut config, &plan)?;
    println!(
        "{} target(s) replaced, {} already applied",
        report.replaced.len(),
        report.already_applied.len()
    );
    for path in &report.replaced {
        println!("  -> {path}");
    }

    if !write {
        println!("dry run; pass --write to persist");
        return Ok(true);
    }

    config["meta"]["lastTouchedAt"] = serde_json::json!(chrono::Utc::now());
    std::fs::write(config_path, serde_json::to_string_pretty(&config)?)?;

    let scrub = plan.options.as_ref().map(|o| o.scrub_env).unwrap_or(false);
    if scrub && !migrated.is_empty() {
        let env_path = oc_domain::paths::env_file(state_dir);
        if env_path.exists() {
            let content = std::fs::read_to_string(&env_path)?;
            let (scrubbed, removed) = scrub_env(&content, &migrated);
            if removed > 0 {
                std::fs::write(&env_path, scrubbed)?;
                println!("scrubbed {removed} line(s) from .env");
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_writes_ref_and_scrubs_env() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("openclaw.json");
        std::fs::write(
            &config_path,
            r#"{"channels": {"telegram": {"accounts": {"main": {"botToken": "123:pt"}}}}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(".env"), "TG=123:pt\nOTHER=keep\n").unwrap();

        let plan_path = dir.path().join("plan.json");
        std::fs::write(
            &plan_path,
            r#"{
                "version": 1, "protocolVersion": 1,
                "targets": [{
                    "type": "config",
                    "path": "channels.telegram.accounts.main.botToken",
                    "ref": {"source": "vault", "provider": "op", "id": "x"}
                }],
                "options": {"scrubEnv": true}
            }"#,
        )
        .unwrap();

        assert!(apply(&config_path, dir.path(), &plan_path, true).unwrap());

        let config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
        assert!(config["channels"]["telegram"]["accounts"]["main"]["botToken"]["$secret"]
            .is_object());
        assert!(config["meta"]["lastTouchedAt"].is_string());

        let env = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert!(!env.contains("123:pt"));
        assert!(env.contains("OTHER=keep"));
    }

    #[test]
    fn reapply_is_idempotent_modulo_last_touched() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("openclaw.json");
        std::fs::write(
            &config_path,
            r#"{"channels": {"telegram": {"accounts": {"main": {"botToken": "123:pt"}}}}}"#,
        )
        .unwrap();
        let plan_path = dir.path().join("plan.json");
        std::fs::write(
            &plan_path,
            r#"{
                "version": 1, "protocolVersion": 1,
                "targets": [{
                    "type": "config",
                    "path": "channels.telegram.accounts.main.botToken",
                    "ref": {"source": "vault", "provider": "op", "id": "x"}
                }]
            }"#,
        )
        .unwrap();

        apply(&config_path, dir.path(), &plan_path, true).unwrap();
        let mut first: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
        apply(&config_path, dir.path(), &plan_path, true).unwrap();
        let mut second: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();

        first["meta"].as_object_mut().unwrap().remove("lastTouchedAt");
        second["meta"].as_object_mut().unwrap().remove("lastTouchedAt");
        assert_eq!(first, second);
    }
}
