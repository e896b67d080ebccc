//! `openclaw doctor` — configuration and state-dir diagnostics.

use std::path::Path;

use oc_domain::config::{Config, ConfigSeverity};

#[derive(Debug, serde::Serialize)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
    pub errors: usize,
    pub warnings: usize,
    pub fixes_applied: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

fn check(name: &str, ok: bool, detail: Option<String>) -> DoctorCheck {
    DoctorCheck {
        name: name.to_string(),
        ok,
        detail,
    }
}

/// Run all checks. `fix` applies safe repairs (state dirs, origin seeding)
/// and records them in the report. `quiet` suppresses human-readable
/// stdout, for JSON-emitting callers.
pub fn run(
    config: &mut Config,
    config_path: &Path,
    state_dir: &Path,
    fix: bool,
    quiet: bool,
) -> anyhow::Result<DoctorReport> {
    let mut report = DoctorReport {
        checks: Vec::new(),
        errors: 0,
        warnings: 0,
        fixes_applied: Vec::new(),
    };

    // ── Config validation ────────────────────────────────────────────
    for issue in config.validate() {
        match issue.severity {
            ConfigSeverity::Error => report.errors += 1,
            ConfigSeverity::Warning => report.warnings += 1,
        }
        report.checks.push(check(
            &format!("config:{}", issue.field),
            issue.severity != ConfigSeverity::Error,
            Some(issue.message.clone()),
        ));
    }

    // ── Origin seeding (migration) ───────────────────────────────────
    if fix {
        let changes = config.migrate();
        if !changes.is_empty() {
            config
                .save(config_path)
                .map_err(|e| anyhow::anyhow!("saving config: {e}"))?;
            report.fixes_applied.extend(changes);
        }
    } else if !config.gateway.bind.is_loopback()
        && config.gateway.control_ui.allowed_origins.is_empty()
    {
        report.warnings += 1;
        report.checks.push(check(
            "gateway.controlUi.allowedOrigins",
            false,
            Some("non-loopback bind with no origins configured; run with --fix to seed".into()),
        ));
    }

    // ── State dir layout ─────────────────────────────────────────────
    let required_dirs = [
        state_dir.to_path_buf(),
        state_dir.join("sessions"),
        state_dir.join("cron"),
        state_dir.join("diffs"),
    ];
    for dir in &required_dirs {
        let exists = dir.is_dir();
        if !exists && fix {
            std::fs::create_dir_all(dir)?;
            report.fixes_applied.push(format!("created {}", dir.display()));
        } else if !exists {
            report.warnings += 1;
        }
        report.checks.push(check(
            &format!("state:{}", dir.display()),
            exists || fix,
            None,
        ));
    }

    // ── Session store integrity ──────────────────────────────────────
    let sessions_path = oc_domain::paths::sessions_file(state_dir);
    let sessions_ok = if sessions_path.exists() {
        std::fs::read_to_string(&sessions_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .map(|v| v.get("version") == Some(&serde_json::json!(1)))
            .unwrap_or(false)
    } else {
        true // absent = empty store
    };
    if !sessions_ok {
        report.errors += 1;
    }
    report.checks.push(check(
        "sessions:store",
        sessions_ok,
        (!sessions_ok).then(|| format!("{} is not a valid v1 store", sessions_path.display())),
    ));

    // ── Channel account sanity ───────────────────────────────────────
    let registry = oc_channels::registry::ChannelRegistry::builtin();
    for (channel, channel_cfg) in config.channels.enabled() {
        match registry.get(channel) {
            Some(plugin) => {
                for account_id in plugin.list_account_ids(channel_cfg) {
                    let resolved = plugin.resolve_account(channel_cfg, &account_id);
                    if resolved.is_err() {
                        report.errors += 1;
                    }
                    report.checks.push(check(
                        &format!("channel:{channel}:{account_id}"),
                        resolved.is_ok(),
                        resolved.err().map(|e| e.to_string()),
                    ));
                }
            }
            None => {
                report.warnings += 1;
                report.checks.push(check(
                    &format!("channel:{channel}"),
                    false,
                    Some("enabled but no plugin is built in".into()),
                ));
            }
        }
    }

    if !quiet {
        for c in &report.checks {
            let mark = if c.ok { "ok " } else { "FAIL" };
            match &c.detail {
                Some(detail) => println!("[{mark}] {} — {detail}", c.name),
                None => println!("[{mark}] {}", c.name),
            }
        }
        for fix in &report.fixes_applied {
            println!("[fixed] {fix}");
        }
        println!("{} error(s), {} warning(s)", report.errors, report.warnings);
    }

    Ok(report)
}
