//! `openclaw onboard` / `openclaw configure` — first-run setup.

use std::path::Path;

use oc_domain::config::Config;

/// Write a default config if none exists and make sure the state-dir
/// layout is in place. Returns `true` when a new config was created.
pub fn configure(
    config_path: &Path,
    state_dir: &Path,
    gateway_token: Option<&str>,
) -> anyhow::Result<bool> {
    let created = if config_path.exists() {
        false
    } else {
        let mut config = Config::default();
        if let Some(token) = gateway_token {
            config.gateway.auth.token = Some(token.to_string());
        }
        config.save(config_path)?;
        true
    };

    if let Some(token) = gateway_token {
        if !created {
            let mut config = Config::load(config_path)?;
            config.gateway.auth.token = Some(token.to_string());
            config.save(config_path)?;
        }
    }

    for dir in ["sessions", "cron", "diffs"] {
        std::fs::create_dir_all(state_dir.join(dir))?;
    }
    Ok(created)
}

pub fn onboard(config_path: &Path, state_dir: &Path) -> anyhow::Result<()> {
    let created = configure(config_path, state_dir, None)?;
    if created {
        println!("wrote default config to {}", config_path.display());
    } else {
        println!("config already present at {}", config_path.display());
    }
    println!("state dir: {}", state_dir.display());
    println!();
    println!("next steps:");
    println!("  1. add a channel account to {}", config_path.display());
    println!("  2. openclaw doctor --fix");
    println!("  3. openclaw serve");
    Ok(())
}
