//! State-directory resolution and the strict on-disk layout.
//!
//! Precedence: `OPENCLAW_STATE_DIR` > `OPENCLAW_HOME` > `~/.openclaw`.
//! The config file may additionally be pinned with `OPENCLAW_CONFIG_PATH`.

use std::path::{Path, PathBuf};

pub const ENV_HOME: &str = "OPENCLAW_HOME";
pub const ENV_STATE_DIR: &str = "OPENCLAW_STATE_DIR";
pub const ENV_CONFIG_PATH: &str = "OPENCLAW_CONFIG_PATH";
pub const ENV_HIDE_BANNER: &str = "OPENCLAW_HIDE_BANNER";

/// Resolve the state directory from the environment.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(home) = std::env::var(ENV_HOME) {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".openclaw")
}

/// Resolve the main config path (`openclaw.json` inside the state dir unless
/// overridden).
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    state_dir().join("openclaw.json")
}

pub fn sessions_file(state_dir: &Path) -> PathBuf {
    state_dir.join("sessions").join("sessions.json")
}

pub fn cron_jobs_file(state_dir: &Path) -> PathBuf {
    state_dir.join("cron").join("jobs.json")
}

pub fn auth_profiles_file(state_dir: &Path, agent_id: &str) -> PathBuf {
    state_dir
        .join("agents")
        .join(agent_id)
        .join("agent")
        .join("auth-profiles.json")
}

pub fn diff_artifact_root(state_dir: &Path) -> PathBuf {
    state_dir.join("diffs")
}

pub fn env_file(state_dir: &Path) -> PathBuf {
    state_dir.join(".env")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_stable() {
        let root = Path::new("/state");
        assert_eq!(
            sessions_file(root),
            Path::new("/state/sessions/sessions.json")
        );
        assert_eq!(cron_jobs_file(root), Path::new("/state/cron/jobs.json"));
        assert_eq!(
            auth_profiles_file(root, "codex"),
            Path::new("/state/agents/codex/agent/auth-profiles.json")
        );
        assert_eq!(env_file(root), Path::new("/state/.env"));
    }
}
