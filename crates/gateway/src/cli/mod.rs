//! Command-line interface.

pub mod doctor;
pub mod message;
pub mod onboard;
pub mod secrets_cmd;
pub mod sessions_cmd;
pub mod status;

use clap::{Parser, Subcommand};

/// OpenClaw — a multi-channel agent gateway.
#[derive(Debug, Parser)]
#[command(name = "openclaw", version, about)]
pub struct Cli {
    /// Verbose (debug-level) logging.
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway (default when no subcommand is given).
    Serve,
    /// Show gateway and channel account status.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run diagnostic checks against the current configuration.
    Doctor {
        /// Apply safe fixes (seed origins, create state dirs).
        #[arg(long)]
        fix: bool,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List known sessions.
    Sessions,
    /// Write a default config and prepare the state directory.
    Configure {
        /// Set the gateway auth token while configuring.
        #[arg(long)]
        gateway_token: Option<String>,
    },
    /// Guided first-run setup.
    Onboard,
    /// Updater utilities.
    #[command(subcommand)]
    Update(UpdateCommand),
    /// Messaging utilities.
    #[command(subcommand)]
    Message(MessageCommand),
    /// Secrets management.
    #[command(subcommand)]
    Secrets(SecretsCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum UpdateCommand {
    /// Report the installed version and update channel.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum MessageCommand {
    /// Send a message over a channel.
    Send {
        /// Channel id (telegram, discord, feishu, web, …).
        #[arg(long, default_value = "web")]
        channel: String,
        /// Target conversation.
        #[arg(long)]
        to: String,
        /// Message text.
        #[arg(long)]
        text: String,
        /// Account id.
        #[arg(long, default_value = "default")]
        account: String,
        /// Output the result as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum SecretsCommand {
    /// Apply a secrets plan to the config.
    Apply {
        /// Path to the plan JSON.
        #[arg(long)]
        plan: String,
        /// Persist changes (default is a dry run).
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as JSON.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load `openclaw.json` from the resolved config path. Shared by `serve`,
/// `doctor`, and the config subcommands so the logic lives in one place.
pub fn load_config() -> anyhow::Result<(oc_domain::config::Config, std::path::PathBuf)> {
    let path = oc_domain::paths::config_path();
    let config = oc_domain::config::Config::load(&path)
        .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))?;
    Ok((config, path))
}

/// Print the startup banner unless `OPENCLAW_HIDE_BANNER` is set.
pub fn print_banner() {
    if std::env::var(oc_domain::paths::ENV_HIDE_BANNER).is_ok() {
        return;
    }
    println!("openclaw {} — multi-channel agent gateway", env!("CARGO_PKG_VERSION"));
}
