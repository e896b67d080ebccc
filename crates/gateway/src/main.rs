use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use oc_channels::events::EventQueue;
use oc_channels::registry::ChannelRegistry;
use oc_channels::supervisor::AccountSupervisor;
use oc_domain::config::Config;
use oc_sessions::{SessionBindingService, SessionStore};

use oc_gateway::api;
use oc_gateway::cli::{
    self, Cli, Command, ConfigCommand, MessageCommand, SecretsCommand, UpdateCommand,
};
use oc_gateway::diffs::DiffArtifactStore;
use oc_gateway::heartbeat::Heartbeat;
use oc_gateway::routing::MessageRouter;
use oc_gateway::runtime::approvals::ApprovalCoordinator;
use oc_gateway::runtime::cron::{CronRunner, CronStore};
use oc_gateway::runtime::dispatcher::ChannelSpawnDispatcher;
use oc_gateway::runtime::http::HttpAgentRuntime;
use oc_gateway::runtime::runtimes::RuntimeRegistry;
use oc_gateway::runtime::subagents::SpawnOrchestrator;
use oc_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state_dir = oc_domain::paths::state_dir();

    match cli.command {
        None | Some(Command::Serve) => {
            cli::print_banner();
            init_tracing(cli.debug);
            let (mut config, config_path) = cli::load_config()?;
            // Non-interactive startup applies safe migrations itself.
            let changes = config.migrate();
            if !changes.is_empty() {
                for change in &changes {
                    tracing::info!("config migration: {change}");
                }
                config.save(&config_path)?;
            }
            run_server(Arc::new(config), state_dir).await
        }
        Some(Command::Status { json }) => {
            let (config, _) = cli::load_config()?;
            let ok = cli::status::run(&config, json).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Doctor { fix, json }) => {
            let (mut config, config_path) = cli::load_config()?;
            let report = cli::doctor::run(&mut config, &config_path, &state_dir, fix, json)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            if report.errors > 0 {
                std::process::exit(2);
            }
            Ok(())
        }
        Some(Command::Sessions) => cli::sessions_cmd::run(&state_dir),
        Some(Command::Configure { gateway_token }) => {
            let config_path = oc_domain::paths::config_path();
            let created =
                cli::onboard::configure(&config_path, &state_dir, gateway_token.as_deref())?;
            if created {
                println!("wrote default config to {}", config_path.display());
            } else {
                println!("updated {}", config_path.display());
            }
            Ok(())
        }
        Some(Command::Onboard) => {
            cli::print_banner();
            cli::onboard::onboard(&oc_domain::paths::config_path(), &state_dir)
        }
        Some(Command::Update(UpdateCommand::Status { json })) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "current": env!("CARGO_PKG_VERSION"),
                        "channel": "stable",
                        "updateAvailable": false,
                    })
                );
            } else {
                println!("openclaw {} (stable, up to date)", env!("CARGO_PKG_VERSION"));
            }
            Ok(())
        }
        Some(Command::Message(MessageCommand::Send {
            channel,
            to,
            text,
            account,
            json,
        })) => {
            let (config, _) = cli::load_config()?;
            let ok = cli::message::send(&config, &channel, &to, &text, &account, json).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Secrets(SecretsCommand::Apply { plan, write })) => {
            let (_, config_path) = cli::load_config()?;
            let ok = cli::secrets_cmd::apply(
                &config_path,
                &state_dir,
                std::path::Path::new(&plan),
                write,
            )?;
            if !ok {
                std::process::exit(2);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if issues
                .iter()
                .any(|i| i.severity == oc_domain::config::ConfigSeverity::Error)
            {
                eprintln!("{} is not valid", config_path.display());
                std::process::exit(2);
            }
            println!("{} is valid", config_path.display());
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = cli::load_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("openclaw {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the `serve` command.
fn init_tracing(debug: bool) {
    let default = if debug {
        "debug,oc_gateway=debug"
    } else {
        "info,oc_gateway=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>, state_dir: std::path::PathBuf) -> anyhow::Result<()> {
    tracing::info!("openclaw starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    let mut fatal = false;
    for issue in &issues {
        match issue.severity {
            oc_domain::config::ConfigSeverity::Error => {
                tracing::error!("{issue}");
                fatal = true;
            }
            oc_domain::config::ConfigSeverity::Warning => tracing::warn!("{issue}"),
        }
    }
    if fatal {
        anyhow::bail!("configuration invalid; run `openclaw doctor --fix`");
    }

    // ── Services ─────────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::open(&state_dir)?);
    let bindings = Arc::new(SessionBindingService::new());
    let registry = Arc::new(ChannelRegistry::builtin());
    let events = Arc::new(EventQueue::default());
    let supervisor = Arc::new(AccountSupervisor::new(registry.clone(), events.clone()));
    // CLI-configured agents spawn their command; everything else goes over
    // HTTP to the model provider.
    let runtime: Arc<dyn oc_gateway::runtime::AgentRuntime> = Arc::new(
        oc_gateway::runtime::cli_runtime::CliAgentRuntime::new(
            config.clone(),
            Arc::new(HttpAgentRuntime::new()),
        ),
    );
    let runtimes = Arc::new(RuntimeRegistry::new());
    let approvals = Arc::new(ApprovalCoordinator::default());
    let cron_store = Arc::new(CronStore::open(&state_dir)?);
    let diffs = Arc::new(DiffArtifactStore::new(oc_domain::paths::diff_artifact_root(
        &state_dir,
    )));
    let heartbeat = Arc::new(Heartbeat::new());

    let dispatcher = ChannelSpawnDispatcher::new(
        config.clone(),
        registry.clone(),
        runtime.clone(),
        sessions.clone(),
    );
    let spawner = Arc::new(SpawnOrchestrator::new(
        config.clone(),
        sessions.clone(),
        bindings.clone(),
        dispatcher,
    ));

    let auth_token_hash = match config.gateway.auth.resolve_token() {
        Some(token) => Some(api::auth::token_hash(&token)),
        None => {
            tracing::warn!("no gateway token configured; loopback dev mode, auth disabled");
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        state_dir: state_dir.clone(),
        heartbeat: heartbeat.clone(),
        sessions: sessions.clone(),
        bindings,
        registry: registry.clone(),
        supervisor: supervisor.clone(),
        runtime: runtime.clone(),
        runtimes,
        approvals: approvals.clone(),
        spawner,
        cron_store: cron_store.clone(),
        diffs: diffs.clone(),
        auth_token_hash,
    };

    let shutdown = CancellationToken::new();

    // ── Channel monitors ─────────────────────────────────────────────
    for (channel, channel_cfg) in config.channels.enabled() {
        match supervisor.start_channel(channel, channel_cfg).await {
            Ok(count) => tracing::info!(channel = %channel, accounts = count, "channel started"),
            Err(e) => tracing::error!(channel = %channel, error = %e, "channel failed to start"),
        }
    }

    // ── Router ───────────────────────────────────────────────────────
    let agent_id = config
        .acp
        .default_agent
        .clone()
        .unwrap_or_else(|| "main".into());
    let router = MessageRouter::new(
        config.clone(),
        registry.clone(),
        sessions.clone(),
        runtime.clone(),
        events,
        agent_id,
    );
    tokio::spawn(router.run(shutdown.child_token()));

    // ── Cron runner ──────────────────────────────────────────────────
    if config.cron.enabled {
        let catalog = Arc::new(oc_gateway::skills::load_catalog(&state_dir.join("skills")));
        let cron_runner = Arc::new(CronRunner::new(
            config.clone(),
            cron_store,
            sessions.clone(),
            runtime.clone(),
            catalog,
        ));
        let cron_cancel = shutdown.child_token();
        tokio::spawn(async move { cron_runner.run_loop(cron_cancel).await });
    }

    // ── Approval sweeper + diff artifact sweeper ─────────────────────
    {
        let approvals = approvals.clone();
        let diffs = diffs.clone();
        let heartbeat = heartbeat.clone();
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        heartbeat.beat();
                        approvals.sweep();
                        diffs.sweep(chrono::Utc::now());
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    // ── HTTP surface ─────────────────────────────────────────────────
    let app = api::build_router(state);
    let addr = format!("{}:{}", config.gateway.bind_host(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "gateway listening");

    let server_cancel = shutdown.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { server_cancel.cancelled().await });

    tokio::select! {
        result = server => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    shutdown.cancel();
    supervisor.stop_all().await;
    tracing::info!("openclaw stopped");
    Ok(())
}
