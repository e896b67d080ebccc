//! Shared application state passed to all API handlers.

use std::path::PathBuf;
use std::sync::Arc;

use oc_channels::registry::ChannelRegistry;
use oc_channels::supervisor::AccountSupervisor;
use oc_domain::config::Config;
use oc_sessions::{SessionBindingService, SessionStore};

use crate::diffs::DiffArtifactStore;
use crate::heartbeat::Heartbeat;
use crate::runtime::approvals::ApprovalCoordinator;
use crate::runtime::cron::CronStore;
use crate::runtime::runtimes::RuntimeRegistry;
use crate::runtime::subagents::SpawnOrchestrator;
use crate::runtime::AgentRuntime;

/// Everything a handler can reach, grouped by concern:
/// - **Core** — config, state dir, heartbeat
/// - **Sessions** — store, bindings
/// - **Channels** — plugin registry, account supervisor
/// - **Runtime** — agent runtime, approvals, spawn orchestrator, cron store
/// - **Security (startup-computed)** — SHA-256 of the gateway token
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub state_dir: PathBuf,
    pub heartbeat: Arc<Heartbeat>,

    // ── Sessions ──────────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub bindings: Arc<SessionBindingService>,

    // ── Channels ──────────────────────────────────────────────────────
    pub registry: Arc<ChannelRegistry>,
    pub supervisor: Arc<AccountSupervisor>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub runtime: Arc<dyn AgentRuntime>,
    pub runtimes: Arc<RuntimeRegistry>,
    pub approvals: Arc<ApprovalCoordinator>,
    pub spawner: Arc<SpawnOrchestrator>,
    pub cron_store: Arc<CronStore>,

    // ── Plugins ───────────────────────────────────────────────────────
    pub diffs: Arc<DiffArtifactStore>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 of the gateway bearer token. `None` = loopback dev mode
    /// (no auth enforced).
    pub auth_token_hash: Option<Vec<u8>>,
}
