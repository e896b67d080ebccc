//! Account lifecycle supervision.
//!
//! One supervisor owns every account monitor. Startup probes accounts
//! strictly sequentially (no thundering herd against the provider), then
//! starts one monitor task per account. Each monitor owns a child
//! cancellation token; stopping an account cancels the token and awaits the
//! task, which releases its transport, watchdog timers, and any HTTP server
//! socket before resolving.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use oc_domain::config::ChannelConfig;
use oc_domain::{ChannelId, Error, Result};

use crate::events::EventQueue;
use crate::registry::{AccountContext, ChannelRegistry, ResolvedAccount};

pub const STARTUP_PROBE_TIMEOUT_MS: u64 = 10_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status board
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Live status of one account monitor. Patched by the monitor, read by the
/// RPC `status` method.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_open_id: Option<String>,
}

/// All account statuses, keyed by `(channel, account)`.
#[derive(Default)]
pub struct StatusBoard {
    statuses: RwLock<HashMap<(ChannelId, String), AccountStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: ChannelId, account_id: &str) -> Option<AccountStatus> {
        self.statuses
            .read()
            .get(&(channel, account_id.to_string()))
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<(ChannelId, String, AccountStatus)> {
        let mut out: Vec<_> = self
            .statuses
            .read()
            .iter()
            .map(|((c, a), s)| (*c, a.clone(), s.clone()))
            .collect();
        out.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        out
    }

    fn patch<F: FnOnce(&mut AccountStatus)>(&self, channel: ChannelId, account_id: &str, f: F) {
        let mut statuses = self.statuses.write();
        let status = statuses
            .entry((channel, account_id.to_string()))
            .or_default();
        f(status);
    }

    fn remove(&self, channel: ChannelId, account_id: &str) {
        self.statuses
            .write()
            .remove(&(channel, account_id.to_string()));
    }

    pub fn len(&self) -> usize {
        self.statuses.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.read().is_empty()
    }
}

/// A monitor's writable view of its own status row.
#[derive(Clone)]
pub struct AccountStatusHandle {
    channel: ChannelId,
    account_id: String,
    board: Arc<StatusBoard>,
}

impl AccountStatusHandle {
    pub fn new(channel: ChannelId, account_id: impl Into<String>, board: Arc<StatusBoard>) -> Self {
        Self {
            channel,
            account_id: account_id.into(),
            board,
        }
    }

    pub fn connected(&self) {
        self.board.patch(self.channel, &self.account_id, |s| {
            s.connected = true;
            s.last_connected_at = Some(Utc::now());
        });
    }

    pub fn disconnected(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.board.patch(self.channel, &self.account_id, |s| {
            s.connected = false;
            s.last_disconnect = Some(reason);
        });
    }

    pub fn event_seen(&self) {
        self.board.patch(self.channel, &self.account_id, |s| {
            s.last_event_at = Some(Utc::now());
        });
    }

    pub fn error(&self, error: impl Into<String>) {
        self.board.patch(self.channel, &self.account_id, |s| {
            s.last_error = Some(error.into());
        });
    }

    pub fn bot_open_id(&self, id: impl Into<String>) {
        self.board.patch(self.channel, &self.account_id, |s| {
            s.bot_open_id = Some(id.into());
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AccountTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct AccountSupervisor {
    registry: Arc<ChannelRegistry>,
    statuses: Arc<StatusBoard>,
    events: Arc<EventQueue>,
    root_cancel: CancellationToken,
    tasks: tokio::sync::Mutex<HashMap<(ChannelId, String), AccountTask>>,
}

impl AccountSupervisor {
    pub fn new(registry: Arc<ChannelRegistry>, events: Arc<EventQueue>) -> Self {
        Self {
            registry,
            statuses: Arc::new(StatusBoard::new()),
            events,
            root_cancel: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn statuses(&self) -> Arc<StatusBoard> {
        self.statuses.clone()
    }

    pub fn events(&self) -> Arc<EventQueue> {
        self.events.clone()
    }

    /// Start every enabled account of a channel: sequential preflight
    /// probes, then one monitor task per account.
    pub async fn start_channel(&self, channel: ChannelId, cfg: &ChannelConfig) -> Result<usize> {
        let plugin = self
            .registry
            .get(channel)
            .ok_or_else(|| Error::Channel {
                channel: channel.to_string(),
                message: "no plugin registered".into(),
            })?
            .clone();
        let gateway = match plugin.gateway() {
            Some(gw) => gw,
            None => {
                tracing::debug!(channel = %channel, "plugin has no gateway hook; nothing to start");
                return Ok(0);
            }
        };

        let account_ids = plugin.list_account_ids(cfg);
        let mut resolved: Vec<ResolvedAccount> = Vec::with_capacity(account_ids.len());
        for account_id in &account_ids {
            match plugin.resolve_account(cfg, account_id) {
                Ok(account) => resolved.push(account),
                Err(e) => {
                    tracing::warn!(channel = %channel, account = %account_id, error = %e, "account unresolvable; skipping");
                }
            }
        }

        // Sequential preflight. Each probe completes (or times out) before
        // the next starts; an abort stops the walk immediately.
        let probe_timeout = Duration::from_millis(STARTUP_PROBE_TIMEOUT_MS);
        let mut bot_ids: HashMap<String, Option<String>> = HashMap::new();
        for account in &resolved {
            if self.root_cancel.is_cancelled() {
                tracing::info!(channel = %channel, "preflight aborted");
                return Ok(0);
            }
            let probe = tokio::select! {
                r = gateway.probe(account, probe_timeout) => Some(r),
                _ = self.root_cancel.cancelled() => None,
            };
            let Some(probe) = probe else {
                tracing::info!(channel = %channel, "preflight aborted mid-probe");
                return Ok(0);
            };
            if probe.ok {
                bot_ids.insert(account.account_id.clone(), probe.bot_open_id);
            } else {
                let error = probe
                    .error
                    .unwrap_or_else(|| format!("probe timed out after {STARTUP_PROBE_TIMEOUT_MS}ms"));
                tracing::warn!(channel = %channel, account = %account.account_id, error = %error, "account preflight failed");
                bot_ids.insert(account.account_id.clone(), None);
            }
        }

        let mut started = 0usize;
        for account in resolved {
            let bot_open_id = bot_ids.remove(&account.account_id).flatten();
            self.start_account(channel, account, gateway.clone(), bot_open_id)
                .await;
            started += 1;
        }
        Ok(started)
    }

    async fn start_account(
        &self,
        channel: ChannelId,
        account: ResolvedAccount,
        gateway: Arc<dyn crate::registry::AccountGateway>,
        bot_open_id: Option<String>,
    ) {
        let account_id = account.account_id.clone();

        // Replace any previous monitor for this account.
        self.stop(channel, &account_id).await;

        let cancel = self.root_cancel.child_token();
        let status = AccountStatusHandle::new(channel, account_id.clone(), self.statuses.clone());
        if let Some(ref id) = bot_open_id {
            status.bot_open_id(id.clone());
        }

        let ctx = AccountContext {
            channel,
            account,
            cancel: cancel.clone(),
            events: self.events.clone(),
            status: status.clone(),
            bot_open_id,
        };

        let task_status = status.clone();
        let handle = tokio::spawn(async move {
            tracing::info!(channel = %channel, account = %ctx.account.account_id, "account monitor starting");
            match gateway.start_account(ctx).await {
                Ok(()) => {
                    tracing::info!(channel = %channel, "account monitor stopped");
                }
                Err(e) => {
                    task_status.error(e.to_string());
                    tracing::error!(channel = %channel, error = %e, "account monitor failed");
                }
            }
        });

        self.tasks
            .lock()
            .await
            .insert((channel, account_id), AccountTask { cancel, handle });
    }

    /// Stop one account's monitor. Idempotent; returns once the monitor has
    /// fully released its resources.
    pub async fn stop(&self, channel: ChannelId, account_id: &str) {
        let task = self
            .tasks
            .lock()
            .await
            .remove(&(channel, account_id.to_string()));
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(channel = %channel, account = %account_id, error = %e, "monitor join failed");
            }
            self.statuses.remove(channel, account_id);
            tracing::info!(channel = %channel, account = %account_id, "account monitor drained");
        }
    }

    /// Cancel everything and wait for all monitors to drain.
    pub async fn stop_all(&self) {
        self.root_cancel.cancel();
        let tasks: Vec<_> = {
            let mut map = self.tasks.lock().await;
            map.drain().collect()
        };
        for ((channel, account_id), task) in tasks {
            task.cancel.cancel();
            let _ = task.handle.await;
            self.statuses.remove(channel, &account_id);
        }
    }

    pub async fn running_accounts(&self) -> Vec<(ChannelId, String)> {
        let mut keys: Vec<_> = self.tasks.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}
