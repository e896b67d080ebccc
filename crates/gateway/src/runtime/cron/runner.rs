//! The cron isolated-agent runner.
//!
//! Every tick resolves a **fresh** session (no cross-run reuse), applies
//! the agent's skill filter, resolves the effective model under the
//! override policy, persists the intended model *before* invoking the
//! runtime (so a concurrent `sessions.list` sees the effective model even
//! if the run later fails), and records post-run telemetry on success.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use oc_domain::config::{Config, ModelChain, ModelRef, parse_model_ref};
use oc_domain::{Error, Result};
use oc_sessions::{session_key, SessionScope, SessionStore, SkillsSnapshot};

use crate::runtime::cron::eval::{parse_tz, CronExpr};
use crate::runtime::cron::store::{CronJob, CronStore};
use crate::runtime::{run_with_model_fallback, AgentRuntime, TurnRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skill catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The workspace's installed skills plus a version that bumps whenever the
/// workspace changes.
pub struct SkillCatalog {
    pub version: u64,
    pub skills: Vec<String>,
}

impl SkillCatalog {
    pub fn new(version: u64, skills: Vec<String>) -> Self {
        Self { version, skills }
    }

    /// Build a snapshot for the given normalized filter.
    pub fn build_snapshot(&self, filter: Option<Vec<String>>) -> SkillsSnapshot {
        let skills: Vec<String> = match &filter {
            Some(allowed) => self
                .skills
                .iter()
                .filter(|s| allowed.contains(&s.to_ascii_lowercase()))
                .cloned()
                .collect(),
            None => self.skills.clone(),
        };
        let prompt = if skills.is_empty() {
            String::new()
        } else {
            format!("Available skills: {}", skills.join(", "))
        };
        SkillsSnapshot {
            prompt,
            skills,
            skill_filter: filter,
            version: self.version,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RunReport {
    pub job_id: String,
    pub session_key: String,
    pub status: &'static str,
    pub model: ModelRef,
    pub error: Option<String>,
}

pub struct CronRunner {
    config: Arc<Config>,
    store: Arc<CronStore>,
    sessions: Arc<SessionStore>,
    runtime: Arc<dyn AgentRuntime>,
    catalog: Arc<SkillCatalog>,
    snapshot_cache: Mutex<Option<SkillsSnapshot>>,
}

impl CronRunner {
    pub fn new(
        config: Arc<Config>,
        store: Arc<CronStore>,
        sessions: Arc<SessionStore>,
        runtime: Arc<dyn AgentRuntime>,
        catalog: Arc<SkillCatalog>,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            runtime,
            catalog,
            snapshot_cache: Mutex::new(None),
        }
    }

    /// The scheduler loop. Ticks until cancelled.
    pub async fn run_loop(&self, cancel: CancellationToken) {
        let tick = std::time::Duration::from_secs(self.config.cron.tick_seconds.max(1));
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = cancel.cancelled() => {
                    tracing::info!("cron runner stopped");
                    return;
                }
            }
        }
    }

    pub async fn tick(&self) {
        let now = Utc::now();
        for job in self.store.due(now) {
            let report = self.run_job(&job).await;
            match &report {
                Ok(report) => {
                    tracing::info!(job = %report.job_id, model = %report.model, status = report.status, "cron run finished");
                }
                Err(e) => {
                    tracing::error!(job = %job.id, error = %e, "cron run rejected");
                    let _ = self.store.update(&job.id, |j| {
                        j.last_status = Some("error".into());
                        j.last_error = Some(e.to_string());
                        j.last_run_at = Some(now);
                    });
                }
            }
            self.advance_schedule(&job, now);
        }
    }

    fn advance_schedule(&self, job: &CronJob, now: chrono::DateTime<Utc>) {
        let tz = parse_tz(
            job.timezone
                .as_deref()
                .unwrap_or(&self.config.cron.timezone),
        );
        let next = CronExpr::parse(&job.schedule)
            .ok()
            .and_then(|expr| expr.next_after(&now, tz));
        let _ = self.store.update(&job.id, |j| j.next_run_at = next);
    }

    /// Resolve the effective model chain under the override policy.
    ///
    /// - payload model allowed → it becomes the primary; default fallbacks
    ///   are kept.
    /// - payload model disallowed → warn, agent defaults.
    /// - payload model malformed → hard error, the run never starts.
    /// - no payload model → agent defaults.
    fn effective_chain(&self, job: &CronJob) -> Result<ModelChain> {
        let agent = self
            .config
            .agents
            .get(&job.agent_id)
            .cloned()
            .unwrap_or_default();
        let default_chain = agent.model_chain(&self.config.models)?;

        let Some(override_raw) = job.payload.model.as_deref() else {
            return Ok(default_chain);
        };

        let override_ref = parse_model_ref(override_raw)?;
        if agent.is_model_allowed(override_raw, &self.config.models) {
            Ok(ModelChain {
                primary: override_ref,
                fallbacks: default_chain.fallbacks,
            })
        } else {
            tracing::warn!(
                job = %job.id,
                model = %override_raw,
                "payload model not allowed; falling back to agent defaults"
            );
            Ok(default_chain)
        }
    }

    fn skills_snapshot(&self, job: &CronJob) -> SkillsSnapshot {
        let filter = self
            .config
            .agents
            .get(&job.agent_id)
            .and_then(|a| a.normalized_skill_filter());

        let mut cache = self.snapshot_cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.skill_filter == filter && cached.version == self.catalog.version {
                return cached.clone();
            }
        }
        let snapshot = self.catalog.build_snapshot(filter);
        *cache = Some(snapshot.clone());
        snapshot
    }

    /// Run one job to completion.
    pub async fn run_job(&self, job: &CronJob) -> Result<RunReport> {
        // 1. Fresh session, always.
        let key = session_key(
            &job.agent_id,
            &SessionScope::Cron {
                job_id: job.id.clone(),
            },
        );
        let (entry, is_new) = self.sessions.resolve_or_create(&key, true)?;
        debug_assert!(is_new);

        // 2. Skill snapshot (cached on filter + catalog version).
        let snapshot = self.skills_snapshot(job);

        // 3. Effective model. Malformed payload overrides never run.
        let chain = self.effective_chain(job)?;

        // 4. Pre-run persistence: a concurrent sessions.list during the run
        // must see the effective model even if the run throws later.
        let persisted = self.sessions.update(&key, |e| {
            e.model = Some(chain.primary.model.clone());
            e.model_provider = Some(chain.primary.provider.clone());
            e.system_sent = true;
            e.skills_snapshot = Some(snapshot.clone());
        });
        if let Err(e) = persisted {
            tracing::warn!(session_key = %key, error = %e, "pre-run persist failed; continuing");
        }

        // 5. Run with the fallback chain. Fresh session: the stored CLI
        // session id is never forwarded.
        let cli_session_id = entry.cli_session_id_for(&chain.primary.provider, is_new);
        let request = TurnRequest {
            session_key: key.clone(),
            session_id: entry.session_id.clone(),
            agent_id: job.agent_id.clone(),
            task: job.payload.message.clone(),
            model: chain.primary.clone(),
            cli_session_id,
            cwd: self
                .config
                .agents
                .get(&job.agent_id)
                .and_then(|a| a.cwd.clone()),
            system_prompt: (!snapshot.prompt.is_empty()).then(|| snapshot.prompt.clone()),
        };

        match run_with_model_fallback(self.runtime.as_ref(), &chain, &request).await {
            Ok((outcome, served_model)) => {
                // 6. Post-run telemetry; the entry records what actually ran.
                let _ = self.sessions.update(&key, |e| {
                    e.model = Some(served_model.model.clone());
                    e.model_provider = Some(served_model.provider.clone());
                });
                let _ = self.store.update(&job.id, |j| {
                    j.last_status = Some("ok".into());
                    j.last_error = None;
                    j.last_run_at = Some(Utc::now());
                });
                tracing::debug!(
                    job = %job.id,
                    tokens = outcome.usage.total_tokens,
                    "cron run usage recorded"
                );
                Ok(RunReport {
                    job_id: job.id.clone(),
                    session_key: key,
                    status: "ok",
                    model: served_model,
                    error: None,
                })
            }
            Err(e) => {
                // 7. The pre-run model record stays untouched on failure.
                let _ = self.store.update(&job.id, |j| {
                    j.last_status = Some("error".into());
                    j.last_error = Some(e.to_string());
                    j.last_run_at = Some(Utc::now());
                });
                Ok(RunReport {
                    job_id: job.id.clone(),
                    session_key: key,
                    status: "error",
                    model: chain.primary,
                    error: Some(e.to_string()),
                })
            }
        }
    }
}

// Hard errors (malformed overrides, broken config) surface as Err from
// `run_job`; soft failures surface as a report with `status: "error"`.
impl CronRunner {
    pub fn is_hard_error(result: &Result<RunReport>) -> bool {
        matches!(result, Err(Error::Config(_)))
    }
}
