//! Subagent/ACP spawn orchestration.
//!
//! Spawns isolated (one-shot) or session (thread-bound) child agents:
//! policy checks, session initialization, thread binding, initial task
//! dispatch, run tracking, and the deferred-cleanup decision when a run
//! ends while descendants are still active.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use oc_acp_protocol::{
    MethodStatus, SpawnParams, SpawnRuntime, SubagentRunRecord, MAX_SPAWN_ATTACHMENTS,
    MAX_SPAWN_ATTACHMENT_BYTES, REDACTED_PLACEHOLDER,
};
use oc_domain::config::Config;
use oc_domain::{ChannelId, Error, Result};
use oc_sessions::{
    session_key, BindConversation, BindRequest, SessionBindingService, SessionScope, SessionStore,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The gateway `agent` invocation that delivers the child's initial task.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub session_key: String,
    pub channel: ChannelId,
    pub account_id: String,
    pub to: String,
    pub thread_id: Option<String>,
    pub deliver: bool,
    pub task: String,
}

/// Channel-side effects the orchestrator needs: thread creation and task
/// dispatch.
#[async_trait::async_trait]
pub trait SpawnDispatcher: Send + Sync {
    /// Create a fresh thread under the parent conversation; returns the new
    /// conversation id.
    async fn create_thread(
        &self,
        channel: ChannelId,
        account_id: &str,
        parent_conversation_id: &str,
        title: &str,
    ) -> Result<String>;

    async fn dispatch(&self, req: DispatchRequest) -> Result<()>;
}

/// Where the spawning turn came from.
#[derive(Debug, Clone)]
pub struct SpawnContext {
    pub agent_channel: ChannelId,
    pub agent_account_id: String,
    /// Raw reply target of the requesting turn (e.g. `channel:parent-channel`).
    pub agent_to: String,
    pub requester_session_key: String,
    pub requester_display_key: String,
}

/// Result surfaced to the `sessions_spawn` tool.
#[derive(Debug, Clone)]
pub struct SpawnOutcome {
    pub status: MethodStatus,
    pub run_id: Option<String>,
    pub child_session_key: Option<String>,
    pub error: Option<String>,
}

impl SpawnOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self {
            status: MethodStatus::Error,
            run_id: None,
            child_session_key: None,
            error: Some(message.into()),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: MethodStatus::Forbidden,
            run_id: None,
            child_session_key: None,
            error: Some(message.into()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SpawnOrchestrator {
    config: Arc<Config>,
    sessions: Arc<SessionStore>,
    bindings: Arc<SessionBindingService>,
    dispatcher: Arc<dyn SpawnDispatcher>,
    runs: Mutex<HashMap<String, SubagentRunRecord>>,
}

impl SpawnOrchestrator {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionStore>,
        bindings: Arc<SessionBindingService>,
        dispatcher: Arc<dyn SpawnDispatcher>,
    ) -> Self {
        Self {
            config,
            sessions,
            bindings,
            dispatcher,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a child agent directly over ACP (or in-process subagent
    /// runtime), bind it, and dispatch its initial task.
    pub async fn spawn_acp_direct(
        &self,
        params: &SpawnParams,
        ctx: &SpawnContext,
    ) -> Result<SpawnOutcome> {
        // ── Policy checks (short-circuit, in order) ──────────────────
        if params.runtime == SpawnRuntime::Acp && params.thread {
            let allowed = self
                .config
                .channels
                .get(ctx.agent_channel)
                .map(|c| c.thread_bindings.spawn_acp_sessions)
                .unwrap_or(false);
            if !allowed {
                return Ok(SpawnOutcome::error(format!(
                    "thread spawns over ACP need `channels.{}.threadBindings.spawnAcpSessions=true`",
                    ctx.agent_channel
                )));
            }
        }

        let agent_id = match params
            .agent_id
            .clone()
            .or_else(|| self.config.acp.default_agent.clone())
        {
            Some(id) => id,
            None => {
                return Ok(SpawnOutcome::error(
                    "no agent requested and no default configured; set `acp.defaultAgent`",
                ))
            }
        };

        if !self.config.acp.allowed_agents.contains(&agent_id) {
            return Ok(SpawnOutcome::forbidden(format!(
                "agent `{agent_id}` is not in acp.allowedAgents"
            )));
        }

        if params.runtime == SpawnRuntime::Acp && !params.attachments.is_empty() {
            return Ok(SpawnOutcome::error(
                "ACP runtimes do not support attachments",
            ));
        }
        if params.attachments.len() > MAX_SPAWN_ATTACHMENTS {
            return Ok(SpawnOutcome::error(format!(
                "too many attachments (max {MAX_SPAWN_ATTACHMENTS})"
            )));
        }
        if let Some(oversize) = params
            .attachments
            .iter()
            .find(|a| a.content.len() > MAX_SPAWN_ATTACHMENT_BYTES)
        {
            return Ok(SpawnOutcome::error(format!(
                "attachment `{}` exceeds {MAX_SPAWN_ATTACHMENT_BYTES} bytes",
                oversize.name
            )));
        }

        // ── Spawn ────────────────────────────────────────────────────
        let scope = match params.runtime {
            SpawnRuntime::Acp => SessionScope::fresh_acp(),
            SpawnRuntime::Subagent => SessionScope::fresh_subagent(),
        };
        let child_session_key = session_key(&agent_id, &scope);
        self.sessions.resolve_or_create(&child_session_key, true)?;

        let parent_conversation_id = parent_conversation_of(&ctx.agent_to);
        let conversation_id = if params.thread {
            self.dispatcher
                .create_thread(
                    ctx.agent_channel,
                    &ctx.agent_account_id,
                    &parent_conversation_id,
                    &thread_title(&params.task),
                )
                .await?
        } else {
            parent_conversation_id.clone()
        };

        let mut metadata = serde_json::json!({
            "introText": intro_text(&agent_id, &params.task),
        });
        if let Some(cwd) = &params.cwd {
            metadata["cwd"] = serde_json::json!(cwd);
        }

        self.bindings.bind(BindRequest {
            target_session_key: child_session_key.clone(),
            target_kind: oc_sessions::binding::BindTargetKind::Session,
            placement: "child".into(),
            conversation: BindConversation {
                channel: ctx.agent_channel,
                account_id: ctx.agent_account_id.clone(),
                conversation_id: conversation_id.clone(),
                parent_conversation_id: params.thread.then(|| parent_conversation_id.clone()),
            },
            metadata,
        });

        self.dispatcher
            .dispatch(DispatchRequest {
                session_key: child_session_key.clone(),
                channel: ctx.agent_channel,
                account_id: ctx.agent_account_id.clone(),
                to: format!("channel:{conversation_id}"),
                thread_id: params.thread.then(|| conversation_id.clone()),
                deliver: true,
                task: params.task.clone(),
            })
            .await?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let record = SubagentRunRecord {
            run_id: run_id.clone(),
            child_session_key: child_session_key.clone(),
            requester_session_key: ctx.requester_session_key.clone(),
            requester_display_key: ctx.requester_display_key.clone(),
            task: params.task.clone(),
            cleanup: params.cleanup,
            created_at: Utc::now(),
            ended_at: None,
            expects_completion_message: true,
            announce_retry_count: 0,
        };
        self.runs.lock().insert(run_id.clone(), record);

        tracing::info!(
            run_id = %run_id,
            child = %child_session_key,
            mode = ?params.mode,
            thread = params.thread,
            "child session spawned"
        );

        Ok(SpawnOutcome {
            status: MethodStatus::Accepted,
            run_id: Some(run_id),
            child_session_key: Some(child_session_key),
            error: None,
        })
    }

    pub fn run(&self, run_id: &str) -> Option<SubagentRunRecord> {
        self.runs.lock().get(run_id).cloned()
    }

    pub fn mark_ended(&self, run_id: &str) -> Option<SubagentRunRecord> {
        let mut runs = self.runs.lock();
        let record = runs.get_mut(run_id)?;
        record.ended_at = Some(Utc::now());
        Some(record.clone())
    }

    /// Runs whose requester chain leads back to `session_key` and that are
    /// still active.
    pub fn active_descendants(&self, session_key: &str) -> usize {
        self.runs
            .lock()
            .values()
            .filter(|r| r.requester_session_key == session_key && r.ended_at.is_none())
            .count()
    }

    pub fn remove_run(&self, run_id: &str) -> Option<SubagentRunRecord> {
        self.runs.lock().remove(run_id)
    }

    /// Mark a run cancelled; cleanup is decided on the next tick.
    pub fn cancel(&self, run_id: &str) {
        if let Some(record) = self.mark_ended(run_id) {
            tracing::info!(run_id = %record.run_id, "subagent run cancelled");
        }
    }
}

fn parent_conversation_of(agent_to: &str) -> String {
    agent_to
        .split_once(':')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_else(|| agent_to.to_string())
}

fn thread_title(task: &str) -> String {
    let mut title: String = task.chars().take(60).collect();
    if title.len() < task.len() {
        title.push('…');
    }
    title
}

fn intro_text(agent_id: &str, task: &str) -> String {
    format!("Spawned `{agent_id}` to work on: {}", thread_title(task))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cleanup decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupDecision {
    /// Descendants still active: check again after `delay_ms`.
    DeferDescendants { delay_ms: u64 },
    /// Stop trying.
    GiveUp { reason: &'static str, retry_count: u32 },
    /// Announce again, then resume cleanup after `resume_delay_ms`.
    Retry { retry_count: u32, resume_delay_ms: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct CleanupPolicy {
    pub announce_expiry_ms: i64,
    pub announce_completion_hard_expiry_ms: i64,
    pub max_announce_retry_count: u32,
    pub defer_descendant_delay_ms: u64,
    pub announce_retry_delay_ms: u64,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            announce_expiry_ms: 2 * 60 * 1000,
            announce_completion_hard_expiry_ms: 30 * 60 * 1000,
            max_announce_retry_count: 3,
            defer_descendant_delay_ms: 15_000,
            announce_retry_delay_ms: 5_000,
        }
    }
}

/// Decide what happens to an ended run.
pub fn decide_cleanup(
    entry: &SubagentRunRecord,
    now: DateTime<Utc>,
    active_descendant_runs: usize,
    policy: &CleanupPolicy,
) -> CleanupDecision {
    let ended_at = entry.ended_at.unwrap_or(entry.created_at);
    let age_ms = (now - ended_at).num_milliseconds();

    if entry.expects_completion_message {
        let past_hard_expiry =
            age_ms >= policy.announce_completion_hard_expiry_ms;
        if active_descendant_runs > 0 && !past_hard_expiry {
            return CleanupDecision::DeferDescendants {
                delay_ms: policy.defer_descendant_delay_ms,
            };
        }
        if past_hard_expiry {
            return CleanupDecision::GiveUp {
                reason: "expiry",
                retry_count: entry.announce_retry_count,
            };
        }
        let retry_count = entry.announce_retry_count + 1;
        if retry_count > policy.max_announce_retry_count {
            return CleanupDecision::GiveUp {
                reason: "retries-exhausted",
                retry_count: entry.announce_retry_count,
            };
        }
        return CleanupDecision::Retry {
            retry_count,
            resume_delay_ms: policy.announce_retry_delay_ms,
        };
    }

    if age_ms >= policy.announce_expiry_ms {
        CleanupDecision::GiveUp {
            reason: "expiry",
            retry_count: 1,
        }
    } else {
        CleanupDecision::Retry {
            retry_count: 1,
            resume_delay_ms: policy.announce_retry_delay_ms,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript redaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replace attachment contents in a persisted tool call with the redaction
/// placeholder. Covers both the `arguments.attachments[*].content` and
/// `input.attachments[*].content` shapes.
pub fn sanitize_tool_call_inputs(tool_call: &mut serde_json::Value) {
    for key in ["arguments", "input"] {
        if let Some(attachments) = tool_call
            .get_mut(key)
            .and_then(|v| v.get_mut("attachments"))
            .and_then(|v| v.as_array_mut())
        {
            for attachment in attachments {
                if let Some(content) = attachment.get_mut("content") {
                    if !content.is_null() {
                        *content = serde_json::json!(REDACTED_PLACEHOLDER);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use oc_acp_protocol::{CleanupMode, SpawnMode};
    use oc_domain::config::{AcpConfig, ChannelConfig, ThreadBindingsConfig};

    struct ScriptedDispatcher {
        thread_id: String,
        created_threads: Mutex<Vec<(ChannelId, String, String)>>,
        dispatches: Mutex<Vec<DispatchRequest>>,
    }

    impl ScriptedDispatcher {
        fn new(thread_id: &str) -> Arc<Self> {
            Arc::new(Self {
                thread_id: thread_id.into(),
                created_threads: Mutex::new(Vec::new()),
                dispatches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl SpawnDispatcher for ScriptedDispatcher {
        async fn create_thread(
            &self,
            channel: ChannelId,
            account_id: &str,
            parent_conversation_id: &str,
            _title: &str,
        ) -> Result<String> {
            self.created_threads.lock().push((
                channel,
                account_id.to_string(),
                parent_conversation_id.to_string(),
            ));
            Ok(self.thread_id.clone())
        }

        async fn dispatch(&self, req: DispatchRequest) -> Result<()> {
            self.dispatches.lock().push(req);
            Ok(())
        }
    }

    fn config_allowing(agent: &str, spawn_acp_sessions: bool) -> Arc<Config> {
        let mut config = Config::default();
        config.acp = AcpConfig {
            allowed_agents: vec![agent.to_string()],
            default_agent: Some(agent.to_string()),
        };
        config.channels.channels.insert(
            ChannelId::Discord,
            ChannelConfig {
                enabled: true,
                thread_bindings: ThreadBindingsConfig { spawn_acp_sessions },
                ..Default::default()
            },
        );
        Arc::new(config)
    }

    fn orchestrator(
        config: Arc<Config>,
        dispatcher: Arc<ScriptedDispatcher>,
    ) -> (SpawnOrchestrator, Arc<SessionBindingService>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::open(dir.path()).unwrap());
        let bindings = Arc::new(SessionBindingService::new());
        (
            SpawnOrchestrator::new(config, sessions, bindings.clone(), dispatcher),
            bindings,
            dir,
        )
    }

    fn ctx() -> SpawnContext {
        SpawnContext {
            agent_channel: ChannelId::Discord,
            agent_account_id: "default".into(),
            agent_to: "channel:parent-channel".into(),
            requester_session_key: "agent:claw:main".into(),
            requester_display_key: "claw (main)".into(),
        }
    }

    fn spawn_params(thread: bool) -> SpawnParams {
        SpawnParams {
            task: "Investigate flaky tests".into(),
            runtime: SpawnRuntime::Acp,
            agent_id: Some("codex".into()),
            mode: SpawnMode::Session,
            thread,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn acp_session_thread_spawn_binds_and_dispatches() {
        let dispatcher = ScriptedDispatcher::new("child-thread");
        let (orchestrator, bindings, _dir) =
            orchestrator(config_allowing("codex", true), dispatcher.clone());

        let outcome = orchestrator
            .spawn_acp_direct(&spawn_params(true), &ctx())
            .await
            .unwrap();

        assert_eq!(outcome.status, MethodStatus::Accepted);
        let child_key = outcome.child_session_key.unwrap();
        assert!(child_key.starts_with("agent:codex:acp:"));

        // Exactly one bind, child placement, thread conversation.
        assert_eq!(bindings.active_count(), 1);
        let binding = bindings.for_session(&child_key).unwrap();
        assert_eq!(
            binding.target_kind,
            oc_sessions::binding::BindTargetKind::Session
        );
        assert_eq!(binding.placement, "child");
        assert_eq!(binding.conversation.conversation_id, "child-thread");
        assert_eq!(
            binding.conversation.parent_conversation_id.as_deref(),
            Some("parent-channel")
        );
        let intro = binding.metadata["introText"].as_str().unwrap();
        assert!(!intro.contains("session ids: pending (available after the first reply)"));

        // Exactly one gateway agent dispatch into the new thread.
        let dispatches = dispatcher.dispatches.lock().clone();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].to, "channel:child-thread");
        assert_eq!(dispatches[0].thread_id.as_deref(), Some("child-thread"));
        assert!(dispatches[0].deliver);
        assert_eq!(dispatches[0].task, "Investigate flaky tests");

        // Run registered, expecting a completion message.
        let run = orchestrator.run(&outcome.run_id.unwrap()).unwrap();
        assert!(run.expects_completion_message);
        assert_eq!(run.cleanup, CleanupMode::Keep);
    }

    #[tokio::test]
    async fn acp_thread_spawn_requires_channel_opt_in() {
        let dispatcher = ScriptedDispatcher::new("child-thread");
        let (orchestrator, _, _dir) =
            orchestrator(config_allowing("codex", false), dispatcher);

        let outcome = orchestrator
            .spawn_acp_direct(&spawn_params(true), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome.status, MethodStatus::Error);
        assert!(outcome.error.unwrap().contains("spawnAcpSessions=true"));
    }

    #[tokio::test]
    async fn missing_agent_and_default_is_an_error() {
        let dispatcher = ScriptedDispatcher::new("t");
        let mut config = Config::default();
        config.acp = AcpConfig::default();
        let (orchestrator, _, _dir) = orchestrator(Arc::new(config), dispatcher);

        let mut params = spawn_params(false);
        params.agent_id = None;
        let outcome = orchestrator.spawn_acp_direct(&params, &ctx()).await.unwrap();
        assert_eq!(outcome.status, MethodStatus::Error);
        assert!(outcome.error.unwrap().contains("acp.defaultAgent"));
    }

    #[tokio::test]
    async fn unlisted_agent_is_forbidden() {
        let dispatcher = ScriptedDispatcher::new("t");
        let (orchestrator, _, _dir) =
            orchestrator(config_allowing("codex", true), dispatcher);

        let mut params = spawn_params(false);
        params.agent_id = Some("rogue".into());
        let outcome = orchestrator.spawn_acp_direct(&params, &ctx()).await.unwrap();
        assert_eq!(outcome.status, MethodStatus::Forbidden);
    }

    #[tokio::test]
    async fn acp_attachments_are_rejected() {
        let dispatcher = ScriptedDispatcher::new("t");
        let (orchestrator, _, _dir) =
            orchestrator(config_allowing("codex", true), dispatcher);

        let mut params = spawn_params(false);
        params.attachments = vec![oc_acp_protocol::SpawnAttachment {
            name: "notes.txt".into(),
            content: "data".into(),
            mime_type: None,
        }];
        let outcome = orchestrator.spawn_acp_direct(&params, &ctx()).await.unwrap();
        assert_eq!(outcome.status, MethodStatus::Error);
        assert!(outcome.error.unwrap().contains("attachments"));
    }

    #[tokio::test]
    async fn non_thread_spawn_binds_parent_conversation() {
        let dispatcher = ScriptedDispatcher::new("unused");
        let (orchestrator, bindings, _dir) =
            orchestrator(config_allowing("codex", true), dispatcher.clone());

        let outcome = orchestrator
            .spawn_acp_direct(&spawn_params(false), &ctx())
            .await
            .unwrap();
        let binding = bindings
            .for_session(&outcome.child_session_key.unwrap())
            .unwrap();
        assert_eq!(binding.conversation.conversation_id, "parent-channel");
        assert!(binding.conversation.parent_conversation_id.is_none());
        assert!(dispatcher.created_threads.lock().is_empty());
    }

    // ── Cleanup decision ─────────────────────────────────────────────

    fn run_record(expects: bool, retry_count: u32, ended_ms_ago: i64) -> SubagentRunRecord {
        let now = Utc::now();
        SubagentRunRecord {
            run_id: "r1".into(),
            child_session_key: "agent:codex:acp:x".into(),
            requester_session_key: "agent:claw:main".into(),
            requester_display_key: "claw".into(),
            task: "t".into(),
            cleanup: CleanupMode::Delete,
            created_at: now - ChronoDuration::milliseconds(ended_ms_ago + 1000),
            ended_at: Some(now - ChronoDuration::milliseconds(ended_ms_ago)),
            expects_completion_message: expects,
            announce_retry_count: retry_count,
        }
    }

    #[test]
    fn cleanup_defers_while_descendants_active() {
        let policy = CleanupPolicy::default();
        let decision = decide_cleanup(&run_record(true, 0, 0), Utc::now(), 2, &policy);
        assert_eq!(
            decision,
            CleanupDecision::DeferDescendants {
                delay_ms: policy.defer_descendant_delay_ms
            }
        );
    }

    #[test]
    fn cleanup_gives_up_past_hard_expiry_even_with_descendants() {
        let policy = CleanupPolicy::default();
        let record = run_record(true, 0, policy.announce_completion_hard_expiry_ms + 1);
        let decision = decide_cleanup(&record, Utc::now(), 2, &policy);
        assert_eq!(
            decision,
            CleanupDecision::GiveUp {
                reason: "expiry",
                retry_count: 0
            }
        );
    }

    #[test]
    fn cleanup_retries_until_budget_exhausted() {
        let policy = CleanupPolicy::default();
        match decide_cleanup(&run_record(true, 0, 0), Utc::now(), 0, &policy) {
            CleanupDecision::Retry { retry_count, .. } => assert_eq!(retry_count, 1),
            other => panic!("expected retry, got {other:?}"),
        }
        let decision = decide_cleanup(
            &run_record(true, policy.max_announce_retry_count, 0),
            Utc::now(),
            0,
            &policy,
        );
        assert_eq!(
            decision,
            CleanupDecision::GiveUp {
                reason: "retries-exhausted",
                retry_count: policy.max_announce_retry_count
            }
        );
    }

    #[test]
    fn cleanup_without_completion_expectation_expires_once() {
        let policy = CleanupPolicy::default();
        let decision = decide_cleanup(
            &run_record(false, 0, policy.announce_expiry_ms + 1),
            Utc::now(),
            0,
            &policy,
        );
        assert_eq!(
            decision,
            CleanupDecision::GiveUp {
                reason: "expiry",
                retry_count: 1
            }
        );
    }

    // ── Redaction ────────────────────────────────────────────────────

    #[test]
    fn redacts_arguments_and_input_attachment_contents() {
        let mut tool_call = serde_json::json!({
            "name": "sessions_spawn",
            "arguments": {
                "task": "t",
                "attachments": [{"name": "a", "content": "SUPER_SECRET"}]
            },
            "input": {
                "attachments": [{"name": "b", "content": "SUPER_SECRET"}]
            }
        });
        sanitize_tool_call_inputs(&mut tool_call);

        assert_eq!(
            tool_call["arguments"]["attachments"][0]["content"],
            REDACTED_PLACEHOLDER
        );
        assert_eq!(
            tool_call["input"]["attachments"][0]["content"],
            REDACTED_PLACEHOLDER
        );
        let serialized = serde_json::to_string(&tool_call).unwrap();
        assert!(!serialized.contains("SUPER_SECRET"));
    }

    #[test]
    fn redaction_ignores_unrelated_shapes() {
        let mut tool_call = serde_json::json!({"name": "exec", "arguments": {"command": "ls"}});
        let before = tool_call.clone();
        sanitize_tool_call_inputs(&mut tool_call);
        assert_eq!(tool_call, before);
    }
}
