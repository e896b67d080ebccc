//! RPC method dispatch for `POST /rpc` and the long-lived connection.
//!
//! The dispatcher is single-threaded per connection and answers in request
//! order per id. Methods return a structured envelope; failures map to
//! `{status: "error" | "forbidden"}` rather than transport errors.

use serde_json::json;

use oc_acp_protocol::{ApprovalRequest, RpcRequest, RpcResponse, SpawnParams};
use oc_domain::inbound::OutboundRequest;
use oc_domain::ChannelId;

use crate::runtime::approvals::wait_decision_or_null;
use crate::runtime::subagents::SpawnContext;
use crate::runtime::TurnRequest;
use crate::state::AppState;

/// Dispatch one RPC request to its method handler.
pub async fn dispatch(state: &AppState, req: RpcRequest) -> RpcResponse {
    let id = req.id;
    match req.method.as_str() {
        "status" => status(state, id).await,
        "health" => RpcResponse::ok(id, json!({"ok": true})),
        "last-heartbeat" => RpcResponse::ok(
            id,
            json!({
                "lastBeatMs": state.heartbeat.last_beat_ms(),
                "ageMs": state.heartbeat.age_ms(),
            }),
        ),
        "models.list" => models_list(state, id),
        "agent" => agent(state, id, req.params).await,
        "sessions.list" => sessions_list(state, id),
        "sessions.purge" => sessions_purge(state, id, req.params),
        "sessions.spawn" => sessions_spawn(state, id, req.params).await,
        "exec.approval.request" => approval_request(state, id, req.params),
        "exec.approval.waitDecision" => approval_wait(state, id, req.params).await,
        "exec.approval.resolve" => approval_resolve(state, id, req.params),
        "chat.send" => chat_send(state, id, req.params).await,
        "cron.list" => RpcResponse::ok(id, json!({"jobs": state.cron_store.list()})),
        "doctor.check" => doctor_check(state, id),
        "node.list" => RpcResponse::ok(id, json!({"nodes": state.runtimes.list()})),
        "node.invoke" => node_invoke(state, id, req.params).await,
        other => RpcResponse::err(id, "unknown_method", format!("unknown method: {other}")),
    }
}

async fn status(state: &AppState, id: u64) -> RpcResponse {
    let accounts: Vec<serde_json::Value> = state
        .supervisor
        .statuses()
        .snapshot()
        .into_iter()
        .map(|(channel, account, status)| {
            json!({
                "channel": channel,
                "account": account,
                "status": status,
            })
        })
        .collect();
    RpcResponse::ok(
        id,
        json!({
            "accounts": accounts,
            "sessions": state.sessions.len(),
            "pendingApprovals": state.approvals.pending().len(),
        }),
    )
}

fn models_list(state: &AppState, id: u64) -> RpcResponse {
    let mut models = Vec::new();
    if let Some(primary) = &state.config.models.primary {
        models.push(primary.clone());
    }
    models.extend(state.config.models.fallbacks.iter().cloned());
    for agent in state.config.agents.values() {
        if let Some(m) = &agent.model {
            models.push(m.clone());
        }
        models.extend(agent.allowed_models.iter().cloned());
    }
    models.sort();
    models.dedup();
    RpcResponse::ok(id, json!({"models": models}))
}

/// Run one agent turn and return the final text. `deliver: true`
/// additionally pushes the reply over the named channel target.
async fn agent(state: &AppState, id: u64, params: serde_json::Value) -> RpcResponse {
    let session_key = params["sessionKey"].as_str().unwrap_or_default().to_string();
    let task = params["message"]
        .as_str()
        .or_else(|| params["task"].as_str())
        .unwrap_or_default()
        .to_string();
    if session_key.is_empty() || task.is_empty() {
        return RpcResponse::err(id, "invalid_params", "sessionKey and message required");
    }

    let agent_id = params["agentId"]
        .as_str()
        .map(String::from)
        .or_else(|| state.config.acp.default_agent.clone())
        .unwrap_or_else(|| "main".into());
    let agent_cfg = state.config.agents.get(&agent_id).cloned().unwrap_or_default();
    let chain = match agent_cfg.model_chain(&state.config.models) {
        Ok(c) => c,
        Err(e) => return RpcResponse::err(id, "config", e.to_string()),
    };
    let (entry, is_new) = match state.sessions.resolve_or_create(&session_key, false) {
        Ok(r) => r,
        Err(e) => return RpcResponse::err(id, "storage", e.to_string()),
    };

    let request = TurnRequest {
        session_key: session_key.clone(),
        session_id: entry.session_id.clone(),
        agent_id,
        task,
        model: chain.primary.clone(),
        cli_session_id: entry.cli_session_id_for(&chain.primary.provider, is_new),
        cwd: agent_cfg.cwd.clone(),
        system_prompt: None,
    };

    let outcome = match crate::runtime::run_with_model_fallback(
        state.runtime.as_ref(),
        &chain,
        &request,
    )
    .await
    {
        Ok((outcome, _model)) => outcome,
        Err(e) => return RpcResponse::err(id, "agent", e.to_string()),
    };

    let deliver = params["deliver"].as_bool().unwrap_or(false);
    if deliver {
        if let Err(e) = deliver_text(state, &params, &outcome.final_text).await {
            return RpcResponse::err(id, "delivery", e.to_string());
        }
    }

    RpcResponse::ok(
        id,
        json!({
            "status": "ok",
            "sessionKey": session_key,
            "text": outcome.final_text,
        }),
    )
}

async fn deliver_text(
    state: &AppState,
    params: &serde_json::Value,
    text: &str,
) -> oc_domain::Result<()> {
    let channel: ChannelId = params["channel"]
        .as_str()
        .unwrap_or("web")
        .parse()
        .unwrap_or(ChannelId::Web);
    let to = params["to"].as_str().unwrap_or_default();
    let plugin = state
        .registry
        .get(channel)
        .ok_or_else(|| oc_domain::Error::Channel {
            channel: channel.to_string(),
            message: "no plugin registered".into(),
        })?;
    let messaging = plugin
        .messaging()
        .ok_or_else(|| oc_domain::Error::Channel {
            channel: channel.to_string(),
            message: "no messaging adapter".into(),
        })?;
    let cfg = state
        .config
        .channels
        .get(channel)
        .cloned()
        .unwrap_or_default();
    let account_id = params["accountId"].as_str().unwrap_or("default");
    let account = plugin.resolve_account(&cfg, account_id)?;
    messaging
        .send(
            &account,
            &OutboundRequest {
                to: plugin.normalize_target(to),
                text: Some(text.to_string()),
                thread_id: params["threadId"].as_str().map(String::from),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

fn sessions_list(state: &AppState, id: u64) -> RpcResponse {
    let sessions: Vec<serde_json::Value> = state
        .sessions
        .list()
        .into_iter()
        .map(|(key, entry)| {
            json!({
                "sessionKey": key,
                "sessionId": entry.session_id,
                "updatedAt": entry.updated_at,
                "model": entry.model,
                "modelProvider": entry.model_provider,
                "systemSent": entry.system_sent,
                "lastProvider": entry.last_provider,
                "lastTo": entry.last_to,
            })
        })
        .collect();
    RpcResponse::ok(id, json!({"sessions": sessions}))
}

fn sessions_purge(state: &AppState, id: u64, params: serde_json::Value) -> RpcResponse {
    let key = params["sessionKey"].as_str().unwrap_or_default();
    if key.is_empty() {
        return RpcResponse::err(id, "invalid_params", "sessionKey required");
    }
    match state.sessions.purge(key) {
        Ok(removed) => RpcResponse::ok(id, json!({"removed": removed})),
        Err(e) => RpcResponse::err(id, "storage", e.to_string()),
    }
}

async fn sessions_spawn(state: &AppState, id: u64, params: serde_json::Value) -> RpcResponse {
    let spawn_params: SpawnParams = match serde_json::from_value(params.clone()) {
        Ok(p) => p,
        Err(e) => return RpcResponse::err(id, "invalid_params", e.to_string()),
    };
    let ctx = SpawnContext {
        agent_channel: params["channel"]
            .as_str()
            .unwrap_or("web")
            .parse()
            .unwrap_or(ChannelId::Web),
        agent_account_id: params["accountId"].as_str().unwrap_or("default").into(),
        agent_to: params["to"].as_str().unwrap_or_default().into(),
        requester_session_key: params["requesterSessionKey"]
            .as_str()
            .unwrap_or_default()
            .into(),
        requester_display_key: params["requesterDisplayKey"]
            .as_str()
            .unwrap_or_default()
            .into(),
    };
    match state.spawner.spawn_acp_direct(&spawn_params, &ctx).await {
        Ok(outcome) => RpcResponse::ok(
            id,
            json!({
                "status": outcome.status,
                "runId": outcome.run_id,
                "childSessionKey": outcome.child_session_key,
                "error": outcome.error,
            }),
        ),
        Err(e) => RpcResponse::err(id, "spawn", e.to_string()),
    }
}

fn approval_request(state: &AppState, id: u64, params: serde_json::Value) -> RpcResponse {
    let request: ApprovalRequest = match serde_json::from_value(params) {
        Ok(r) => r,
        Err(e) => {
            return RpcResponse::err(
                id,
                "invalid_params",
                format!("Exec approval registration failed: {e}"),
            )
        }
    };
    let registration = state.approvals.register(request);
    RpcResponse::ok(id, serde_json::to_value(registration).unwrap_or_default())
}

async fn approval_wait(state: &AppState, id: u64, params: serde_json::Value) -> RpcResponse {
    let approval_id = params["id"].as_str().unwrap_or_default();
    if approval_id.is_empty() {
        return RpcResponse::err(id, "invalid_params", "id required");
    }
    match wait_decision_or_null(&state.approvals, approval_id).await {
        Ok(Some(decision)) => RpcResponse::ok(id, json!({"decision": decision})),
        Ok(None) => RpcResponse::err(id, "expired", "approval expired or not found"),
        Err(e) => RpcResponse::err(id, "approval", e.to_string()),
    }
}

fn approval_resolve(state: &AppState, id: u64, params: serde_json::Value) -> RpcResponse {
    let approval_id = params["id"].as_str().unwrap_or_default();
    let decision = params["decision"].as_str().unwrap_or("approved");
    let resolved = state.approvals.resolve(approval_id, decision);
    RpcResponse::ok(id, json!({"resolved": resolved}))
}

fn doctor_check(state: &AppState, id: u64) -> RpcResponse {
    let mut config = (*state.config).clone();
    match crate::cli::doctor::run(
        &mut config,
        &oc_domain::paths::config_path(),
        &state.state_dir,
        false,
        true,
    ) {
        Ok(report) => RpcResponse::ok(id, serde_json::to_value(report).unwrap_or_default()),
        Err(e) => RpcResponse::err(id, "doctor", e.to_string()),
    }
}

/// Forward a method call to a connected out-of-process runtime.
async fn node_invoke(state: &AppState, id: u64, params: serde_json::Value) -> RpcResponse {
    let agent_id = params["agentId"].as_str().unwrap_or_default();
    let method = params["method"].as_str().unwrap_or_default();
    if agent_id.is_empty() || method.is_empty() {
        return RpcResponse::err(id, "invalid_params", "agentId and method required");
    }
    let timeout = std::time::Duration::from_millis(params["timeoutMs"].as_u64().unwrap_or(30_000));
    match state
        .runtimes
        .invoke(agent_id, method, params["params"].clone(), timeout)
        .await
    {
        Ok(resp) => RpcResponse {
            id,
            result: resp.result,
            error: resp.error,
        },
        Err(e) => RpcResponse::err(id, "node", e.to_string()),
    }
}

async fn chat_send(state: &AppState, id: u64, params: serde_json::Value) -> RpcResponse {
    let text = params["text"].as_str().unwrap_or_default();
    if text.is_empty() {
        return RpcResponse::err(id, "invalid_params", "text required");
    }
    match deliver_text(state, &params, text).await {
        Ok(()) => RpcResponse::ok(id, json!({"status": "ok"})),
        Err(e) => RpcResponse::err(id, "delivery", e.to_string()),
    }
}
