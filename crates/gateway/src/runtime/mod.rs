//! Agent runtime seams and the coordinators built on top of them.

pub mod approvals;
pub mod cli_runtime;
pub mod cron;
pub mod delivery;
pub mod dispatcher;
pub mod http;
pub mod runtimes;
pub mod subagents;

use tokio::sync::mpsc;

use oc_acp_protocol::{AgentEvent, Usage};
use oc_domain::config::{ModelChain, ModelRef};
use oc_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One agent turn to run.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_key: String,
    pub session_id: String,
    pub agent_id: String,
    pub task: String,
    pub model: ModelRef,
    /// Only forwarded for resumed sessions; fresh sessions never inherit a
    /// stored CLI session id.
    pub cli_session_id: Option<String>,
    pub cwd: Option<String>,
    pub system_prompt: Option<String>,
}

/// What the LLM-backed agent runtime exposes to the gateway. Everything
/// provider-specific lives behind this seam.
#[async_trait::async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start a turn. Events stream out of the returned receiver; the stream
    /// ends after a terminal event.
    async fn dispatch_turn(&self, req: TurnRequest) -> Result<mpsc::Receiver<AgentEvent>>;
}

/// Collected outcome of a completed turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub final_text: String,
    pub usage: Usage,
    pub events: Vec<AgentEvent>,
}

/// Drain a turn's event stream into an outcome. An `Error` terminal event
/// becomes an `Err`.
pub async fn collect_turn(mut rx: mpsc::Receiver<AgentEvent>) -> Result<TurnOutcome> {
    let mut outcome = TurnOutcome::default();
    while let Some(event) = rx.recv().await {
        match &event {
            AgentEvent::Final { text } => outcome.final_text = text.clone(),
            AgentEvent::Error { message } => {
                return Err(Error::Other(format!("agent turn failed: {message}")))
            }
            AgentEvent::Meta { tag, data } if tag == "usage_update" => {
                if let Ok(usage) = serde_json::from_value::<Usage>(data.clone()) {
                    outcome.usage = usage;
                }
            }
            _ => {}
        }
        outcome.events.push(event);
    }
    Ok(outcome)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a turn against the primary model, walking the fallback chain on
/// failure. Returns the outcome together with the model that actually
/// served it.
pub async fn run_with_model_fallback(
    runtime: &dyn AgentRuntime,
    chain: &ModelChain,
    req: &TurnRequest,
) -> Result<(TurnOutcome, ModelRef)> {
    let mut last_err: Option<Error> = None;

    let models = std::iter::once(&chain.primary).chain(chain.fallbacks.iter());
    for model in models {
        let mut attempt = req.clone();
        attempt.model = model.clone();
        match runtime.dispatch_turn(attempt).await {
            Ok(rx) => match collect_turn(rx).await {
                Ok(outcome) => return Ok((outcome, model.clone())),
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "turn failed; trying next model");
                    last_err = Some(e);
                }
            },
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "dispatch failed; trying next model");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Other("no models configured".into())))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted runtime (test support)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Runtime double scripted per model name. Unscripted models fail.
    pub struct ScriptedRuntime {
        scripts: Mutex<std::collections::HashMap<String, Vec<AgentEvent>>>,
        pub dispatched: Mutex<Vec<TurnRequest>>,
    }

    impl ScriptedRuntime {
        pub fn new() -> Self {
            Self {
                scripts: Mutex::new(std::collections::HashMap::new()),
                dispatched: Mutex::new(Vec::new()),
            }
        }

        pub fn script(&self, model: &str, events: Vec<AgentEvent>) {
            self.scripts.lock().insert(model.to_string(), events);
        }

        pub fn script_reply(&self, model: &str, text: &str) {
            self.script(model, vec![AgentEvent::Final { text: text.into() }]);
        }
    }

    #[async_trait::async_trait]
    impl AgentRuntime for ScriptedRuntime {
        async fn dispatch_turn(&self, req: TurnRequest) -> Result<mpsc::Receiver<AgentEvent>> {
            self.dispatched.lock().push(req.clone());
            let events = self
                .scripts
                .lock()
                .get(&req.model.model)
                .cloned()
                .ok_or_else(|| Error::Other(format!("model {} unavailable", req.model)))?;
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for event in events {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedRuntime;
    use super::*;
    use oc_domain::config::parse_model_ref;

    fn req() -> TurnRequest {
        TurnRequest {
            session_key: "agent:claw:main".into(),
            session_id: "s1".into(),
            agent_id: "claw".into(),
            task: "say hi".into(),
            model: parse_model_ref("claude-opus-4-6").unwrap(),
            cli_session_id: None,
            cwd: None,
            system_prompt: None,
        }
    }

    fn chain(primary: &str, fallbacks: &[&str]) -> ModelChain {
        ModelChain {
            primary: parse_model_ref(primary).unwrap(),
            fallbacks: fallbacks.iter().map(|m| parse_model_ref(m).unwrap()).collect(),
        }
    }

    #[tokio::test]
    async fn primary_model_serves_when_healthy() {
        let runtime = ScriptedRuntime::new();
        runtime.script_reply("claude-opus-4-6", "hello");
        let (outcome, model) =
            run_with_model_fallback(&runtime, &chain("claude-opus-4-6", &["gpt-4o"]), &req())
                .await
                .unwrap();
        assert_eq!(outcome.final_text, "hello");
        assert_eq!(model.model, "claude-opus-4-6");
    }

    #[tokio::test]
    async fn fallback_serves_when_primary_fails() {
        let runtime = ScriptedRuntime::new();
        runtime.script_reply("gpt-4o", "fallback says hi");
        let (outcome, model) =
            run_with_model_fallback(&runtime, &chain("claude-opus-4-6", &["gpt-4o"]), &req())
                .await
                .unwrap();
        assert_eq!(outcome.final_text, "fallback says hi");
        assert_eq!(model.provider, "openai");
    }

    #[tokio::test]
    async fn all_models_failing_is_an_error() {
        let runtime = ScriptedRuntime::new();
        let err = run_with_model_fallback(&runtime, &chain("claude-opus-4-6", &[]), &req())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn error_event_fails_the_turn() {
        let runtime = ScriptedRuntime::new();
        runtime.script(
            "claude-opus-4-6",
            vec![AgentEvent::Error {
                message: "rate limited".into(),
            }],
        );
        let err = run_with_model_fallback(&runtime, &chain("claude-opus-4-6", &[]), &req())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn usage_meta_is_collected() {
        let runtime = ScriptedRuntime::new();
        runtime.script(
            "claude-opus-4-6",
            vec![
                AgentEvent::Meta {
                    tag: "usage_update".into(),
                    data: serde_json::json!({"input_tokens": 10, "output_tokens": 4, "total_tokens": 14}),
                },
                AgentEvent::Final { text: "ok".into() },
            ],
        );
        let (outcome, _) = run_with_model_fallback(&runtime, &chain("claude-opus-4-6", &[]), &req())
            .await
            .unwrap();
        assert_eq!(outcome.usage.total_tokens, 14);
    }
}
