//! HTTP-backed agent runtime speaking the OpenAI-compatible
//! chat-completions shape. Anthropic and Google models ride the same shape
//! behind per-provider base URLs and key env vars.

use std::collections::HashMap;

use serde_json::json;
use tokio::sync::mpsc;

use oc_acp_protocol::AgentEvent;
use oc_domain::{Error, Result};

use crate::runtime::{AgentRuntime, TurnRequest};

struct ProviderEndpoint {
    base_url: &'static str,
    key_env: &'static str,
}

fn endpoints() -> HashMap<&'static str, ProviderEndpoint> {
    HashMap::from([
        (
            "openai",
            ProviderEndpoint {
                base_url: "https://api.openai.com/v1",
                key_env: "OPENAI_API_KEY",
            },
        ),
        (
            "anthropic",
            ProviderEndpoint {
                base_url: "https://api.anthropic.com/v1",
                key_env: "ANTHROPIC_API_KEY",
            },
        ),
        (
            "google",
            ProviderEndpoint {
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
                key_env: "GEMINI_API_KEY",
            },
        ),
    ])
}

pub struct HttpAgentRuntime {
    client: reqwest::Client,
}

impl HttpAgentRuntime {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn complete(&self, req: &TurnRequest) -> Result<(String, serde_json::Value)> {
        let endpoints = endpoints();
        let endpoint = endpoints.get(req.model.provider.as_str()).ok_or_else(|| {
            Error::Config(format!("no endpoint for provider `{}`", req.model.provider))
        })?;
        let key = std::env::var(endpoint.key_env)
            .map_err(|_| Error::Auth(format!("{} is not set", endpoint.key_env)))?;

        let mut messages = Vec::new();
        if let Some(system) = &req.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": req.task}));

        let resp = self
            .client
            .post(format!("{}/chat/completions", endpoint.base_url))
            .bearer_auth(key)
            .json(&json!({
                "model": req.model.model,
                "messages": messages,
            }))
            .send()
            .await
            .map_err(|e| Error::Http(format!("fetch failed: {e}")))?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("decoding response: {e}")))?;
        if !status.is_success() {
            return Err(Error::Http(format!(
                "provider {status}: {}",
                payload
                    .pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("?")
            )));
        }

        let text = payload
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        let usage = json!({
            "input_tokens": payload.pointer("/usage/prompt_tokens").cloned().unwrap_or(json!(0)),
            "output_tokens": payload.pointer("/usage/completion_tokens").cloned().unwrap_or(json!(0)),
            "total_tokens": payload.pointer("/usage/total_tokens").cloned().unwrap_or(json!(0)),
        });
        Ok((text, usage))
    }
}

impl Default for HttpAgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn dispatch_turn(&self, req: TurnRequest) -> Result<mpsc::Receiver<AgentEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let result = self.complete(&req).await;
        tokio::spawn(async move {
            match result {
                Ok((text, usage)) => {
                    let _ = tx
                        .send(AgentEvent::Meta {
                            tag: "usage_update".into(),
                            data: usage,
                        })
                        .await;
                    let _ = tx.send(AgentEvent::Final { text }).await;
                }
                Err(e) => {
                    let _ = tx
                        .send(AgentEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
        Ok(rx)
    }
}
