//! CLI-backed agent runtime.
//!
//! Agents configured with a `command` run their turns in a child process
//! instead of over HTTP. Commands resolve through the spawn cache in strict
//! mode (an unresolvable Windows wrapper is an error, never a shell), and
//! the stored CLI session id rides `--resume` only for resumed sessions.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use oc_acp_protocol::AgentEvent;
use oc_domain::config::Config;
use oc_domain::{Error, Result};
use oc_spawn::{materialize, SpawnCommandCache, SpawnRequest};

use crate::runtime::{AgentRuntime, TurnRequest};

fn current_platform() -> &'static str {
    if cfg!(windows) {
        "win32"
    } else {
        std::env::consts::OS
    }
}

pub struct CliAgentRuntime {
    config: Arc<Config>,
    cache: SpawnCommandCache,
    fallback: Arc<dyn AgentRuntime>,
}

impl CliAgentRuntime {
    pub fn new(config: Arc<Config>, fallback: Arc<dyn AgentRuntime>) -> Self {
        Self {
            config,
            cache: SpawnCommandCache::new(),
            fallback,
        }
    }

    fn turn_argv(req: &TurnRequest) -> Vec<String> {
        let mut argv = vec![
            "agent".to_string(),
            "run".to_string(),
            "--model".to_string(),
            req.model.to_string(),
        ];
        if let Some(resume) = &req.cli_session_id {
            argv.push("--resume".to_string());
            argv.push(resume.clone());
        }
        argv.push(req.task.clone());
        argv
    }

    async fn run_command(&self, command: &str, req: &TurnRequest) -> Result<String> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let exec_path = env
            .get("OPENCLAW_NODE_PATH")
            .cloned()
            .unwrap_or_else(|| "node".to_string());

        let program = self.cache.resolve(&SpawnRequest {
            command,
            platform: current_platform(),
            env: &env,
            exec_path: &exec_path,
            package_name: None,
            allow_shell_fallback: Some(false),
        })?;
        let invocation = materialize(&program, &Self::turn_argv(req));

        let mut cmd = tokio::process::Command::new(&invocation.command);
        cmd.args(&invocation.argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &req.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(windows)]
        if invocation.windows_hide {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(format!("spawning `{}`: {e}", invocation.command)))?;

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)
                .await
                .map_err(Error::Io)?;
        }
        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr).await;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Spawn(format!("waiting for `{command}`: {e}")))?;
        if !status.success() {
            return Err(Error::Spawn(format!(
                "`{command}` exited with {status}: {}",
                stderr.trim()
            )));
        }
        Ok(stdout.trim_end().to_string())
    }
}

#[async_trait::async_trait]
impl AgentRuntime for CliAgentRuntime {
    async fn dispatch_turn(&self, req: TurnRequest) -> Result<mpsc::Receiver<AgentEvent>> {
        let command = self
            .config
            .agents
            .get(&req.agent_id)
            .and_then(|a| a.command.clone());
        let Some(command) = command else {
            return self.fallback.dispatch_turn(req).await;
        };

        let result = self.run_command(&command, &req).await;
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            match result {
                Ok(text) => {
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
