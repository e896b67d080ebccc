//! PATH/PATHEXT lookup and `.cmd` shim unwrapping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use oc_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a spawned program should be executed. One variant per distinct
/// execution strategy; callers branch on this, never on string tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "kebab-case")]
pub enum WindowsSpawnProgram {
    /// Run the command as-is (non-Windows, or a plain executable).
    Direct { command: String },
    /// Route a JS entrypoint through the runtime binary.
    NodeEntrypoint {
        command: String,
        leading_argv: Vec<String>,
        windows_hide: bool,
    },
    /// A shim unwrapped to a native executable.
    ExeEntrypoint { command: String },
    /// A wrapper we could not unwrap; the caller accepted shell execution.
    ShellFallback { command: String },
}

impl WindowsSpawnProgram {
    pub fn command(&self) -> &str {
        match self {
            WindowsSpawnProgram::Direct { command }
            | WindowsSpawnProgram::NodeEntrypoint { command, .. }
            | WindowsSpawnProgram::ExeEntrypoint { command }
            | WindowsSpawnProgram::ShellFallback { command } => command,
        }
    }

    pub fn uses_shell(&self) -> bool {
        matches!(self, WindowsSpawnProgram::ShellFallback { .. })
    }
}

/// A resolution request. `env` supplies `PATH`/`PATHEXT`; `exec_path` is the
/// runtime binary used for JS entrypoints.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub command: &'a str,
    pub platform: &'a str,
    pub env: &'a HashMap<String, String>,
    pub exec_path: &'a str,
    pub package_name: Option<&'a str>,
    /// `Some(false)` = strict mode: an unresolvable wrapper is an error
    /// instead of a shell fallback.
    pub allow_shell_fallback: Option<bool>,
}

/// A fully materialized invocation: program + argv, ready for the process
/// API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnInvocation {
    pub command: String,
    pub argv: Vec<String>,
    pub shell: bool,
    pub windows_hide: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a command to an executable program.
///
/// Never touches the shell on non-Windows platforms, never touches it in
/// strict mode, and never silently swallows a wrapper that failed to
/// unwrap.
pub fn resolve_spawn_program(req: &SpawnRequest<'_>) -> Result<WindowsSpawnProgram> {
    if req.platform != "win32" {
        return Ok(WindowsSpawnProgram::Direct {
            command: req.command.to_string(),
        });
    }

    let resolved = resolve_against_path(req.command, req.env);
    let resolved = match resolved {
        Some(p) => p,
        None => PathBuf::from(req.command),
    };

    let ext = resolved
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "js" | "cjs" | "mjs" => Ok(WindowsSpawnProgram::NodeEntrypoint {
            command: req.exec_path.to_string(),
            leading_argv: vec![resolved.to_string_lossy().into_owned()],
            windows_hide: true,
        }),
        "cmd" | "bat" => match unwrap_cmd_shim(&resolved, req.package_name) {
            Some(target) => Ok(target_program(&target, req.exec_path)),
            None => {
                if req.allow_shell_fallback != Some(false) {
                    Ok(WindowsSpawnProgram::ShellFallback {
                        command: req.command.to_string(),
                    })
                } else {
                    Err(Error::Spawn(format!(
                        "cannot run wrapper `{}`: no executable/Node entrypoint \
                         without shell execution",
                        resolved.display()
                    )))
                }
            }
        },
        _ => Ok(WindowsSpawnProgram::Direct {
            command: resolved.to_string_lossy().into_owned(),
        }),
    }
}

fn target_program(target: &Path, exec_path: &str) -> WindowsSpawnProgram {
    let is_exe = target
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("exe"));
    if is_exe {
        WindowsSpawnProgram::ExeEntrypoint {
            command: target.to_string_lossy().into_owned(),
        }
    } else {
        WindowsSpawnProgram::NodeEntrypoint {
            command: exec_path.to_string(),
            leading_argv: vec![target.to_string_lossy().into_owned()],
            windows_hide: true,
        }
    }
}

/// Build the final invocation from a resolved program and caller argv.
pub fn materialize(program: &WindowsSpawnProgram, caller_argv: &[String]) -> SpawnInvocation {
    match program {
        WindowsSpawnProgram::Direct { command } => SpawnInvocation {
            command: command.clone(),
            argv: caller_argv.to_vec(),
            shell: false,
            windows_hide: false,
        },
        WindowsSpawnProgram::NodeEntrypoint {
            command,
            leading_argv,
            windows_hide,
        } => {
            let mut argv = leading_argv.clone();
            argv.extend_from_slice(caller_argv);
            SpawnInvocation {
                command: command.clone(),
                argv,
                shell: false,
                windows_hide: *windows_hide,
            }
        }
        WindowsSpawnProgram::ExeEntrypoint { command } => SpawnInvocation {
            command: command.clone(),
            argv: caller_argv.to_vec(),
            shell: false,
            windows_hide: false,
        },
        WindowsSpawnProgram::ShellFallback { command } => SpawnInvocation {
            command: command.clone(),
            argv: caller_argv.to_vec(),
            shell: true,
            windows_hide: false,
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PATH / PATHEXT lookup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn env_ci<'a>(env: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    env.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Look `command` up on `PATH`, trying each `PATHEXT` extension. Commands
/// that already carry a separator skip the lookup.
fn resolve_against_path(command: &str, env: &HashMap<String, String>) -> Option<PathBuf> {
    if command.contains('/') || command.contains('\\') || Path::new(command).is_absolute() {
        return None;
    }

    let path_var = env_ci(env, "PATH")?;
    let pathext = env_ci(env, "PATHEXT").unwrap_or(".COM;.EXE;.BAT;.CMD;.JS");
    let exts: Vec<String> = pathext
        .split(';')
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
        .collect();

    for dir in path_var.split(';').filter(|d| !d.is_empty()) {
        let dir = Path::new(dir);
        // Exact name first (command may already carry its extension).
        let exact = dir.join(command);
        if exact.is_file() {
            return Some(exact);
        }
        for ext in &exts {
            let candidate = dir.join(format!("{command}{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
            // PATHEXT is conventionally uppercase; files usually aren't.
            let candidate = dir.join(format!("{command}{}", ext.to_ascii_uppercase()));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// .cmd shim unwrapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse the wrapper script for quoted `"%~dp0..."` tokens and resolve the
/// first existing target that is not `node.exe` itself. Falls back to the
/// package manifest's `bin` field. `.exe` targets win over `.js` ones.
fn unwrap_cmd_shim(wrapper: &Path, package_name: Option<&str>) -> Option<PathBuf> {
    let wrapper_dir = wrapper.parent()?;
    let text = std::fs::read_to_string(wrapper).ok()?;

    let mut candidates: Vec<PathBuf> = Vec::new();
    for token in dp0_tokens(&text) {
        let rel = token.replace('\\', "/");
        let target = wrapper_dir.join(rel.trim_start_matches('/'));
        if is_node_exe(&target) {
            continue;
        }
        if target.is_file() {
            candidates.push(target);
        }
    }

    if candidates.is_empty() {
        if let Some(pkg) = package_name {
            candidates.extend(package_bin_targets(wrapper_dir, pkg));
        }
    }

    if candidates.is_empty() {
        return None;
    }

    candidates
        .iter()
        .find(|c| {
            c.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("exe"))
        })
        .cloned()
        .or_else(|| candidates.into_iter().next())
}

/// Extract the path suffixes of quoted `"%~dp0<suffix>"` tokens.
fn dp0_tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("\"%~dp0") {
        let after = &rest[start + "\"%~dp0".len()..];
        match after.find('"') {
            Some(end) => {
                out.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out
}

fn is_node_exe(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.eq_ignore_ascii_case("node.exe"))
}

/// Consult `node_modules/<package>/package.json` for `bin` entries. The
/// shim conventionally lives in `node_modules/.bin/`, so the package root
/// is one level up from the wrapper directory.
fn package_bin_targets(wrapper_dir: &Path, package: &str) -> Vec<PathBuf> {
    let package_root = match wrapper_dir.parent() {
        Some(p) => p.join(package),
        None => return Vec::new(),
    };
    let manifest_path = package_root.join("package.json");
    let raw = match std::fs::read_to_string(&manifest_path) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    let manifest: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let mut rels: Vec<String> = Vec::new();
    match manifest.get("bin") {
        Some(serde_json::Value::String(s)) => rels.push(s.clone()),
        Some(serde_json::Value::Object(map)) => {
            rels.extend(map.values().filter_map(|v| v.as_str().map(String::from)));
        }
        _ => {}
    }

    rels.into_iter()
        .map(|r| package_root.join(r.replace('\\', "/")))
        .filter(|p| p.is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn env_with_path(dir: &Path) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("Path".to_string(), dir.to_string_lossy().into_owned());
        env.insert("PATHEXT".to_string(), ".COM;.EXE;.BAT;.CMD;.JS".to_string());
        env
    }

    fn req<'a>(
        command: &'a str,
        env: &'a HashMap<String, String>,
        strict: bool,
    ) -> SpawnRequest<'a> {
        SpawnRequest {
            command,
            platform: "win32",
            env,
            exec_path: "C:/node/node.exe",
            package_name: None,
            allow_shell_fallback: if strict { Some(false) } else { None },
        }
    }

    #[test]
    fn non_windows_is_always_direct() {
        let env = HashMap::new();
        let program = resolve_spawn_program(&SpawnRequest {
            command: "acpx",
            platform: "linux",
            env: &env,
            exec_path: "/usr/bin/node",
            package_name: None,
            allow_shell_fallback: Some(false),
        })
        .unwrap();
        assert_eq!(
            program,
            WindowsSpawnProgram::Direct {
                command: "acpx".into()
            }
        );
        assert!(!program.uses_shell());
    }

    #[test]
    fn cmd_shim_unwraps_to_js_through_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path();
        fs::write(bin.join("acpx.js"), "// entry").unwrap();
        fs::write(
            bin.join("acpx.cmd"),
            "@ECHO off\r\n\"%~dp0\\node.exe\" \"%~dp0\\acpx.js\" %*\r\n",
        )
        .unwrap();

        let env = env_with_path(bin);
        let program = resolve_spawn_program(&req("acpx", &env, true)).unwrap();
        let invocation = materialize(
            &program,
            &[
                "--format".into(),
                "json".into(),
                "agent".into(),
                "status".into(),
            ],
        );
        assert_eq!(invocation.command, "C:/node/node.exe");
        assert!(invocation.argv[0].ends_with("acpx.js"));
        assert_eq!(&invocation.argv[1..], ["--format", "json", "agent", "status"]);
        assert!(!invocation.shell);
        assert!(invocation.windows_hide);
    }

    #[test]
    fn sibling_exe_wins_over_js() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path();
        fs::write(bin.join("acpx.js"), "// entry").unwrap();
        fs::write(bin.join("acpx.exe"), [0u8; 4]).unwrap();
        fs::write(
            bin.join("acpx.cmd"),
            "\"%~dp0\\acpx.exe\" %*\r\n\"%~dp0\\acpx.js\" %*\r\n",
        )
        .unwrap();

        let env = env_with_path(bin);
        let program = resolve_spawn_program(&req("acpx", &env, true)).unwrap();
        match &program {
            WindowsSpawnProgram::ExeEntrypoint { command } => {
                assert!(command.ends_with("acpx.exe"));
            }
            other => panic!("expected exe entrypoint, got {other:?}"),
        }
        assert!(!materialize(&program, &[]).shell);
    }

    #[test]
    fn direct_js_routes_through_runtime() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tool.js"), "// entry").unwrap();
        let env = env_with_path(dir.path());
        let program = resolve_spawn_program(&req("tool", &env, true)).unwrap();
        match program {
            WindowsSpawnProgram::NodeEntrypoint { command, leading_argv, .. } => {
                assert_eq!(command, "C:/node/node.exe");
                assert!(leading_argv[0].ends_with("tool.js"));
            }
            other => panic!("expected node entrypoint, got {other:?}"),
        }
    }

    #[test]
    fn unresolved_wrapper_falls_back_to_shell_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ghost.cmd"), "@ECHO off\r\nsomething\r\n").unwrap();
        let env = env_with_path(dir.path());
        let program = resolve_spawn_program(&req("ghost", &env, false)).unwrap();
        assert_eq!(
            program,
            WindowsSpawnProgram::ShellFallback {
                command: "ghost".into()
            }
        );
        assert!(materialize(&program, &[]).shell);
    }

    #[test]
    fn unresolved_wrapper_errors_in_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ghost.cmd"), "@ECHO off\r\nsomething\r\n").unwrap();
        let env = env_with_path(dir.path());
        let err = resolve_spawn_program(&req("ghost", &env, true)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ghost.cmd"));
        assert!(msg.contains("no executable/Node entrypoint without shell execution"));
    }

    #[test]
    fn bin_field_consulted_when_tokens_resolve_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("node_modules/.bin");
        let pkg = dir.path().join("node_modules/acpx");
        fs::create_dir_all(&bin).unwrap();
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("cli.js"), "// entry").unwrap();
        fs::write(
            pkg.join("package.json"),
            r#"{"name": "acpx", "bin": {"acpx": "cli.js"}}"#,
        )
        .unwrap();
        fs::write(bin.join("acpx.cmd"), "node \"%~dp0\\missing.js\" %*\r\n").unwrap();

        let env = env_with_path(&bin);
        let mut request = req("acpx", &env, true);
        request.package_name = Some("acpx");
        let program = resolve_spawn_program(&request).unwrap();
        match program {
            WindowsSpawnProgram::NodeEntrypoint { leading_argv, .. } => {
                assert!(leading_argv[0].ends_with("cli.js"));
            }
            other => panic!("expected node entrypoint, got {other:?}"),
        }
    }

    #[test]
    fn dp0_token_parsing() {
        let text = "\"%~dp0\\node.exe\"  \"%~dp0\\..\\pkg\\cli.js\" %*";
        let tokens = dp0_tokens(text);
        assert_eq!(tokens, vec!["\\node.exe", "\\..\\pkg\\cli.js"]);
    }
}
