//! Safe command resolution for spawning child processes on Windows.
//!
//! npm-style `.cmd` shims cannot be executed directly without a shell, and
//! blindly handing commands to `cmd.exe` is an injection hazard. The
//! resolver unwraps shims to their real target: `.exe` targets run
//! directly, `.js` targets route through the configured runtime, and only
//! an explicitly permitted fallback ever touches the shell.

mod cache;
mod resolver;

pub use cache::SpawnCommandCache;
pub use resolver::{
    materialize, resolve_spawn_program, SpawnInvocation, SpawnRequest, WindowsSpawnProgram,
};
