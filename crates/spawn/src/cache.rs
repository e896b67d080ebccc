//! Resolution cache keyed by `(command, strict)`.
//!
//! Caches the resolved [`WindowsSpawnProgram`], not the materialized
//! invocation — caller argv stays fresh on every spawn.

use std::collections::HashMap;

use parking_lot::Mutex;

use oc_domain::Result;

use crate::resolver::{resolve_spawn_program, SpawnRequest, WindowsSpawnProgram};

pub struct SpawnCommandCache {
    programs: Mutex<HashMap<(String, bool), WindowsSpawnProgram>>,
}

impl SpawnCommandCache {
    pub fn new() -> Self {
        Self {
            programs: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve through the cache. Strict and lenient resolutions are cached
    /// independently: the same command may legitimately differ.
    pub fn resolve(&self, req: &SpawnRequest<'_>) -> Result<WindowsSpawnProgram> {
        let strict = req.allow_shell_fallback == Some(false);
        let key = (req.command.to_string(), strict);

        if let Some(program) = self.programs.lock().get(&key) {
            return Ok(program.clone());
        }

        let program = resolve_spawn_program(req)?;
        self.programs.lock().insert(key, program.clone());
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.lock().is_empty()
    }

    pub fn clear(&self) {
        self.programs.lock().clear();
    }
}

impl Default for SpawnCommandCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn direct_req<'a>(env: &'a HashMap<String, String>) -> SpawnRequest<'a> {
        SpawnRequest {
            command: "acpx",
            platform: "linux",
            env,
            exec_path: "/usr/bin/node",
            package_name: None,
            allow_shell_fallback: None,
        }
    }

    #[test]
    fn caches_by_command_and_mode() {
        let env = HashMap::new();
        let cache = SpawnCommandCache::new();
        cache.resolve(&direct_req(&env)).unwrap();
        cache.resolve(&direct_req(&env)).unwrap();
        assert_eq!(cache.len(), 1);

        let mut strict = direct_req(&env);
        strict.allow_shell_fallback = Some(false);
        cache.resolve(&strict).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_empties_cache() {
        let env = HashMap::new();
        let cache = SpawnCommandCache::new();
        cache.resolve(&direct_req(&env)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
