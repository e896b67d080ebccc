//! Gateway-owned session store.
//!
//! Persists session state in `sessions/sessions.json` under the state dir.
//! Writes go through a single-file atomic replace keeping at most one
//! `.bak` copy of the previous content, so a crash mid-write never leaves
//! a torn file behind.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use oc_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Workspace skill snapshot captured for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsSnapshot {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Normalized skill filter the snapshot was built under, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_filter: Option<Vec<String>>,
    #[serde(default)]
    pub version: u64,
}

/// A single session tracked by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub session_id: String,
    /// Unix milliseconds of the last mutation.
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    /// User `/model` override, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_override: Option<String>,
    /// Whether the system prompt has been sent on this session.
    #[serde(default)]
    pub system_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills_snapshot: Option<SkillsSnapshot>,
    /// Provider → opaque CLI session id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cli_session_ids: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
}

impl SessionEntry {
    /// The CLI session id to hand to the agent runtime. Fresh sessions never
    /// inherit a stored id — that would silently resume someone else's
    /// conversation.
    pub fn cli_session_id_for(&self, provider: &str, is_new_session: bool) -> Option<String> {
        if is_new_session {
            return None;
        }
        self.cli_session_ids.get(provider).cloned()
    }
}

/// On-disk shape: versioned map of session key → entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    sessions: HashMap<String, SessionEntry>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: 1,
            sessions: HashMap::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Atomic replace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn is_busy(err: &io::Error) -> bool {
    // EBUSY on Unix; sharing violations on Windows surface as 32/33.
    matches!(err.raw_os_error(), Some(16) | Some(32) | Some(33))
}

/// Move `current` aside to `bak`, retrying transient busy errors for a few
/// hundred ms and degrading to a copy when the platform refuses the rename.
fn backup_current(current: &Path, bak: &Path) -> io::Result<()> {
    let _ = std::fs::remove_file(bak);
    let mut delay_ms = 25u64;
    loop {
        match std::fs::rename(current, bak) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                std::fs::copy(current, bak)?;
                return Ok(());
            }
            Err(e) if is_busy(&e) && delay_ms <= 200 => {
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                delay_ms *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Atomically replace `path` with `content`, keeping the previous content
/// in `<path>.bak`. A no-op when the content is unchanged. Shared by every
/// versioned JSON store under the state dir.
pub fn atomic_replace(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;

    let unchanged = std::fs::read_to_string(path)
        .map(|existing| existing == content)
        .unwrap_or(false);
    if unchanged {
        let _ = std::fs::remove_file(&tmp);
        return Ok(());
    }

    if path.exists() {
        backup_current(path, &path.with_extension("json.bak"))?;
    }
    std::fs::rename(&tmp, path)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file-backed session store. All mutation goes through this type;
/// every other component holds read-only snapshots.
pub struct SessionStore {
    path: PathBuf,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    /// Serializes writes per file path: at most one outstanding replace.
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Open the store at `state_dir/sessions/sessions.json`. An absent file
    /// is an empty v1 store; malformed JSON is a hard error.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let path = oc_domain::paths::sessions_file(state_dir);
        let file = Self::load_file(&path)?;

        tracing::info!(
            sessions = file.sessions.len(),
            path = %path.display(),
            "session store loaded"
        );

        Ok(Self {
            path,
            sessions: RwLock::new(file.sessions),
            write_lock: Mutex::new(()),
        })
    }

    fn load_file(path: &Path) -> Result<StoreFile> {
        if !path.exists() {
            return Ok(StoreFile::default());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        let file: StoreFile = serde_json::from_str(&raw)
            .map_err(|e| Error::Storage(format!("malformed session store {}: {e}", path.display())))?;
        if file.version != 1 {
            return Err(Error::Storage(format!(
                "unsupported session store version {}",
                file.version
            )));
        }
        Ok(file)
    }

    pub fn get(&self, session_key: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Resolve or create an entry. `force_new` mints a fresh session id even
    /// when the key already exists (cron discipline). Returns
    /// `(entry, is_new_session)`.
    pub fn resolve_or_create(&self, session_key: &str, force_new: bool) -> Result<(SessionEntry, bool)> {
        {
            let sessions = self.sessions.read();
            if !force_new {
                if let Some(entry) = sessions.get(session_key) {
                    return Ok((entry.clone(), false));
                }
            }
        }

        let entry = SessionEntry {
            session_id: uuid::Uuid::new_v4().to_string(),
            updated_at: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        };
        {
            let mut sessions = self.sessions.write();
            sessions.insert(session_key.to_string(), entry.clone());
        }
        self.persist()?;
        Ok((entry, true))
    }

    /// Mutate one entry in place and persist. Creates the entry when absent.
    pub fn update<F>(&self, session_key: &str, f: F) -> Result<SessionEntry>
    where
        F: FnOnce(&mut SessionEntry),
    {
        let entry = {
            let mut sessions = self.sessions.write();
            let entry = sessions.entry(session_key.to_string()).or_insert_with(|| {
                SessionEntry {
                    session_id: uuid::Uuid::new_v4().to_string(),
                    ..Default::default()
                }
            });
            f(entry);
            entry.updated_at = chrono::Utc::now().timestamp_millis();
            entry.clone()
        };
        self.persist()?;
        Ok(entry)
    }

    /// Remove an entry. Explicit purge is the only way an entry dies.
    pub fn purge(&self, session_key: &str) -> Result<bool> {
        let removed = self.sessions.write().remove(session_key).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<(String, SessionEntry)> {
        let mut entries: Vec<_> = self
            .sessions
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        let file = StoreFile {
            version: 1,
            sessions: self.sessions.read().clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(Error::Json)?;
        atomic_replace(&self.path, &json).map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::open(dir.path()).unwrap()
    }

    #[test]
    fn absent_file_loads_empty_v1() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_json_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = oc_domain::paths::sessions_file(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{oops").unwrap();
        assert!(SessionStore::open(dir.path()).is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(&dir);
            store
                .update("agent:claw:main", |e| {
                    e.model = Some("claude-opus-4-6".into());
                    e.model_provider = Some("anthropic".into());
                    e.system_sent = true;
                    e.cli_session_ids
                        .insert("claude-cli".into(), "sess-9".into());
                })
                .unwrap();
        }
        let store = open_store(&dir);
        let entry = store.get("agent:claw:main").unwrap();
        assert_eq!(entry.model.as_deref(), Some("claude-opus-4-6"));
        assert!(entry.system_sent);
        assert_eq!(entry.cli_session_ids["claude-cli"], "sess-9");
    }

    #[test]
    fn replace_keeps_single_backup_of_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.update("k", |e| e.model = Some("m1".into())).unwrap();
        store.update("k", |e| e.model = Some("m2".into())).unwrap();

        let path = oc_domain::paths::sessions_file(dir.path());
        let bak = path.with_extension("json.bak");
        assert!(bak.exists());
        let backup: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&bak).unwrap()).unwrap();
        assert_eq!(backup["sessions"]["k"]["model"], "m1");
        let current: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(current["sessions"]["k"]["model"], "m2");
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.json");
        atomic_replace(&path, "{\"a\":1}").unwrap();
        atomic_replace(&path, "{\"a\":1}").unwrap();
        // Identical content: no backup is produced.
        assert!(!path.with_extension("json.bak").exists());
    }

    #[test]
    fn force_new_mints_fresh_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let (first, new1) = store.resolve_or_create("agent:claw:cron:j1", true).unwrap();
        let (second, new2) = store.resolve_or_create("agent:claw:cron:j1", true).unwrap();
        assert!(new1 && new2);
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn existing_key_is_reused_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let (first, _) = store.resolve_or_create("agent:claw:main", false).unwrap();
        let (second, is_new) = store.resolve_or_create("agent:claw:main", false).unwrap();
        assert!(!is_new);
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn cli_session_id_withheld_for_new_sessions() {
        let mut entry = SessionEntry::default();
        entry
            .cli_session_ids
            .insert("claude-cli".into(), "stored".into());
        assert_eq!(
            entry.cli_session_id_for("claude-cli", false).as_deref(),
            Some("stored")
        );
        assert_eq!(entry.cli_session_id_for("claude-cli", true), None);
        assert_eq!(entry.cli_session_id_for("other", false), None);
    }

    #[test]
    fn purge_is_the_only_destructor() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.resolve_or_create("agent:claw:main", false).unwrap();
        assert!(store.purge("agent:claw:main").unwrap());
        assert!(!store.purge("agent:claw:main").unwrap());
        assert!(store.get("agent:claw:main").is_none());
    }
}
