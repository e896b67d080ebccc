//! Cron job store: `cron/jobs.json` with sibling `.bak`, version 1.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use oc_domain::error::{Error, Result};
use oc_sessions::atomic_replace;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the scheduled turn should do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronPayload {
    pub message: String,
    /// Model override for this job; must pass the agent's allow-check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub agent_id: String,
    /// 5-field cron expression.
    pub schedule: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
    pub payload: CronPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn d_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobsFile {
    version: u32,
    jobs: Vec<CronJob>,
}

impl Default for JobsFile {
    fn default() -> Self {
        Self {
            version: 1,
            jobs: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CronStore {
    path: PathBuf,
    jobs: RwLock<Vec<CronJob>>,
}

impl CronStore {
    /// Open `state_dir/cron/jobs.json`. Absent file = empty v1 store;
    /// malformed JSON is a hard error.
    pub fn open(state_dir: &std::path::Path) -> Result<Self> {
        let path = oc_domain::paths::cron_jobs_file(state_dir);
        let file = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            let file: JobsFile = serde_json::from_str(&raw)
                .map_err(|e| Error::Storage(format!("malformed cron store {}: {e}", path.display())))?;
            if file.version != 1 {
                return Err(Error::Storage(format!(
                    "unsupported cron store version {}",
                    file.version
                )));
            }
            file
        } else {
            JobsFile::default()
        };

        tracing::info!(jobs = file.jobs.len(), path = %path.display(), "cron store loaded");
        Ok(Self {
            path,
            jobs: RwLock::new(file.jobs),
        })
    }

    pub fn list(&self) -> Vec<CronJob> {
        self.jobs.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<CronJob> {
        self.jobs.read().iter().find(|j| j.id == id).cloned()
    }

    pub fn upsert(&self, job: CronJob) -> Result<()> {
        {
            let mut jobs = self.jobs.write();
            match jobs.iter_mut().find(|j| j.id == job.id) {
                Some(existing) => *existing = job,
                None => jobs.push(job),
            }
        }
        self.persist()
    }

    pub fn update<F>(&self, id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut CronJob),
    {
        let found = {
            let mut jobs = self.jobs.write();
            match jobs.iter_mut().find(|j| j.id == id) {
                Some(job) => {
                    f(job);
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist()?;
        }
        Ok(found)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut jobs = self.jobs.write();
            let before = jobs.len();
            jobs.retain(|j| j.id != id);
            jobs.len() != before
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Enabled jobs whose `next_run_at` has arrived (or was never set).
    pub fn due(&self, now: DateTime<Utc>) -> Vec<CronJob> {
        self.jobs
            .read()
            .iter()
            .filter(|j| j.enabled && j.next_run_at.map(|t| t <= now).unwrap_or(true))
            .cloned()
            .collect()
    }

    fn persist(&self) -> Result<()> {
        let file = JobsFile {
            version: 1,
            jobs: self.jobs.read().clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(Error::Json)?;
        atomic_replace(&self.path, &json).map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> CronJob {
        CronJob {
            id: id.into(),
            name: "daily digest".into(),
            agent_id: "claw".into(),
            schedule: "0 9 * * *".into(),
            timezone: None,
            enabled: true,
            payload: CronPayload {
                message: "summarize the day".into(),
                model: None,
            },
            last_run_at: None,
            next_run_at: None,
            last_status: None,
            last_error: None,
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CronStore::open(dir.path()).unwrap();
            store.upsert(job("j1")).unwrap();
        }
        let store = CronStore::open(dir.path()).unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("j1").unwrap().name, "daily digest");
    }

    #[test]
    fn malformed_store_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = oc_domain::paths::cron_jobs_file(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{broken").unwrap();
        assert!(CronStore::open(dir.path()).is_err());
    }

    #[test]
    fn backup_written_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::open(dir.path()).unwrap();
        store.upsert(job("j1")).unwrap();
        store
            .update("j1", |j| j.last_status = Some("ok".into()))
            .unwrap();
        let bak = oc_domain::paths::cron_jobs_file(dir.path()).with_extension("json.bak");
        assert!(bak.exists());
    }

    #[test]
    fn due_respects_enabled_and_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::open(dir.path()).unwrap();
        let now = Utc::now();

        let mut ready = job("ready");
        ready.next_run_at = Some(now - chrono::Duration::seconds(5));
        let mut later = job("later");
        later.next_run_at = Some(now + chrono::Duration::hours(1));
        let mut disabled = job("disabled");
        disabled.enabled = false;
        let never_scheduled = job("fresh");

        for j in [ready, later, disabled, never_scheduled] {
            store.upsert(j).unwrap();
        }

        let due: Vec<String> = store.due(now).into_iter().map(|j| j.id).collect();
        assert!(due.contains(&"ready".to_string()));
        assert!(due.contains(&"fresh".to_string()));
        assert!(!due.contains(&"later".to_string()));
        assert!(!due.contains(&"disabled".to_string()));
    }

    #[test]
    fn remove_deletes_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::open(dir.path()).unwrap();
        store.upsert(job("j1")).unwrap();
        assert!(store.remove("j1").unwrap());
        assert!(!store.remove("j1").unwrap());
    }
}
