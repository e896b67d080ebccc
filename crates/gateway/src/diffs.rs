//! Diff artifact store behind `/plugins/diffs/*`.
//!
//! Artifacts are short-lived HTML viewers addressed by a 10-byte hex id and
//! guarded by a 24-byte hex capability token compared in constant time.
//! Stored paths must resolve strictly inside the store root; expired
//! artifacts 404 on lookup and are deleted by a throttled sweep.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use oc_domain::{Error, Result};
use oc_webhook_guard::BoundedCounter;

pub const DEFAULT_ARTIFACT_TTL: i64 = 30 * 60; // seconds
pub const MAX_ARTIFACT_TTL: i64 = 6 * 60 * 60;
pub const SWEEP_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Viewer lockout: after 40 misses within 60 s, answer 429.
pub const VIEWER_MISS_LIMIT: u64 = 40;
pub const VIEWER_MISS_WINDOW_MS: u64 = 60_000;

/// Artifact id: 10 random bytes as lowercase hex.
pub fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[0-9a-f]{20}$").expect("literal regex"))
}

/// Capability token: 24 random bytes as lowercase hex.
pub fn token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[0-9a-f]{48}$").expect("literal regex"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Artifact model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffArtifact {
    pub id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub title: String,
    pub input_kind: String,
    pub file_count: usize,
    pub viewer_path: String,
    pub html_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}


/// Reject any stored path that escapes `root` once resolved.
pub fn resolve_within(root: &Path, stored: &str) -> Result<PathBuf> {
    let joined = root.join(stored);
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(Error::Forbidden(format!("path escapes store root: {stored}")));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    if !normalized.starts_with(root) {
        return Err(Error::Forbidden(format!("path escapes store root: {stored}")));
    }
    Ok(normalized)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub enum ViewerLookup {
    Ok(DiffArtifact, String),
    NotFound,
    LockedOut,
}

pub struct DiffArtifactStore {
    root: PathBuf,
    misses: BoundedCounter,
    last_sweep_ms: AtomicU64,
}

impl DiffArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            misses: BoundedCounter::new(4096, Some(VIEWER_MISS_WINDOW_MS)),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create and persist an artifact: `<root>/<id>/meta.json` +
    /// `<root>/<id>/viewer.html`.
    pub fn create(
        &self,
        title: &str,
        input_kind: &str,
        html: &str,
        file_count: usize,
        ttl_seconds: Option<i64>,
    ) -> Result<DiffArtifact> {
        let id = random_hex(10);
        let token = random_hex(24);
        let now = Utc::now();
        let ttl = ttl_seconds
            .unwrap_or(DEFAULT_ARTIFACT_TTL)
            .clamp(1, MAX_ARTIFACT_TTL);

        let artifact = DiffArtifact {
            viewer_path: format!("/plugins/diffs/view/{id}/{token}"),
            html_path: format!("{id}/viewer.html"),
            file_path: None,
            id: id.clone(),
            token,
            created_at: now,
            expires_at: now + Duration::seconds(ttl),
            title: title.to_string(),
            input_kind: input_kind.to_string(),
            file_count,
        };

        let dir = self.root.join(&id);
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        std::fs::write(dir.join("viewer.html"), html).map_err(Error::Io)?;
        std::fs::write(
            dir.join("meta.json"),
            serde_json::to_string_pretty(&artifact).map_err(Error::Json)?,
        )
        .map_err(Error::Io)?;
        Ok(artifact)
    }

    fn load_meta(&self, id: &str) -> Option<DiffArtifact> {
        let raw = std::fs::read_to_string(self.root.join(id).join("meta.json")).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Resolve a viewer request. Misses (bad id, bad token, expired) feed
    /// the lockout counter keyed by client.
    pub fn lookup_viewer(&self, id: &str, token: &str, client: &str, now: DateTime<Utc>) -> ViewerLookup {
        let miss_key = format!("viewer:{client}");
        if self.misses.get(&miss_key) >= VIEWER_MISS_LIMIT {
            return ViewerLookup::LockedOut;
        }

        let miss = |store: &Self| {
            let count = store
                .misses
                .increment(&miss_key, oc_webhook_guard::now_ms());
            if count >= VIEWER_MISS_LIMIT {
                tracing::warn!(client = %client, misses = count, "diff viewer lockout engaged");
            }
            ViewerLookup::NotFound
        };

        if !id_pattern().is_match(id) || !token_pattern().is_match(token) {
            return miss(self);
        }
        let Some(artifact) = self.load_meta(id) else {
            return miss(self);
        };
        if artifact.expires_at <= now {
            return miss(self);
        }
        let token_ok: bool = artifact
            .token
            .as_bytes()
            .ct_eq(token.as_bytes())
            .into();
        if !token_ok {
            return miss(self);
        }

        let html_path = match resolve_within(&self.root, &artifact.html_path) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(id = %id, error = %e, "stored html path escapes root");
                return miss(self);
            }
        };
        match std::fs::read_to_string(html_path) {
            Ok(html) => ViewerLookup::Ok(artifact, html),
            Err(_) => miss(self),
        }
    }

    /// Delete expired artifacts. Throttled: runs at most once per
    /// [`SWEEP_INTERVAL_MS`].
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let now_ms = oc_webhook_guard::now_ms();
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < SWEEP_INTERVAL_MS && last != 0 {
            return 0;
        }
        self.last_sweep_ms.store(now_ms, Ordering::Relaxed);

        let mut removed = 0;
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return 0,
        };
        for entry in entries.flatten() {
            let id = entry.file_name().to_string_lossy().to_string();
            if !id_pattern().is_match(&id) {
                continue;
            }
            let expired = self
                .load_meta(&id)
                .map(|a| a.expires_at <= now)
                .unwrap_or(true);
            if expired && std::fs::remove_dir_all(entry.path()).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "diff artifact sweep");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (DiffArtifactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (DiffArtifactStore::new(dir.path().to_path_buf()), dir)
    }

    #[test]
    fn created_artifact_matches_patterns() {
        let (store, _dir) = store();
        let a = store
            .create("refactor", "git", "<html></html>", 3, None)
            .unwrap();
        assert!(id_pattern().is_match(&a.id));
        assert!(token_pattern().is_match(&a.token));
        assert_eq!(a.viewer_path, format!("/plugins/diffs/view/{}/{}", a.id, a.token));
        assert_eq!(a.file_count, 3);
    }

    #[test]
    fn viewer_roundtrip() {
        let (store, _dir) = store();
        let a = store.create("t", "git", "<html>diff</html>", 1, None).unwrap();
        match store.lookup_viewer(&a.id, &a.token, "127.0.0.1", Utc::now()) {
            ViewerLookup::Ok(meta, html) => {
                assert_eq!(meta.id, a.id);
                assert_eq!(html, "<html>diff</html>");
            }
            _ => panic!("expected viewer hit"),
        }
    }

    #[test]
    fn wrong_token_is_not_found() {
        let (store, _dir) = store();
        let a = store.create("t", "git", "x", 1, None).unwrap();
        let bad = "0".repeat(48);
        assert!(matches!(
            store.lookup_viewer(&a.id, &bad, "c", Utc::now()),
            ViewerLookup::NotFound
        ));
    }

    #[test]
    fn expired_artifact_is_not_found_then_swept() {
        let (store, _dir) = store();
        let a = store.create("t", "git", "x", 1, Some(1)).unwrap();
        let later = Utc::now() + Duration::seconds(5);
        assert!(matches!(
            store.lookup_viewer(&a.id, &a.token, "c", later),
            ViewerLookup::NotFound
        ));
        assert_eq!(store.sweep(later), 1);
        assert!(!store.root().join(&a.id).exists());
    }

    #[test]
    fn ttl_is_capped() {
        let (store, _dir) = store();
        let a = store
            .create("t", "git", "x", 1, Some(24 * 60 * 60))
            .unwrap();
        let max = a.created_at + Duration::seconds(MAX_ARTIFACT_TTL);
        assert!(a.expires_at <= max);
    }

    #[test]
    fn sweep_is_throttled() {
        let (store, _dir) = store();
        store.create("t", "git", "x", 1, Some(1)).unwrap();
        let later = Utc::now() + Duration::seconds(5);
        assert_eq!(store.sweep(later), 1);
        store.create("t2", "git", "x", 1, Some(1)).unwrap();
        // Second sweep inside the throttle window is a no-op.
        assert_eq!(store.sweep(later + Duration::seconds(10)), 0);
    }

    #[test]
    fn lockout_after_miss_budget() {
        let (store, _dir) = store();
        let id = "a".repeat(20);
        let token = "b".repeat(48);
        for _ in 0..VIEWER_MISS_LIMIT {
            assert!(matches!(
                store.lookup_viewer(&id, &token, "10.0.0.9", Utc::now()),
                ViewerLookup::NotFound
            ));
        }
        assert!(matches!(
            store.lookup_viewer(&id, &token, "10.0.0.9", Utc::now()),
            ViewerLookup::LockedOut
        ));
        // Other clients are unaffected.
        assert!(matches!(
            store.lookup_viewer(&id, &token, "10.0.0.10", Utc::now()),
            ViewerLookup::NotFound
        ));
    }

    #[test]
    fn path_escape_is_rejected() {
        let root = Path::new("/store/diffs");
        assert!(resolve_within(root, "abc/viewer.html").is_ok());
        assert!(resolve_within(root, "../outside.html").is_err());
        assert!(resolve_within(root, "abc/../../etc/passwd").is_err());
    }
}
