//! `openclaw sessions` — list the session store.

use std::path::Path;

use oc_sessions::SessionStore;

pub fn run(state_dir: &Path) -> anyhow::Result<()> {
    let store = SessionStore::open(state_dir)?;
    let entries = store.list();
    if entries.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    for (key, entry) in entries {
        println!(
            "{key}  model={}  updated={}",
            entry.model.as_deref().unwrap_or("-"),
            entry.updated_at
        );
    }
    Ok(())
}
