//! Home directory layout.
//!
//! Everything pr-relay persists lives under `~/.pr-relay/` unless the
//! config points `state_dir` somewhere else:
//! - `config.yml`: global configuration
//! - `state/`: thread records, the comment index and agent work dirs

use std::path::{Path, PathBuf};

/// Home directory name under `$HOME`.
const HOME_DIR: &str = ".pr-relay";

/// Get the pr-relay home directory path (~/.pr-relay/), creating it if needed.
pub fn relay_home() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    let path = home.join(HOME_DIR);
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Get the default state directory path (~/.pr-relay/state/).
pub fn default_state_dir() -> anyhow::Result<PathBuf> {
    ensure_dir(&relay_home()?.join("state"))
}

/// Get the path to the global config file (~/.pr-relay/config.yml).
///
/// Does not create anything; a missing global config is normal.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(HOME_DIR).join("config.yml"))
}

/// Directory holding one JSON record per thread.
pub fn threads_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("threads")
}

/// Per-thread scratch directory for assistant invocations.
pub fn agent_work_dir(state_dir: &Path, thread_id: &str) -> PathBuf {
    state_dir.join("agent-work").join(thread_id)
}

/// Create `dir` (and parents) and return it.
pub fn ensure_dir(dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}
