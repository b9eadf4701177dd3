//! Durable thread state.
//!
//! Layout under the state directory:
//! - `threads/<thread_id>.json`: one full record per thread
//! - `automation-state.json`: comment → thread index plus a status snapshot
//!
//! Every file is replaced with write-temp-then-rename, and a thread record
//! is always written before the index entry that points at it. A crash can
//! therefore leave a record the index does not know about yet, never an
//! index entry pointing at a half-written record. `JsonStateStore::open`
//! folds such orphan records back into the index.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::engine::threads::{Thread, ThreadStatus};

const INDEX_FILE: &str = "automation-state.json";
const SCHEMA_VERSION: u32 = 1;

/// Storage contract for threads and the comment index.
///
/// Mappings are never removed once written.
pub trait StateStore: Send + Sync {
    fn get(&self, thread_id: &str) -> anyhow::Result<Option<Thread>>;
    fn put(&self, thread: &Thread) -> anyhow::Result<()>;
    fn map_comment(&self, comment_id: u64, thread_id: &str) -> anyhow::Result<()>;
    fn lookup_thread(&self, comment_id: u64) -> anyhow::Result<Option<String>>;
    /// Status snapshot of every indexed thread, ordered by thread id.
    fn summaries(&self) -> anyhow::Result<Vec<ThreadSummary>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub pr_number: u64,
    pub created_at: DateTime<Utc>,
    pub status: ThreadStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    pr_number: u64,
    created_at: DateTime<Utc>,
    status: ThreadStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateIndex {
    #[serde(default)]
    schema_version: u32,
    /// Keys are comment ids as strings (JSON object keys).
    #[serde(default)]
    comment_to_thread: BTreeMap<String, String>,
    #[serde(default)]
    threads: BTreeMap<String, IndexEntry>,
}

impl StateIndex {
    /// Fold a record into the index. Returns whether anything changed.
    fn absorb(&mut self, thread: &Thread) -> bool {
        let mut changed = false;
        let entry = IndexEntry {
            pr_number: thread.pr_number,
            created_at: thread.created_at,
            status: thread.status,
        };
        let stale = self
            .threads
            .get(&thread.thread_id)
            .is_none_or(|e| e.status != entry.status || e.pr_number != entry.pr_number);
        if stale {
            self.threads.insert(thread.thread_id.clone(), entry);
            changed = true;
        }

        let comment_ids = thread
            .origin_comment_id
            .into_iter()
            .chain(thread.messages.iter().filter_map(|m| m.comment_id));
        for id in comment_ids {
            let key = id.to_string();
            if !self.comment_to_thread.contains_key(&key) {
                self.comment_to_thread.insert(key, thread.thread_id.clone());
                changed = true;
            }
        }
        changed
    }
}

/// File-backed [`StateStore`].
pub struct JsonStateStore {
    dir: PathBuf,
    index: Mutex<StateIndex>,
}

impl JsonStateStore {
    /// Open (or initialise) a store rooted at `dir`.
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        let threads_dir = crate::home::threads_dir(dir);
        std::fs::create_dir_all(&threads_dir)
            .with_context(|| format!("creating {}", threads_dir.display()))?;

        let index_path = dir.join(INDEX_FILE);
        let mut index = match std::fs::read_to_string(&index_path) {
            Ok(text) => match serde_json::from_str::<StateIndex>(&text) {
                Ok(index) => index,
                Err(e) => {
                    tracing::warn!(
                        path = %index_path.display(),
                        error = %e,
                        "state index is corrupt, rebuilding from thread records"
                    );
                    StateIndex::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateIndex::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", index_path.display()));
            }
        };

        let store_dir = dir.to_path_buf();
        let reconciled = reconcile(&store_dir, &mut index)?;
        let store = Self {
            dir: store_dir,
            index: Mutex::new(index),
        };
        if reconciled > 0 {
            tracing::info!(records = reconciled, "re-indexed thread records");
            store.persist_index()?;
        }
        Ok(store)
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        crate::home::threads_dir(&self.dir).join(format!("{thread_id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateIndex> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist_index(&self) -> anyhow::Result<()> {
        let mut index = self.lock();
        index.schema_version = SCHEMA_VERSION;
        write_json_atomic(&self.index_path(), &*index)
    }
}

/// Scan `threads/` and absorb every record into `index`.
/// Returns how many records changed the index.
fn reconcile(dir: &Path, index: &mut StateIndex) -> anyhow::Result<usize> {
    let threads_dir = crate::home::threads_dir(dir);
    let mut changed = 0;
    for entry in std::fs::read_dir(&threads_dir)
        .with_context(|| format!("listing {}", threads_dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let thread: Thread = match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|t| serde_json::from_str(&t).map_err(anyhow::Error::from))
        {
            Ok(thread) => thread,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable thread record");
                continue;
            }
        };
        if index.absorb(&thread) {
            changed += 1;
        }
    }
    Ok(changed)
}

impl StateStore for JsonStateStore {
    fn get(&self, thread_id: &str) -> anyhow::Result<Option<Thread>> {
        let path = self.thread_path(thread_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let thread = serde_json::from_str(&text)
            .with_context(|| format!("parsing thread record {}", path.display()))?;
        Ok(Some(thread))
    }

    fn put(&self, thread: &Thread) -> anyhow::Result<()> {
        // Record first, then the index that refers to it.
        write_json_atomic(&self.thread_path(&thread.thread_id), thread)?;
        {
            let mut index = self.lock();
            index.threads.insert(
                thread.thread_id.clone(),
                IndexEntry {
                    pr_number: thread.pr_number,
                    created_at: thread.created_at,
                    status: thread.status,
                },
            );
        }
        self.persist_index()
    }

    fn map_comment(&self, comment_id: u64, thread_id: &str) -> anyhow::Result<()> {
        {
            let mut index = self.lock();
            let key = comment_id.to_string();
            if index.comment_to_thread.get(&key).map(String::as_str) == Some(thread_id) {
                return Ok(());
            }
            index.comment_to_thread.insert(key, thread_id.to_string());
        }
        self.persist_index()
    }

    fn lookup_thread(&self, comment_id: u64) -> anyhow::Result<Option<String>> {
        Ok(self
            .lock()
            .comment_to_thread
            .get(&comment_id.to_string())
            .cloned())
    }

    fn summaries(&self) -> anyhow::Result<Vec<ThreadSummary>> {
        Ok(self
            .lock()
            .threads
            .iter()
            .map(|(id, e)| ThreadSummary {
                thread_id: id.clone(),
                pr_number: e.pr_number,
                created_at: e.created_at,
                status: e.status,
            })
            .collect())
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_text_atomic(path, &json)
}

/// Write `content` to a sibling temp file, fsync it, then rename over `path`.
pub fn write_text_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid path: {}", path.display()))?;
    let tmp = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));

    {
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path).with_context(|| {
        format!("renaming {} -> {}", tmp.display(), path.display())
    })?;
    Ok(())
}
