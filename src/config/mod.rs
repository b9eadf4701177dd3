//! Config loader: builds one immutable [`Config`] at startup.
//!
//! Layers, lowest to highest precedence:
//! 1. built-in defaults
//! 2. `~/.pr-relay/config.yml` (global)
//! 3. `.pr-relay.yml` in the working directory (project, deep-merged)
//! 4. `PR_RELAY_*` / `CURSOR_API_KEY` environment variables
//! 5. CLI flags (applied by `main`)
//!
//! The resolved value is shared as `Arc<Config>`; nothing re-reads files
//! after startup.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::commands::AgentMode;

/// Project-level config file name.
pub const PROJECT_FILE: &str = ".pr-relay.yml";

/// Printed in place of configured secrets.
pub const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repository in OWNER/NAME form.
    pub repo: String,
    /// Explicit GitHub token. When unset the client falls back to
    /// `GH_TOKEN`, `GITHUB_TOKEN`, then `gh auth token`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    /// Pull requests carrying this label are watched.
    pub watch_label: String,
    pub poll_interval_secs: u64,
    /// Thread records and agent work dirs. Defaults to `~/.pr-relay/state`.
    pub state_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    /// Overrides for the built-in instruction templates.
    pub template_dir: Option<PathBuf>,
    /// Root of the git working copy the assistant operates on.
    pub repo_dir: PathBuf,
    /// Lines of source shown around an inline comment.
    pub context_lines: usize,
    /// Handle users mention to talk to the assistant; shown in reply footers.
    pub mention: String,
    pub assistant: AssistantConfig,
    pub github: GitHubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo: String::new(),
            github_token: None,
            watch_label: "awaiting-cursor-response".to_string(),
            poll_interval_secs: 60,
            state_dir: None,
            log_file: None,
            template_dir: None,
            repo_dir: PathBuf::from("."),
            context_lines: 10,
            mention: "@cursor".to_string(),
            assistant: AssistantConfig::default(),
            github: GitHubConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Assistant CLI binary (name on PATH or absolute path).
    pub binary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Upper bound for a single assistant call; 0 disables the bound.
    pub timeout_secs: u64,
    pub models: ModelTable,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            binary: "cursor".to_string(),
            api_key: None,
            timeout_secs: 1800,
            models: ModelTable::default(),
        }
    }
}

/// Model per command mode. Empty entries use `fallback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTable {
    pub ask: String,
    pub plan: String,
    pub implement: String,
    pub fallback: String,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self {
            ask: String::new(),
            plan: String::new(),
            implement: String::new(),
            fallback: "auto".to_string(),
        }
    }
}

impl ModelTable {
    pub fn model_for(&self, mode: AgentMode) -> &str {
        let model = match mode {
            AgentMode::Ask => &self.ask,
            AgentMode::Plan => &self.plan,
            AgentMode::Implement => &self.implement,
        };
        if model.trim().is_empty() {
            &self.fallback
        } else {
            model
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: 30,
            backoff_max_secs: 900,
        }
    }
}

impl Config {
    /// Load global + project files and apply the environment.
    pub fn load() -> anyhow::Result<Self> {
        let global = crate::home::config_path();
        let project = std::env::current_dir()
            .ok()
            .map(|d| d.join(PROJECT_FILE));
        let mut config = Self::from_files(global.as_deref(), project.as_deref())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Merge the given YAML files (later wins) over the defaults.
    /// Missing files are skipped.
    pub fn from_files(global: Option<&Path>, project: Option<&Path>) -> anyhow::Result<Self> {
        let mut merged = serde_yml::Value::Mapping(Default::default());
        for path in [global, project].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let layer = read_yaml(path)?;
            merge_values(&mut merged, layer);
            tracing::debug!(path = %path.display(), "loaded config file");
        }
        serde_yml::from_value(merged).context("invalid config")
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PR_RELAY_REPO") {
            self.repo = v;
        }
        if let Some(v) = get("PR_RELAY_GITHUB_TOKEN") {
            self.github_token = Some(v);
        }
        if let Some(v) = get("PR_RELAY_WATCH_LABEL") {
            self.watch_label = v;
        }
        if let Some(v) = get("PR_RELAY_POLL_INTERVAL") {
            match v.parse() {
                Ok(secs) => self.poll_interval_secs = secs,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid PR_RELAY_POLL_INTERVAL"),
            }
        }
        if let Some(v) = get("PR_RELAY_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CURSOR_API_KEY") {
            self.assistant.api_key = Some(v);
        }
    }

    /// Resolved state directory, created on demand.
    pub fn state_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => crate::home::ensure_dir(dir),
            None => crate::home::default_state_dir(),
        }
    }

    /// `repo`, or an error telling the operator how to set it.
    pub fn require_repo(&self) -> anyhow::Result<&str> {
        if self.repo.trim().is_empty() {
            anyhow::bail!(
                "'repo' not set; add `repo: owner/name` to {PROJECT_FILE} or ~/.pr-relay/config.yml, or pass --repo"
            );
        }
        Ok(&self.repo)
    }

    /// Resolve a dot-separated key against the effective config. Secrets
    /// that are set read back as [`REDACTED`].
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let mut shown = self.clone();
        for secret in [&mut shown.github_token, &mut shown.assistant.api_key] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }
        let value = serde_yml::to_value(&shown)?;
        extract_value(&value, key)
    }
}

fn read_yaml(path: &Path) -> anyhow::Result<serde_yml::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(serde_yml::Value::Mapping(Default::default()));
    }
    serde_yml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
}

/// Deep-merge `overlay` into `base`. Mappings merge key by key, anything
/// else is replaced.
fn merge_values(base: &mut serde_yml::Value, overlay: serde_yml::Value) {
    match (base, overlay) {
        (serde_yml::Value::Mapping(base_map), serde_yml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Walk a dot-separated path through nested YAML mappings.
fn extract_value(root: &serde_yml::Value, key: &str) -> anyhow::Result<String> {
    let mut current = root;
    for part in key.split('.') {
        current = current
            .get(part)
            .with_context(|| format!("key not found: {key}"))?;
    }

    match current {
        serde_yml::Value::String(s) => Ok(s.clone()),
        serde_yml::Value::Number(n) => Ok(n.to_string()),
        serde_yml::Value::Bool(b) => Ok(b.to_string()),
        serde_yml::Value::Null => Ok(String::new()),
        _ => Ok(serde_yml::to_string(current)?),
    }
}
