use anyhow::Context;
use std::fmt::Write as _;

use crate::config::Config;
use crate::engine::threads::ThreadManager;
use crate::store::{JsonStateStore, ThreadSummary};

/// Print version information.
pub fn version() {
    let pkg_version = env!("CARGO_PKG_VERSION");
    let git_desc = option_env!("PR_RELAY_GIT_DESCRIBE").unwrap_or("unknown");
    println!("pr-relay {pkg_version} ({git_desc})");
}

fn open_threads(config: &Config) -> anyhow::Result<ThreadManager> {
    let state_dir = config.state_dir()?;
    let store = JsonStateStore::open(&state_dir)
        .with_context(|| format!("opening state store at {}", state_dir.display()))?;
    Ok(ThreadManager::new(
        Box::new(store),
        config.repo_dir.clone(),
        config.context_lines,
    ))
}

fn render_thread_table(summaries: &[ThreadSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<36} {:<6} {:<10} CREATED",
        "THREAD", "PR", "STATUS"
    );
    let _ = writeln!(out, "{}", "-".repeat(80));
    for s in summaries {
        let _ = writeln!(
            out,
            "{:<36} {:<6} {:<10} {}",
            s.thread_id,
            s.pr_number,
            s.status.as_str(),
            s.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    out
}

/// List threads, oldest first, optionally for one PR.
pub fn threads_list(config: &Config, pr: Option<u64>) -> anyhow::Result<()> {
    let mut summaries = open_threads(config)?.summaries()?;
    summaries.retain(|s| pr.is_none_or(|n| s.pr_number == n));
    summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    if summaries.is_empty() {
        println!("No threads found.");
        return Ok(());
    }
    print!("{}", render_thread_table(&summaries));
    Ok(())
}

/// Print one thread record as JSON.
pub fn threads_show(config: &Config, thread_id: &str) -> anyhow::Result<()> {
    let thread = open_threads(config)?
        .load_thread(thread_id)?
        .with_context(|| format!("thread not found: {thread_id}"))?;
    println!("{}", serde_json::to_string_pretty(&thread)?);
    Ok(())
}

/// Print a resolved config value.
pub fn config_get(config: &Config, key: &str) -> anyhow::Result<()> {
    let value = config.get(key)?;
    println!("{value}");
    Ok(())
}

struct Check {
    name: &'static str,
    ok: bool,
    detail: String,
}

fn binary_check(name: &'static str, binary: &str) -> Check {
    match which::which(binary) {
        Ok(path) => Check {
            name,
            ok: true,
            detail: path.display().to_string(),
        },
        Err(_) => Check {
            name,
            ok: false,
            detail: format!("`{binary}` not found on PATH"),
        },
    }
}

fn run_checks(config: &Config, token: Option<String>) -> Vec<Check> {
    let mut checks = vec![
        binary_check("git", "git"),
        binary_check("assistant", &config.assistant.binary),
    ];

    checks.push(Check {
        name: "github token",
        ok: token.is_some(),
        detail: if token.is_some() {
            "found".to_string()
        } else {
            "set github_token, GH_TOKEN or GITHUB_TOKEN, or run `gh auth login`".to_string()
        },
    });

    checks.push(match config.require_repo() {
        Ok(repo) => Check {
            name: "repo",
            ok: true,
            detail: repo.to_string(),
        },
        Err(e) => Check {
            name: "repo",
            ok: false,
            detail: e.to_string(),
        },
    });

    let state = config
        .state_dir()
        .and_then(|dir| crate::home::ensure_dir(&dir))
        .and_then(|dir| {
            let probe = dir.join(".write-check");
            std::fs::write(&probe, b"ok")
                .and_then(|()| std::fs::remove_file(&probe))
                .with_context(|| format!("{} is not writable", dir.display()))?;
            Ok(dir)
        });
    checks.push(match state {
        Ok(dir) => Check {
            name: "state dir",
            ok: true,
            detail: dir.display().to_string(),
        },
        Err(e) => Check {
            name: "state dir",
            ok: false,
            detail: format!("{e:#}"),
        },
    });

    checks
}

/// Verify prerequisites for running the daemon.
pub fn check(config: &Config) -> anyhow::Result<()> {
    let token = config
        .github_token
        .clone()
        .or_else(crate::github::http::resolve_token);
    let checks = run_checks(config, token);

    println!("{:<14} {:<8} DETAIL", "CHECK", "STATUS");
    println!("{}", "-".repeat(60));
    for c in &checks {
        let status = if c.ok { "ok" } else { "missing" };
        println!("{:<14} {:<8} {}", c.name, status, c.detail);
    }

    let failed = checks.iter().filter(|c| !c.ok).count();
    if failed > 0 {
        anyhow::bail!("{failed} check(s) failed");
    }
    Ok(())
}
