//! Comment commands and reply formatting.
//!
//! A comment selects the assistant's mode with a token right after a
//! mention: `@bot plan …`, `@bot fix …` / `@bot implement …`. Anything
//! else is a question.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

/// Hidden marker appended to every reply the relay posts.
pub const REPLY_SIGNATURE: &str = "<!-- pr-relay -->";

static PLAN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\w+\s+plan").expect("BUG: plan pattern is invalid"));

static IMPLEMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@\w+\s+(fix|implement)").expect("BUG: implement pattern is invalid")
});

static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\w+\s+").expect("BUG: mention pattern is invalid"));

static DETAILS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<details>|</details>|<summary>|</summary>")
        .expect("BUG: details pattern is invalid")
});

/// What the assistant is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Answer questions, ask for clarification. No code changes.
    Ask,
    /// Propose an implementation plan. No code changes.
    Plan,
    /// Make, commit and push the change.
    Implement,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Plan => "plan",
            Self::Implement => "implement",
        }
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the mode from a comment body. Case-insensitive; defaults to ask.
pub fn parse_command(body: &str) -> AgentMode {
    let lower = body.to_lowercase();
    if PLAN_PATTERN.is_match(&lower) {
        AgentMode::Plan
    } else if IMPLEMENT_PATTERN.is_match(&lower) {
        AgentMode::Implement
    } else {
        AgentMode::Ask
    }
}

/// Strip GitHub markup artifacts and the first mention from a comment body.
pub fn clean_comment_body(body: &str) -> String {
    let body = DETAILS_PATTERN.replace_all(body, "\n");
    let body = body.replace("```suggestion", "```");
    let body = MENTION_PATTERN.replace(&body, "");
    body.trim().to_string()
}

/// Is this a reply the relay posted itself?
pub fn is_own_reply(body: &str) -> bool {
    body.contains(REPLY_SIGNATURE)
}

fn signed(body: String) -> String {
    format!("{body}\n\n{REPLY_SIGNATURE}")
}

/// Frame a successful assistant response for the PR.
pub fn format_response(mode: AgentMode, response: &str, mention: &str) -> String {
    let body = match mode {
        AgentMode::Ask => format!(
            "🤔 **Questions & Clarifications**\n\n{response}\n\n---\n\
             *Reply with answers or use `{mention} plan` to see an implementation plan*"
        ),
        AgentMode::Plan => format!(
            "📋 **Implementation Plan**\n\n{response}\n\n---\n\
             *Use `{mention} implement` to proceed with changes*"
        ),
        AgentMode::Implement => format!(
            "✅ **Changes Implemented**\n\n{response}\n\n---\n\
             *Changes have been committed and pushed. Ready for review.*"
        ),
    };
    signed(body)
}

/// Reply for a hard failure.
pub fn format_failure(thread_id: &str, error: &str) -> String {
    signed(format!(
        "❌ **Processing Failed**\n\n\
         Thread: `{thread_id}`\n\n\
         **Error**:\n```\n{}\n```\n\n\
         Please check the logs for details. Post a new comment to try again.",
        error.trim()
    ))
}

/// Reply for an operator-fixable failure, with a remediation checklist.
pub fn format_manual_intervention(thread_id: &str, error: &str, work_dir: &Path) -> String {
    let instructions = work_dir.join("instructions.md");
    let context = work_dir.join("context.md");
    signed(format!(
        "⚠️ **Manual Intervention Required**\n\n\
         Thread: `{thread_id}`\n\n\
         {}\n\n\
         **Checklist**\n\
         - [ ] Make sure the assistant CLI is installed and on `PATH` for the relay process\n\
         - [ ] Make sure the relay user can execute it and write to the working copy\n\
         - [ ] Review the saved instructions: `{}`\n\
         - [ ] Review the saved context: `{}`\n\
         - [ ] Reply to this comment to retry; the thread is kept as pending",
        error.trim(),
        instructions.display(),
        context.display(),
    ))
}
