//! Prompt context for assistant invocations.
//!
//! - Location parsing for inline comments (`file:line` and range forms)
//! - Source snippets around the commented line, with the enclosing declaration
//! - The full thread document sent to a new session
//! - The single-message payload sent to a resumed session

use regex::Regex;
use std::fmt::Write as _;
use std::path::{Component, Path};
use std::sync::LazyLock;

use crate::backends::PullRequestMetadata;
use crate::engine::threads::Thread;

/// Lines that open a function, type or module-level construct, with any
/// leading visibility or attribute modifiers.
static DECLARATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:public|private|fileprivate|internal|open|final|static|class|override|mutating|async|export|default|abstract|unsafe|const|pub(?:\([^)]*\))?|@\w+(?:\([^)]*\))?)\s+)*(?:func|fn|def|class|struct|enum|protocol|extension|actor|trait|impl|interface|function|mod|module)\b",
    )
    .expect("BUG: declaration pattern is invalid")
});

/// A parsed inline-comment location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub line: usize,
    pub end_line: Option<usize>,
}

/// Parse `file:line`, `start:end:file` or `file:start:end`.
///
/// When the first two colon-separated tokens are both integers they are the
/// line range and the remainder is the path. Anything that does not fit
/// yields `None`; callers skip snippet extraction.
pub fn parse_location(location: &str) -> Option<Location> {
    let parts: Vec<&str> = location.split(':').collect();
    let int = |s: &str| s.trim().parse::<usize>().ok();

    let (path, line, end_line) = if parts.len() >= 3 && int(parts[0]).is_some() && int(parts[1]).is_some() {
        (parts[2..].join(":"), int(parts[0])?, int(parts[1]))
    } else if parts.len() >= 3 && int(parts[parts.len() - 2]).is_some() {
        let n = parts.len();
        (parts[..n - 2].join(":"), int(parts[n - 2])?, Some(int(parts[n - 1])?))
    } else if parts.len() >= 2 {
        let n = parts.len();
        (parts[..n - 1].join(":"), int(parts[n - 1])?, None)
    } else {
        return None;
    };

    if path.trim().is_empty() || line == 0 {
        return None;
    }
    let end_line = end_line.filter(|&end| end > line);
    Some(Location {
        path: path.trim().to_string(),
        line,
        end_line,
    })
}

/// Snippet around a commented line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeContext {
    /// Numbered lines; targeted lines carry a ` ← ` marker.
    pub snippet: String,
    /// Nearest declaration line at or above the target, trimmed.
    pub enclosing_declaration: Option<String>,
}

/// Read `file` under `root` and cut a window of `context_lines` around
/// `line..=end_line` (1-based). `None` if the file is unreadable, escapes
/// `root`, or is shorter than `line`.
pub fn extract_code_context(
    root: &Path,
    file: &str,
    line: usize,
    end_line: Option<usize>,
    context_lines: usize,
) -> Option<CodeContext> {
    let relative = Path::new(file);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        tracing::debug!(file, "refusing code context outside the working copy");
        return None;
    }

    let path = root.join(relative);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "no code context");
            return None;
        }
    };
    let lines: Vec<&str> = text.lines().collect();
    if line == 0 || line > lines.len() {
        return None;
    }

    let last = end_line.unwrap_or(line).max(line);
    let start = line.saturating_sub(context_lines + 1);
    let end = (last + context_lines).min(lines.len());

    let mut snippet = Vec::with_capacity(end - start);
    for (i, text) in lines.iter().enumerate().take(end).skip(start) {
        let number = i + 1;
        let marker = if (line..=last).contains(&number) {
            " ← "
        } else {
            "   "
        };
        snippet.push(format!("{number:3}|{marker}{}", text.trim_end()));
    }

    let enclosing_declaration = lines[..line]
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| DECLARATION_PATTERN.is_match(l))
        .map(str::to_string);

    Some(CodeContext {
        snippet: snippet.join("\n"),
        enclosing_declaration,
    })
}

/// Render the full conversation document for a new session.
pub fn build_context(metadata: &PullRequestMetadata, thread: &Thread) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "# Agent Context for PR #{}", metadata.number);
    doc.push('\n');
    doc.push_str("## 1. PR Metadata\n");
    let _ = writeln!(doc, "- **Title**: {}", metadata.title);
    let _ = writeln!(doc, "- **Branch**: {}", metadata.branch);
    let _ = writeln!(
        doc,
        "- **Files Changed**: {}",
        metadata.changed_files.join(", ")
    );
    doc.push('\n');
    doc.push_str("## 2. PR Description\n");
    if metadata.body.trim().is_empty() {
        doc.push_str("_No description provided_\n");
    } else {
        let _ = writeln!(doc, "{}", metadata.body.trim_end());
    }
    doc.push_str("\n---\n\n## 3. Review Conversation\n\n");

    for msg in &thread.messages {
        let _ = writeln!(
            doc,
            "### {} ({}) - {}",
            msg.role.as_str().to_uppercase(),
            msg.author,
            msg.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if let Some(location) = &msg.location {
            let _ = writeln!(doc, "**Location**: `{location}`\n");
        }
        if let Some(declaration) = &msg.function_context {
            let _ = writeln!(doc, "**Enclosing declaration**: `{declaration}`\n");
        }
        if let Some(snippet) = &msg.code_snippet {
            let _ = writeln!(doc, "```\n{snippet}\n```\n");
        }
        let _ = writeln!(doc, "{}\n", msg.content);
    }

    doc
}

/// Payload for a resumed session: only the newest user message.
///
/// `None` when the newest message is not from a user; callers then send the
/// full document instead.
pub fn minimal_context(thread: &Thread) -> Option<String> {
    let msg = thread.pending_user_message()?;
    let mut out = String::new();
    if let Some(location) = &msg.location {
        let _ = write!(out, "**Location**: `{location}`\n\n");
    }
    let _ = write!(out, "New request from {}:\n\n{}", msg.author, msg.content);
    if let Some(snippet) = &msg.code_snippet {
        let _ = write!(out, "\n\n```\n{snippet}\n```");
    }
    Some(out)
}
