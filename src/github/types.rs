//! GitHub API response types: deserialized from REST JSON responses.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    /// "User", "Bot" or "Organization".
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl GitHubUser {
    pub fn is_bot(&self) -> bool {
        self.kind.as_deref() == Some("Bot") || self.login.ends_with("[bot]")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
}

/// Entry from `/issues`; pull requests carry a `pull_request` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubBranchRef {
    #[serde(rename = "ref")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubPullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub head: GitHubBranchRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubPullRequestFile {
    pub filename: String,
}

/// Conversation comment on an issue or pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    pub user: GitHubUser,
    pub created_at: String,
}

/// PR review comment on a specific line of code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubReviewComment {
    pub id: u64,
    pub user: GitHubUser,
    pub body: String,
    pub path: String,
    pub line: Option<u32>,
    pub original_line: Option<u32>,
    #[serde(default)]
    pub start_line: Option<u32>,
    pub created_at: String,
    pub in_reply_to_id: Option<u64>,
}

impl GitHubReviewComment {
    /// `path:line`, or `path:start:end` for a multi-line comment. Falls back
    /// to `original_line` when the line is outdated; `None` with no line at all.
    pub fn location(&self) -> Option<String> {
        let line = self.line.or(self.original_line)?;
        match self.start_line {
            Some(start) if start < line => Some(format!("{}:{start}:{line}", self.path)),
            _ => Some(format!("{}:{line}", self.path)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubReaction {
    pub id: u64,
    pub content: String,
}

/// Response of any "create" endpoint; only the new id matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubCreated {
    pub id: u64,
}
