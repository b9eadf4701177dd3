//! GitHub repository host: pull requests, comments and reactions over REST.

use super::{Comment, CommentKind, PullRequestMetadata, Reaction, RepositoryHost};
use crate::github::http::GhHttp;
use crate::github::types::{
    GitHubComment, GitHubPullRequest, GitHubPullRequestFile, GitHubReviewComment,
};
use async_trait::async_trait;

/// How many changed files are reported in PR metadata.
const MAX_CHANGED_FILES: usize = 20;

pub struct GitHubHost {
    repo: String,
    gh: GhHttp,
}

impl GitHubHost {
    pub fn new(repo: String, gh: GhHttp) -> Self {
        Self { repo, gh }
    }
}

/// Path segment of the reactions endpoint for a comment kind.
fn kind_segment(kind: CommentKind) -> &'static str {
    match kind {
        CommentKind::TopLevel => "issues",
        CommentKind::Inline => "pulls",
    }
}

/// Conversation comment → [`Comment`]; bot authors are dropped.
fn from_issue_comment(c: GitHubComment) -> Option<Comment> {
    if c.user.is_bot() {
        return None;
    }
    Some(Comment {
        id: c.id,
        kind: CommentKind::TopLevel,
        author: c.user.login,
        body: c.body.unwrap_or_default(),
        location: None,
        parent_id: None,
    })
}

/// Review comment → [`Comment`]; replies are dropped, only thread roots
/// are picked up.
fn from_review_comment(c: GitHubReviewComment) -> Option<Comment> {
    if c.in_reply_to_id.is_some() {
        return None;
    }
    let location = c.location();
    Some(Comment {
        id: c.id,
        kind: CommentKind::Inline,
        author: c.user.login,
        body: c.body,
        location,
        parent_id: None,
    })
}

/// PR and its files → [`PullRequestMetadata`], keeping the first
/// [`MAX_CHANGED_FILES`] files.
fn to_metadata(pr: GitHubPullRequest, files: Vec<GitHubPullRequestFile>) -> PullRequestMetadata {
    PullRequestMetadata {
        number: pr.number,
        title: pr.title,
        branch: pr.head.name,
        body: pr.body.unwrap_or_default(),
        changed_files: files
            .into_iter()
            .take(MAX_CHANGED_FILES)
            .map(|f| f.filename)
            .collect(),
    }
}

#[async_trait]
impl RepositoryHost for GitHubHost {
    fn name(&self) -> &str {
        "github"
    }

    async fn list_pull_requests_with_label(&self, label: &str) -> anyhow::Result<Vec<u64>> {
        self.gh.list_labeled_pulls(&self.repo, label).await
    }

    async fn list_comments(&self, pr_number: u64) -> anyhow::Result<Vec<Comment>> {
        let issue_comments = self.gh.list_issue_comments(&self.repo, pr_number).await?;
        let review_comments = self.gh.list_review_comments(&self.repo, pr_number).await?;

        let comments: Vec<Comment> = issue_comments
            .into_iter()
            .filter_map(from_issue_comment)
            .chain(review_comments.into_iter().filter_map(from_review_comment))
            .collect();
        tracing::debug!(pr = pr_number, count = comments.len(), "fetched comments");
        Ok(comments)
    }

    async fn get_pull_request_metadata(
        &self,
        pr_number: u64,
    ) -> anyhow::Result<PullRequestMetadata> {
        let pr = self.gh.get_pull(&self.repo, pr_number).await?;
        let files = self.gh.list_pull_files(&self.repo, pr_number).await?;
        Ok(to_metadata(pr, files))
    }

    async fn get_reactions(
        &self,
        comment_id: u64,
        kind: CommentKind,
    ) -> anyhow::Result<Vec<String>> {
        let reactions = self
            .gh
            .list_reactions(&self.repo, kind_segment(kind), comment_id)
            .await?;
        Ok(reactions.into_iter().map(|r| r.content).collect())
    }

    async fn add_reaction(
        &self,
        comment_id: u64,
        kind: CommentKind,
        reaction: Reaction,
    ) -> anyhow::Result<()> {
        self.gh
            .add_reaction(&self.repo, kind_segment(kind), comment_id, reaction.as_str())
            .await
    }

    async fn post_top_level_comment(&self, pr_number: u64, body: &str) -> anyhow::Result<u64> {
        self.gh.add_comment(&self.repo, pr_number, body).await
    }

    async fn post_reply(
        &self,
        pr_number: u64,
        parent_comment_id: u64,
        body: &str,
    ) -> anyhow::Result<u64> {
        self.gh
            .reply_to_review_comment(&self.repo, pr_number, parent_comment_id, body)
            .await
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        self.gh.auth_status().await
    }
}
