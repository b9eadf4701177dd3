//! Repository host abstraction: where pull requests and their feedback live.
//!
//! GitHub is the only implementation. The feedback loop talks to this trait
//! so it can be driven by an in-memory host in tests.

pub mod github;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where a comment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    /// Conversation-tab comment on the pull request.
    TopLevel,
    /// Review comment attached to a line of the diff.
    Inline,
}

/// A piece of feedback, as fetched from the host. Never persisted; only its
/// id is used as a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub kind: CommentKind,
    pub author: String,
    pub body: String,
    /// `path:line` (or `path:start:end`) for inline comments.
    pub location: Option<String>,
    pub parent_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestMetadata {
    pub number: u64,
    pub title: String,
    pub branch: String,
    pub body: String,
    /// At most the first 20 changed paths.
    pub changed_files: Vec<String>,
}

/// Reactions used as processing markers and outcome signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reaction {
    /// Seen: added before the assistant runs.
    Eyes,
    /// Fully handled: added once a terminal outcome is reached.
    Rocket,
    ThumbsUp,
    ThumbsDown,
    Confused,
}

impl Reaction {
    /// Name used by the GitHub reactions API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eyes => "eyes",
            Self::Rocket => "rocket",
            Self::ThumbsUp => "+1",
            Self::ThumbsDown => "-1",
            Self::Confused => "confused",
        }
    }
}

/// Everything the feedback loop needs from the code host.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Human-readable name (e.g. "github")
    fn name(&self) -> &str;

    /// Open pull requests carrying `label`.
    async fn list_pull_requests_with_label(&self, label: &str) -> anyhow::Result<Vec<u64>>;

    /// Top-level comments (bot-authored ones excluded) followed by root
    /// inline comments, in host order.
    async fn list_comments(&self, pr_number: u64) -> anyhow::Result<Vec<Comment>>;

    async fn get_pull_request_metadata(&self, pr_number: u64)
        -> anyhow::Result<PullRequestMetadata>;

    /// Reaction names currently on a comment.
    async fn get_reactions(
        &self,
        comment_id: u64,
        kind: CommentKind,
    ) -> anyhow::Result<Vec<String>>;

    async fn add_reaction(
        &self,
        comment_id: u64,
        kind: CommentKind,
        reaction: Reaction,
    ) -> anyhow::Result<()>;

    /// Returns the new comment id.
    async fn post_top_level_comment(&self, pr_number: u64, body: &str) -> anyhow::Result<u64>;

    /// Reply inside an inline review thread. Returns the new comment id.
    async fn post_reply(
        &self,
        pr_number: u64,
        parent_comment_id: u64,
        body: &str,
    ) -> anyhow::Result<u64>;

    /// Check if connected and authenticated.
    async fn health_check(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory host that records every write.
    #[derive(Default)]
    pub struct MockHost {
        pub prs: Vec<u64>,
        pub comments: HashMap<u64, Vec<Comment>>,
        pub metadata: HashMap<u64, PullRequestMetadata>,
        /// PRs whose comment listing fails.
        pub failing_prs: Vec<u64>,
        pub reactions: Mutex<HashMap<u64, Vec<String>>>,
        /// (pr, parent, body); parent is None for top-level posts.
        pub posts: Mutex<Vec<(u64, Option<u64>, String)>>,
        /// How many upcoming posts fail before posting works again.
        pub failing_posts: Mutex<u32>,
        next_id: Mutex<u64>,
    }

    impl MockHost {
        pub fn with_comment(pr: u64, comment: Comment) -> Self {
            let mut host = Self {
                prs: vec![pr],
                ..Self::default()
            };
            host.comments.insert(pr, vec![comment]);
            host.metadata.insert(pr, metadata(pr));
            host
        }

        pub fn reactions_on(&self, comment_id: u64) -> Vec<String> {
            self.reactions
                .lock()
                .unwrap()
                .get(&comment_id)
                .cloned()
                .unwrap_or_default()
        }

        pub fn posts(&self) -> Vec<(u64, Option<u64>, String)> {
            self.posts.lock().unwrap().clone()
        }

        fn post(&self, pr: u64, parent: Option<u64>, body: &str) -> anyhow::Result<u64> {
            {
                let mut failing = self.failing_posts.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    anyhow::bail!("posting to PR #{pr} failed");
                }
            }
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            self.posts
                .lock()
                .unwrap()
                .push((pr, parent, body.to_string()));
            Ok(9000 + *next)
        }
    }

    pub fn metadata(pr: u64) -> PullRequestMetadata {
        PullRequestMetadata {
            number: pr,
            title: "Add feature X".to_string(),
            branch: "feature/x".to_string(),
            body: "Implements X.".to_string(),
            changed_files: vec!["src/lib.rs".to_string()],
        }
    }

    pub fn top_level(id: u64, body: &str) -> Comment {
        Comment {
            id,
            kind: CommentKind::TopLevel,
            author: "alice".to_string(),
            body: body.to_string(),
            location: None,
            parent_id: None,
        }
    }

    #[async_trait]
    impl RepositoryHost for MockHost {
        fn name(&self) -> &str {
            "mock"
        }

        async fn list_pull_requests_with_label(&self, _label: &str) -> anyhow::Result<Vec<u64>> {
            Ok(self.prs.clone())
        }

        async fn list_comments(&self, pr_number: u64) -> anyhow::Result<Vec<Comment>> {
            if self.failing_prs.contains(&pr_number) {
                anyhow::bail!("listing comments failed for PR #{pr_number}");
            }
            Ok(self.comments.get(&pr_number).cloned().unwrap_or_default())
        }

        async fn get_pull_request_metadata(
            &self,
            pr_number: u64,
        ) -> anyhow::Result<PullRequestMetadata> {
            self.metadata
                .get(&pr_number)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no PR #{pr_number}"))
        }

        async fn get_reactions(
            &self,
            comment_id: u64,
            _kind: CommentKind,
        ) -> anyhow::Result<Vec<String>> {
            Ok(self.reactions_on(comment_id))
        }

        async fn add_reaction(
            &self,
            comment_id: u64,
            _kind: CommentKind,
            reaction: Reaction,
        ) -> anyhow::Result<()> {
            let mut reactions = self.reactions.lock().unwrap();
            let list = reactions.entry(comment_id).or_default();
            if !list.iter().any(|r| r == reaction.as_str()) {
                list.push(reaction.as_str().to_string());
            }
            Ok(())
        }

        async fn post_top_level_comment(&self, pr_number: u64, body: &str) -> anyhow::Result<u64> {
            self.post(pr_number, None, body)
        }

        async fn post_reply(
            &self,
            pr_number: u64,
            parent_comment_id: u64,
            body: &str,
        ) -> anyhow::Result<u64> {
            self.post(pr_number, Some(parent_comment_id), body)
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }
}
