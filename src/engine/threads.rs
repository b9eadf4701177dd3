//! Conversation threads: one per logical feedback exchange.
//!
//! A thread ties a review comment and every reply to it to one durable
//! record holding the message history, the assistant session id used for
//! resumption, and the outcome status. [`ThreadManager`] owns the lifecycle;
//! persistence goes through a [`StateStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::runner::context::{self, CodeContext};
use crate::backends::PullRequestMetadata;
use crate::store::{StateStore, ThreadSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Completed,
    Failed,
    /// Waiting on an operator; retryable.
    Pending,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry in a thread's history. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub author: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_context: Option<String>,
    /// Comment that produced this message (user messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role,
            author: author.into(),
            content: content.into(),
            location: None,
            code_snippet: None,
            function_context: None,
            comment_id: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub pr_number: u64,
    #[serde(default)]
    pub assistant_session_id: Option<String>,
    pub status: ThreadStatus,
    pub created_at: DateTime<Utc>,
    /// Comment that opened the thread.
    #[serde(default)]
    pub origin_comment_id: Option<u64>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Thread {
    pub fn new(thread_id: String, pr_number: u64, origin_comment_id: Option<u64>) -> Self {
        Self {
            thread_id,
            pr_number,
            assistant_session_id: None,
            status: ThreadStatus::Active,
            created_at: Utc::now(),
            origin_comment_id,
            messages: Vec::new(),
        }
    }

    /// The newest message, if it came from a user.
    pub fn pending_user_message(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.role == Role::User)
    }

    /// User messages since the last assistant reply.
    pub fn unanswered_count(&self) -> usize {
        self.messages
            .iter()
            .rev()
            .take_while(|m| m.role == Role::User)
            .count()
    }
}

#[derive(Debug)]
pub enum ThreadError {
    NotFound { thread_id: String },
    Store(anyhow::Error),
}

impl std::fmt::Display for ThreadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { thread_id } => write!(f, "thread not found: {thread_id}"),
            Self::Store(e) => write!(f, "state store error: {e:#}"),
        }
    }
}

impl std::error::Error for ThreadError {}

impl From<anyhow::Error> for ThreadError {
    fn from(e: anyhow::Error) -> Self {
        Self::Store(e)
    }
}

/// Owns thread lookup, creation, history and status.
pub struct ThreadManager {
    store: Box<dyn StateStore>,
    repo_dir: PathBuf,
    context_lines: usize,
}

impl ThreadManager {
    pub fn new(store: Box<dyn StateStore>, repo_dir: PathBuf, context_lines: usize) -> Self {
        Self {
            store,
            repo_dir,
            context_lines,
        }
    }

    /// Find the thread a comment belongs to, creating one if needed.
    ///
    /// A reply whose parent is mapped always joins the parent's thread and
    /// is itself mapped to it, so replies to replies chain as well.
    pub fn resolve_thread(
        &self,
        pr_number: u64,
        comment_id: u64,
        parent_comment_id: Option<u64>,
    ) -> Result<Thread, ThreadError> {
        if let Some(parent) = parent_comment_id {
            if let Some(thread_id) = self.store.lookup_thread(parent)? {
                let thread = self.load_or_recover(&thread_id, pr_number, parent)?;
                if self.store.lookup_thread(comment_id)?.is_none() {
                    self.store.map_comment(comment_id, &thread_id)?;
                }
                tracing::debug!(comment_id, parent, %thread_id, "reply joins parent thread");
                return Ok(thread);
            }
        }

        if let Some(thread_id) = self.store.lookup_thread(comment_id)? {
            return self.load_or_recover(&thread_id, pr_number, comment_id);
        }

        let thread_id = self.allocate_thread_id(pr_number)?;
        let thread = Thread::new(thread_id.clone(), pr_number, Some(comment_id));
        self.store.put(&thread)?;
        self.store.map_comment(comment_id, &thread_id)?;
        tracing::info!(pr = pr_number, comment_id, %thread_id, "created thread");
        Ok(thread)
    }

    /// Load a mapped thread; an index entry without a record is recovered
    /// by recreating an empty record under the same id.
    fn load_or_recover(
        &self,
        thread_id: &str,
        pr_number: u64,
        comment_id: u64,
    ) -> Result<Thread, ThreadError> {
        if let Some(thread) = self.store.get(thread_id)? {
            return Ok(thread);
        }
        tracing::warn!(%thread_id, comment_id, "thread record missing, recreating");
        let thread = Thread::new(thread_id.to_string(), pr_number, Some(comment_id));
        self.store.put(&thread)?;
        Ok(thread)
    }

    /// `pr-<n>-thread-<millis>`, bumped until unused.
    fn allocate_thread_id(&self, pr_number: u64) -> anyhow::Result<String> {
        let mut suffix = Utc::now().timestamp_millis();
        loop {
            let candidate = format!("pr-{pr_number}-thread-{suffix}");
            if self.store.get(&candidate)?.is_none() {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    pub fn load_thread(&self, thread_id: &str) -> Result<Option<Thread>, ThreadError> {
        Ok(self.store.get(thread_id)?)
    }

    fn require(&self, thread_id: &str) -> Result<Thread, ThreadError> {
        self.store
            .get(thread_id)?
            .ok_or_else(|| ThreadError::NotFound {
                thread_id: thread_id.to_string(),
            })
    }

    /// Append and persist immediately.
    pub fn append_message(&self, thread_id: &str, message: Message) -> Result<(), ThreadError> {
        let mut thread = self.require(thread_id)?;
        if let Some(comment_id) = message.comment_id {
            self.store.map_comment(comment_id, thread_id)?;
        }
        thread.messages.push(message);
        self.store.put(&thread)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn session_id(&self, thread_id: &str) -> Result<Option<String>, ThreadError> {
        Ok(self.require(thread_id)?.assistant_session_id)
    }

    pub fn set_session_id(&self, thread_id: &str, session_id: &str) -> Result<(), ThreadError> {
        let mut thread = self.require(thread_id)?;
        if thread.assistant_session_id.as_deref() == Some(session_id) {
            return Ok(());
        }
        thread.assistant_session_id = Some(session_id.to_string());
        self.store.put(&thread)?;
        tracing::debug!(%thread_id, %session_id, "stored assistant session");
        Ok(())
    }

    /// Idempotent; updates the record and the index snapshot.
    pub fn set_status(&self, thread_id: &str, status: ThreadStatus) -> Result<(), ThreadError> {
        let mut thread = self.require(thread_id)?;
        thread.status = status;
        self.store.put(&thread)?;
        tracing::info!(%thread_id, %status, "thread status updated");
        Ok(())
    }

    /// Snippet and enclosing declaration around `line` of `file_path`,
    /// read from the working copy. `None` when the file cannot be read.
    pub fn extract_code_context(
        &self,
        file_path: &str,
        line: usize,
        end_line: Option<usize>,
    ) -> Option<CodeContext> {
        context::extract_code_context(
            &self.repo_dir,
            file_path,
            line,
            end_line,
            self.context_lines,
        )
    }

    /// Render the full prompt document for a thread.
    pub fn build_context(
        &self,
        metadata: &PullRequestMetadata,
        thread_id: &str,
    ) -> Result<String, ThreadError> {
        let thread = self.require(thread_id)?;
        Ok(context::build_context(metadata, &thread))
    }

    pub fn summaries(&self) -> anyhow::Result<Vec<ThreadSummary>> {
        self.store.summaries()
    }
}
