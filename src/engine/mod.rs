//! Engine: the feedback loop.
//!
//! Every poll cycle lists the pull requests carrying the watch label, walks
//! their comments in host order and runs each unprocessed one through the
//! assistant. Comments are tracked with two reactions on the host:
//! - 👀 `eyes` is added as soon as a comment is picked up
//! - 🚀 `rocket` is added once it reached a terminal outcome
//!
//! A comment with both is never looked at again. Manual-intervention
//! outcomes skip the rocket so the comment is retried after the operator
//! fixed the environment.
//!
//! Everything runs sequentially: one PR, one comment, one assistant call at
//! a time. Shutdown is checked between cycles and between PRs; an in-flight
//! invocation is allowed to finish.

pub mod commands;
pub mod runner;
pub mod threads;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::backends::github::GitHubHost;
use crate::backends::{Comment, CommentKind, Reaction, RepositoryHost};
use crate::config::Config;
use crate::github::http::GhHttp;
use crate::store::JsonStateStore;
use commands::{
    clean_comment_body, format_failure, format_manual_intervention, format_response,
    is_own_reply, parse_command, AgentMode,
};
use runner::agents::cursor::CursorRunner;
use runner::agents::AssistantRunner;
use runner::context::parse_location;
use runner::git_ops::GitWorkingCopy;
use runner::{AgentController, Invocation, InvocationStatus};
use threads::{Message, Role, ThreadManager, ThreadStatus};

pub struct FeedbackLoop {
    config: Arc<Config>,
    host: Arc<dyn RepositoryHost>,
    threads: Arc<ThreadManager>,
    controller: AgentController,
}

impl FeedbackLoop {
    pub fn new(
        config: Arc<Config>,
        host: Arc<dyn RepositoryHost>,
        threads: Arc<ThreadManager>,
        controller: AgentController,
    ) -> Self {
        Self {
            config,
            host,
            threads,
            controller,
        }
    }

    /// Wire the GitHub host, JSON store, Cursor runner and git working copy.
    pub fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let repo = config.require_repo()?.to_string();
        let gh = GhHttp::new(config.github_token.clone(), &config.github)?;
        let host: Arc<dyn RepositoryHost> = Arc::new(GitHubHost::new(repo, gh));

        let state_dir = config.state_dir()?;
        let store = JsonStateStore::open(&state_dir)
            .with_context(|| format!("opening state store at {}", state_dir.display()))?;
        let threads = Arc::new(ThreadManager::new(
            Box::new(store),
            config.repo_dir.clone(),
            config.context_lines,
        ));

        let runner = CursorRunner::new(config.assistant.binary.clone());
        if !runner.is_available() {
            tracing::warn!(
                binary = %config.assistant.binary,
                "assistant CLI not found on PATH, comments will need manual intervention"
            );
        }
        let controller = AgentController::new(
            config.clone(),
            state_dir,
            host.clone(),
            threads.clone(),
            Arc::new(runner),
            Arc::new(GitWorkingCopy::new(config.repo_dir.clone())),
        );
        Ok(Self::new(config, host, threads, controller))
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        self.host
            .health_check()
            .await
            .with_context(|| format!("{} health check failed", self.host.name()))?;
        tracing::info!(host = self.host.name(), "repository host connected");
        Ok(())
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        tracing::info!(
            repo = %self.config.repo,
            label = %self.config.watch_label,
            interval = ?interval,
            "entering poll loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.process_all_prs(&shutdown).await {
                tracing::error!(error = %format!("{e:#}"), "poll cycle failed");
            }
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("poll loop stopped");
        Ok(())
    }

    /// One cycle over every watched PR. A failing PR is logged and skipped.
    pub async fn process_all_prs(&self, shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
        let prs = self
            .host
            .list_pull_requests_with_label(&self.config.watch_label)
            .await
            .context("listing watched pull requests")?;
        tracing::debug!(count = prs.len(), "watched pull requests");

        for pr in prs {
            if *shutdown.borrow() {
                tracing::info!("shutdown requested, stopping before next PR");
                break;
            }
            if let Err(e) = self.process_pr(pr).await {
                tracing::error!(pr, error = %format!("{e:#}"), "failed to process PR");
            }
        }
        Ok(())
    }

    /// Handle every unprocessed comment of one PR, in host order.
    pub async fn process_pr(&self, pr_number: u64) -> anyhow::Result<()> {
        let comments = self
            .host
            .list_comments(pr_number)
            .await
            .with_context(|| format!("listing comments of PR #{pr_number}"))?;

        for comment in &comments {
            if let Err(e) = self.process_comment(pr_number, comment).await {
                tracing::error!(
                    pr = pr_number,
                    comment_id = comment.id,
                    error = %format!("{e:#}"),
                    "failed to process comment"
                );
            }
        }
        Ok(())
    }

    async fn process_comment(&self, pr_number: u64, comment: &Comment) -> anyhow::Result<()> {
        if is_own_reply(&comment.body) {
            return Ok(());
        }

        let reactions = match self.host.get_reactions(comment.id, comment.kind).await {
            Ok(reactions) => reactions,
            Err(e) => {
                tracing::warn!(
                    pr = pr_number,
                    comment_id = comment.id,
                    error = %format!("{e:#}"),
                    "cannot read reactions, skipping comment this cycle"
                );
                return Ok(());
            }
        };
        let has = |r: Reaction| reactions.iter().any(|name| name == r.as_str());
        let seen = has(Reaction::Eyes);
        if seen && has(Reaction::Rocket) {
            return Ok(());
        }

        tracing::info!(
            pr = pr_number,
            comment_id = comment.id,
            kind = ?comment.kind,
            author = %comment.author,
            "processing comment"
        );
        if !seen {
            self.host
                .add_reaction(comment.id, comment.kind, Reaction::Eyes)
                .await
                .context("marking comment as seen")?;
        }

        let mode = parse_command(&comment.body);
        let thread = self
            .threads
            .resolve_thread(pr_number, comment.id, comment.parent_id)?;
        let thread_id = thread.thread_id.as_str();

        let retry = thread
            .pending_user_message()
            .is_some_and(|m| m.comment_id == Some(comment.id));
        if retry {
            tracing::info!(%thread_id, comment_id = comment.id, "retrying comment already in thread");
        } else {
            self.threads
                .append_message(thread_id, self.user_message(comment))?;
        }

        let metadata = self
            .host
            .get_pull_request_metadata(pr_number)
            .await
            .with_context(|| format!("fetching metadata of PR #{pr_number}"))?;
        let full_context = self.threads.build_context(&metadata, thread_id)?;

        tracing::info!(pr = pr_number, %thread_id, %mode, "invoking agent");
        let outcome = self
            .controller
            .invoke(pr_number, thread_id, mode, &full_context)
            .await;

        let repeated_pending = retry && thread.status == ThreadStatus::Pending;
        self.apply_outcome(pr_number, comment, thread_id, mode, outcome, repeated_pending)
            .await
    }

    /// User message for a comment, with code context for inline comments.
    fn user_message(&self, comment: &Comment) -> Message {
        let mut message = Message::new(
            Role::User,
            comment.author.clone(),
            clean_comment_body(&comment.body),
        );
        message.comment_id = Some(comment.id);

        if let Some(location) = &comment.location {
            message.location = Some(location.clone());
            match parse_location(location) {
                Some(loc) => {
                    if let Some(code) =
                        self.threads
                            .extract_code_context(&loc.path, loc.line, loc.end_line)
                    {
                        message.code_snippet = Some(code.snippet);
                        message.function_context = code.enclosing_declaration;
                    }
                }
                None => tracing::debug!(%location, "unparseable comment location"),
            }
        }
        message
    }

    async fn apply_outcome(
        &self,
        pr_number: u64,
        comment: &Comment,
        thread_id: &str,
        mode: AgentMode,
        outcome: Invocation,
        repeated_pending: bool,
    ) -> anyhow::Result<()> {
        tracing::info!(
            pr = pr_number,
            comment_id = comment.id,
            %thread_id,
            status = outcome.status.code(),
            "agent finished"
        );

        match outcome.status {
            InvocationStatus::Success => {
                // Unposted answers stay out of the history so the comment is
                // retried as pending.
                let body = format_response(mode, &outcome.response, &self.config.mention);
                let reply_id = self.reply(pr_number, comment, &body).await?;
                self.threads.append_message(
                    thread_id,
                    Message::new(
                        Role::Assistant,
                        self.controller.runner_name(),
                        outcome.response,
                    ),
                )?;
                for reaction in [Reaction::Rocket, Reaction::ThumbsUp] {
                    self.react(reply_id, comment.kind, reaction).await;
                }
                self.threads.set_status(thread_id, ThreadStatus::Completed)?;
                self.mark_handled(comment).await
            }
            InvocationStatus::Failure => {
                self.react(comment.id, comment.kind, Reaction::ThumbsDown)
                    .await;
                self.reply(pr_number, comment, &format_failure(thread_id, &outcome.response))
                    .await?;
                self.threads.set_status(thread_id, ThreadStatus::Failed)?;
                self.mark_handled(comment).await
            }
            InvocationStatus::ManualIntervention => {
                if repeated_pending {
                    tracing::info!(%thread_id, "still waiting on manual intervention, not replying again");
                    return Ok(());
                }
                self.react(comment.id, comment.kind, Reaction::Confused)
                    .await;
                let body =
                    format_manual_intervention(thread_id, &outcome.response, &outcome.work_dir);
                self.reply(pr_number, comment, &body).await?;
                self.threads.set_status(thread_id, ThreadStatus::Pending)?;
                Ok(())
            }
        }
    }

    /// Inline comments get a reply in their review thread, others a new
    /// top-level comment.
    async fn reply(&self, pr_number: u64, comment: &Comment, body: &str) -> anyhow::Result<u64> {
        let id = match comment.kind {
            CommentKind::Inline => self.host.post_reply(pr_number, comment.id, body).await,
            CommentKind::TopLevel => self.host.post_top_level_comment(pr_number, body).await,
        }
        .context("posting reply")?;
        tracing::debug!(pr = pr_number, comment_id = comment.id, reply_id = id, "reply posted");
        Ok(id)
    }

    /// Best-effort reaction.
    async fn react(&self, comment_id: u64, kind: CommentKind, reaction: Reaction) {
        if let Err(e) = self.host.add_reaction(comment_id, kind, reaction).await {
            tracing::warn!(comment_id, reaction = reaction.as_str(), error = %format!("{e:#}"), "failed to add reaction");
        }
    }

    async fn mark_handled(&self, comment: &Comment) -> anyhow::Result<()> {
        self.host
            .add_reaction(comment.id, comment.kind, Reaction::Rocket)
            .await
            .context("marking comment as handled")
    }
}

/// Flip the shutdown flag on SIGINT or SIGTERM.
fn spawn_signal_handler(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tx.send_replace(true);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "cannot install SIGTERM handler");
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received SIGINT, finishing current work");
            }
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, finishing current work"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, finishing current work"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("received Ctrl-C, finishing current work");
    }
}

/// Run the daemon until SIGINT/SIGTERM.
///
/// Main entry point of `pr-relay daemon`.
pub async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pr-relay starting");
    let relay = FeedbackLoop::from_config(config)?;
    relay.health_check().await?;

    let (tx, rx) = watch::channel(false);
    spawn_signal_handler(tx);
    relay.run(rx).await
}

/// One pass over a single PR, for `pr-relay process-pr`.
pub async fn process_once(config: Arc<Config>, pr_number: u64) -> anyhow::Result<()> {
    let relay = FeedbackLoop::from_config(config)?;
    relay.health_check().await?;
    relay.process_pr(pr_number).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{top_level, MockHost};
    use runner::agents::mock::{MockRunner, RunnerCall};
    use runner::agents::AgentError;
    use runner::git_ops::mock::MockWorkingCopy;

    struct Fixture {
        _dir: tempfile::TempDir,
        host: Arc<MockHost>,
        threads: Arc<ThreadManager>,
        runner: Arc<MockRunner>,
        relay: FeedbackLoop,
    }

    fn fixture(host: MockHost, runner: MockRunner) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let config = Arc::new(Config {
            repo: "acme/widgets".to_string(),
            mention: "@bot".to_string(),
            ..Config::default()
        });
        let store = JsonStateStore::open(&state_dir).unwrap();
        let threads = Arc::new(ThreadManager::new(
            Box::new(store),
            dir.path().to_path_buf(),
            3,
        ));
        let host = Arc::new(host);
        let runner = Arc::new(runner);
        let controller = AgentController::new(
            config.clone(),
            state_dir,
            host.clone(),
            threads.clone(),
            runner.clone(),
            Arc::new(MockWorkingCopy::default()),
        );
        let relay = FeedbackLoop::new(config, host.clone(), threads.clone(), controller);
        Fixture {
            _dir: dir,
            host,
            threads,
            runner,
            relay,
        }
    }

    fn only_thread(f: &Fixture) -> threads::Thread {
        let summaries = f.threads.summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        f.threads
            .load_thread(&summaries[0].thread_id)
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn plan_comment_completes_thread() {
        let f = fixture(
            MockHost::with_comment(7, top_level(123, "@bot plan add feature X")),
            MockRunner::default().on_send(Ok("1. do X".to_string())),
        );
        f.relay.process_pr(7).await.unwrap();

        let thread = only_thread(&f);
        assert_eq!(thread.status, ThreadStatus::Completed);
        assert_eq!(thread.origin_comment_id, Some(123));
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[0].role, Role::User);
        assert_eq!(thread.messages[0].content, "plan add feature X");
        assert_eq!(thread.messages[1].role, Role::Assistant);
        assert_eq!(thread.messages[1].author, "mock-assistant");

        let instructions = std::fs::read_to_string(
            crate::home::agent_work_dir(&f._dir.path().join("state"), &thread.thread_id)
                .join("instructions.md"),
        )
        .unwrap();
        assert!(instructions.contains("## Mode: plan"));

        let posts = f.host.posts();
        assert_eq!(posts.len(), 1);
        let (pr, parent, body) = &posts[0];
        assert_eq!((*pr, *parent), (7, None));
        assert!(body.contains("Implementation Plan"));
        assert!(body.contains("1. do X"));
        assert!(body.contains("`@bot implement`"));
        assert!(is_own_reply(body));

        assert_eq!(f.host.reactions_on(123), vec!["eyes", "rocket"]);
        assert_eq!(f.host.reactions_on(9001), vec!["rocket", "+1"]);
    }

    #[tokio::test]
    async fn missing_cli_leaves_thread_pending() {
        let f = fixture(
            MockHost::with_comment(7, top_level(123, "@bot plan add feature X")),
            MockRunner::default().on_create(Err(AgentError::NotFound {
                message: "failed to execute `cursor`".to_string(),
            })),
        );
        f.relay.process_pr(7).await.unwrap();

        let thread = only_thread(&f);
        assert_eq!(thread.status, ThreadStatus::Pending);
        let posts = f.host.posts();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].2.contains("Manual Intervention Required"));
        assert!(posts[0].2.contains("- [ ] "));
        assert!(posts[0].2.contains("instructions.md"));
        assert_eq!(f.host.reactions_on(123), vec!["eyes", "confused"]);
    }

    #[tokio::test]
    async fn pending_comment_is_retried_without_duplicate_reply() {
        let f = fixture(
            MockHost::with_comment(7, top_level(123, "@bot what is this?")),
            MockRunner::default()
                .on_create(Err(AgentError::NotFound {
                    message: "cursor".to_string(),
                }))
                .on_create(Err(AgentError::NotFound {
                    message: "cursor".to_string(),
                })),
        );
        f.relay.process_pr(7).await.unwrap();
        f.relay.process_pr(7).await.unwrap();

        // retried, but one message and one reply
        assert_eq!(f.runner.calls(), vec![RunnerCall::Create, RunnerCall::Create]);
        let thread = only_thread(&f);
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.status, ThreadStatus::Pending);
        assert_eq!(f.host.posts().len(), 1);

        // operator fixed the CLI: the third pass succeeds
        f.relay.process_pr(7).await.unwrap();
        let thread = only_thread(&f);
        assert_eq!(thread.status, ThreadStatus::Completed);
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(f.host.posts().len(), 2);
        assert!(f.host.reactions_on(123).contains(&"rocket".to_string()));
    }

    #[tokio::test]
    async fn reported_missing_model_is_terminal_failure() {
        let f = fixture(
            MockHost::with_comment(7, top_level(123, "@bot what is this?")),
            MockRunner::default().on_create(Err(runner::agents::patterns::classify_from_text(
                "Error: model 'gpt-9' not found",
            ))),
        );
        f.relay.process_pr(7).await.unwrap();

        let thread = only_thread(&f);
        assert_eq!(thread.status, ThreadStatus::Failed);
        assert_eq!(f.host.reactions_on(123), vec!["eyes", "-1", "rocket"]);

        // handled: the assistant is not asked again
        f.relay.process_pr(7).await.unwrap();
        assert_eq!(f.runner.calls(), vec![RunnerCall::Create]);
        assert_eq!(f.host.posts().len(), 1);
    }

    #[tokio::test]
    async fn failed_reply_post_is_retried_without_duplicate_history() {
        let host = MockHost::with_comment(7, top_level(123, "@bot hi"));
        *host.failing_posts.lock().unwrap() = 1;
        let f = fixture(host, MockRunner::default());

        assert!(f.relay.process_pr(7).await.is_ok());
        let thread = only_thread(&f);
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.messages[0].role, Role::User);
        assert_ne!(thread.status, ThreadStatus::Completed);
        assert!(f.host.posts().is_empty());
        assert_eq!(f.host.reactions_on(123), vec!["eyes"]);

        f.relay.process_pr(7).await.unwrap();
        let thread = only_thread(&f);
        let roles: Vec<Role> = thread.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(thread.status, ThreadStatus::Completed);
        assert_eq!(f.host.posts().len(), 1);
        assert_eq!(f.host.reactions_on(123), vec!["eyes", "rocket"]);
        // the second pass resumed the first session
        let calls = f.runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(&calls[2], RunnerCall::Send { session_id, .. } if session_id == "session-1"));
    }

    #[tokio::test]
    async fn failure_is_terminal() {
        let f = fixture(
            MockHost::with_comment(7, top_level(123, "@bot fix it")),
            MockRunner::default().on_create(Err(AgentError::QuotaExhausted {
                message: "resource_exhausted".to_string(),
            })),
        );
        f.relay.process_pr(7).await.unwrap();

        let thread = only_thread(&f);
        assert_eq!(thread.status, ThreadStatus::Failed);
        let posts = f.host.posts();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].2.contains("Processing Failed"));
        assert!(posts[0].2.contains(&thread.thread_id));
        assert_eq!(f.host.reactions_on(123), vec!["eyes", "-1", "rocket"]);

        // fully handled: nothing happens on the next pass
        f.relay.process_pr(7).await.unwrap();
        assert_eq!(f.runner.calls().len(), 1);
        assert_eq!(f.host.posts().len(), 1);
    }

    #[tokio::test]
    async fn inline_comment_gets_threaded_reply_with_code() {
        let f = fixture(
            MockHost::with_comment(
                7,
                Comment {
                    id: 55,
                    kind: CommentKind::Inline,
                    author: "bob".to_string(),
                    body: "@bot why is this here?".to_string(),
                    location: Some("src/lib.rs:2".to_string()),
                    parent_id: None,
                },
            ),
            MockRunner::default(),
        );
        let src = f._dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("lib.rs"), "fn main() {\n    run();\n}\n").unwrap();

        f.relay.process_pr(7).await.unwrap();

        let posts = f.host.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1, Some(55));
        assert!(posts[0].2.contains("Questions & Clarifications"));

        let thread = only_thread(&f);
        let user = &thread.messages[0];
        assert_eq!(user.location.as_deref(), Some("src/lib.rs:2"));
        assert!(user.code_snippet.as_deref().unwrap().contains("run();"));
        assert_eq!(user.function_context.as_deref(), Some("fn main() {"));
    }

    #[tokio::test]
    async fn reply_comment_joins_existing_thread_and_resumes() {
        let mut host = MockHost::with_comment(7, top_level(1, "@bot what does run do?"));
        let comments = vec![
            top_level(1, "@bot what does run do?"),
            Comment {
                parent_id: Some(1),
                ..top_level(2, "@bot and why?")
            },
        ];
        host.comments.insert(7, comments);
        let f = fixture(host, MockRunner::default());

        f.relay.process_pr(7).await.unwrap();

        let thread = only_thread(&f);
        assert_eq!(thread.messages.len(), 4);
        assert_eq!(thread.assistant_session_id.as_deref(), Some("session-1"));
        let calls = f.runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(&calls[2], RunnerCall::Send { session_id, prompt, .. }
            if session_id == "session-1" && prompt.contains("New request from alice:\n\nand why?")));
    }

    #[tokio::test]
    async fn processed_and_own_comments_are_skipped() {
        let mut host = MockHost::with_comment(7, top_level(10, "@bot old question"));
        host.comments.get_mut(&7).unwrap().push(top_level(
            11,
            &format!("answer\n\n{}", commands::REPLY_SIGNATURE),
        ));
        host.reactions.lock().unwrap().insert(
            10,
            vec!["eyes".to_string(), "rocket".to_string()],
        );
        let f = fixture(host, MockRunner::default());

        f.relay.process_pr(7).await.unwrap();

        assert!(f.runner.calls().is_empty());
        assert!(f.host.posts().is_empty());
        assert!(f.threads.summaries().unwrap().is_empty());
        assert!(f.host.reactions_on(11).is_empty());
    }

    #[tokio::test]
    async fn failing_pr_does_not_stop_the_cycle() {
        let mut host = MockHost::with_comment(8, top_level(80, "@bot hello"));
        host.prs = vec![7, 8];
        host.failing_prs = vec![7];
        let f = fixture(host, MockRunner::default());

        let (_tx, rx) = watch::channel(false);
        f.relay.process_all_prs(&rx).await.unwrap();

        assert_eq!(f.host.posts().len(), 1);
        assert_eq!(f.host.posts()[0].0, 8);
    }

    #[tokio::test]
    async fn missing_metadata_fails_comment_but_keeps_message() {
        let mut host = MockHost::with_comment(7, top_level(123, "@bot hi"));
        host.metadata.clear();
        let f = fixture(host, MockRunner::default());

        f.relay.process_pr(7).await.unwrap();

        assert!(f.runner.calls().is_empty());
        assert_eq!(f.host.reactions_on(123), vec!["eyes"]);
        assert_eq!(only_thread(&f).messages.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_flag_stops_before_any_pr() {
        let f = fixture(
            MockHost::with_comment(7, top_level(123, "@bot hi")),
            MockRunner::default(),
        );
        let (tx, rx) = watch::channel(false);
        tx.send_replace(true);

        f.relay.process_all_prs(&rx).await.unwrap();
        f.relay.run(rx).await.unwrap();

        assert!(f.runner.calls().is_empty());
        assert!(f.host.posts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_polls_until_shutdown() {
        let f = fixture(
            MockHost::with_comment(7, top_level(123, "@bot hi")),
            MockRunner::default(),
        );
        let (tx, rx) = watch::channel(false);

        let stop = async {
            // first cycle runs immediately; stop during the sleep
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send_replace(true);
        };
        let (result, ()) = tokio::join!(f.relay.run(rx), stop);
        result.unwrap();

        assert_eq!(f.host.posts().len(), 1);
        assert_eq!(only_thread(&f).status, ThreadStatus::Completed);
    }
}
