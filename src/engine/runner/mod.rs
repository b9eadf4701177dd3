//! Agent invocation: runs one request of a thread through the assistant.
//!
//! Each call to [`AgentController::invoke`]:
//! 1. Checks out the PR branch (failure ends the call, no assistant run)
//! 2. Renders mode instructions and picks the payload: the full thread
//!    document for a new session, only the newest user message for a
//!    resumed one
//! 3. Resumes the stored session if there is one; if that fails, starts
//!    over with a new session, the full document and the session header
//! 4. Stores the new session id for later resumption
//! 5. Classifies the outcome and writes the exchange to the thread's work dir

pub mod agents;
pub mod context;
pub mod git_ops;
pub mod instructions;

use chrono::{SecondsFormat, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backends::RepositoryHost;
use crate::config::Config;
use crate::engine::commands::AgentMode;
use crate::engine::threads::ThreadManager;
use crate::store::write_text_atomic;
use agents::{AgentError, AssistantRunner};
use git_ops::WorkingCopy;
use instructions::{combine, Instructions, PromptVars};

const CONTEXT_FILE: &str = "context.md";
const INSTRUCTIONS_FILE: &str = "instructions.md";
const REQUEST_FILE: &str = "agent-request.json";
const PROMPT_FILE: &str = "combined-prompt.md";
const RESPONSE_FILE: &str = "agent-response.txt";
const ERROR_FILE: &str = "error.log";

/// Outcome class of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Success,
    /// Hard failure; the comment is considered handled.
    Failure,
    /// Operator-fixable; the thread stays retryable.
    ManualIntervention,
}

impl InvocationStatus {
    /// 0 success, 1 failure, 2 manual intervention.
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::ManualIntervention => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    /// Assistant reply on success, otherwise a user-facing error message.
    pub response: String,
    pub status: InvocationStatus,
    /// Where this invocation's artifacts were written.
    pub work_dir: PathBuf,
}

/// Per-thread artifact directory.
struct Artifacts {
    dir: PathBuf,
}

impl Artifacts {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn write(&self, name: &str, content: &str) -> anyhow::Result<()> {
        write_text_atomic(&self.path(name), content)
    }

    /// Write an audit artifact; failures are logged, not fatal.
    fn record(&self, name: &str, content: &str) {
        if let Err(e) = self.write(name, content) {
            tracing::warn!(file = name, dir = %self.dir.display(), error = %e, "failed to write artifact");
        }
    }

    /// Record the outcome and build the result.
    fn finish(&self, status: InvocationStatus, response: String) -> Invocation {
        let line = match status {
            InvocationStatus::Success => format!("SUCCESS: {response}"),
            InvocationStatus::Failure => format!("FAILED: {response}"),
            InvocationStatus::ManualIntervention => {
                format!("PENDING_MANUAL_INVOCATION\n\n{response}")
            }
        };
        self.record(RESPONSE_FILE, &line);
        Invocation {
            response,
            status,
            work_dir: self.dir.clone(),
        }
    }
}

pub struct AgentController {
    config: Arc<Config>,
    state_dir: PathBuf,
    host: Arc<dyn RepositoryHost>,
    threads: Arc<ThreadManager>,
    runner: Arc<dyn AssistantRunner>,
    working_copy: Arc<dyn WorkingCopy>,
    instructions: Instructions,
}

impl AgentController {
    pub fn new(
        config: Arc<Config>,
        state_dir: PathBuf,
        host: Arc<dyn RepositoryHost>,
        threads: Arc<ThreadManager>,
        runner: Arc<dyn AssistantRunner>,
        working_copy: Arc<dyn WorkingCopy>,
    ) -> Self {
        let instructions = Instructions::new(config.template_dir.clone());
        Self {
            config,
            state_dir,
            host,
            threads,
            runner,
            working_copy,
            instructions,
        }
    }

    /// Author name for assistant messages.
    pub fn runner_name(&self) -> &str {
        self.runner.name()
    }

    fn timeout(&self) -> Option<Duration> {
        match self.config.assistant.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Apply the configured bound to one assistant call.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, AgentError>>,
    ) -> Result<T, AgentError> {
        match self.timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(AgentError::Timeout { elapsed: limit })),
            None => call.await,
        }
    }

    async fn checkout(&self, pr_number: u64) -> anyhow::Result<String> {
        let metadata = self.host.get_pull_request_metadata(pr_number).await?;
        self.working_copy.checkout(&metadata.branch).await?;
        Ok(metadata.branch)
    }

    /// Run one request of `thread_id` through the assistant.
    pub async fn invoke(
        &self,
        pr_number: u64,
        thread_id: &str,
        mode: AgentMode,
        full_context: &str,
    ) -> Invocation {
        let artifacts = Artifacts {
            dir: crate::home::agent_work_dir(&self.state_dir, thread_id),
        };
        artifacts.record(CONTEXT_FILE, full_context);

        let branch = match self.checkout(pr_number).await {
            Ok(branch) => branch,
            Err(e) => {
                tracing::error!(pr = pr_number, %thread_id, error = %format!("{e:#}"), "branch checkout failed");
                return artifacts.finish(
                    InvocationStatus::Failure,
                    format!("Failed to checkout branch: {e:#}"),
                );
            }
        };

        let thread = match self.threads.load_thread(thread_id) {
            Ok(thread) => thread,
            Err(e) => {
                tracing::warn!(%thread_id, error = %e, "could not load thread");
                None
            }
        };
        let session_id = thread
            .as_ref()
            .and_then(|t| t.assistant_session_id.clone());

        let vars = PromptVars {
            pr_number,
            thread_id: thread_id.to_string(),
            branch: branch.clone(),
            mode,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let instructions = self.instructions.build(&vars, session_id.is_none());
        artifacts.record(INSTRUCTIONS_FILE, &instructions);

        let model = self.config.assistant.models.model_for(mode).to_string();
        let request = serde_json::json!({
            "pr_number": pr_number,
            "thread_id": thread_id,
            "command": mode,
            "branch": branch,
            "model": model,
            "session_id": session_id,
            "timestamp": vars.timestamp,
        });
        artifacts.record(REQUEST_FILE, &format!("{request:#}"));

        let payload = match (&session_id, &thread) {
            (None, _) => full_context.to_string(),
            (Some(_), Some(thread)) => match context::minimal_context(thread) {
                Some(minimal) => {
                    let unanswered = thread.unanswered_count();
                    if unanswered > 1 {
                        tracing::warn!(
                            %thread_id,
                            unanswered,
                            "resumed session receives only the newest of several unanswered messages"
                        );
                    }
                    minimal
                }
                None => {
                    tracing::warn!(%thread_id, "last message is not from a user, sending full context");
                    full_context.to_string()
                }
            },
            (Some(_), None) => {
                tracing::warn!(%thread_id, "thread unavailable, sending full context");
                full_context.to_string()
            }
        };

        let prompt_file = artifacts.path(PROMPT_FILE);
        if let Err(e) = artifacts.write(PROMPT_FILE, &combine(&instructions, &payload)) {
            return self.failure(prompt_write_error(&prompt_file, e), &artifacts);
        }

        let api_key = self.config.assistant.api_key.as_deref();
        tracing::info!(pr = pr_number, %thread_id, %mode, %model, resume = session_id.is_some(), "invoking assistant");

        if let Some(session) = &session_id {
            match self
                .bounded(self.runner.send(session, &prompt_file, &model, api_key))
                .await
            {
                Ok(response) => {
                    tracing::info!(%thread_id, %session, "session resumed");
                    return artifacts.finish(InvocationStatus::Success, response);
                }
                Err(e) => {
                    tracing::warn!(%thread_id, %session, error = %e, "session resume failed, starting a new session");
                    let instructions = self.instructions.build(&vars, true);
                    artifacts.record(INSTRUCTIONS_FILE, &instructions);
                    if let Err(e) = artifacts.write(
                        PROMPT_FILE,
                        &combine(&instructions, full_context),
                    ) {
                        return self.failure(prompt_write_error(&prompt_file, e), &artifacts);
                    }
                }
            }
        }

        match self.new_session(&prompt_file, &model, api_key).await {
            Ok((response, new_session)) => {
                if let Err(e) = self.threads.set_session_id(thread_id, &new_session) {
                    tracing::warn!(%thread_id, error = %e, "failed to store session id");
                }
                tracing::info!(%thread_id, session = %new_session, "assistant completed");
                artifacts.finish(InvocationStatus::Success, response)
            }
            Err(e) => self.failure(e, &artifacts),
        }
    }

    async fn new_session(
        &self,
        prompt_file: &Path,
        model: &str,
        api_key: Option<&str>,
    ) -> Result<(String, String), AgentError> {
        let session = self.bounded(self.runner.create_session(api_key)).await?;
        let response = self
            .bounded(self.runner.send(&session, prompt_file, model, api_key))
            .await?;
        Ok((response, session))
    }

    /// Map an assistant error to an outcome with remediation text.
    fn failure(&self, error: AgentError, artifacts: &Artifacts) -> Invocation {
        let dir = artifacts.dir.display();
        let instructions = artifacts.path(INSTRUCTIONS_FILE);
        let instructions = instructions.display();
        let binary = &self.config.assistant.binary;

        let (status, message) = match &error {
            AgentError::QuotaExhausted { .. } => (
                InvocationStatus::Failure,
                "Assistant quota exhausted or rate limited.\n\
                 Solutions:\n\
                 - Wait for the quota to reset\n\
                 - Upgrade the assistant plan\n\
                 - Check the API key configuration"
                    .to_string(),
            ),
            AgentError::Auth { .. } => (
                InvocationStatus::Failure,
                "Assistant authentication failed.\n\
                 Solutions:\n\
                 - Verify CURSOR_API_KEY (or assistant.api_key) is set\n\
                 - Check that the API key is valid\n\
                 - Re-authenticate the assistant CLI"
                    .to_string(),
            ),
            AgentError::NotFound { message } => (
                InvocationStatus::ManualIntervention,
                format!(
                    "Assistant CLI or a required file was not found: {message}\n\
                     Installation required:\n\
                     1. Install the assistant CLI\n\
                     2. Verify it is on PATH: `which {binary}`\n\
                     3. Verify it runs: `{binary} --version`\n\
                     4. See instructions: {instructions}"
                ),
            ),
            AgentError::MissingResource { message } => {
                artifacts.record(ERROR_FILE, &format!("Error: {message}\n"));
                (
                    InvocationStatus::Failure,
                    format!(
                        "Assistant CLI or required files not found: {message}\n\
                         Solutions:\n\
                         - Verify the configured model exists\n\
                         - Check that the files referenced by the comment exist\n\
                         - Check file permissions\n\
                         Check logs for details: {dir}"
                    ),
                )
            }
            AgentError::PermissionDenied { message } => (
                InvocationStatus::ManualIntervention,
                format!(
                    "Permission denied when invoking the assistant CLI: {message}\n\
                     Solutions:\n\
                     - Check permissions on the `{binary}` executable\n\
                     - Verify write permissions in the work directory\n\
                     - Work directory: {dir}\n\
                     - See instructions: {instructions}"
                ),
            ),
            AgentError::Timeout { elapsed } => (
                InvocationStatus::Failure,
                format!(
                    "Assistant did not finish within {}s and was stopped.\n\
                     Check logs for details: {dir}",
                    elapsed.as_secs()
                ),
            ),
            AgentError::Other { message } => {
                artifacts.record(ERROR_FILE, &format!("Error: {message}\n"));
                (
                    InvocationStatus::Failure,
                    format!("Assistant CLI error:\n{message}\n\nCheck logs for details: {dir}"),
                )
            }
        };

        tracing::error!(status = status.code(), error = %error, "assistant invocation failed");
        artifacts.finish(status, message)
    }
}

/// A prompt that cannot be written is an environment problem.
fn prompt_write_error(path: &Path, e: anyhow::Error) -> AgentError {
    let message = format!("cannot write prompt {}: {e:#}", path.display());
    let denied = e
        .chain()
        .filter_map(|c| c.downcast_ref::<std::io::Error>())
        .any(|io| io.kind() == std::io::ErrorKind::PermissionDenied);
    if denied {
        AgentError::PermissionDenied { message }
    } else {
        AgentError::Other { message }
    }
}
