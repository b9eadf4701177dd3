//! Cursor agent CLI runner.
//!
//! Sessions are Cursor "chats":
//! - `cursor agent create-chat` prints a new chat id
//! - `cursor agent --resume <id> --print --output-format text --model <m> --force`
//!   reads the prompt on stdin and prints the reply

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::patterns;
use super::{AgentError, AssistantRunner};
use crate::cmd::{output_text, CommandErrorContext};

pub struct CursorRunner {
    binary: String,
}

impl CursorRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("agent").kill_on_drop(true);
        cmd
    }

    /// Run `cmd` to completion and return trimmed stdout, or the classified
    /// failure.
    async fn run(mut cmd: Command) -> Result<String, AgentError> {
        let output = match cmd.output_with_context().await {
            Ok(output) => output,
            Err(e) => return Err(patterns::classify_spawn_error(&e)),
        };
        let (stdout, stderr) = output_text(&output);
        if !output.status.success() {
            let text = if stderr.is_empty() { &stdout } else { &stderr };
            tracing::debug!(
                exit_code = output.status.code().unwrap_or(-1),
                output = %patterns::safe_tail(text, 500),
                "cursor exited with failure"
            );
            return Err(patterns::classify_from_text(text));
        }
        Ok(stdout)
    }
}

/// Argument list for sending a prompt to a chat.
fn send_args<'a>(session_id: &'a str, model: &'a str, api_key: Option<&'a str>) -> Vec<&'a str> {
    let mut args = vec![
        "--resume",
        session_id,
        "--print",
        "--output-format",
        "text",
        "--model",
        model,
        "--force",
    ];
    if let Some(key) = api_key {
        args.extend(["--api-key", key]);
    }
    args
}

#[async_trait]
impl AssistantRunner for CursorRunner {
    fn name(&self) -> &str {
        "cursor"
    }

    fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    async fn create_session(&self, api_key: Option<&str>) -> Result<String, AgentError> {
        let mut cmd = self.command();
        cmd.arg("create-chat");
        if let Some(key) = api_key {
            cmd.args(["--api-key", key]);
        }
        let session_id = Self::run(cmd).await?;
        if session_id.is_empty() {
            return Err(AgentError::Other {
                message: "cursor create-chat returned an empty chat id".to_string(),
            });
        }
        tracing::debug!(%session_id, "created cursor chat");
        Ok(session_id)
    }

    async fn send(
        &self,
        session_id: &str,
        prompt_file: &Path,
        model: &str,
        api_key: Option<&str>,
    ) -> Result<String, AgentError> {
        let prompt = std::fs::File::open(prompt_file).map_err(|e| {
            let message = format!("cannot open prompt {}: {e}", prompt_file.display());
            match e.kind() {
                std::io::ErrorKind::NotFound => AgentError::NotFound { message },
                std::io::ErrorKind::PermissionDenied => AgentError::PermissionDenied { message },
                _ => AgentError::Other { message },
            }
        })?;

        let mut cmd = self.command();
        cmd.args(send_args(session_id, model, api_key))
            .stdin(Stdio::from(prompt));
        tracing::info!(%session_id, model, "sending prompt to cursor");
        Self::run(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_args_without_key() {
        assert_eq!(
            send_args("chat-1", "auto", None),
            vec![
                "--resume",
                "chat-1",
                "--print",
                "--output-format",
                "text",
                "--model",
                "auto",
                "--force"
            ]
        );
    }

    #[test]
    fn send_args_with_key() {
        let args = send_args("chat-1", "gpt-5", Some("k"));
        assert_eq!(&args[args.len() - 2..], ["--api-key", "k"]);
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let runner = CursorRunner::new("pr-relay-no-such-cursor");
        assert!(!runner.is_available());
        assert_eq!(runner.name(), "cursor");
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let runner = CursorRunner::new("pr-relay-no-such-cursor");
        let err = runner.create_session(None).await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn missing_prompt_file_is_not_found() {
        let runner = CursorRunner::new("pr-relay-no-such-cursor");
        let err = runner
            .send("chat-1", Path::new("/nonexistent/prompt.md"), "auto", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_executable_binary_is_permission_denied() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("cursor");
        std::fs::write(&fake, "#!/bin/sh\necho hi\n").unwrap();
        // no exec bit
        let runner = CursorRunner::new(fake.display().to_string());
        let err = runner.create_session(None).await.unwrap_err();
        assert!(matches!(err, AgentError::PermissionDenied { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scripted_cli_round_trip() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("cursor");
        std::fs::write(
            &fake,
            "#!/bin/sh\nif [ \"$2\" = \"create-chat\" ]; then echo chat-42; exit 0; fi\ncat\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        let prompt = dir.path().join("prompt.md");
        std::fs::write(&prompt, "hello assistant").unwrap();

        let runner = CursorRunner::new(fake.display().to_string());
        let chat = runner.create_session(None).await.unwrap();
        assert_eq!(chat, "chat-42");
        let reply = runner.send(&chat, &prompt, "auto", None).await.unwrap();
        assert_eq!(reply, "hello assistant");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_cli_is_classified() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("cursor");
        std::fs::write(&fake, "#!/bin/sh\necho 'Error: resource_exhausted' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = CursorRunner::new(fake.display().to_string());
        let err = runner.create_session(Some("key")).await.unwrap_err();
        assert!(matches!(err, AgentError::QuotaExhausted { .. }));
    }
}
