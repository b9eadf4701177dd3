//! Assistant runner trait, error types, and error classification.
//!
//! A runner drives an external coding assistant CLI that keeps its own
//! conversational sessions. The controller only needs two calls: open a
//! session, and send a prompt file to a session.

pub mod cursor;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Why an assistant call failed, in the categories the controller acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Quota or rate limit exhausted.
    QuotaExhausted { message: String },
    /// Bad, missing or expired credentials.
    Auth { message: String },
    /// The CLI binary or the prompt file is missing.
    NotFound { message: String },
    /// The CLI ran but reported something missing (model, chat, file).
    MissingResource { message: String },
    /// The CLI or its files cannot be executed / written.
    PermissionDenied { message: String },
    /// The call exceeded the configured bound.
    Timeout { elapsed: Duration },
    /// Unclassified error.
    Other { message: String },
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaExhausted { message } => write!(f, "quota exhausted: {message}"),
            Self::Auth { message } => write!(f, "auth error: {message}"),
            Self::NotFound { message } => write!(f, "not found: {message}"),
            Self::MissingResource { message } => write!(f, "missing resource: {message}"),
            Self::PermissionDenied { message } => write!(f, "permission denied: {message}"),
            Self::Timeout { elapsed } => write!(f, "timeout after {}s", elapsed.as_secs()),
            Self::Other { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for AgentError {}

/// An external assistant with resumable sessions.
#[async_trait]
pub trait AssistantRunner: Send + Sync {
    /// Runner name (e.g., "cursor"); used as the author of assistant messages.
    fn name(&self) -> &str;

    /// Check if this assistant's binary is available on the system.
    fn is_available(&self) -> bool;

    /// Open a new session and return its id.
    async fn create_session(&self, api_key: Option<&str>) -> Result<String, AgentError>;

    /// Send the prompt in `prompt_file` to `session_id`; returns the reply text.
    async fn send(
        &self,
        session_id: &str,
        prompt_file: &Path,
        model: &str,
        api_key: Option<&str>,
    ) -> Result<String, AgentError>;
}

/// Shared error pattern detection for assistant CLIs.
pub(crate) mod patterns {
    use super::AgentError;
    use regex::Regex;
    use std::sync::LazyLock;

    static QUOTA_STATUS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b429\b").expect("BUG: quota status pattern is invalid"));

    static AUTH_STATUS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b401\b").expect("BUG: auth status pattern is invalid"));

    /// Quota / rate-limit patterns.
    pub fn detect_quota(text: &str) -> Option<AgentError> {
        let lower = text.to_lowercase();
        let patterns = [
            "resource_exhausted",
            "resource exhausted",
            "rate limit",
            "rate_limit",
            "too many requests",
            "usage limit",
            "quota",
            "insufficient_quota",
        ];
        if patterns.iter().any(|p| lower.contains(p)) || QUOTA_STATUS.is_match(&lower) {
            return Some(AgentError::QuotaExhausted {
                message: safe_tail(text, 300),
            });
        }
        None
    }

    /// Auth / credential patterns.
    pub fn detect_auth_error(text: &str) -> Option<AgentError> {
        let lower = text.to_lowercase();
        let patterns = [
            "authentication",
            "unauthorized",
            "unauthenticated",
            "invalid api key",
            "invalid token",
            "not logged in",
            "expired token",
        ];
        if patterns.iter().any(|p| lower.contains(p)) || AUTH_STATUS.is_match(&lower) {
            return Some(AgentError::Auth {
                message: safe_tail(text, 300),
            });
        }
        None
    }

    /// "Not found" reported by a CLI that did run. A missing binary is
    /// detected at spawn time instead, see [`classify_spawn_error`].
    pub fn detect_not_found(text: &str) -> Option<AgentError> {
        let lower = text.to_lowercase();
        let patterns = ["not found", "no such file", "enoent"];
        if patterns.iter().any(|p| lower.contains(p)) {
            return Some(AgentError::MissingResource {
                message: safe_tail(text, 300),
            });
        }
        None
    }

    /// Permission patterns.
    pub fn detect_permission_denied(text: &str) -> Option<AgentError> {
        let lower = text.to_lowercase();
        let patterns = [
            "permission denied",
            "operation not permitted",
            "eacces",
            "eperm",
            "read-only file system",
        ];
        if patterns.iter().any(|p| lower.contains(p)) {
            return Some(AgentError::PermissionDenied {
                message: safe_tail(text, 300),
            });
        }
        None
    }

    /// Classify failure output. Quota is checked first, then auth, then
    /// not-found, then permission; anything else is `Other` with the raw text.
    pub fn classify_from_text(text: &str) -> AgentError {
        detect_quota(text)
            .or_else(|| detect_auth_error(text))
            .or_else(|| detect_not_found(text))
            .or_else(|| detect_permission_denied(text))
            .unwrap_or_else(|| AgentError::Other {
                message: safe_tail(text, 2000),
            })
    }

    /// Classify a process that could not be started.
    pub fn classify_spawn_error(err: &crate::cmd::SpawnError) -> AgentError {
        let message = err.to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => AgentError::NotFound { message },
            std::io::ErrorKind::PermissionDenied => AgentError::PermissionDenied { message },
            _ => AgentError::Other { message },
        }
    }

    /// Safely extract the last `max_bytes` of a string, respecting UTF-8 boundaries.
    pub fn safe_tail(text: &str, max_bytes: usize) -> String {
        if text.len() <= max_bytes {
            return text.to_string();
        }
        let mut idx = text.len() - max_bytes;
        while idx < text.len() && !text.is_char_boundary(idx) {
            idx += 1;
        }
        text[idx..].to_string()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RunnerCall {
        Create,
        /// `prompt` is the prompt file content at send time.
        Send {
            session_id: String,
            model: String,
            prompt: String,
        },
    }

    /// Scripted runner. Unscripted calls succeed: sessions are numbered
    /// `session-1`, `session-2`, ... and every reply is `done`.
    #[derive(Default)]
    pub struct MockRunner {
        create_results: Mutex<VecDeque<Result<String, AgentError>>>,
        send_results: Mutex<VecDeque<Result<String, AgentError>>>,
        send_delay: Option<Duration>,
        created: Mutex<u32>,
        calls: Mutex<Vec<RunnerCall>>,
    }

    impl MockRunner {
        pub fn on_create(self, result: Result<String, AgentError>) -> Self {
            self.create_results.lock().unwrap().push_back(result);
            self
        }

        pub fn on_send(self, result: Result<String, AgentError>) -> Self {
            self.send_results.lock().unwrap().push_back(result);
            self
        }

        pub fn with_send_delay(mut self, delay: Duration) -> Self {
            self.send_delay = Some(delay);
            self
        }

        pub fn calls(&self) -> Vec<RunnerCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AssistantRunner for MockRunner {
        fn name(&self) -> &str {
            "mock-assistant"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn create_session(&self, _api_key: Option<&str>) -> Result<String, AgentError> {
            self.calls.lock().unwrap().push(RunnerCall::Create);
            if let Some(result) = self.create_results.lock().unwrap().pop_front() {
                return result;
            }
            let mut created = self.created.lock().unwrap();
            *created += 1;
            Ok(format!("session-{created}"))
        }

        async fn send(
            &self,
            session_id: &str,
            prompt_file: &Path,
            model: &str,
            _api_key: Option<&str>,
        ) -> Result<String, AgentError> {
            let prompt = std::fs::read_to_string(prompt_file).unwrap_or_default();
            self.calls.lock().unwrap().push(RunnerCall::Send {
                session_id: session_id.to_string(),
                model: model.to_string(),
                prompt,
            });
            if let Some(delay) = self.send_delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.send_results.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok("done".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_display() {
        let e = AgentError::QuotaExhausted {
            message: "resource_exhausted".to_string(),
        };
        assert!(e.to_string().contains("quota"));

        let e = AgentError::Timeout {
            elapsed: Duration::from_secs(1800),
        };
        assert!(e.to_string().contains("1800"));
    }

    #[test]
    fn pattern_detect_quota() {
        assert!(patterns::detect_quota("Error: RESOURCE_EXHAUSTED").is_some());
        assert!(patterns::detect_quota("HTTP 429 Too Many Requests").is_some());
        assert!(patterns::detect_quota("all good").is_none());
        assert!(patterns::detect_quota("panic in chat 4291").is_none());
    }

    #[test]
    fn pattern_detect_auth() {
        assert!(patterns::detect_auth_error("401 Unauthorized").is_some());
        assert!(patterns::detect_auth_error("Authentication required").is_some());
        assert!(patterns::detect_auth_error("task done").is_none());
        assert!(patterns::detect_auth_error("segfault at line 4011").is_none());
    }

    #[test]
    fn pattern_detect_not_found() {
        assert!(patterns::detect_not_found("cursor: command not found").is_some());
        assert!(patterns::detect_not_found("open prompt.md: no such file or directory").is_some());
        assert!(patterns::detect_not_found("ok").is_none());
        assert!(matches!(
            patterns::classify_from_text("Error: model 'gpt-9' not found"),
            AgentError::MissingResource { .. }
        ));
    }

    #[test]
    fn pattern_detect_permission_denied() {
        assert!(patterns::detect_permission_denied("permission denied: /usr/bin/cursor").is_some());
        assert!(patterns::detect_permission_denied("EACCES").is_some());
        assert!(patterns::detect_permission_denied("fine").is_none());
    }

    #[test]
    fn classification_order() {
        // quota beats auth
        assert!(matches!(
            patterns::classify_from_text("resource_exhausted: unauthorized"),
            AgentError::QuotaExhausted { .. }
        ));
        // auth beats not-found
        assert!(matches!(
            patterns::classify_from_text("authentication failed: user not found"),
            AgentError::Auth { .. }
        ));
        // not-found beats permission
        assert!(matches!(
            patterns::classify_from_text("not found or permission denied"),
            AgentError::MissingResource { .. }
        ));
        assert!(matches!(
            patterns::classify_from_text("segfault"),
            AgentError::Other { .. }
        ));
        // status codes only count as whole numbers
        assert!(matches!(
            patterns::classify_from_text("panic in chat 4291"),
            AgentError::Other { .. }
        ));
        assert!(matches!(
            patterns::classify_from_text("segfault at line 401x"),
            AgentError::Other { .. }
        ));
    }

    #[test]
    fn spawn_errors_map_by_kind() {
        let missing = crate::cmd::SpawnError {
            program: "cursor".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(matches!(
            patterns::classify_spawn_error(&missing),
            AgentError::NotFound { .. }
        ));
        let denied = crate::cmd::SpawnError {
            program: "cursor".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(matches!(
            patterns::classify_spawn_error(&denied),
            AgentError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn safe_tail_respects_char_boundaries() {
        let text = "ééééé";
        let tail = patterns::safe_tail(text, 3);
        assert_eq!(tail, "é");
    }
}
