//! Native `reqwest` HTTP client for the GitHub REST API.
//!
//! Uses a shared `reqwest::Client` with connection pooling and reads
//! rate-limit headers proactively. Rate-limit state belongs to the client
//! instance and is shared by its clones.
//!
//! Auth: explicit token from config, else `GH_TOKEN` / `GITHUB_TOKEN`,
//! else `gh auth token`.

use super::types::{
    GitHubComment, GitHubCreated, GitHubIssue, GitHubPullRequest, GitHubPullRequestFile,
    GitHubReaction, GitHubReviewComment,
};
use crate::config::GitHubConfig;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const GITHUB_API: &str = "https://api.github.com";

// ── Rate-limit state ─────────────────────────────────────────────────

/// Proactive rate-limit state derived from `X-RateLimit-*` response headers.
#[derive(Debug)]
struct RateLimit {
    /// Remaining requests in the current window.
    remaining: Option<u32>,
    /// UTC epoch second when the window resets.
    reset_at: Option<u64>,
    /// Exponential backoff after a 429 / rate-limit 403.
    backoff_until: Option<Instant>,
    backoff_delay: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RateLimit {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            remaining: None,
            reset_at: None,
            backoff_until: None,
            backoff_delay: Duration::ZERO,
            backoff_base: base,
            backoff_max: max,
        }
    }

    /// Update state from response headers.
    fn update_from_headers(&mut self, headers: &header::HeaderMap) {
        if let Some(v) = headers.get("x-ratelimit-remaining") {
            self.remaining = v.to_str().ok().and_then(|s| s.parse().ok());
        }
        if let Some(v) = headers.get("x-ratelimit-reset") {
            self.reset_at = v.to_str().ok().and_then(|s| s.parse().ok());
        }
    }

    /// Record a successful call and reset backoff.
    fn record_success(&mut self) {
        if self.backoff_delay > Duration::ZERO {
            tracing::info!("GitHub backoff cleared after successful API call");
        }
        self.backoff_delay = Duration::ZERO;
        self.backoff_until = None;
    }

    /// Escalate exponential backoff.
    fn record_rate_limit(&mut self) {
        self.backoff_delay = if self.backoff_delay.is_zero() {
            self.backoff_base
        } else {
            (self.backoff_delay * 2).min(self.backoff_max)
        };
        self.backoff_until = Some(Instant::now() + self.backoff_delay);
        tracing::warn!(
            delay_secs = self.backoff_delay.as_secs(),
            "GitHub rate limit hit, backing off"
        );
    }

    /// Returns remaining backoff/pause duration, or None if free to proceed.
    fn is_active(&self) -> Option<Duration> {
        if let Some(until) = self.backoff_until {
            let now = Instant::now();
            if now < until {
                return Some(until - now);
            }
        }
        // Window exhausted: wait for the reset.
        if self.remaining == Some(0) {
            if let Some(reset_epoch) = self.reset_at {
                let now_epoch = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                if now_epoch < reset_epoch {
                    return Some(Duration::from_secs(reset_epoch - now_epoch));
                }
            }
        }
        None
    }
}

/// Does a 403 body describe a rate limit rather than a permission problem?
fn is_rate_limit_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("abuse detection")
        || lower.contains("secondary rate")
}

// ── GhHttp client ────────────────────────────────────────────────────

/// HTTP client for the GitHub API with connection pooling and proactive
/// rate-limit avoidance.
#[derive(Clone)]
pub struct GhHttp {
    client: Client,
    token: String,
    rate_limit: Arc<Mutex<RateLimit>>,
}

impl GhHttp {
    /// Create a client. `token` wins over the environment / `gh` lookup.
    pub fn new(token: Option<String>, backoff: &GitHubConfig) -> anyhow::Result<Self> {
        let token = match token.filter(|t| !t.trim().is_empty()) {
            Some(t) => t,
            None => resolve_token().ok_or_else(|| {
                anyhow::anyhow!(
                    "no GitHub token found: set github_token, GH_TOKEN, GITHUB_TOKEN, or run `gh auth login`"
                )
            })?,
        };
        let client = Client::builder()
            .user_agent(concat!("pr-relay/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            token,
            rate_limit: Arc::new(Mutex::new(RateLimit::new(
                Duration::from_secs(backoff.backoff_base_secs),
                Duration::from_secs(backoff.backoff_max_secs),
            ))),
        })
    }

    // ── Rate-limit helpers ───────────────────────────────────────

    /// Remaining backoff if the GitHub API is currently rate-limited.
    pub fn is_rate_limited(&self) -> Option<Duration> {
        self.rate_limit.lock().ok().and_then(|rl| rl.is_active())
    }

    fn check_backoff(&self) -> anyhow::Result<()> {
        if let Some(remaining) = self.is_rate_limited() {
            anyhow::bail!(
                "GitHub API rate-limited, backoff active for {}s",
                remaining.as_secs()
            );
        }
        Ok(())
    }

    fn record_response(&self, resp: &Response) {
        if let Ok(mut rl) = self.rate_limit.lock() {
            rl.update_from_headers(resp.headers());
            // 403 needs the body; see `record_failure_body`.
            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                rl.record_rate_limit();
            } else if resp.status().is_success() {
                rl.record_success();
            }
        }
    }

    fn record_failure_body(&self, status: StatusCode, body: &str) {
        if status == StatusCode::FORBIDDEN && is_rate_limit_body(body) {
            if let Ok(mut rl) = self.rate_limit.lock() {
                rl.record_rate_limit();
            }
        }
    }

    // ── Low-level HTTP helpers ────────────────────────────────────

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Send, record rate-limit state, and return the body of a 2xx response.
    async fn send(&self, method: &str, url: &str, req: RequestBuilder) -> anyhow::Result<String> {
        self.check_backoff()?;
        let resp = self.authed(req).send().await?;
        self.record_response(&resp);
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            self.record_failure_body(status, &text);
            anyhow::bail!("GitHub API {method} {url} failed ({status}): {text}");
        }
        Ok(text)
    }

    /// GET request, returns deserialized JSON.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        let text = self.send("GET", url, self.client.get(url)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// POST with JSON body, returns deserialized JSON.
    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<T> {
        let text = self
            .send("POST", url, self.client.post(url).json(body))
            .await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// GET every page, following `Link: rel="next"`.
    async fn get_all_pages<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> anyhow::Result<Vec<T>> {
        let mut all: Vec<T> = Vec::new();
        let mut req = self.client.get(url).query(query);

        loop {
            self.check_backoff()?;
            let resp = self.authed(req).send().await?;
            self.record_response(&resp);
            let status = resp.status();
            let next_url = parse_link_next(resp.headers());

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                self.record_failure_body(status, &body);
                anyhow::bail!("GitHub API GET {url} (paginated) failed ({status}): {body}");
            }

            let page: Vec<T> = serde_json::from_str(&resp.text().await?)?;
            all.extend(page);

            match next_url {
                // The next link already carries the query string.
                Some(next) => req = self.client.get(next),
                None => break,
            }
        }

        Ok(all)
    }

    // ── Endpoints ─────────────────────────────────────────────────

    /// Verify authentication by fetching the current user.
    pub async fn auth_status(&self) -> anyhow::Result<()> {
        let _: serde_json::Value = self.get_json(&format!("{GITHUB_API}/user")).await?;
        Ok(())
    }

    /// Open pull requests carrying `label`.
    ///
    /// `/issues` supports label filtering and returns pull requests too;
    /// plain issues are dropped.
    pub async fn list_labeled_pulls(&self, repo: &str, label: &str) -> anyhow::Result<Vec<u64>> {
        let url = format!("{GITHUB_API}/repos/{repo}/issues");
        let all: Vec<GitHubIssue> = self
            .get_all_pages(
                &url,
                &[("labels", label), ("state", "open"), ("per_page", "100")],
            )
            .await?;
        Ok(all
            .into_iter()
            .filter(|i| i.pull_request.is_some())
            .map(|i| i.number)
            .collect())
    }

    pub async fn get_pull(&self, repo: &str, number: u64) -> anyhow::Result<GitHubPullRequest> {
        self.get_json(&format!("{GITHUB_API}/repos/{repo}/pulls/{number}"))
            .await
    }

    pub async fn list_pull_files(
        &self,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<Vec<GitHubPullRequestFile>> {
        let url = format!("{GITHUB_API}/repos/{repo}/pulls/{number}/files");
        self.get_all_pages(&url, &[("per_page", "100")]).await
    }

    /// Conversation comments on a PR.
    pub async fn list_issue_comments(
        &self,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<Vec<GitHubComment>> {
        let url = format!("{GITHUB_API}/repos/{repo}/issues/{number}/comments");
        self.get_all_pages(&url, &[("per_page", "100")]).await
    }

    /// All review comments on a PR, replies included.
    pub async fn list_review_comments(
        &self,
        repo: &str,
        number: u64,
    ) -> anyhow::Result<Vec<GitHubReviewComment>> {
        let url = format!("{GITHUB_API}/repos/{repo}/pulls/{number}/comments");
        self.get_all_pages(&url, &[("per_page", "100")]).await
    }

    /// `issues` for conversation comments, `pulls` for review comments.
    fn reactions_url(repo: &str, comment_kind: &str, comment_id: u64) -> String {
        format!("{GITHUB_API}/repos/{repo}/{comment_kind}/comments/{comment_id}/reactions")
    }

    pub async fn list_reactions(
        &self,
        repo: &str,
        comment_kind: &str,
        comment_id: u64,
    ) -> anyhow::Result<Vec<GitHubReaction>> {
        let url = Self::reactions_url(repo, comment_kind, comment_id);
        self.get_all_pages(&url, &[("per_page", "100")]).await
    }

    /// Add a reaction; GitHub answers 200 when it already exists.
    pub async fn add_reaction(
        &self,
        repo: &str,
        comment_kind: &str,
        comment_id: u64,
        content: &str,
    ) -> anyhow::Result<()> {
        let url = Self::reactions_url(repo, comment_kind, comment_id);
        let payload = serde_json::json!({ "content": content });
        let _: GitHubReaction = self.post_json(&url, &payload).await?;
        Ok(())
    }

    /// Add a conversation comment to a PR. Returns the comment id.
    pub async fn add_comment(&self, repo: &str, number: u64, body: &str) -> anyhow::Result<u64> {
        let url = format!("{GITHUB_API}/repos/{repo}/issues/{number}/comments");
        let payload = serde_json::json!({ "body": body });
        let created: GitHubCreated = self.post_json(&url, &payload).await?;
        Ok(created.id)
    }

    /// Reply inside a review comment thread. Returns the reply id.
    pub async fn reply_to_review_comment(
        &self,
        repo: &str,
        number: u64,
        comment_id: u64,
        body: &str,
    ) -> anyhow::Result<u64> {
        let url = format!("{GITHUB_API}/repos/{repo}/pulls/{number}/comments/{comment_id}/replies");
        let payload = serde_json::json!({ "body": body });
        let created: GitHubCreated = self.post_json(&url, &payload).await?;
        Ok(created.id)
    }
}

// ── Token resolution ─────────────────────────────────────────────────

/// Resolve a GitHub token: `GH_TOKEN` env → `GITHUB_TOKEN` env → `gh auth token`.
pub fn resolve_token() -> Option<String> {
    for var in ["GH_TOKEN", "GITHUB_TOKEN"] {
        if let Ok(t) = std::env::var(var) {
            if !t.trim().is_empty() {
                return Some(t);
            }
        }
    }
    // Fall back to `gh auth token`, including common install paths for
    // service environments with a minimal PATH.
    for gh in ["gh", "/opt/homebrew/bin/gh", "/usr/local/bin/gh"] {
        if let Ok(out) = std::process::Command::new(gh)
            .args(["auth", "token"])
            .output()
        {
            if out.status.success() {
                let token = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }
    }
    None
}

// ── Link header parser ───────────────────────────────────────────────

/// Parse the `Link` header to find the `rel="next"` URL.
fn parse_link_next(headers: &header::HeaderMap) -> Option<String> {
    let link = headers.get("link")?.to_str().ok()?;
    for part in link.split(',') {
        let part = part.trim();
        if part.contains("rel=\"next\"") {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            return Some(part[start..end].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limit(base: u64, max: u64) -> RateLimit {
        RateLimit::new(Duration::from_secs(base), Duration::from_secs(max))
    }

    #[test]
    fn parse_link_next_finds_next_url() {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "link",
            "<https://api.github.com/repos/foo/bar/pulls/1/comments?page=2>; rel=\"next\", <https://api.github.com/repos/foo/bar/pulls/1/comments?page=5>; rel=\"last\""
                .parse()
                .unwrap(),
        );
        assert_eq!(
            parse_link_next(&headers),
            Some("https://api.github.com/repos/foo/bar/pulls/1/comments?page=2".to_string())
        );
    }

    #[test]
    fn parse_link_next_none_when_no_next() {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "link",
            "<https://api.github.com/repos/foo/bar/issues?page=1>; rel=\"prev\""
                .parse()
                .unwrap(),
        );
        assert_eq!(parse_link_next(&headers), None);
    }

    #[test]
    fn parse_link_next_none_when_missing() {
        let headers = header::HeaderMap::new();
        assert_eq!(parse_link_next(&headers), None);
    }

    #[test]
    fn rate_limit_inactive_by_default() {
        assert!(rate_limit(30, 900).is_active().is_none());
    }

    #[test]
    fn rate_limit_backoff_doubles_and_caps() {
        let mut rl = rate_limit(5, 15);
        rl.record_rate_limit();
        assert!(rl.is_active().is_some());
        assert_eq!(rl.backoff_delay, Duration::from_secs(5));
        rl.record_rate_limit();
        assert_eq!(rl.backoff_delay, Duration::from_secs(10));
        rl.record_rate_limit();
        assert_eq!(rl.backoff_delay, Duration::from_secs(15));
    }

    #[test]
    fn rate_limit_success_resets() {
        let mut rl = rate_limit(5, 60);
        rl.record_rate_limit();
        rl.record_success();
        assert!(rl.is_active().is_none());
        assert_eq!(rl.backoff_delay, Duration::ZERO);
    }

    #[test]
    fn rate_limit_proactive_pause() {
        let mut rl = rate_limit(30, 900);
        rl.remaining = Some(0);
        let future_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 60;
        rl.reset_at = Some(future_epoch);
        let pause = rl.is_active().unwrap();
        assert!(pause.as_secs() <= 61);
    }

    #[test]
    fn rate_limit_headers_are_read() {
        let mut rl = rate_limit(30, 900);
        let mut headers = header::HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "42".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1700000000".parse().unwrap());
        rl.update_from_headers(&headers);
        assert_eq!(rl.remaining, Some(42));
        assert_eq!(rl.reset_at, Some(1_700_000_000));
    }

    #[test]
    fn forbidden_body_classification() {
        assert!(is_rate_limit_body("API rate limit exceeded for user"));
        assert!(is_rate_limit_body("You have exceeded a secondary rate limit"));
        assert!(!is_rate_limit_body("Resource not accessible by integration"));
    }

    #[test]
    fn explicit_token_skips_lookup() {
        let gh = GhHttp::new(Some("tok".to_string()), &GitHubConfig::default()).unwrap();
        assert!(gh.is_rate_limited().is_none());
    }

    #[test]
    fn reactions_url_per_comment_kind() {
        assert_eq!(
            GhHttp::reactions_url("o/r", "issues", 5),
            "https://api.github.com/repos/o/r/issues/comments/5/reactions"
        );
        assert_eq!(
            GhHttp::reactions_url("o/r", "pulls", 6),
            "https://api.github.com/repos/o/r/pulls/comments/6/reactions"
        );
    }
}
