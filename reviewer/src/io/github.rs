//! Pull request comment store backed by the GitHub REST API.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::core::types::{CommentId, IssueComment, PullRequestInfo, ReviewComment};
use crate::io::config::GithubConfig;

const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// New inline comment anchored to a diff line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReviewComment {
    pub commit: String,
    pub path: String,
    pub line: u32,
    pub body: String,
}

/// Comment history and posting plumbing for one repository.
///
/// Listing operations return every page; a missing reply would make state
/// reconstruction diverge between runs.
#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn list_review_comments(&self, pr: u64) -> Result<Vec<ReviewComment>>;
    async fn list_issue_comments(&self, pr: u64) -> Result<Vec<IssueComment>>;
    async fn get_review_comment(&self, id: CommentId) -> Result<ReviewComment>;
    async fn get_issue_comment(&self, id: CommentId) -> Result<IssueComment>;
    async fn create_issue_comment(&self, pr: u64, body: &str) -> Result<IssueComment>;
    async fn update_issue_comment(&self, id: CommentId, body: &str) -> Result<IssueComment>;
    async fn create_review_comment(
        &self,
        pr: u64,
        comment: &NewReviewComment,
    ) -> Result<ReviewComment>;
    async fn reply_to_review_comment(
        &self,
        pr: u64,
        in_reply_to: CommentId,
        body: &str,
    ) -> Result<ReviewComment>;
    async fn update_review_comment(&self, id: CommentId, body: &str) -> Result<ReviewComment>;
    async fn pull_request(&self, pr: u64) -> Result<PullRequestInfo>;
    /// Paths touched by the pull request.
    async fn changed_files(&self, pr: u64) -> Result<Vec<String>>;
}

/// Fetch pages `1..` until one comes back shorter than `per_page`.
pub async fn collect_pages<T, F, Fut>(per_page: u32, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut page = 1_u32;
    let mut rows = Vec::new();
    loop {
        let chunk = fetch(page).await?;
        let chunk_len = chunk.len();
        rows.extend(chunk);
        if chunk_len < per_page as usize {
            break;
        }
        page = page.saturating_add(1);
    }
    Ok(rows)
}

/// `owner/name` of the repository under review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(full_name: &str) -> Result<Self> {
        let (owner, name) = full_name
            .trim()
            .split_once('/')
            .with_context(|| format!("repository must be owner/name, got {full_name:?}"))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("repository must be owner/name, got {full_name:?}");
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct GhReviewComment {
    id: u64,
    #[serde(default)]
    in_reply_to_id: Option<u64>,
    #[serde(default)]
    user: Option<GhUser>,
    #[serde(default)]
    body: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    original_line: Option<u32>,
}

impl From<GhReviewComment> for ReviewComment {
    fn from(raw: GhReviewComment) -> Self {
        let (author, author_is_bot) = author_of(raw.user);
        Self {
            id: raw.id,
            in_reply_to: raw.in_reply_to_id,
            author,
            author_is_bot,
            body: raw.body,
            created_at: raw.created_at,
            path: raw.path,
            // Outdated comments lose `line` but keep where they were posted.
            line: raw.line.or(raw.original_line),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhIssueComment {
    id: u64,
    #[serde(default)]
    user: Option<GhUser>,
    #[serde(default)]
    body: String,
    created_at: DateTime<Utc>,
}

impl From<GhIssueComment> for IssueComment {
    fn from(raw: GhIssueComment) -> Self {
        let (author, author_is_bot) = author_of(raw.user);
        Self {
            id: raw.id,
            author,
            author_is_bot,
            body: raw.body,
            created_at: raw.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    head: GhHead,
    #[serde(default)]
    user: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhHead {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhFile {
    filename: String,
}

fn author_of(user: Option<GhUser>) -> (String, bool) {
    match user {
        Some(user) => {
            let is_bot = user.kind.eq_ignore_ascii_case("bot") || user.login.ends_with("[bot]");
            (user.login, is_bot)
        }
        // Deleted accounts show up as "ghost".
        None => ("ghost".to_string(), false),
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Delay before retry number `attempt` (1-based), honoring `Retry-After`.
pub fn retry_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(after) = retry_after {
        return after.min(Duration::from_millis(RETRY_MAX_DELAY_MS));
    }
    let exp = attempt.saturating_sub(1).min(16);
    let delay = RETRY_BASE_DELAY_MS.saturating_mul(1_u64 << exp);
    Duration::from_millis(delay.min(RETRY_MAX_DELAY_MS))
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate_for_error(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let head: String = body.chars().take(max_chars).collect();
    format!("{head}...")
}

/// [`CommentStore`] over the GitHub REST API.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    repo: RepoRef,
    per_page: u32,
    retry_max_attempts: u32,
}

impl GithubClient {
    pub fn new(config: &GithubConfig, token: &str, repo: RepoRef) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("reviewer"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid github authorization header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("create github api client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repo,
            per_page: config.per_page,
            retry_max_attempts: config.retry_max_attempts.max(1),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.repo.owner, self.repo.name, path
        )
    }

    async fn list_paged<T>(&self, operation: &str, path: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.repo_url(path);
        let per_page = self.per_page.to_string();
        collect_pages(self.per_page, |page| {
            let page = page.to_string();
            let url = url.clone();
            let per_page = per_page.clone();
            async move {
                self.request_json(operation, || {
                    self.http.get(&url).query(&[
                        ("per_page", per_page.as_str()),
                        ("page", page.as_str()),
                    ])
                })
                .await
            }
        })
        .await
    }

    async fn request_json<T, F>(&self, operation: &str, mut request_builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            match request_builder().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .with_context(|| format!("decode github {operation}"));
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts && is_retryable_status(status.as_u16()) {
                        let delay = retry_delay(attempt, retry_after);
                        warn!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying github request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    bail!(
                        "github api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(err) => {
                    let transient = err.is_timeout() || err.is_connect() || err.is_request();
                    if attempt < self.retry_max_attempts && transient {
                        let delay = retry_delay(attempt, None);
                        warn!(operation, attempt, err = %err, "retrying github request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err).with_context(|| format!("github api {operation} request failed"));
                }
            }
        }
    }
}

#[async_trait]
impl CommentStore for GithubClient {
    async fn list_review_comments(&self, pr: u64) -> Result<Vec<ReviewComment>> {
        let rows: Vec<GhReviewComment> = self
            .list_paged("list review comments", &format!("pulls/{pr}/comments"))
            .await?;
        debug!(pr, count = rows.len(), "fetched review comments");
        Ok(rows.into_iter().map(ReviewComment::from).collect())
    }

    async fn list_issue_comments(&self, pr: u64) -> Result<Vec<IssueComment>> {
        let rows: Vec<GhIssueComment> = self
            .list_paged("list issue comments", &format!("issues/{pr}/comments"))
            .await?;
        debug!(pr, count = rows.len(), "fetched issue comments");
        Ok(rows.into_iter().map(IssueComment::from).collect())
    }

    async fn get_review_comment(&self, id: CommentId) -> Result<ReviewComment> {
        let url = self.repo_url(&format!("pulls/comments/{id}"));
        let raw: GhReviewComment = self
            .request_json("get review comment", || self.http.get(&url))
            .await?;
        Ok(raw.into())
    }

    async fn get_issue_comment(&self, id: CommentId) -> Result<IssueComment> {
        let url = self.repo_url(&format!("issues/comments/{id}"));
        let raw: GhIssueComment = self
            .request_json("get issue comment", || self.http.get(&url))
            .await?;
        Ok(raw.into())
    }

    async fn create_issue_comment(&self, pr: u64, body: &str) -> Result<IssueComment> {
        let url = self.repo_url(&format!("issues/{pr}/comments"));
        let payload = json!({ "body": body });
        let raw: GhIssueComment = self
            .request_json("create issue comment", || {
                self.http.post(&url).json(&payload)
            })
            .await?;
        Ok(raw.into())
    }

    async fn update_issue_comment(&self, id: CommentId, body: &str) -> Result<IssueComment> {
        let url = self.repo_url(&format!("issues/comments/{id}"));
        let payload = json!({ "body": body });
        let raw: GhIssueComment = self
            .request_json("update issue comment", || {
                self.http.patch(&url).json(&payload)
            })
            .await?;
        Ok(raw.into())
    }

    async fn create_review_comment(
        &self,
        pr: u64,
        comment: &NewReviewComment,
    ) -> Result<ReviewComment> {
        let url = self.repo_url(&format!("pulls/{pr}/comments"));
        let payload = json!({
            "body": comment.body,
            "commit_id": comment.commit,
            "path": comment.path,
            "line": comment.line,
            "side": "RIGHT",
        });
        let raw: GhReviewComment = self
            .request_json("create review comment", || {
                self.http.post(&url).json(&payload)
            })
            .await?;
        Ok(raw.into())
    }

    async fn reply_to_review_comment(
        &self,
        pr: u64,
        in_reply_to: CommentId,
        body: &str,
    ) -> Result<ReviewComment> {
        let url = self.repo_url(&format!("pulls/{pr}/comments/{in_reply_to}/replies"));
        let payload = json!({ "body": body });
        let raw: GhReviewComment = self
            .request_json("reply to review comment", || {
                self.http.post(&url).json(&payload)
            })
            .await?;
        Ok(raw.into())
    }

    async fn update_review_comment(&self, id: CommentId, body: &str) -> Result<ReviewComment> {
        let url = self.repo_url(&format!("pulls/comments/{id}"));
        let payload = json!({ "body": body });
        let raw: GhReviewComment = self
            .request_json("update review comment", || {
                self.http.patch(&url).json(&payload)
            })
            .await?;
        Ok(raw.into())
    }

    async fn pull_request(&self, pr: u64) -> Result<PullRequestInfo> {
        let url = self.repo_url(&format!("pulls/{pr}"));
        let raw: GhPullRequest = self
            .request_json("get pull request", || self.http.get(&url))
            .await?;
        let (author, _) = author_of(raw.user);
        Ok(PullRequestInfo {
            number: raw.number,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            head_sha: raw.head.sha,
            author,
        })
    }

    async fn changed_files(&self, pr: u64) -> Result<Vec<String>> {
        let rows: Vec<GhFile> = self
            .list_paged("list pull request files", &format!("pulls/{pr}/files"))
            .await?;
        Ok(rows.into_iter().map(|file| file.filename).collect())
    }
}
