//! Trigger event parsing for CI runs.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;

use crate::core::types::CommentId;
use crate::io::github::RepoRef;

/// What started this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Trigger {
    /// Pull request lifecycle event (`opened`, `synchronize`, ...).
    PullRequest { action: String },
    /// A comment was created or edited.
    Comment {
        comment_id: CommentId,
        author: String,
        body: String,
    },
    /// Explicit invocation (workflow dispatch or command line).
    Manual,
}

/// Actions that start an automatic, merge-gating review.
pub const REVIEW_ACTIONS: &[&str] = &["opened", "synchronize", "reopened", "ready_for_review"];

impl Trigger {
    pub fn starts_automatic_review(&self) -> bool {
        match self {
            Trigger::PullRequest { action } => REVIEW_ACTIONS.contains(&action.as_str()),
            Trigger::Manual => true,
            Trigger::Comment { .. } => false,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            Trigger::PullRequest { action } => action,
            Trigger::Comment { .. } => "mention",
            Trigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    #[serde(serialize_with = "serialize_repo")]
    pub repo: RepoRef,
    pub pr: u64,
    /// Head commit when the payload carries it; comment events do not.
    pub head_sha: Option<String>,
    pub trigger: Trigger,
}

fn serialize_repo<S: serde::Serializer>(repo: &RepoRef, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(repo)
}

impl RunContext {
    pub fn manual(repo: RepoRef, pr: u64) -> Self {
        Self {
            repo,
            pr,
            head_sha: None,
            trigger: Trigger::Manual,
        }
    }

    /// Read `GITHUB_EVENT_NAME` / `GITHUB_EVENT_PATH`.
    ///
    /// Returns `None` for events that do not concern a pull request.
    pub fn from_env() -> Result<Option<Self>> {
        let name = std::env::var("GITHUB_EVENT_NAME").context("GITHUB_EVENT_NAME is not set")?;
        let path = std::env::var("GITHUB_EVENT_PATH").context("GITHUB_EVENT_PATH is not set")?;
        let fallback_repo = std::env::var("GITHUB_REPOSITORY").ok();
        Self::from_file(&name, Path::new(&path), fallback_repo.as_deref())
    }

    pub fn from_file(name: &str, path: &Path, fallback_repo: Option<&str>) -> Result<Option<Self>> {
        let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let payload: Value =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        parse_event(name, &payload, fallback_repo)
    }
}

fn str_at<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload.pointer(pointer).and_then(Value::as_str)
}

fn u64_at(payload: &Value, pointer: &str) -> Option<u64> {
    let value = payload.pointer(pointer)?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn comment_trigger(payload: &Value) -> Result<Trigger> {
    Ok(Trigger::Comment {
        comment_id: u64_at(payload, "/comment/id").context("comment event without comment.id")?,
        author: str_at(payload, "/comment/user/login")
            .unwrap_or("ghost")
            .to_string(),
        body: str_at(payload, "/comment/body").unwrap_or_default().to_string(),
    })
}

/// Interpret a webhook payload.
pub fn parse_event(name: &str, payload: &Value, fallback_repo: Option<&str>) -> Result<Option<RunContext>> {
    let repo_name = str_at(payload, "/repository/full_name")
        .or(fallback_repo)
        .context("event payload has no repository")?;
    let repo = RepoRef::parse(repo_name)?;

    let (pr, head_sha, trigger) = match name {
        "pull_request" | "pull_request_target" => {
            let pr = u64_at(payload, "/pull_request/number")
                .or_else(|| u64_at(payload, "/number"))
                .context("pull_request event without a number")?;
            let action = str_at(payload, "/action").unwrap_or_default().to_string();
            let head = str_at(payload, "/pull_request/head/sha").map(str::to_string);
            (pr, head, Trigger::PullRequest { action })
        }
        "issue_comment" => {
            // Issue comments fire for plain issues too.
            if payload.pointer("/issue/pull_request").is_none() {
                return Ok(None);
            }
            if str_at(payload, "/action") == Some("deleted") {
                return Ok(None);
            }
            let pr = u64_at(payload, "/issue/number").context("issue_comment event without issue.number")?;
            (pr, None, comment_trigger(payload)?)
        }
        "pull_request_review_comment" => {
            if str_at(payload, "/action") == Some("deleted") {
                return Ok(None);
            }
            let pr = u64_at(payload, "/pull_request/number")
                .context("review comment event without pull_request.number")?;
            let head = str_at(payload, "/pull_request/head/sha").map(str::to_string);
            (pr, head, comment_trigger(payload)?)
        }
        "workflow_dispatch" => {
            let pr = u64_at(payload, "/inputs/pr_number")
                .or_else(|| u64_at(payload, "/inputs/pr"))
                .context("workflow_dispatch requires a pr_number input")?;
            (pr, None, Trigger::Manual)
        }
        other => bail!("unsupported event {other}"),
    };

    Ok(Some(RunContext {
        repo,
        pr,
        head_sha,
        trigger,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pull_request_event_carries_action_and_head() {
        let payload = json!({
            "action": "synchronize",
            "number": 7,
            "pull_request": {"number": 7, "head": {"sha": "abc123"}},
            "repository": {"full_name": "octo/widgets"}
        });
        let ctx = parse_event("pull_request", &payload, None).expect("parse").expect("pr");
        assert_eq!(ctx.pr, 7);
        assert_eq!(ctx.head_sha.as_deref(), Some("abc123"));
        assert!(ctx.trigger.starts_automatic_review());
        assert_eq!(ctx.trigger.action(), "synchronize");
    }

    #[test]
    fn closed_pull_request_does_not_start_a_review() {
        let payload = json!({
            "action": "closed",
            "pull_request": {"number": 7, "head": {"sha": "abc"}},
            "repository": {"full_name": "octo/widgets"}
        });
        let ctx = parse_event("pull_request", &payload, None).expect("parse").expect("pr");
        assert!(!ctx.trigger.starts_automatic_review());
    }

    #[test]
    fn issue_comment_on_pull_request_is_a_comment_trigger() {
        let payload = json!({
            "action": "created",
            "issue": {"number": 12, "pull_request": {"url": "x"}},
            "comment": {"id": 99, "user": {"login": "dev"}, "body": "@reviewer review"},
        });
        let ctx = parse_event("issue_comment", &payload, Some("octo/widgets"))
            .expect("parse")
            .expect("pr");
        assert_eq!(ctx.repo.to_string(), "octo/widgets");
        assert_eq!(
            ctx.trigger,
            Trigger::Comment {
                comment_id: 99,
                author: "dev".to_string(),
                body: "@reviewer review".to_string(),
            }
        );
        assert_eq!(ctx.head_sha, None);
    }

    #[test]
    fn issue_comment_on_plain_issue_is_ignored() {
        let payload = json!({
            "action": "created",
            "issue": {"number": 12},
            "comment": {"id": 99, "body": "hi"},
            "repository": {"full_name": "octo/widgets"}
        });
        assert_eq!(parse_event("issue_comment", &payload, None).expect("parse"), None);
    }

    #[test]
    fn workflow_dispatch_accepts_string_input() {
        let payload = json!({
            "inputs": {"pr_number": "31"},
            "repository": {"full_name": "octo/widgets"}
        });
        let ctx = parse_event("workflow_dispatch", &payload, None).expect("parse").expect("pr");
        assert_eq!(ctx.pr, 31);
        assert_eq!(ctx.trigger, Trigger::Manual);
    }

    #[test]
    fn unsupported_events_are_errors() {
        let payload = json!({"repository": {"full_name": "octo/widgets"}});
        assert!(parse_event("push", &payload, None).is_err());
    }

    #[test]
    fn from_file_reads_payload() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("event.json");
        fs::write(
            &path,
            r#"{"action":"opened","pull_request":{"number":3,"head":{"sha":"f00"}},"repository":{"full_name":"a/b"}}"#,
        )
        .expect("write");
        let ctx = RunContext::from_file("pull_request", &path, None)
            .expect("parse")
            .expect("pr");
        assert_eq!(ctx.pr, 3);
    }
}
