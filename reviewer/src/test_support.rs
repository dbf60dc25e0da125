//! Test-only fixtures and scripted fakes for the reviewer's collaborators.
//!
//! Enabled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::core::block::{self, FindingBlock, StatusBlock};
use crate::core::types::{
    CommentId, IssueComment, PullRequestInfo, Reply, ReviewComment, ReviewThread, ThreadStatus,
};
use crate::io::agent::{AgentBackend, AgentEvent, SessionId};
use crate::io::github::{CommentStore, NewReviewComment};
use crate::io::llm::{CompletionClient, CompletionOptions};

/// Login the fakes post as; matches the default config.
pub const BOT_LOGIN: &str = "github-actions[bot]";

/// First id handed out for comments created through [`FakeCommentStore`].
pub const FIRST_CREATED_ID: CommentId = 10_000;

/// Deterministic timestamp `minutes` after a fixed epoch.
pub fn at(minutes: u64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .map(|base| base + chrono::Duration::minutes(minutes as i64))
        .unwrap_or_default()
}

pub fn reply(id: CommentId, author: &str, body: &str) -> Reply {
    Reply {
        comment_id: id,
        author: author.to_string(),
        body: body.to_string(),
        created_at: at(id),
    }
}

/// Pending thread with a generic finding and no replies.
pub fn thread(id: CommentId, file: &str, line: u32, score: u8) -> ReviewThread {
    ReviewThread {
        id,
        file: file.to_string(),
        line,
        status: ThreadStatus::Pending,
        score,
        finding: format!("finding {id}"),
        assessment: String::new(),
        author: BOT_LOGIN.to_string(),
        body: String::new(),
        created_at: at(id),
        replies: Vec::new(),
        evaluated_reply_id: None,
    }
}

pub fn thread_with_finding(id: CommentId, file: &str, line: u32, finding: &str) -> ReviewThread {
    ReviewThread {
        finding: finding.to_string(),
        ..thread(id, file, line, 5)
    }
}

pub fn pull_request(number: u64, head_sha: &str) -> PullRequestInfo {
    PullRequestInfo {
        number,
        title: "Add widget parser".to_string(),
        body: "Adds a parser for widget files so imports stop failing.".to_string(),
        head_sha: head_sha.to_string(),
        author: "dev".to_string(),
    }
}

pub fn finding_block(file: &str, line: u32, score: u8, finding: &str) -> StatusBlock {
    StatusBlock::Finding(FindingBlock {
        file: file.to_string(),
        line,
        score,
        finding: finding.to_string(),
        assessment: String::new(),
        status: ThreadStatus::Pending,
        evaluated_reply_id: None,
    })
}

/// Top-level bot review comment carrying a finding block.
pub fn finding_comment(
    id: CommentId,
    file: &str,
    line: u32,
    score: u8,
    finding: &str,
) -> ReviewComment {
    ReviewComment {
        id,
        in_reply_to: None,
        author: BOT_LOGIN.to_string(),
        author_is_bot: true,
        body: block::compose(finding, &finding_block(file, line, score, finding)),
        created_at: at(id),
        path: Some(file.to_string()),
        line: Some(line),
    }
}

/// Human reply inside the review thread rooted at `in_reply_to`.
pub fn reply_comment(id: CommentId, in_reply_to: CommentId, author: &str, body: &str) -> ReviewComment {
    ReviewComment {
        id,
        in_reply_to: Some(in_reply_to),
        author: author.to_string(),
        author_is_bot: false,
        body: body.to_string(),
        created_at: at(id),
        path: None,
        line: None,
    }
}

/// Human top-level review comment on `path:line`.
pub fn review_comment(id: CommentId, author: &str, path: &str, line: u32, body: &str) -> ReviewComment {
    ReviewComment {
        id,
        in_reply_to: None,
        author: author.to_string(),
        author_is_bot: false,
        body: body.to_string(),
        created_at: at(id),
        path: Some(path.to_string()),
        line: Some(line),
    }
}

pub fn issue_comment(id: CommentId, author: &str, body: &str) -> IssueComment {
    IssueComment {
        id,
        author: author.to_string(),
        author_is_bot: author == BOT_LOGIN,
        body: body.to_string(),
        created_at: at(id),
    }
}

/// Bot issue comment carrying `block`.
pub fn bot_issue_comment(id: CommentId, prose: &str, block: &StatusBlock) -> IssueComment {
    issue_comment(id, BOT_LOGIN, &block::compose(prose, block))
}

#[derive(Debug, Default)]
struct FakeStoreInner {
    pr: Option<PullRequestInfo>,
    review: Vec<ReviewComment>,
    issue: Vec<IssueComment>,
    changed_files: Vec<String>,
    inaccessible: BTreeSet<CommentId>,
    reject_inline: bool,
    failing_writes: usize,
    next_id: CommentId,
    writes: usize,
}

/// In-memory [`CommentStore`].
///
/// Created comments are authored by [`BOT_LOGIN`] and get increasing ids
/// starting at [`FIRST_CREATED_ID`].
#[derive(Debug)]
pub struct FakeCommentStore {
    inner: Mutex<FakeStoreInner>,
}

impl FakeCommentStore {
    pub fn new(pr: PullRequestInfo) -> Self {
        Self {
            inner: Mutex::new(FakeStoreInner {
                pr: Some(pr),
                next_id: FIRST_CREATED_ID,
                ..FakeStoreInner::default()
            }),
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut FakeStoreInner) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn push_review(&self, comment: ReviewComment) {
        self.with_inner(|inner| inner.review.push(comment));
    }

    pub fn push_issue(&self, comment: IssueComment) {
        self.with_inner(|inner| inner.issue.push(comment));
    }

    pub fn set_changed_files(&self, files: &[&str]) {
        self.with_inner(|inner| {
            inner.changed_files = files.iter().map(|f| f.to_string()).collect();
        });
    }

    pub fn set_head(&self, sha: &str) {
        self.with_inner(|inner| {
            if let Some(pr) = inner.pr.as_mut() {
                pr.head_sha = sha.to_string();
            }
        });
    }

    /// Fetching this comment by id fails from now on.
    pub fn make_inaccessible(&self, id: CommentId) {
        self.with_inner(|inner| {
            inner.inaccessible.insert(id);
        });
    }

    /// Inline comments are rejected like lines outside the diff.
    pub fn reject_inline_comments(&self) {
        self.with_inner(|inner| inner.reject_inline = true);
    }

    /// Every create/update fails from now on.
    pub fn fail_writes(&self) {
        self.fail_next_writes(usize::MAX);
    }

    /// The next `count` creates/updates fail; later ones succeed.
    pub fn fail_next_writes(&self, count: usize) {
        self.with_inner(|inner| inner.failing_writes = count);
    }

    pub fn review_comments(&self) -> Vec<ReviewComment> {
        self.with_inner(|inner| inner.review.clone())
    }

    pub fn issue_comments(&self) -> Vec<IssueComment> {
        self.with_inner(|inner| inner.issue.clone())
    }

    pub fn review_comment(&self, id: CommentId) -> Option<ReviewComment> {
        self.with_inner(|inner| inner.review.iter().find(|c| c.id == id).cloned())
    }

    pub fn issue_comment(&self, id: CommentId) -> Option<IssueComment> {
        self.with_inner(|inner| inner.issue.iter().find(|c| c.id == id).cloned())
    }

    /// Number of successful creates and updates.
    pub fn writes(&self) -> usize {
        self.with_inner(|inner| inner.writes)
    }

    /// Bot comments created after the fixtures, in creation order.
    pub fn created_issue_comments(&self) -> Vec<IssueComment> {
        self.with_inner(|inner| {
            inner
                .issue
                .iter()
                .filter(|c| c.id >= FIRST_CREATED_ID)
                .cloned()
                .collect()
        })
    }

    pub fn created_review_comments(&self) -> Vec<ReviewComment> {
        self.with_inner(|inner| {
            inner
                .review
                .iter()
                .filter(|c| c.id >= FIRST_CREATED_ID)
                .cloned()
                .collect()
        })
    }
}

impl FakeStoreInner {
    fn check_write(&mut self) -> Result<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            bail!("github api write failed with status 502");
        }
        Ok(())
    }

    fn begin_write(&mut self) -> Result<CommentId> {
        self.check_write()?;
        self.writes += 1;
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn check_access(&self, id: CommentId) -> Result<()> {
        if self.inaccessible.contains(&id) {
            bail!("github api get comment failed with status 404: Not Found");
        }
        Ok(())
    }
}

#[async_trait]
impl CommentStore for FakeCommentStore {
    async fn list_review_comments(&self, _pr: u64) -> Result<Vec<ReviewComment>> {
        Ok(self.review_comments())
    }

    async fn list_issue_comments(&self, _pr: u64) -> Result<Vec<IssueComment>> {
        Ok(self.issue_comments())
    }

    async fn get_review_comment(&self, id: CommentId) -> Result<ReviewComment> {
        self.with_inner(|inner| {
            inner.check_access(id)?;
            inner
                .review
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| anyhow!("review comment {id} not found"))
        })
    }

    async fn get_issue_comment(&self, id: CommentId) -> Result<IssueComment> {
        self.with_inner(|inner| {
            inner.check_access(id)?;
            inner
                .issue
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| anyhow!("issue comment {id} not found"))
        })
    }

    async fn create_issue_comment(&self, _pr: u64, body: &str) -> Result<IssueComment> {
        self.with_inner(|inner| {
            let id = inner.begin_write()?;
            let comment = issue_comment(id, BOT_LOGIN, body);
            inner.issue.push(comment.clone());
            Ok(comment)
        })
    }

    async fn update_issue_comment(&self, id: CommentId, body: &str) -> Result<IssueComment> {
        self.with_inner(|inner| {
            inner.check_write()?;
            let comment = inner
                .issue
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| anyhow!("issue comment {id} not found"))?;
            comment.body = body.to_string();
            let updated = comment.clone();
            inner.writes += 1;
            Ok(updated)
        })
    }

    async fn create_review_comment(
        &self,
        _pr: u64,
        new: &NewReviewComment,
    ) -> Result<ReviewComment> {
        self.with_inner(|inner| {
            if inner.reject_inline {
                bail!("github api create review comment failed with status 422: line must be part of the diff");
            }
            let id = inner.begin_write()?;
            let comment = ReviewComment {
                id,
                in_reply_to: None,
                author: BOT_LOGIN.to_string(),
                author_is_bot: true,
                body: new.body.clone(),
                created_at: at(id),
                path: Some(new.path.clone()),
                line: Some(new.line),
            };
            inner.review.push(comment.clone());
            Ok(comment)
        })
    }

    async fn reply_to_review_comment(
        &self,
        _pr: u64,
        in_reply_to: CommentId,
        body: &str,
    ) -> Result<ReviewComment> {
        self.with_inner(|inner| {
            let id = inner.begin_write()?;
            let comment = ReviewComment {
                id,
                in_reply_to: Some(in_reply_to),
                author: BOT_LOGIN.to_string(),
                author_is_bot: true,
                body: body.to_string(),
                created_at: at(id),
                path: None,
                line: None,
            };
            inner.review.push(comment.clone());
            Ok(comment)
        })
    }

    async fn update_review_comment(&self, id: CommentId, body: &str) -> Result<ReviewComment> {
        self.with_inner(|inner| {
            inner.check_write()?;
            let comment = inner
                .review
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| anyhow!("review comment {id} not found"))?;
            comment.body = body.to_string();
            let updated = comment.clone();
            inner.writes += 1;
            Ok(updated)
        })
    }

    async fn pull_request(&self, pr: u64) -> Result<PullRequestInfo> {
        self.with_inner(|inner| {
            inner
                .pr
                .clone()
                .filter(|info| info.number == pr)
                .ok_or_else(|| anyhow!("pull request {pr} not found"))
        })
    }

    async fn changed_files(&self, _pr: u64) -> Result<Vec<String>> {
        Ok(self.with_inner(|inner| inner.changed_files.clone()))
    }
}

/// Completion client answering from a queue; an empty queue yields `None`.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<Result<Option<String>, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, text: &str) -> &Self {
        self.queue(Ok(Some(text.to_string())));
        self
    }

    pub fn push_error(&self, message: &str) -> &Self {
        self.queue(Err(message.to_string()));
        self
    }

    fn queue(&self, response: Result<Option<String>, String>) {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(response);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<Option<String>> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            None => Ok(None),
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
        }
    }
}

/// Event emitted by [`ScriptedAgent`] after a prompt, session id filled in.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedEvent {
    Busy,
    Idle,
    Message,
    Tool { tool: String, args: Value, with_id: bool },
    Error(String),
    /// Event for an unrelated session.
    Foreign(Box<ScriptedEvent>),
}

impl ScriptedEvent {
    pub fn tool(tool: &str, args: Value) -> Self {
        ScriptedEvent::Tool {
            tool: tool.to_string(),
            args,
            with_id: true,
        }
    }

    /// A tool call whose event carries no call id.
    pub fn unnamed_tool(tool: &str, args: Value) -> Self {
        ScriptedEvent::Tool {
            tool: tool.to_string(),
            args,
            with_id: false,
        }
    }

    fn into_event(self, session: &str, call_seq: usize) -> AgentEvent {
        let session_id = session.to_string();
        match self {
            ScriptedEvent::Busy => AgentEvent::Status {
                session_id,
                busy: true,
            },
            ScriptedEvent::Idle => AgentEvent::Idle { session_id },
            ScriptedEvent::Message => AgentEvent::MessageUpdated { session_id },
            ScriptedEvent::Tool { tool, args, with_id } => AgentEvent::ToolCall {
                session_id,
                call_id: with_id.then(|| format!("call-{call_seq}")),
                tool,
                args,
            },
            ScriptedEvent::Error(message) => AgentEvent::Error {
                session_id: Some(session_id),
                message,
            },
            ScriptedEvent::Foreign(inner) => inner.into_event("foreign-session", call_seq),
        }
    }
}

/// A prompt script: each event is sent `delay` after the previous one.
pub type Script = Vec<(Duration, ScriptedEvent)>;

/// Busy, one tool call, a message, then idle.
pub fn quick_turn() -> Script {
    vec![
        (Duration::from_millis(10), ScriptedEvent::Busy),
        (
            Duration::from_millis(10),
            ScriptedEvent::tool("read", json!({"path": "src/lib.rs"})),
        ),
        (Duration::from_millis(10), ScriptedEvent::Message),
        (Duration::from_millis(10), ScriptedEvent::Idle),
    ]
}

#[derive(Debug, Default)]
struct AgentInner {
    senders: Vec<mpsc::Sender<AgentEvent>>,
    scripts: VecDeque<Script>,
    responses: VecDeque<Result<String, String>>,
    failing_creates: usize,
    sessions_created: usize,
    calls: Vec<String>,
    prompts: Vec<String>,
    call_seq: usize,
}

/// Agent backend replaying scripted events and responses.
///
/// `send_prompt` plays the next queued script (or [`quick_turn`] when none is
/// queued) on a spawned task. `send_prompt_and_get_response` pops the next
/// queued response and fails when none is left.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    inner: Arc<Mutex<AgentInner>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut AgentInner) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn push_script(&self, script: Script) -> &Self {
        self.with_inner(|inner| inner.scripts.push_back(script));
        self
    }

    pub fn push_response(&self, text: &str) -> &Self {
        self.with_inner(|inner| inner.responses.push_back(Ok(text.to_string())));
        self
    }

    pub fn push_response_error(&self, message: &str) -> &Self {
        self.with_inner(|inner| inner.responses.push_back(Err(message.to_string())));
        self
    }

    /// The next `count` session creations fail.
    pub fn fail_session_creates(&self, count: usize) -> &Self {
        self.with_inner(|inner| inner.failing_creates = count);
        self
    }

    /// Backend calls in order, e.g. `create_session`, `send_prompt`.
    pub fn calls(&self) -> Vec<String> {
        self.with_inner(|inner| inner.calls.clone())
    }

    /// Prompts passed to `send_prompt` and `send_prompt_and_get_response`.
    pub fn prompts(&self) -> Vec<String> {
        self.with_inner(|inner| inner.prompts.clone())
    }

    pub fn sessions_created(&self) -> usize {
        self.with_inner(|inner| inner.sessions_created)
    }
}

#[async_trait]
impl AgentBackend for ScriptedAgent {
    async fn subscribe(&self) -> Result<mpsc::Receiver<AgentEvent>> {
        let (tx, rx) = mpsc::channel(256);
        self.with_inner(|inner| {
            inner.calls.push("subscribe".to_string());
            inner.senders.push(tx);
        });
        Ok(rx)
    }

    async fn create_session(&self, _title: &str) -> Result<SessionId> {
        self.with_inner(|inner| {
            inner.calls.push("create_session".to_string());
            if inner.failing_creates > 0 {
                inner.failing_creates -= 1;
                bail!("agent create session failed with status 503");
            }
            inner.sessions_created += 1;
            Ok(format!("session-{}", inner.sessions_created))
        })
    }

    async fn send_system_prompt(&self, _session: &str, _prompt: &str) -> Result<()> {
        self.with_inner(|inner| inner.calls.push("send_system_prompt".to_string()));
        Ok(())
    }

    async fn send_prompt(&self, session: &str, prompt: &str) -> Result<()> {
        let (script, senders, first_seq) = self.with_inner(|inner| {
            inner.calls.push("send_prompt".to_string());
            inner.prompts.push(prompt.to_string());
            let script = inner.scripts.pop_front().unwrap_or_else(quick_turn);
            let first_seq = inner.call_seq;
            inner.call_seq += script.len();
            (script, inner.senders.clone(), first_seq)
        });
        let session = session.to_string();
        tokio::spawn(async move {
            for (offset, (delay, step)) in script.into_iter().enumerate() {
                tokio::time::sleep(delay).await;
                let event = step.into_event(&session, first_seq + offset);
                for sender in &senders {
                    let _ = sender.send(event.clone()).await;
                }
            }
        });
        Ok(())
    }

    async fn send_prompt_and_get_response(&self, _session: &str, prompt: &str) -> Result<String> {
        self.with_inner(|inner| {
            inner.calls.push("send_prompt_and_get_response".to_string());
            inner.prompts.push(prompt.to_string());
            match inner.responses.pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Err(anyhow!("no scripted agent response")),
            }
        })
    }

    async fn delete_session(&self, _session: &str) -> Result<()> {
        self.with_inner(|inner| inner.calls.push("delete_session".to_string()));
        Ok(())
    }
}
