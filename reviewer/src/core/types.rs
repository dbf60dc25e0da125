//! Shared deterministic types for reviewer core logic.
//!
//! These types define stable contracts between components. They do not depend
//! on external state and serialize deterministically (maps are ordered) so two
//! runs over the same comment history produce identical snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GitHub comment identifier (review comments and issue comments share the space).
pub type CommentId = u64;

/// Inline review comment on a pull request diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: CommentId,
    /// Set when this comment is a reply inside another comment's thread.
    pub in_reply_to: Option<CommentId>,
    pub author: String,
    pub author_is_bot: bool,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub path: Option<String>,
    pub line: Option<u32>,
}

/// Conversation-level comment on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: CommentId,
    pub author: String,
    pub author_is_bot: bool,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Pull request metadata needed by review tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head_sha: String,
    pub author: String,
}

/// Lifecycle status of a review thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadStatus {
    #[default]
    Pending,
    Disputed,
    Resolved,
    Escalated,
}

impl ThreadStatus {
    /// Threads that still need attention (everything except `RESOLVED`).
    pub fn is_open(self) -> bool {
        !matches!(self, ThreadStatus::Resolved)
    }

    /// Threads whose developer replies are re-evaluated as disputes.
    pub fn accepts_disputes(self) -> bool {
        matches!(self, ThreadStatus::Pending | ThreadStatus::Disputed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Pending => "PENDING",
            ThreadStatus::Disputed => "DISPUTED",
            ThreadStatus::Resolved => "RESOLVED",
            ThreadStatus::Escalated => "ESCALATED",
        }
    }
}

/// A non-bot reply inside a finding's comment thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub comment_id: CommentId,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One finding and its resolution lifecycle, anchored to the comment that posted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewThread {
    /// Id of the comment that first posted the `finding` block.
    pub id: CommentId,
    pub file: String,
    pub line: u32,
    pub status: ThreadStatus,
    /// Severity 1-10.
    pub score: u8,
    pub finding: String,
    pub assessment: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// Non-bot replies in chronological order.
    pub replies: Vec<Reply>,
    /// Last developer reply that a dispute evaluation consumed.
    pub evaluated_reply_id: Option<CommentId>,
}

impl ReviewThread {
    pub fn latest_reply(&self) -> Option<&Reply> {
        self.replies.last()
    }

    /// Returns the newest reply when it arrived after the last evaluation.
    pub fn unevaluated_reply(&self) -> Option<&Reply> {
        let latest = self.latest_reply()?;
        match self.evaluated_reply_id {
            Some(evaluated) if evaluated >= latest.comment_id => None,
            _ => Some(latest),
        }
    }

    pub fn is_blocking(&self, threshold: u8) -> bool {
        self.status.is_open() && self.score >= threshold
    }
}

/// One review pass recorded against a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassRecord {
    pub number: u32,
    pub completed: bool,
    pub has_blocking: bool,
}

/// Marker recorded before an automatic review so an interrupted run can resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoReviewTrigger {
    pub comment_id: CommentId,
    pub action: String,
    pub commit: String,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AutoReviewTrigger {
    pub fn is_pending(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Full reconstructed snapshot of one pull request's review state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    pub pr_number: u64,
    pub last_reviewed_commit: Option<String>,
    pub threads: BTreeMap<CommentId, ReviewThread>,
    /// Passes recorded for `last_reviewed_commit`.
    pub passes: Vec<PassRecord>,
    /// Latest auto-review trigger that has not been marked completed.
    pub pending_trigger: Option<AutoReviewTrigger>,
    /// Comment holding the `review-progress` block, when one exists.
    pub progress_comment_id: Option<CommentId>,
}

impl ProcessState {
    pub fn empty(pr_number: u64) -> Self {
        Self {
            pr_number,
            last_reviewed_commit: None,
            threads: BTreeMap::new(),
            passes: Vec::new(),
            pending_trigger: None,
            progress_comment_id: None,
        }
    }

    pub fn open_threads(&self) -> impl Iterator<Item = &ReviewThread> {
        self.threads.values().filter(|thread| thread.status.is_open())
    }

    pub fn blocking_count(&self, threshold: u8) -> u32 {
        self.threads
            .values()
            .filter(|thread| thread.is_blocking(threshold))
            .count() as u32
    }

    /// Number of passes completed for `commit` (zero for any other commit).
    pub fn completed_passes_for(&self, commit: &str) -> u32 {
        if self.last_reviewed_commit.as_deref() != Some(commit) {
            return 0;
        }
        self.passes.iter().filter(|pass| pass.completed).count() as u32
    }
}

/// Optional file anchor for a question asked on a diff line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContext {
    pub path: String,
    pub line: Option<u32>,
}

/// Re-evaluate a finding after a developer replied to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeTask {
    pub thread_id: CommentId,
    pub reply: Reply,
    pub file: String,
    pub line: u32,
}

/// Answer a question addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionTask {
    pub comment_id: CommentId,
    pub question: String,
    pub content_hash: String,
    pub author: String,
    pub file_context: Option<FileContext>,
    /// Answer from a fresh analysis, without earlier conversation.
    pub skip_history: bool,
    /// Placeholder comment left behind by an interrupted or failed attempt.
    pub placeholder_id: Option<CommentId>,
}

/// Who asked for a full review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewKind {
    Automatic,
    Manual,
}

/// Run the multi-pass review over the current head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewTask {
    pub kind: ReviewKind,
    pub gates_merge: bool,
    pub resuming_cancelled: bool,
    pub commit: String,
    /// Trigger action (`opened`, `synchronize`, `mention`, ...).
    pub action: String,
    /// Mention comments that requested this review (manual reviews only).
    pub request_ids: Vec<CommentId>,
}

/// A unit of pending work, recomputed every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Task {
    DisputeResolution(DisputeTask),
    QuestionAnswering(QuestionTask),
    FullReview(ReviewTask),
}

impl Task {
    /// Fixed execution priority (lower runs first).
    pub fn priority(&self) -> u8 {
        match self {
            Task::DisputeResolution(_) => 1,
            Task::QuestionAnswering(_) => 2,
            Task::FullReview(_) => 3,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Task::DisputeResolution(_) => TaskKind::DisputeResolution,
            Task::QuestionAnswering(_) => TaskKind::QuestionAnswering,
            Task::FullReview(_) => TaskKind::FullReview,
        }
    }

    /// Short human-readable label used in logs and summaries.
    pub fn label(&self) -> String {
        match self {
            Task::DisputeResolution(task) => {
                format!("dispute on {}:{} (thread {})", task.file, task.line, task.thread_id)
            }
            Task::QuestionAnswering(task) => {
                format!("question {} from {}", task.comment_id, task.author)
            }
            Task::FullReview(task) => {
                let kind = match task.kind {
                    ReviewKind::Automatic => "automatic",
                    ReviewKind::Manual => "manual",
                };
                if task.resuming_cancelled {
                    format!("{kind} review of {} (resumed)", short_sha(&task.commit))
                } else {
                    format!("{kind} review of {}", short_sha(&task.commit))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    DisputeResolution,
    QuestionAnswering,
    FullReview,
}

/// Outcome of one executed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub kind: TaskKind,
    pub label: String,
    pub success: bool,
    pub error: Option<String>,
    /// Aggregate open issues after this task ran.
    pub issues: u32,
    /// Aggregate blocking issues after this task ran.
    pub blocking_issues: u32,
}

/// Summary of a whole batch, consumed by the caller to pick an exit status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub results: Vec<TaskResult>,
    pub has_blocking_issues: bool,
    pub review_completed: bool,
    pub had_auto_review: bool,
    pub had_manual_review: bool,
    /// Set when the blocking issues came out of a merge-gating review.
    pub gate_blocked: bool,
}

impl ExecutionResult {
    pub fn failed_tasks(&self) -> usize {
        self.results.iter().filter(|result| !result.success).count()
    }

    /// Automatic reviews with blocking issues fail the run; manual ones never do.
    pub fn should_fail_gate(&self) -> bool {
        self.gate_blocked
    }
}

/// First seven characters of a commit sha.
pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{reply, thread};

    #[test]
    fn priorities_order_disputes_questions_reviews() {
        let dispute = Task::DisputeResolution(DisputeTask {
            thread_id: 1,
            reply: reply(2, "dev", "no"),
            file: "a.rs".to_string(),
            line: 1,
        });
        let review = Task::FullReview(ReviewTask {
            kind: ReviewKind::Automatic,
            gates_merge: true,
            resuming_cancelled: false,
            commit: "abcdef1234".to_string(),
            action: "opened".to_string(),
            request_ids: Vec::new(),
        });
        assert_eq!(dispute.priority(), 1);
        assert_eq!(review.priority(), 3);
        assert_eq!(review.label(), "automatic review of abcdef1");
    }

    #[test]
    fn unevaluated_reply_ignores_already_evaluated_reply() {
        let mut t = thread(10, "src/a.ts", 10, 8);
        assert!(t.unevaluated_reply().is_none());

        t.replies.push(reply(11, "dev", "disagree"));
        assert_eq!(t.unevaluated_reply().map(|r| r.comment_id), Some(11));

        t.evaluated_reply_id = Some(11);
        assert!(t.unevaluated_reply().is_none());

        t.replies.push(reply(14, "dev", "still disagree"));
        assert_eq!(t.unevaluated_reply().map(|r| r.comment_id), Some(14));
    }

    #[test]
    fn task_serializes_with_kebab_tag() {
        let task = Task::FullReview(ReviewTask {
            kind: ReviewKind::Manual,
            gates_merge: false,
            resuming_cancelled: false,
            commit: "abc".to_string(),
            action: "mention".to_string(),
            request_ids: vec![7],
        });
        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["type"], "full-review");
        assert_eq!(value["kind"], "manual");
    }

    #[test]
    fn resolved_threads_never_block() {
        let mut t = thread(1, "a.rs", 1, 9);
        assert!(t.is_blocking(8));
        t.status = ThreadStatus::Resolved;
        assert!(!t.is_blocking(8));
    }
}
