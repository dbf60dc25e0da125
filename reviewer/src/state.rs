//! State reconstruction from the pull request's comment history.
//!
//! Comments are the only store. [`reconstruct`] rebuilds a [`ProcessState`]
//! from scratch on every run; [`StateStore`] applies mutations as targeted
//! read-modify-writes against single comments and mirrors them in memory so
//! later tasks of the same run see them without refetching.
//!
//! Only blocks in comments authored by the configured bot login are trusted.
//! Anyone can paste a status block into a comment.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::block::{
    self, AutoReviewTriggerBlock, FindingBlock, ManualReviewBlock, ManualReviewStatus,
    QuestionAnswerBlock, QuestionBlock, QuestionStatus, ReviewProgressBlock, StatusBlock,
};
use crate::core::similarity::{FindingCandidate, find_duplicate};
use crate::core::types::{
    AutoReviewTrigger, CommentId, IssueComment, PassRecord, ProcessState, Reply, ReviewComment,
    ReviewThread, ThreadStatus, short_sha,
};
use crate::io::config::SimilarityConfig;
use crate::io::github::{CommentStore, NewReviewComment};

/// File recorded on the finding raised for an insufficient PR description.
pub const DESCRIPTION_FINDING_FILE: &str = "(pull request description)";

/// Which comment API a comment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Review,
    Issue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentRef {
    pub id: CommentId,
    pub origin: Origin,
}

/// Outcome of offering a finding to [`StateStore::add_thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Posted(CommentId),
    /// Suppressed as a duplicate of an existing thread.
    Duplicate(CommentId),
}

/// The bot's comment for a question, if one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionReply {
    /// Placeholder from an interrupted or failed attempt.
    Placeholder {
        comment_id: CommentId,
        status: QuestionStatus,
    },
    Answered {
        comment_id: CommentId,
        question_hash: String,
    },
}

impl QuestionReply {
    pub fn comment_id(&self) -> CommentId {
        match self {
            QuestionReply::Placeholder { comment_id, .. }
            | QuestionReply::Answered { comment_id, .. } => *comment_id,
        }
    }
}

fn chronological(a: (DateTime<Utc>, CommentId), b: (DateTime<Utc>, CommentId)) -> Ordering {
    a.cmp(&b)
}

fn thread_from_block(
    id: CommentId,
    author: &str,
    body: &str,
    created_at: DateTime<Utc>,
    finding: &FindingBlock,
) -> ReviewThread {
    ReviewThread {
        id,
        file: finding.file.clone(),
        line: finding.line,
        status: finding.status,
        score: finding.score,
        finding: finding.finding.clone(),
        assessment: finding.assessment.clone(),
        author: author.to_string(),
        body: body.to_string(),
        created_at,
        replies: Vec::new(),
        evaluated_reply_id: finding.evaluated_reply_id,
    }
}

fn finding_from_thread(thread: &ReviewThread) -> FindingBlock {
    FindingBlock {
        file: thread.file.clone(),
        line: thread.line,
        score: thread.score,
        finding: thread.finding.clone(),
        assessment: thread.assessment.clone(),
        status: thread.status,
        evaluated_reply_id: thread.evaluated_reply_id,
    }
}

/// Finding blocks with a score outside 1..=10 never become threads.
fn materializes(finding: &FindingBlock) -> bool {
    (1..=10).contains(&finding.score)
}

/// Rebuild the review state of one pull request from its comments.
///
/// Pure: the same comment history always yields the same state, regardless
/// of the order the comments are passed in.
pub fn reconstruct(
    pr: u64,
    review_comments: &[ReviewComment],
    issue_comments: &[IssueComment],
    bot_login: &str,
) -> ProcessState {
    let mut review: Vec<&ReviewComment> = review_comments.iter().collect();
    review.sort_by(|a, b| chronological((a.created_at, a.id), (b.created_at, b.id)));
    let mut issue: Vec<&IssueComment> = issue_comments.iter().collect();
    issue.sort_by(|a, b| chronological((a.created_at, a.id), (b.created_at, b.id)));

    let mut state = ProcessState::empty(pr);

    for comment in review
        .iter()
        .filter(|c| c.in_reply_to.is_none() && c.author == bot_login)
    {
        if let Some(StatusBlock::Finding(finding)) = block::extract(&comment.body)
            && materializes(&finding)
        {
            let thread = thread_from_block(
                comment.id,
                &comment.author,
                &comment.body,
                comment.created_at,
                &finding,
            );
            state.threads.insert(comment.id, thread);
        }
    }

    for comment in review
        .iter()
        .filter(|c| !c.author_is_bot && c.author != bot_login)
    {
        let Some(root) = comment.in_reply_to else {
            continue;
        };
        if let Some(thread) = state.threads.get_mut(&root) {
            thread.replies.push(Reply {
                comment_id: comment.id,
                author: comment.author.clone(),
                body: comment.body.clone(),
                created_at: comment.created_at,
            });
        }
    }

    let mut latest_trigger = None;
    for comment in issue.iter().filter(|c| c.author == bot_login) {
        match block::extract(&comment.body) {
            Some(StatusBlock::Finding(finding)) if materializes(&finding) => {
                let thread = thread_from_block(
                    comment.id,
                    &comment.author,
                    &comment.body,
                    comment.created_at,
                    &finding,
                );
                state.threads.insert(comment.id, thread);
            }
            Some(StatusBlock::ReviewProgress(progress)) => {
                state.last_reviewed_commit = Some(progress.commit);
                state.passes = progress.passes;
                state.progress_comment_id = Some(comment.id);
            }
            Some(StatusBlock::AutoReviewTrigger(trigger)) => {
                latest_trigger = Some(AutoReviewTrigger {
                    comment_id: comment.id,
                    action: trigger.action,
                    commit: trigger.commit,
                    completed_at: trigger.completed_at,
                });
            }
            _ => {}
        }
    }
    state.pending_trigger = latest_trigger.filter(AutoReviewTrigger::is_pending);

    for thread in state.threads.values_mut() {
        thread
            .replies
            .sort_by(|a, b| chronological((a.created_at, a.comment_id), (b.created_at, b.comment_id)));
    }
    state
}

fn severity_label(score: u8) -> &'static str {
    match score {
        9.. => "Critical",
        7..=8 => "High",
        4..=6 => "Medium",
        _ => "Low",
    }
}

fn finding_prose(candidate: &FindingCandidate) -> String {
    let mut prose = format!(
        "**{}** (score {}/10): {}",
        severity_label(candidate.score),
        candidate.score,
        candidate.finding
    );
    if !candidate.assessment.is_empty() {
        prose.push_str("\n\n");
        prose.push_str(&candidate.assessment);
    }
    prose
}

fn progress_prose(commit: &str, passes: &[PassRecord]) -> String {
    let completed = passes.iter().filter(|p| p.completed).count();
    format!(
        "Review progress for `{}`: {completed} pass(es) completed.",
        short_sha(commit)
    )
}

/// Live view of one pull request's review state.
pub struct StateStore {
    store: Arc<dyn CommentStore>,
    pr: u64,
    bot_login: String,
    review_comments: Vec<ReviewComment>,
    issue_comments: Vec<IssueComment>,
    state: ProcessState,
}

impl StateStore {
    /// Fetch every comment of `pr` and rebuild its state.
    #[instrument(skip_all, fields(pr))]
    pub async fn load(store: Arc<dyn CommentStore>, pr: u64, bot_login: &str) -> Result<Self> {
        let mut review_comments = store
            .list_review_comments(pr)
            .await
            .context("fetch review comments")?;
        let mut issue_comments = store
            .list_issue_comments(pr)
            .await
            .context("fetch issue comments")?;
        review_comments.sort_by(|a, b| chronological((a.created_at, a.id), (b.created_at, b.id)));
        issue_comments.sort_by(|a, b| chronological((a.created_at, a.id), (b.created_at, b.id)));

        let state = reconstruct(pr, &review_comments, &issue_comments, bot_login);
        debug!(
            review_comments = review_comments.len(),
            issue_comments = issue_comments.len(),
            threads = state.threads.len(),
            last_reviewed = state.last_reviewed_commit.as_deref().unwrap_or("-"),
            "reconstructed review state"
        );
        Ok(Self {
            store,
            pr,
            bot_login: bot_login.to_string(),
            review_comments,
            issue_comments,
            state,
        })
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    pub fn store(&self) -> &Arc<dyn CommentStore> {
        &self.store
    }

    pub fn pr(&self) -> u64 {
        self.pr
    }

    pub fn review_comments(&self) -> &[ReviewComment] {
        &self.review_comments
    }

    pub fn issue_comments(&self) -> &[IssueComment] {
        &self.issue_comments
    }

    pub fn thread(&self, id: CommentId) -> Option<&ReviewThread> {
        self.state.threads.get(&id)
    }

    /// Whether blocks in comments by `author` are trusted.
    pub fn is_bot(&self, author: &str) -> bool {
        author == self.bot_login
    }

    pub fn blocking_count(&self, threshold: u8) -> u32 {
        self.state.blocking_count(threshold)
    }

    pub fn open_count(&self) -> u32 {
        self.state.open_threads().count() as u32
    }

    fn comment_ref(&self, id: CommentId) -> Option<CommentRef> {
        if self.review_comments.iter().any(|c| c.id == id) {
            return Some(CommentRef {
                id,
                origin: Origin::Review,
            });
        }
        if self.issue_comments.iter().any(|c| c.id == id) {
            return Some(CommentRef {
                id,
                origin: Origin::Issue,
            });
        }
        None
    }

    /// Trusted issue-comment blocks in chronological order.
    fn bot_issue_blocks(&self) -> impl Iterator<Item = (CommentId, StatusBlock)> + '_ {
        self.issue_comments
            .iter()
            .filter(|c| self.is_bot(&c.author))
            .filter_map(|c| block::extract(&c.body).map(|b| (c.id, b)))
    }

    /// Latest manual-review block recorded for `request_id`.
    pub fn manual_review(&self, request_id: CommentId) -> Option<(CommentId, ManualReviewStatus)> {
        self.bot_issue_blocks()
            .filter_map(|(id, b)| match b {
                StatusBlock::ManualPrReview(m) if m.request_id == request_id => Some((id, m.status)),
                _ => None,
            })
            .last()
    }

    /// The bot's latest placeholder or answer for `question_id`.
    pub fn question_reply(&self, question_id: CommentId) -> Option<QuestionReply> {
        self.bot_issue_blocks()
            .filter_map(|(id, b)| match b {
                StatusBlock::Question(q) if q.question_id == question_id => {
                    Some(QuestionReply::Placeholder {
                        comment_id: id,
                        status: q.status,
                    })
                }
                StatusBlock::QuestionAnswer(a) if a.question_id == question_id => {
                    Some(QuestionReply::Answered {
                        comment_id: id,
                        question_hash: a.question_hash,
                    })
                }
                _ => None,
            })
            .last()
    }

    async fn fetch_body(&self, target: CommentRef) -> Result<String> {
        let body = match target.origin {
            Origin::Review => self.store.get_review_comment(target.id).await?.body,
            Origin::Issue => self.store.get_issue_comment(target.id).await?.body,
        };
        Ok(body)
    }

    /// Write `body` when it differs from `live`, then mirror it.
    async fn write_body(&mut self, target: CommentRef, live: &str, body: &str) -> Result<()> {
        if live != body {
            match target.origin {
                Origin::Review => {
                    self.store
                        .update_review_comment(target.id, body)
                        .await
                        .with_context(|| format!("update review comment {}", target.id))?;
                }
                Origin::Issue => {
                    self.store
                        .update_issue_comment(target.id, body)
                        .await
                        .with_context(|| format!("update issue comment {}", target.id))?;
                }
            }
        }
        match target.origin {
            Origin::Review => {
                if let Some(c) = self.review_comments.iter_mut().find(|c| c.id == target.id) {
                    c.body = body.to_string();
                }
            }
            Origin::Issue => {
                if let Some(c) = self.issue_comments.iter_mut().find(|c| c.id == target.id) {
                    c.body = body.to_string();
                }
            }
        }
        Ok(())
    }

    async fn create_issue(&mut self, body: &str) -> Result<IssueComment> {
        let comment = self
            .store
            .create_issue_comment(self.pr, body)
            .await
            .context("create issue comment")?;
        self.issue_comments.push(comment.clone());
        Ok(comment)
    }

    /// Set a thread's status, recording the developer reply that was evaluated.
    ///
    /// `evaluated_reply_id` never moves backwards. Replaying the same update
    /// leaves the comment untouched.
    #[instrument(skip(self), fields(pr = self.pr))]
    pub async fn update_thread_status(
        &mut self,
        thread_id: CommentId,
        status: ThreadStatus,
        evaluated_reply_id: Option<CommentId>,
    ) -> Result<()> {
        let thread = self
            .state
            .threads
            .get(&thread_id)
            .cloned()
            .with_context(|| format!("unknown thread {thread_id}"))?;
        let target = self
            .comment_ref(thread_id)
            .with_context(|| format!("thread {thread_id} has no comment"))?;
        let live = self
            .fetch_body(target)
            .await
            .with_context(|| format!("read thread {thread_id}"))?;

        let mut finding = match block::extract(&live) {
            Some(StatusBlock::Finding(finding)) => finding,
            _ => finding_from_thread(&thread),
        };
        finding.status = status;
        finding.evaluated_reply_id = finding.evaluated_reply_id.max(evaluated_reply_id);
        let body = block::replace(&live, &StatusBlock::Finding(finding.clone()));
        self.write_body(target, &live, &body).await?;

        if let Some(thread) = self.state.threads.get_mut(&thread_id) {
            thread.status = finding.status;
            thread.evaluated_reply_id = finding.evaluated_reply_id;
            thread.body = body;
        }
        info!(thread = thread_id, status = status.as_str(), "thread status updated");
        Ok(())
    }

    /// Post a finding as a new thread unless it duplicates an existing one.
    ///
    /// Lines outside the diff cannot carry inline comments; such findings are
    /// posted as conversation comments instead.
    #[instrument(skip_all, fields(pr = self.pr, file = %candidate.file, line = candidate.line))]
    pub async fn add_thread(
        &mut self,
        candidate: &FindingCandidate,
        commit: &str,
        similarity: &SimilarityConfig,
    ) -> Result<AddOutcome> {
        if !(1..=10).contains(&candidate.score) {
            bail!("finding score {} outside 1..=10", candidate.score);
        }
        if let Some(existing) = find_duplicate(
            candidate,
            self.state.threads.values(),
            similarity.line_window,
            similarity.duplicate_threshold,
        ) {
            debug!(duplicate_of = existing, "suppressed duplicate finding");
            return Ok(AddOutcome::Duplicate(existing));
        }

        let finding = FindingBlock {
            file: candidate.file.clone(),
            line: candidate.line,
            score: candidate.score,
            finding: candidate.finding.clone(),
            assessment: candidate.assessment.clone(),
            status: ThreadStatus::Pending,
            evaluated_reply_id: None,
        };
        let status_block = StatusBlock::Finding(finding.clone());
        let prose = finding_prose(candidate);
        let inline = NewReviewComment {
            commit: commit.to_string(),
            path: candidate.file.clone(),
            line: candidate.line,
            body: block::compose(&prose, &status_block),
        };

        let (id, author, body, created_at) =
            match self.store.create_review_comment(self.pr, &inline).await {
                Ok(comment) => {
                    let fields = (
                        comment.id,
                        comment.author.clone(),
                        comment.body.clone(),
                        comment.created_at,
                    );
                    self.review_comments.push(comment);
                    fields
                }
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "inline comment rejected; posting on the conversation");
                    let prose = format!(
                        "{prose}\n\nOn `{}` line {}.",
                        candidate.file, candidate.line
                    );
                    let comment = self
                        .create_issue(&block::compose(&prose, &status_block))
                        .await?;
                    (comment.id, comment.author, comment.body, comment.created_at)
                }
            };

        let thread = thread_from_block(id, &author, &body, created_at, &finding);
        self.state.threads.insert(id, thread);
        info!(thread = id, score = candidate.score, "posted finding");
        Ok(AddOutcome::Posted(id))
    }

    /// Post a bot reply under a thread. Bot replies never count as developer replies.
    pub async fn reply_to_thread(&mut self, thread_id: CommentId, body: &str) -> Result<()> {
        let target = self
            .comment_ref(thread_id)
            .with_context(|| format!("thread {thread_id} has no comment"))?;
        match target.origin {
            Origin::Review => {
                let comment = self
                    .store
                    .reply_to_review_comment(self.pr, thread_id, body)
                    .await
                    .with_context(|| format!("reply to thread {thread_id}"))?;
                self.review_comments.push(comment);
            }
            Origin::Issue => {
                let finding = self
                    .thread(thread_id)
                    .map(|t| t.finding.clone())
                    .unwrap_or_default();
                self.create_issue(&format!("> {finding}\n\n{body}")).await?;
            }
        }
        Ok(())
    }

    /// Record a completed pass for `commit`; passes of other commits are dropped.
    #[instrument(skip(self), fields(pr = self.pr))]
    pub async fn record_pass_completion(&mut self, commit: &str, pass: PassRecord) -> Result<()> {
        let mut passes = if self.state.last_reviewed_commit.as_deref() == Some(commit) {
            self.state.passes.clone()
        } else {
            Vec::new()
        };
        match passes.iter_mut().find(|p| p.number == pass.number) {
            Some(existing) => *existing = pass,
            None => passes.push(pass),
        }
        passes.sort_by_key(|p| p.number);

        let progress = StatusBlock::ReviewProgress(ReviewProgressBlock {
            commit: commit.to_string(),
            passes: passes.clone(),
        });
        let body = block::compose(&progress_prose(commit, &passes), &progress);
        match self.state.progress_comment_id {
            Some(id) => {
                let target = CommentRef {
                    id,
                    origin: Origin::Issue,
                };
                let live = self.fetch_body(target).await.context("read review progress")?;
                self.write_body(target, &live, &body).await?;
            }
            None => {
                let comment = self.create_issue(&body).await?;
                self.state.progress_comment_id = Some(comment.id);
            }
        }
        self.state.last_reviewed_commit = Some(commit.to_string());
        self.state.passes = passes;
        debug!(pass = pass.number, "recorded pass completion");
        Ok(())
    }

    /// Record that an automatic review of `commit` started.
    ///
    /// A pending trigger for the same commit is reused, so an interrupted
    /// review resumes under its original marker.
    pub async fn record_auto_review_trigger(&mut self, action: &str, commit: &str) -> Result<CommentId> {
        if let Some(pending) = &self.state.pending_trigger
            && pending.commit == commit
        {
            return Ok(pending.comment_id);
        }
        let trigger = StatusBlock::AutoReviewTrigger(AutoReviewTriggerBlock {
            action: action.to_string(),
            commit: commit.to_string(),
            completed_at: None,
        });
        let prose = format!(
            "Automatic review of `{}` started ({action}).",
            short_sha(commit)
        );
        let comment = self.create_issue(&block::compose(&prose, &trigger)).await?;
        self.state.pending_trigger = Some(AutoReviewTrigger {
            comment_id: comment.id,
            action: action.to_string(),
            commit: commit.to_string(),
            completed_at: None,
        });
        Ok(comment.id)
    }

    /// Stamp the trigger as completed. The first timestamp is kept on replay.
    pub async fn mark_auto_review_completed(
        &mut self,
        trigger_id: CommentId,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let target = CommentRef {
            id: trigger_id,
            origin: Origin::Issue,
        };
        let live = self.fetch_body(target).await.context("read auto-review trigger")?;
        let Some(StatusBlock::AutoReviewTrigger(mut trigger)) = block::extract(&live) else {
            bail!("comment {trigger_id} has no auto-review-trigger block");
        };
        trigger.completed_at.get_or_insert(completed_at);
        let prose = format!(
            "Automatic review of `{}` completed ({}).",
            short_sha(&trigger.commit),
            trigger.action
        );
        let body = block::compose(&prose, &StatusBlock::AutoReviewTrigger(trigger));
        self.write_body(target, &live, &body).await?;
        if self
            .state
            .pending_trigger
            .as_ref()
            .is_some_and(|t| t.comment_id == trigger_id)
        {
            self.state.pending_trigger = None;
        }
        Ok(())
    }

    /// Create or rewrite the manual-review block for `request_id`.
    pub async fn upsert_manual_review(
        &mut self,
        request_id: CommentId,
        status: ManualReviewStatus,
        prose: &str,
    ) -> Result<CommentId> {
        let manual = StatusBlock::ManualPrReview(ManualReviewBlock { request_id, status });
        let body = block::compose(prose, &manual);
        match self.manual_review(request_id) {
            Some((id, _)) => {
                let target = CommentRef {
                    id,
                    origin: Origin::Issue,
                };
                let live = self.fetch_body(target).await.context("read manual review")?;
                self.write_body(target, &live, &body).await?;
                Ok(id)
            }
            None => Ok(self.create_issue(&body).await?.id),
        }
    }

    /// Post (or reset) the in-progress placeholder for a question.
    pub async fn post_question_placeholder(
        &mut self,
        question_id: CommentId,
        author: &str,
        existing: Option<CommentId>,
    ) -> Result<CommentId> {
        let placeholder = StatusBlock::Question(QuestionBlock {
            question_id,
            status: QuestionStatus::InProgress,
        });
        let body = block::compose(&format!("@{author} looking into your question..."), &placeholder);
        match existing {
            Some(id) => {
                let target = CommentRef {
                    id,
                    origin: Origin::Issue,
                };
                let live = self.fetch_body(target).await.context("read question placeholder")?;
                self.write_body(target, &live, &body).await?;
                Ok(id)
            }
            None => Ok(self.create_issue(&body).await?.id),
        }
    }

    /// Replace a placeholder with the answer.
    pub async fn finish_question(
        &mut self,
        comment_id: CommentId,
        question_id: CommentId,
        question_hash: &str,
        answer: &str,
    ) -> Result<()> {
        let answered = StatusBlock::QuestionAnswer(QuestionAnswerBlock {
            question_id,
            question_hash: question_hash.to_string(),
        });
        let target = CommentRef {
            id: comment_id,
            origin: Origin::Issue,
        };
        let live = self.fetch_body(target).await.context("read question placeholder")?;
        self.write_body(target, &live, &block::compose(answer, &answered))
            .await
    }

    pub async fn fail_question(&mut self, comment_id: CommentId, question_id: CommentId) -> Result<()> {
        let failed = StatusBlock::Question(QuestionBlock {
            question_id,
            status: QuestionStatus::Failed,
        });
        let target = CommentRef {
            id: comment_id,
            origin: Origin::Issue,
        };
        let live = self.fetch_body(target).await.context("read question placeholder")?;
        let body = block::compose(
            "I could not answer this question. I will try again on the next run.",
            &failed,
        );
        self.write_body(target, &live, &body).await
    }

    /// Keep the description finding in line with the latest verdict.
    ///
    /// Returns whether an open description finding exists afterwards.
    pub async fn sync_description_finding(&mut self, insufficient: bool) -> Result<bool> {
        let existing = self
            .state
            .threads
            .values()
            .find(|t| t.file == DESCRIPTION_FINDING_FILE)
            .map(|t| (t.id, t.status));
        match (existing, insufficient) {
            (Some((id, status)), true) => {
                if !status.is_open() {
                    self.update_thread_status(id, ThreadStatus::Pending, None)
                        .await?;
                }
            }
            (Some((id, status)), false) => {
                if status.is_open() {
                    self.update_thread_status(id, ThreadStatus::Resolved, None)
                        .await?;
                }
            }
            (None, true) => {
                let finding = FindingBlock {
                    file: DESCRIPTION_FINDING_FILE.to_string(),
                    line: 0,
                    score: 10,
                    finding: "The pull request description does not explain what the change does and why.".to_string(),
                    assessment: "Describe the change and its motivation so reviewers can evaluate it.".to_string(),
                    status: ThreadStatus::Pending,
                    evaluated_reply_id: None,
                };
                let prose = format!("**Blocking**: {}\n\n{}", finding.finding, finding.assessment);
                let comment = self
                    .create_issue(&block::compose(&prose, &StatusBlock::Finding(finding.clone())))
                    .await?;
                let thread = thread_from_block(
                    comment.id,
                    &comment.author,
                    &comment.body,
                    comment.created_at,
                    &finding,
                );
                self.state.threads.insert(comment.id, thread);
            }
            (None, false) => {}
        }
        Ok(insufficient)
    }
}
