//! Sequential task execution.
//!
//! Tasks run one at a time against a single shared agent session. An error
//! in one task is recorded as a failed [`TaskResult`] and the batch moves on.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::classifier::{DescriptionVerdict, IntentClassifier, ReplyIntent};
use crate::core::block::ManualReviewStatus;
use crate::core::report;
use crate::core::types::{
    DisputeTask, ExecutionResult, PullRequestInfo, QuestionTask, ReviewKind, ReviewTask, Task,
    TaskResult, ThreadStatus, short_sha,
};
use crate::io::config::ReviewerConfig;
use crate::io::prompt::{self, ThreadReply};
use crate::review::{ReviewRunner, ReviewSummary};
use crate::session::SessionSlot;
use crate::state::StateStore;

const UNREADABLE_VERDICT_REPLY: &str =
    "I could not evaluate this reply automatically. The finding stays open until a maintainer looks at it.";

pub struct Orchestrator<'a> {
    config: &'a ReviewerConfig,
    classifier: &'a IntentClassifier,
    slot: SessionSlot,
    pr: PullRequestInfo,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a ReviewerConfig,
        classifier: &'a IntentClassifier,
        slot: SessionSlot,
        pr: PullRequestInfo,
    ) -> Self {
        Self {
            config,
            classifier,
            slot,
            pr,
        }
    }

    /// Run `tasks` in order and summarize the batch.
    #[instrument(skip_all, fields(pr = self.pr.number, tasks = tasks.len()))]
    pub async fn execute(&mut self, store: &mut StateStore, tasks: Vec<Task>) -> ExecutionResult {
        let threshold = self.config.review.blocking_score_threshold;
        let mut result = ExecutionResult::default();

        for task in tasks {
            let label = task.label();
            info!(task = %label, "running task");
            let outcome = match &task {
                Task::DisputeResolution(dispute) => self.resolve_dispute(store, dispute).await,
                Task::QuestionAnswering(question) => self.answer_question(store, question).await,
                Task::FullReview(review) => {
                    match review.kind {
                        ReviewKind::Automatic => result.had_auto_review = true,
                        ReviewKind::Manual => result.had_manual_review = true,
                    }
                    let outcome = self.review(store, review).await;
                    if outcome.is_ok() {
                        result.review_completed = true;
                    }
                    outcome
                }
            };

            let error = match outcome {
                Ok(()) => None,
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(task = %label, err = %message, "task failed");
                    Some(message)
                }
            };
            result.results.push(TaskResult {
                kind: task.kind(),
                label,
                success: error.is_none(),
                error,
                issues: store.open_count(),
                blocking_issues: store.blocking_count(threshold),
            });
        }

        self.slot.close().await;
        result.has_blocking_issues = store.blocking_count(threshold) > 0;
        result.gate_blocked = result.had_auto_review && result.has_blocking_issues;
        result
    }

    #[instrument(skip_all, fields(thread = task.thread_id, reply = task.reply.comment_id))]
    async fn resolve_dispute(&mut self, store: &mut StateStore, task: &DisputeTask) -> Result<()> {
        let thread = store
            .thread(task.thread_id)
            .cloned()
            .with_context(|| format!("thread {} no longer exists", task.thread_id))?;
        let intent = self
            .classifier
            .reply_intent(&thread.finding, &task.reply.body)
            .await
            .resolve(ReplyIntent::FALLBACK);
        let input = ThreadReply {
            thread: &thread,
            author: &task.reply.author,
            reply: &task.reply.body,
        };

        let (status, reply) = match intent {
            ReplyIntent::Concession => (
                ThreadStatus::Resolved,
                format!("Thanks @{}, marking this as resolved.", task.reply.author),
            ),
            ReplyIntent::Question => {
                let answer = self
                    .slot
                    .driver()
                    .await?
                    .ask(&prompt::thread_question(input)?)
                    .await
                    .context("answer question on thread")?;
                (ThreadStatus::Disputed, answer.trim().to_string())
            }
            ReplyIntent::Rebuttal => {
                let answer = self
                    .slot
                    .driver()
                    .await?
                    .ask(&prompt::dispute(input)?)
                    .await
                    .context("evaluate dispute")?;
                match report::parse_dispute_verdict(&answer) {
                    Ok(verdict) => (verdict.verdict.thread_status(), verdict.reply.trim().to_string()),
                    Err(err) => {
                        warn!(err = %err, "unreadable dispute verdict; keeping the finding open");
                        (ThreadStatus::Disputed, UNREADABLE_VERDICT_REPLY.to_string())
                    }
                }
            }
        };

        // Status first, so a failed write never leaves a reply the next run repeats.
        store
            .update_thread_status(thread.id, status, Some(task.reply.comment_id))
            .await?;
        store.reply_to_thread(thread.id, &reply).await?;
        info!(intent = ?intent, status = status.as_str(), "dispute handled");
        Ok(())
    }

    #[instrument(skip_all, fields(question = task.comment_id))]
    async fn answer_question(&mut self, store: &mut StateStore, task: &QuestionTask) -> Result<()> {
        let placeholder = store
            .post_question_placeholder(task.comment_id, &task.author, task.placeholder_id)
            .await?;
        let file = task
            .file_context
            .as_ref()
            .map(|context| (context.path.as_str(), context.line));
        let question_prompt = prompt::question(
            self.pr.number,
            &task.author,
            &task.question,
            file,
            task.skip_history,
        )?;

        match self.ask(&question_prompt, task.skip_history).await {
            Ok(answer) => {
                let body = format!("@{} {}", task.author, answer.trim());
                store
                    .finish_question(placeholder, task.comment_id, &task.content_hash, &body)
                    .await
            }
            Err(err) => {
                if let Err(mark) = store.fail_question(placeholder, task.comment_id).await {
                    warn!(err = %format!("{mark:#}"), "failed to mark question as failed");
                }
                Err(err)
            }
        }
    }

    /// Ask on the shared session, or on a throwaway one when history must not leak in.
    async fn ask(&mut self, question_prompt: &str, fresh: bool) -> Result<String> {
        if !fresh {
            let answer = self.slot.driver().await?.ask(question_prompt).await?;
            return Ok(answer);
        }
        let mut driver = self.slot.detached("question (fresh)").await?;
        let answer = driver.ask(question_prompt).await;
        if let Err(err) = driver.close().await {
            warn!(err = %format!("{err:#}"), "failed to delete temporary session");
        }
        Ok(answer?)
    }

    async fn review(&mut self, store: &mut StateStore, task: &ReviewTask) -> Result<()> {
        match task.kind {
            ReviewKind::Automatic => self.automatic_review(store, task).await,
            ReviewKind::Manual => self.manual_review(store, task).await,
        }
    }

    async fn automatic_review(&mut self, store: &mut StateStore, task: &ReviewTask) -> Result<()> {
        let trigger = store
            .record_auto_review_trigger(&task.action, &task.commit)
            .await?;

        self.check_description(store).await?;
        ReviewRunner::new(self.config)
            .run(&mut self.slot, store, task)
            .await?;
        store.mark_auto_review_completed(trigger, Utc::now()).await?;
        Ok(())
    }

    async fn manual_review(&mut self, store: &mut StateStore, task: &ReviewTask) -> Result<()> {
        let commit = short_sha(&task.commit).to_string();
        if self.config.review.post_manual_progress_comments {
            let prose = format!("Reviewing `{commit}` as requested.");
            for &request_id in &task.request_ids {
                store
                    .upsert_manual_review(request_id, ManualReviewStatus::InProgress, &prose)
                    .await?;
            }
        }

        let outcome = match self.check_description(store).await {
            Ok(()) => ReviewRunner::new(self.config).run(&mut self.slot, store, task).await,
            Err(err) => Err(err),
        };
        let threshold = self.config.review.blocking_score_threshold;
        let (status, prose) = match &outcome {
            Ok(summary) => (
                ManualReviewStatus::Completed,
                completion_note(&commit, summary, store.blocking_count(threshold)),
            ),
            Err(_) => (
                ManualReviewStatus::Failed,
                format!("The review of `{commit}` failed. Mention me again to retry."),
            ),
        };
        // Always record a terminal status so the request is not picked up again.
        for &request_id in &task.request_ids {
            if let Err(err) = store.upsert_manual_review(request_id, status, &prose).await {
                warn!(request = request_id, err = %format!("{err:#}"), "failed to record manual review status");
            }
        }
        outcome.map(|_| ())
    }

    /// Open or resolve the description finding when descriptions are required.
    async fn check_description(&self, store: &mut StateStore) -> Result<()> {
        if !self.config.review.require_description {
            return Ok(());
        }
        let verdict = self
            .classifier
            .description(&self.pr.title, &self.pr.body)
            .await
            .resolve(DescriptionVerdict::FALLBACK);
        store
            .sync_description_finding(verdict == DescriptionVerdict::Insufficient)
            .await?;
        Ok(())
    }
}

fn completion_note(commit: &str, summary: &ReviewSummary, blocking: u32) -> String {
    format!(
        "Reviewed `{commit}`: {} new finding(s), {blocking} blocking issue(s) open.",
        summary.findings_posted
    )
}
