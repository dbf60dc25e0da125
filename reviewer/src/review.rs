//! Multi-pass review of the head commit.
//!
//! Each pass lets the agent inspect the change with tools, then asks for a
//! structured findings report. New findings are posted as threads; a pass
//! that adds nothing ends the review early. A failed attempt tears the
//! session down and retries from the first unfinished pass.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::report;
use crate::core::types::{
    CommentId, PassRecord, ReviewKind, ReviewTask, ReviewThread, ThreadStatus, short_sha,
};
use crate::io::config::ReviewerConfig;
use crate::io::prompt;
use crate::session::SessionSlot;
use crate::state::{AddOutcome, StateStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    pub passes_run: u32,
    pub findings_posted: usize,
    pub duplicates: usize,
    /// Open threads resolved by fix verification.
    pub fixed: usize,
    pub attempts: u32,
}

/// Work carried across attempts so a retry does not redo finished passes.
struct Progress {
    next_pass: u32,
    fixes_verified: bool,
    summary: ReviewSummary,
}

pub struct ReviewRunner<'a> {
    config: &'a ReviewerConfig,
}

impl<'a> ReviewRunner<'a> {
    pub fn new(config: &'a ReviewerConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(commit = short_sha(&task.commit), kind = ?task.kind))]
    pub async fn run(
        &self,
        slot: &mut SessionSlot,
        store: &mut StateStore,
        task: &ReviewTask,
    ) -> Result<ReviewSummary> {
        let first_pass = if task.resuming_cancelled {
            store.state().completed_passes_for(&task.commit) + 1
        } else {
            1
        };
        let mut progress = Progress {
            next_pass: first_pass,
            fixes_verified: task.kind != ReviewKind::Automatic,
            summary: ReviewSummary::default(),
        };

        let attempts = self.config.review.session_retries + 1;
        let mut attempt = 1;
        loop {
            progress.summary.attempts = attempt;
            match self.attempt(slot, store, task, &mut progress).await {
                Ok(()) => {
                    info!(
                        passes = progress.summary.passes_run,
                        posted = progress.summary.findings_posted,
                        fixed = progress.summary.fixed,
                        "review completed"
                    );
                    return Ok(progress.summary);
                }
                Err(err) if attempt < attempts => {
                    let backoff = Duration::from_secs(
                        self.config
                            .review
                            .retry_backoff_secs
                            .saturating_mul(u64::from(attempt)),
                    );
                    warn!(
                        attempt,
                        err = %format!("{err:#}"),
                        backoff_secs = backoff.as_secs(),
                        "review attempt failed; retrying with a new session"
                    );
                    slot.reset().await;
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    slot.reset().await;
                    return Err(err.context(format!("review failed after {attempts} attempt(s)")));
                }
            }
        }
    }

    async fn attempt(
        &self,
        slot: &mut SessionSlot,
        store: &mut StateStore,
        task: &ReviewTask,
        progress: &mut Progress,
    ) -> Result<()> {
        if !progress.fixes_verified {
            progress.summary.fixed += verify_fixes(slot, store, &task.commit).await?;
            progress.fixes_verified = true;
        }

        let passes = self.config.review.passes;
        let threshold = self.config.review.blocking_score_threshold;
        while progress.next_pass <= passes {
            let pass = progress.next_pass;
            let open: Vec<&ReviewThread> = store.state().open_threads().collect();
            let pass_prompt =
                prompt::review_pass(pass, passes, &task.commit, task.resuming_cancelled, &open)?;

            let driver = slot.driver().await?;
            driver
                .run_prompt(&pass_prompt)
                .await
                .with_context(|| format!("review pass {pass}"))?;
            let reply = driver
                .ask(&prompt::findings_report(pass)?)
                .await
                .with_context(|| format!("findings report for pass {pass}"))?;
            let findings = report::parse_findings_report(&reply).map_err(|err| anyhow!(err))?;

            let mut posted = 0usize;
            for finding in &findings {
                match store
                    .add_thread(finding, &task.commit, &self.config.similarity)
                    .await?
                {
                    AddOutcome::Posted(_) => posted += 1,
                    AddOutcome::Duplicate(_) => progress.summary.duplicates += 1,
                }
            }

            let record = PassRecord {
                number: pass,
                completed: true,
                has_blocking: store.blocking_count(threshold) > 0,
            };
            store.record_pass_completion(&task.commit, record).await?;
            progress.next_pass += 1;
            progress.summary.passes_run += 1;
            progress.summary.findings_posted += posted;
            info!(pass, reported = findings.len(), posted, "review pass completed");

            if posted == 0 {
                break;
            }
        }
        Ok(())
    }
}

/// Ask the agent which open findings on changed files the new commit fixed.
///
/// An unreadable answer is logged and treated as "nothing fixed".
async fn verify_fixes(slot: &mut SessionSlot, store: &mut StateStore, commit: &str) -> Result<usize> {
    let changed = store
        .store()
        .changed_files(store.pr())
        .await
        .context("list changed files")?;
    let candidates: Vec<&ReviewThread> = store
        .state()
        .open_threads()
        .filter(|thread| changed.contains(&thread.file))
        .collect();
    if candidates.is_empty() {
        return Ok(0);
    }
    let ids: Vec<CommentId> = candidates.iter().map(|thread| thread.id).collect();
    let verify_prompt = prompt::fix_verification(commit, &candidates)?;

    let answer = slot
        .driver()
        .await?
        .ask(&verify_prompt)
        .await
        .context("fix verification")?;
    let fixed = match report::parse_fixed_threads(&answer, &ids) {
        Ok(fixed) => fixed,
        Err(err) => {
            warn!(err = %err, "ignoring unreadable fix verification");
            return Ok(0);
        }
    };

    let note = format!("Addressed in `{}`; marking resolved.", short_sha(commit));
    for &id in &fixed {
        store.reply_to_thread(id, &note).await?;
        store
            .update_thread_status(id, ThreadStatus::Resolved, None)
            .await?;
    }
    info!(checked = ids.len(), fixed = fixed.len(), "fix verification done");
    Ok(fixed.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::SessionSettings;
    use crate::test_support::{
        BOT_LOGIN, FakeCommentStore, ScriptedAgent, finding_comment, pull_request,
    };

    const EMPTY: &str = r#"{"findings": []}"#;

    fn task(kind: ReviewKind, resuming: bool) -> ReviewTask {
        ReviewTask {
            kind,
            gates_merge: kind == ReviewKind::Automatic,
            resuming_cancelled: resuming,
            commit: "abc1234567".to_string(),
            action: "synchronize".to_string(),
            request_ids: Vec::new(),
        }
    }

    async fn setup(agent: &ScriptedAgent, fake: &Arc<FakeCommentStore>) -> (SessionSlot, StateStore) {
        let config = ReviewerConfig::default();
        let slot = SessionSlot::new(
            Arc::new(agent.clone()),
            "review",
            "system",
            SessionSettings::from_config(&config),
        );
        let store = StateStore::load(fake.clone(), 7, BOT_LOGIN).await.expect("load");
        (slot, store)
    }

    fn fake() -> Arc<FakeCommentStore> {
        Arc::new(FakeCommentStore::new(pull_request(7, "abc1234567")))
    }

    /// Verifies passes run until one reports nothing new.
    #[tokio::test(start_paused = true)]
    async fn stops_after_a_pass_without_new_findings() {
        let agent = ScriptedAgent::new();
        agent
            .push_response(
                r#"Here you go: {"findings": [{"file": "./src/a.rs", "line": 3, "score": 9, "finding": "unbounded recursion on nested input"}]}"#,
            )
            .push_response(EMPTY);
        let fake = fake();
        let (mut slot, mut store) = setup(&agent, &fake).await;
        let config = ReviewerConfig::default();

        let summary = ReviewRunner::new(&config)
            .run(&mut slot, &mut store, &task(ReviewKind::Manual, false))
            .await
            .expect("review");
        assert_eq!(summary.passes_run, 2);
        assert_eq!(summary.findings_posted, 1);
        assert_eq!(store.state().completed_passes_for("abc1234567"), 2);
        assert_eq!(store.blocking_count(8), 1);

        let posted = fake.created_review_comments();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].path.as_deref(), Some("src/a.rs"));
    }

    /// Verifies a failing session is recreated and the review retried.
    #[tokio::test(start_paused = true)]
    async fn retries_with_a_new_session() {
        let agent = ScriptedAgent::new();
        agent.fail_session_creates(1).push_response(EMPTY);
        let fake = fake();
        let (mut slot, mut store) = setup(&agent, &fake).await;
        let config = ReviewerConfig::default();

        let summary = ReviewRunner::new(&config)
            .run(&mut slot, &mut store, &task(ReviewKind::Manual, false))
            .await
            .expect("review");
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.passes_run, 1);
        assert_eq!(agent.sessions_created(), 1);
    }

    /// Verifies the review fails once every attempt is spent.
    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_retry_budget() {
        let agent = ScriptedAgent::new();
        agent.fail_session_creates(10);
        let fake = fake();
        let (mut slot, mut store) = setup(&agent, &fake).await;
        let config = ReviewerConfig::default();

        let err = ReviewRunner::new(&config)
            .run(&mut slot, &mut store, &task(ReviewKind::Manual, false))
            .await
            .expect_err("fails");
        assert!(format!("{err:#}").contains("after 3 attempt(s)"));
        let creates = agent
            .calls()
            .iter()
            .filter(|call| call.as_str() == "create_session")
            .count();
        assert_eq!(creates, 3);
    }

    /// Verifies fixed findings on changed files are resolved before the passes.
    #[tokio::test(start_paused = true)]
    async fn automatic_review_verifies_fixes() {
        let agent = ScriptedAgent::new();
        agent.push_response(r#"{"fixed": [1, 99]}"#).push_response(EMPTY);
        let fake = fake();
        fake.push_review(finding_comment(1, "src/a.ts", 10, 8, "missing check"));
        fake.push_review(finding_comment(2, "src/other.ts", 4, 8, "leak"));
        fake.set_changed_files(&["src/a.ts"]);
        let (mut slot, mut store) = setup(&agent, &fake).await;
        let config = ReviewerConfig::default();

        let summary = ReviewRunner::new(&config)
            .run(&mut slot, &mut store, &task(ReviewKind::Automatic, false))
            .await
            .expect("review");
        assert_eq!(summary.fixed, 1);
        assert_eq!(store.thread(1).map(|t| t.status), Some(ThreadStatus::Resolved));
        assert_eq!(store.thread(2).map(|t| t.status), Some(ThreadStatus::Pending));
        assert!(agent.prompts()[0].contains("- id 1: src/a.ts:10"));
    }

    /// Verifies a resumed review starts after the last completed pass.
    #[tokio::test(start_paused = true)]
    async fn resumed_review_skips_completed_passes() {
        let agent = ScriptedAgent::new();
        agent.push_response(EMPTY);
        let fake = fake();
        let (mut slot, mut store) = setup(&agent, &fake).await;
        store
            .record_pass_completion(
                "abc1234567",
                PassRecord {
                    number: 1,
                    completed: true,
                    has_blocking: false,
                },
            )
            .await
            .expect("record");
        let config = ReviewerConfig::default();

        ReviewRunner::new(&config)
            .run(&mut slot, &mut store, &task(ReviewKind::Manual, true))
            .await
            .expect("review");
        assert!(agent.prompts()[0].starts_with("Review pass 2 of 3"));
    }
}
