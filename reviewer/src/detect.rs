//! Task detection: derive the outstanding work of one pull request.
//!
//! Nothing is queued between runs. Every run recomputes the task list from
//! the reconstructed state and the trigger event, so a task that failed or
//! was interrupted is simply detected again next time.

use tracing::{debug, info, instrument, warn};

use crate::classifier::{IntentClassifier, MentionIntent};
use crate::core::block::ManualReviewStatus;
use crate::core::question;
use crate::core::types::{
    CommentId, DisputeTask, FileContext, QuestionTask, ReviewKind, ReviewTask, Task, short_sha,
};
use crate::io::config::ReviewerConfig;
use crate::io::event::{RunContext, Trigger};
use crate::state::{QuestionReply, StateStore};

/// A comment addressed to the bot.
struct Mention<'a> {
    id: CommentId,
    author: &'a str,
    body: &'a str,
    file_context: Option<FileContext>,
}

#[derive(Default)]
struct DetectedMentions {
    questions: Vec<QuestionTask>,
    review_requests: Vec<CommentId>,
}

pub struct TaskDetector<'a> {
    config: &'a ReviewerConfig,
    classifier: &'a IntentClassifier,
    /// Detect without writing anything back (no dismissals).
    dry_run: bool,
}

impl<'a> TaskDetector<'a> {
    pub fn new(config: &'a ReviewerConfig, classifier: &'a IntentClassifier, dry_run: bool) -> Self {
        Self {
            config,
            classifier,
            dry_run,
        }
    }

    /// All pending tasks, ordered by priority.
    #[instrument(skip_all, fields(pr = ctx.pr, head = short_sha(head)))]
    pub async fn detect_all_tasks(
        &self,
        store: &mut StateStore,
        ctx: &RunContext,
        head: &str,
    ) -> Vec<Task> {
        let mut tasks = self.detect_disputes(store).await;
        let mentions = self.detect_mentions(store).await;
        tasks.extend(mentions.questions.into_iter().map(Task::QuestionAnswering));
        tasks.extend(
            self.detect_reviews(store, ctx, head, mentions.review_requests)
                .await
                .into_iter()
                .map(Task::FullReview),
        );
        // Stable: equal priorities keep detection order.
        tasks.sort_by_key(Task::priority);
        info!(tasks = tasks.len(), "detected tasks");
        tasks
    }

    async fn detect_disputes(&self, store: &StateStore) -> Vec<Task> {
        let mut tasks = Vec::new();
        for thread in store
            .state()
            .threads
            .values()
            .filter(|thread| thread.status.accepts_disputes())
        {
            let Some(reply) = thread.unevaluated_reply() else {
                continue;
            };
            // Threads on the conversation have no reply chain to dispute in.
            if !store.review_comments().iter().any(|c| c.id == thread.id) {
                continue;
            }
            if let Err(err) = store.store().get_review_comment(thread.id).await {
                warn!(thread = thread.id, err = %format!("{err:#}"), "thread is not accessible; skipping");
                continue;
            }
            debug!(thread = thread.id, reply = reply.comment_id, "dispute pending");
            tasks.push(Task::DisputeResolution(DisputeTask {
                thread_id: thread.id,
                reply: reply.clone(),
                file: thread.file.clone(),
                line: thread.line,
            }));
        }
        tasks
    }

    fn mentions<'s>(&self, store: &'s StateStore) -> Vec<Mention<'s>> {
        let mention = self.config.mention.as_str();
        let is_human = |author: &str, is_bot: bool| !is_bot && !store.is_bot(author);

        let issue = store
            .issue_comments()
            .iter()
            .filter(|c| is_human(&c.author, c.author_is_bot))
            .map(|c| Mention {
                id: c.id,
                author: &c.author,
                body: &c.body,
                file_context: None,
            });
        // Replies inside finding threads are disputes, not mentions.
        let review = store
            .review_comments()
            .iter()
            .filter(|c| is_human(&c.author, c.author_is_bot))
            .filter(|c| c.in_reply_to.is_none_or(|root| store.thread(root).is_none()))
            .map(|c| Mention {
                id: c.id,
                author: &c.author,
                body: &c.body,
                file_context: c.path.clone().map(|path| FileContext {
                    path,
                    line: c.line,
                }),
            });

        issue
            .chain(review)
            .filter(|m| question::mentions_bot(m.body, mention))
            .collect()
    }

    async fn detect_mentions(&self, store: &StateStore) -> DetectedMentions {
        let mention_handle = self.config.mention.as_str();
        let mut detected = DetectedMentions::default();

        for mention in self.mentions(store) {
            let text = question::strip_mention(mention.body, mention_handle);
            if text.is_empty() {
                continue;
            }

            match store.manual_review(mention.id) {
                Some((_, status)) if status.is_terminal() => continue,
                Some(_) => {
                    detected.review_requests.push(mention.id);
                    continue;
                }
                None => {}
            }

            let hash = question::question_hash(mention.body, mention_handle);
            let placeholder_id = match store.question_reply(mention.id) {
                Some(QuestionReply::Answered { question_hash, .. }) if question_hash == hash => {
                    continue;
                }
                Some(reply) => Some(reply.comment_id()),
                None => None,
            };

            let intent = self
                .classifier
                .mention_intent(&text)
                .await
                .resolve(MentionIntent::FALLBACK);
            match intent {
                MentionIntent::ReviewRequest => detected.review_requests.push(mention.id),
                MentionIntent::Question => {
                    detected.questions.push(QuestionTask {
                        comment_id: mention.id,
                        skip_history: question::needs_fresh_analysis(&text),
                        question: text,
                        content_hash: hash,
                        author: mention.author.to_string(),
                        file_context: mention.file_context,
                        placeholder_id,
                    });
                }
            }
        }
        detected
    }

    async fn detect_reviews(
        &self,
        store: &mut StateStore,
        ctx: &RunContext,
        head: &str,
        request_ids: Vec<CommentId>,
    ) -> Vec<ReviewTask> {
        let state = store.state();
        let automatic = match state.pending_trigger.as_ref() {
            Some(trigger) if trigger.commit == head => Some(ReviewTask {
                kind: ReviewKind::Automatic,
                gates_merge: true,
                resuming_cancelled: true,
                commit: head.to_string(),
                action: trigger.action.clone(),
                request_ids: Vec::new(),
            }),
            _ if ctx.trigger.starts_automatic_review()
                && (ctx.trigger == Trigger::Manual
                    || state.last_reviewed_commit.as_deref() != Some(head)) =>
            {
                Some(ReviewTask {
                    kind: ReviewKind::Automatic,
                    gates_merge: true,
                    resuming_cancelled: false,
                    commit: head.to_string(),
                    action: ctx.trigger.action().to_string(),
                    request_ids: Vec::new(),
                })
            }
            _ => None,
        };
        let manual = (!request_ids.is_empty()).then(|| ReviewTask {
            kind: ReviewKind::Manual,
            gates_merge: false,
            resuming_cancelled: false,
            commit: head.to_string(),
            action: "mention".to_string(),
            request_ids,
        });

        match (automatic, manual) {
            (Some(automatic), Some(manual)) => {
                if !self.dry_run {
                    dismiss_manual(store, &manual.request_ids, head).await;
                }
                vec![automatic]
            }
            (automatic, manual) => automatic.into_iter().chain(manual).collect(),
        }
    }
}

async fn dismiss_manual(store: &mut StateStore, request_ids: &[CommentId], head: &str) {
    let prose = format!(
        "The automatic review of `{}` covers this request.",
        short_sha(head)
    );
    for &request_id in request_ids {
        if let Err(err) = store
            .upsert_manual_review(request_id, ManualReviewStatus::DismissedByAutoReview, &prose)
            .await
        {
            warn!(request = request_id, err = %format!("{err:#}"), "failed to dismiss manual review request");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::block::{ManualReviewBlock, QuestionAnswerBlock, StatusBlock};
    use crate::core::types::ThreadStatus;
    use crate::io::github::RepoRef;
    use crate::io::llm::CompletionOptions;
    use crate::test_support::{
        BOT_LOGIN, FakeCommentStore, ScriptedCompletion, bot_issue_comment, finding_comment,
        issue_comment, pull_request, reply_comment, review_comment,
    };

    fn ctx(trigger: Trigger) -> RunContext {
        RunContext {
            repo: RepoRef::parse("octo/widgets").expect("repo"),
            pr: 7,
            head_sha: Some("abc".to_string()),
            trigger,
        }
    }

    fn synchronize() -> RunContext {
        ctx(Trigger::PullRequest {
            action: "synchronize".to_string(),
        })
    }

    fn mention_comment(id: CommentId) -> RunContext {
        ctx(Trigger::Comment {
            comment_id: id,
            author: "dev".to_string(),
            body: String::new(),
        })
    }

    async fn detect(fake: &Arc<FakeCommentStore>, ctx: &RunContext, dry_run: bool) -> Vec<Task> {
        let config = ReviewerConfig::default();
        let completion = Arc::new(ScriptedCompletion::new());
        let classifier = IntentClassifier::new(completion, CompletionOptions::from_config(&config.llm));
        let mut store = StateStore::load(fake.clone(), 7, BOT_LOGIN).await.expect("load");
        TaskDetector::new(&config, &classifier, dry_run)
            .detect_all_tasks(&mut store, ctx, "abc")
            .await
    }

    fn fake() -> Arc<FakeCommentStore> {
        Arc::new(FakeCommentStore::new(pull_request(7, "abc")))
    }

    /// Verifies only unevaluated replies on accessible open threads become disputes.
    #[tokio::test]
    async fn disputes_need_a_new_reply() {
        let fake = fake();
        fake.push_review(finding_comment(1, "src/a.ts", 10, 8, "missing check"));
        fake.push_review(reply_comment(2, 1, "dev", "not an issue"));
        fake.push_review(finding_comment(3, "src/b.ts", 5, 6, "leak"));
        fake.push_review(finding_comment(4, "src/c.ts", 1, 6, "race"));
        fake.push_review(reply_comment(5, 4, "dev", "fixed"));
        fake.make_inaccessible(4);

        let tasks = detect(&fake, &mention_comment(99), true).await;
        assert_eq!(tasks.len(), 1);
        let Task::DisputeResolution(task) = &tasks[0] else {
            panic!("expected a dispute, got {tasks:?}");
        };
        assert_eq!(task.thread_id, 1);
        assert_eq!(task.reply.comment_id, 2);
    }

    /// Verifies resolved threads and evaluated replies are not disputed again.
    #[tokio::test]
    async fn evaluated_replies_are_skipped() {
        let fake = fake();
        let mut evaluated = finding_comment(1, "src/a.ts", 10, 8, "missing check");
        evaluated.body = crate::core::block::replace(
            &evaluated.body,
            &StatusBlock::Finding(crate::core::block::FindingBlock {
                file: "src/a.ts".to_string(),
                line: 10,
                score: 8,
                finding: "missing check".to_string(),
                assessment: String::new(),
                status: ThreadStatus::Disputed,
                evaluated_reply_id: Some(2),
            }),
        );
        fake.push_review(evaluated);
        fake.push_review(reply_comment(2, 1, "dev", "not an issue"));
        assert!(detect(&fake, &mention_comment(99), true).await.is_empty());
    }

    /// Verifies mentions in code are ignored and answered questions are skipped until edited.
    #[tokio::test]
    async fn questions_follow_mentions_and_hashes() {
        let fake = fake();
        fake.push_issue(issue_comment(10, "dev", "Docs say `@reviewer help` works"));
        fake.push_issue(issue_comment(11, "dev", "@reviewer why a BTreeMap here?"));
        fake.push_issue(bot_issue_comment(
            12,
            "Because ordering.",
            &StatusBlock::QuestionAnswer(QuestionAnswerBlock {
                question_id: 11,
                question_hash: question::question_hash("@reviewer why a BTreeMap here?", "@reviewer"),
            }),
        ));
        fake.push_issue(issue_comment(13, "dev", "@reviewer is this thread-safe?"));
        fake.push_issue(bot_issue_comment(
            14,
            "Old answer.",
            &StatusBlock::QuestionAnswer(QuestionAnswerBlock {
                question_id: 13,
                question_hash: "00000000".to_string(),
            }),
        ));

        let tasks = detect(&fake, &mention_comment(13), true).await;
        assert_eq!(tasks.len(), 1, "{tasks:?}");
        let Task::QuestionAnswering(task) = &tasks[0] else {
            panic!("expected a question");
        };
        assert_eq!(task.comment_id, 13);
        assert_eq!(task.question, "is this thread-safe?");
        assert_eq!(task.placeholder_id, Some(14));
        assert!(!task.skip_history);
    }

    /// Verifies inline mentions carry their file and summaries skip history.
    #[tokio::test]
    async fn inline_summary_question_has_context() {
        let fake = fake();
        fake.push_review(review_comment(20, "dev", "src/lib.rs", 42, "@reviewer summarize this PR"));
        let tasks = detect(&fake, &mention_comment(20), true).await;
        let Task::QuestionAnswering(task) = &tasks[0] else {
            panic!("expected a question");
        };
        assert!(task.skip_history);
        assert_eq!(
            task.file_context,
            Some(FileContext {
                path: "src/lib.rs".to_string(),
                line: Some(42),
            })
        );
    }

    /// Verifies an automatic review supersedes and dismisses a manual request.
    #[tokio::test]
    async fn automatic_review_dismisses_manual_request() {
        let fake = fake();
        fake.push_issue(issue_comment(30, "dev", "@reviewer review"));

        let tasks = detect(&fake, &synchronize(), false).await;
        assert_eq!(tasks.len(), 1);
        let Task::FullReview(review) = &tasks[0] else {
            panic!("expected a review");
        };
        assert_eq!(review.kind, ReviewKind::Automatic);
        assert!(review.gates_merge);

        let dismissed = fake
            .created_issue_comments()
            .into_iter()
            .find_map(|c| match crate::core::block::extract(&c.body) {
                Some(StatusBlock::ManualPrReview(block)) => Some(block),
                _ => None,
            });
        assert_eq!(
            dismissed,
            Some(ManualReviewBlock {
                request_id: 30,
                status: ManualReviewStatus::DismissedByAutoReview,
            })
        );

        // The dismissed request is never picked up again.
        assert!(detect(&fake, &mention_comment(30), true).await.is_empty());
    }

    /// Verifies a mention-only run yields an informational manual review.
    #[tokio::test]
    async fn review_command_yields_manual_review() {
        let fake = fake();
        fake.push_issue(issue_comment(30, "dev", "@reviewer review"));
        let tasks = detect(&fake, &mention_comment(30), true).await;
        let Task::FullReview(review) = &tasks[0] else {
            panic!("expected a review");
        };
        assert_eq!(review.kind, ReviewKind::Manual);
        assert!(!review.gates_merge);
        assert_eq!(review.request_ids, vec![30]);
    }

    /// Verifies a head that was already reviewed is not reviewed again on push.
    #[tokio::test]
    async fn reviewed_head_is_not_rereviewed() {
        let fake = fake();
        fake.push_issue(bot_issue_comment(
            5,
            "progress",
            &StatusBlock::ReviewProgress(crate::core::block::ReviewProgressBlock {
                commit: "abc".to_string(),
                passes: Vec::new(),
            }),
        ));
        assert!(detect(&fake, &synchronize(), true).await.is_empty());
        // An explicit run always reviews.
        assert_eq!(detect(&fake, &ctx(Trigger::Manual), true).await.len(), 1);
    }
}
