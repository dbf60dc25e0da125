//! End-to-end scenarios over a scripted pull request.
//!
//! Each test seeds a comment history in `FakeCommentStore`, runs detection
//! and execution the way a CI invocation does, and checks what a later run
//! reconstructs from the comments alone.

use std::sync::Arc;

use reviewer::core::block::{AutoReviewTriggerBlock, ReviewProgressBlock, StatusBlock};
use reviewer::core::types::{PassRecord, ReviewKind, Task, ThreadStatus};
use reviewer::exit_codes;
use reviewer::io::config::ReviewerConfig;
use reviewer::io::event::{RunContext, Trigger};
use reviewer::io::github::RepoRef;
use reviewer::run::{Collaborators, load_state, review_pull_request};
use reviewer::state::reconstruct;
use reviewer::test_support::{
    BOT_LOGIN, FakeCommentStore, ScriptedAgent, ScriptedCompletion, bot_issue_comment,
    finding_comment, issue_comment, pull_request, reply_comment,
};

const HEAD: &str = "0123456789abcdef";

struct Scenario {
    fake: Arc<FakeCommentStore>,
    agent: ScriptedAgent,
    completion: Arc<ScriptedCompletion>,
    config: ReviewerConfig,
}

impl Scenario {
    fn new() -> Self {
        Self {
            fake: Arc::new(FakeCommentStore::new(pull_request(7, HEAD))),
            agent: ScriptedAgent::new(),
            completion: Arc::new(ScriptedCompletion::new()),
            config: ReviewerConfig::default(),
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            comments: self.fake.clone(),
            agent: Arc::new(self.agent.clone()),
            completion: self.completion.clone(),
        }
    }

    fn context(&self, trigger: Trigger) -> RunContext {
        RunContext {
            repo: RepoRef::parse("octo/widgets").expect("repo"),
            pr: 7,
            head_sha: Some(HEAD.to_string()),
            trigger,
        }
    }
}

fn comment_trigger(comment_id: u64) -> Trigger {
    Trigger::Comment {
        comment_id,
        author: "dev".to_string(),
        body: String::new(),
    }
}

/// A conceding reply on a pending finding resolves it, and the next run sees it resolved.
#[tokio::test]
async fn concession_resolves_pending_finding() {
    let s = Scenario::new();
    s.fake
        .push_review(finding_comment(1, "src/a.ts", 10, 8, "user input reaches the query unescaped"));
    s.fake
        .push_review(reply_comment(2, 1, "dev", "you're right, will fix"));
    let ctx = s.context(comment_trigger(2));

    let detected = review_pull_request(&s.config, &s.collaborators(), &ctx, true)
        .await
        .expect("detect");
    assert_eq!(detected.tasks.len(), 1);
    assert!(matches!(&detected.tasks[0], Task::DisputeResolution(d) if d.thread_id == 1 && d.reply.comment_id == 2));

    s.completion.push("CONCESSION");
    let report = review_pull_request(&s.config, &s.collaborators(), &ctx, false)
        .await
        .expect("run");
    assert_eq!(report.exit_code(), exit_codes::OK);

    let state = load_state(&s.config, &s.collaborators(), &ctx).await.expect("state");
    let thread = &state.threads[&1];
    assert_eq!(thread.status, ThreadStatus::Resolved);
    assert_eq!(thread.evaluated_reply_id, Some(2));

    // Nothing left to do on the next run.
    let again = review_pull_request(&s.config, &s.collaborators(), &ctx, true)
        .await
        .expect("detect again");
    assert!(again.tasks.is_empty());
}

/// Three fresh questions become three question tasks with distinct hashes.
#[tokio::test]
async fn three_mentions_yield_three_questions() {
    let s = Scenario::new();
    s.fake
        .push_issue(issue_comment(20, "dev", "@reviewer why does the parser allocate here?"));
    s.fake
        .push_issue(issue_comment(21, "dev", "@reviewer is `Widget::load` thread-safe?"));
    s.fake
        .push_issue(issue_comment(22, "qa", "Hey @reviewer, what happens on an empty file?"));
    for _ in 0..3 {
        s.completion.push("QUESTION");
    }

    let report = review_pull_request(&s.config, &s.collaborators(), &s.context(comment_trigger(22)), true)
        .await
        .expect("detect");
    assert_eq!(report.tasks.len(), 3);
    let mut hashes: Vec<&str> = report
        .tasks
        .iter()
        .map(|task| {
            assert_eq!(task.priority(), 2);
            match task {
                Task::QuestionAnswering(q) => q.content_hash.as_str(),
                other => panic!("unexpected task {other:?}"),
            }
        })
        .collect();
    hashes.sort_unstable();
    hashes.dedup();
    assert_eq!(hashes.len(), 3);
}

/// An automatic review recorded but never completed resumes on the same head.
#[tokio::test(start_paused = true)]
async fn cancelled_review_resumes() {
    let s = Scenario::new();
    s.fake.push_issue(bot_issue_comment(
        30,
        "Automatic review started.",
        &StatusBlock::AutoReviewTrigger(AutoReviewTriggerBlock {
            action: "synchronize".to_string(),
            commit: HEAD.to_string(),
            completed_at: None,
        }),
    ));
    s.fake.push_issue(bot_issue_comment(
        31,
        "Review progress.",
        &StatusBlock::ReviewProgress(ReviewProgressBlock {
            commit: HEAD.to_string(),
            passes: vec![PassRecord {
                number: 1,
                completed: true,
                has_blocking: false,
            }],
        }),
    ));
    let ctx = s.context(Trigger::PullRequest {
        action: "synchronize".to_string(),
    });

    let detected = review_pull_request(&s.config, &s.collaborators(), &ctx, true)
        .await
        .expect("detect");
    assert_eq!(detected.tasks.len(), 1);
    let Task::FullReview(review) = &detected.tasks[0] else {
        panic!("expected a review");
    };
    assert_eq!(review.kind, ReviewKind::Automatic);
    assert!(review.resuming_cancelled);
    assert!(review.gates_merge);

    s.agent.push_response(r#"{"findings": []}"#);
    let report = review_pull_request(&s.config, &s.collaborators(), &ctx, false)
        .await
        .expect("run");
    assert!(report.result.as_ref().is_some_and(|r| r.review_completed));
    // The resumed review started at pass 2 and reused the original trigger.
    assert!(s.agent.prompts()[0].starts_with("Review pass 2 of 3"));
    let state = load_state(&s.config, &s.collaborators(), &ctx).await.expect("state");
    assert_eq!(state.pending_trigger, None);
    assert_eq!(state.completed_passes_for(HEAD), 2);
    assert!(s.fake.created_issue_comments().is_empty());
}

/// A blocking finding from an automatic review fails the merge gate.
#[tokio::test(start_paused = true)]
async fn blocking_automatic_review_fails_the_gate() {
    let s = Scenario::new();
    s.agent
        .push_response(
            r#"{"findings": [{"file": "src/parse.rs", "line": 12, "score": 9, "finding": "Slice index panics on short input", "assessment": "Check the length first."}]}"#,
        )
        .push_response(r#"{"findings": [{"file": "src/parse.rs", "line": 13, "score": 9, "finding": "slice index panics on short input"}]}"#);
    let ctx = s.context(Trigger::PullRequest {
        action: "opened".to_string(),
    });

    let report = review_pull_request(&s.config, &s.collaborators(), &ctx, false)
        .await
        .expect("run");
    let result = report.result.as_ref().expect("executed");
    assert!(result.gate_blocked);
    assert_eq!(report.exit_code(), exit_codes::BLOCKING);
    // The second pass only repeated the first finding.
    assert_eq!(s.fake.created_review_comments().len(), 1);
}

/// Reconstructing the same history twice yields identical state.
#[tokio::test]
async fn reconstruction_converges() {
    let s = Scenario::new();
    s.fake
        .push_review(finding_comment(1, "src/a.ts", 10, 8, "unchecked input"));
    s.fake.push_review(reply_comment(2, 1, "dev", "why?"));
    s.fake
        .push_review(finding_comment(3, "src/b.ts", 2, 4, "naming"));
    s.fake.push_issue(issue_comment(4, "dev", "@reviewer review"));
    let ctx = s.context(comment_trigger(4));

    let first = load_state(&s.config, &s.collaborators(), &ctx).await.expect("first");
    let second = load_state(&s.config, &s.collaborators(), &ctx).await.expect("second");
    assert_eq!(first, second);

    let direct = reconstruct(7, &s.fake.review_comments(), &s.fake.issue_comments(), BOT_LOGIN);
    assert_eq!(direct, first);
    assert_eq!(first.threads.len(), 2);
}
