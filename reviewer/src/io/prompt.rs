//! Prompt templates for the agent and the intent classifier.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, Value, context};
use serde::Serialize;

use crate::core::types::{PullRequestInfo, ReviewThread, short_sha};

const TEMPLATES: &[(&str, &str)] = &[
    ("system", include_str!("prompts/system.md")),
    ("review_pass", include_str!("prompts/review_pass.md")),
    ("findings_report", include_str!("prompts/findings_report.md")),
    ("fix_verification", include_str!("prompts/fix_verification.md")),
    ("dispute", include_str!("prompts/dispute.md")),
    ("thread_question", include_str!("prompts/thread_question.md")),
    ("question", include_str!("prompts/question.md")),
    ("classify_reply", include_str!("prompts/classify_reply.md")),
    ("classify_mention", include_str!("prompts/classify_mention.md")),
    ("description_check", include_str!("prompts/description_check.md")),
];

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        env.add_template(name, source)
            .expect("prompt template should be valid");
    }
    env
});

fn render(name: &str, ctx: Value) -> Result<String> {
    let template = ENGINE.get_template(name)?;
    Ok(template.render(ctx)?.trim().to_string())
}

/// Thread summary exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct ThreadContext<'a> {
    id: u64,
    file: &'a str,
    line: u32,
    status: &'static str,
    score: u8,
    finding: &'a str,
}

impl<'a> From<&'a ReviewThread> for ThreadContext<'a> {
    fn from(thread: &'a ReviewThread) -> Self {
        Self {
            id: thread.id,
            file: &thread.file,
            line: thread.line,
            status: thread.status.as_str(),
            score: thread.score,
            finding: &thread.finding,
        }
    }
}

pub fn system(repo: &str, pr: &PullRequestInfo, mention: &str) -> Result<String> {
    render(
        "system",
        context! {
            repo => repo,
            pr => context! {
                number => pr.number,
                title => pr.title.trim(),
                author => &pr.author,
                head_sha => &pr.head_sha,
                body => (!pr.body.trim().is_empty()).then(|| pr.body.trim()),
            },
            mention => mention,
        },
    )
}

pub fn review_pass(
    pass: u32,
    passes: u32,
    commit: &str,
    resuming: bool,
    threads: &[&ReviewThread],
) -> Result<String> {
    let threads: Vec<ThreadContext<'_>> = threads.iter().map(|t| ThreadContext::from(*t)).collect();
    render(
        "review_pass",
        context! {
            pass => pass,
            passes => passes,
            commit => short_sha(commit),
            resuming => resuming,
            threads => threads,
        },
    )
}

pub fn findings_report(pass: u32) -> Result<String> {
    render("findings_report", context! { pass => pass })
}

pub fn fix_verification(commit: &str, threads: &[&ReviewThread]) -> Result<String> {
    let threads: Vec<ThreadContext<'_>> = threads.iter().map(|t| ThreadContext::from(*t)).collect();
    render(
        "fix_verification",
        context! { commit => short_sha(commit), threads => threads },
    )
}

/// Inputs shared by the two thread-reply prompts.
#[derive(Debug, Clone, Copy)]
pub struct ThreadReply<'a> {
    pub thread: &'a ReviewThread,
    pub author: &'a str,
    pub reply: &'a str,
}

impl ThreadReply<'_> {
    fn context(&self) -> Value {
        context! {
            file => &self.thread.file,
            line => self.thread.line,
            score => self.thread.score,
            finding => &self.thread.finding,
            assessment => (!self.thread.assessment.is_empty()).then_some(&self.thread.assessment),
            author => self.author,
            reply => self.reply.trim(),
        }
    }
}

pub fn dispute(input: ThreadReply<'_>) -> Result<String> {
    render("dispute", input.context())
}

pub fn thread_question(input: ThreadReply<'_>) -> Result<String> {
    render("thread_question", input.context())
}

pub fn question(
    pr_number: u64,
    author: &str,
    question: &str,
    file: Option<(&str, Option<u32>)>,
    fresh: bool,
) -> Result<String> {
    render(
        "question",
        context! {
            pr_number => pr_number,
            author => author,
            question => question,
            file => file.map(|(path, _)| path),
            line => file.and_then(|(_, line)| line),
            fresh => fresh,
        },
    )
}

pub fn classify_reply(finding: &str, reply: &str) -> Result<String> {
    render(
        "classify_reply",
        context! { finding => finding, reply => reply.trim() },
    )
}

pub fn classify_mention(comment: &str) -> Result<String> {
    render("classify_mention", context! { comment => comment.trim() })
}

pub fn description_check(title: &str, body: &str) -> Result<String> {
    render(
        "description_check",
        context! { title => title.trim(), body => body.trim() },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ThreadStatus;
    use crate::test_support::{pull_request, thread};

    #[test]
    fn every_template_compiles() {
        for (name, _) in TEMPLATES {
            assert!(ENGINE.get_template(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn review_pass_lists_existing_findings() {
        let mut t = thread(5, "src/a.rs", 10, 8);
        t.finding = "Unchecked index".to_string();
        t.status = ThreadStatus::Disputed;
        let prompt = review_pass(2, 3, "abcdef123456", true, &[&t]).expect("render");
        assert!(prompt.starts_with("Review pass 2 of 3 for commit abcdef1."));
        assert!(prompt.contains("interrupted"));
        assert!(prompt.contains("- src/a.rs:10 [DISPUTED, score 8] Unchecked index"));
    }

    #[test]
    fn system_prompt_notes_missing_description() {
        let mut pr = pull_request(4, "abc");
        pr.body = "   ".to_string();
        let prompt = system("octo/widgets", &pr, "@reviewer").expect("render");
        assert!(prompt.contains("pull request #4 in octo/widgets"));
        assert!(prompt.contains("has no description"));
    }

    #[test]
    fn question_prompt_includes_file_context_and_fresh_flag() {
        let prompt = question(4, "dev", "summarize", Some(("src/lib.rs", Some(7))), true)
            .expect("render");
        assert!(prompt.contains("refers to src/lib.rs line 7"));
        assert!(prompt.contains("Ignore earlier"));

        let plain = question(4, "dev", "why?", None, false).expect("render");
        assert!(!plain.contains("refers to"));
        assert!(!plain.contains("Ignore earlier"));
    }

    #[test]
    fn fix_verification_lists_thread_ids() {
        let t = thread(77, "src/b.rs", 3, 9);
        let prompt = fix_verification("0123456789", &[&t]).expect("render");
        assert!(prompt.contains("- id 77: src/b.rs:3"));
    }
}
