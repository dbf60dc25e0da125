//! LLM-backed intent classification with explicit fallbacks.
//!
//! Every call returns a closed enum wrapped in [`Classified`]. Failures
//! (transport errors, empty or unrecognized answers) become
//! [`Classified::Unknown`]; call sites resolve them with a named fallback.
//! Classification never fails a task.

use std::sync::Arc;

use tracing::warn;

use crate::core::question;
use crate::io::llm::{CompletionClient, CompletionOptions};
use crate::io::prompt;

/// Result of one classification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified<T> {
    Known(T),
    Unknown { reason: String },
}

impl<T> Classified<T> {
    pub fn resolve(self, fallback: T) -> T {
        match self {
            Classified::Known(value) => value,
            Classified::Unknown { .. } => fallback,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Classified::Known(_))
    }
}

/// What a developer's reply to a finding means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyIntent {
    Concession,
    Question,
    Rebuttal,
}

impl ReplyIntent {
    /// Unclassified replies are evaluated like disagreement, never as concessions.
    pub const FALLBACK: ReplyIntent = ReplyIntent::Rebuttal;
}

/// What a comment mentioning the bot asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionIntent {
    ReviewRequest,
    Question,
}

impl MentionIntent {
    pub const FALLBACK: MentionIntent = MentionIntent::Question;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionVerdict {
    Sufficient,
    Insufficient,
}

impl DescriptionVerdict {
    /// A flaky classifier must not block merges.
    pub const FALLBACK: DescriptionVerdict = DescriptionVerdict::Sufficient;
}

/// Match a one-word model answer against `labels`.
///
/// The first word wins; otherwise a single label appearing anywhere is accepted.
pub fn parse_label<T: Copy>(answer: &str, labels: &[(&str, T)]) -> Option<T> {
    let upper = answer.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| !c.is_ascii_alphabetic() && c != '_')
        .filter(|word| !word.is_empty())
        .collect();
    let first = words.first()?;
    if let Some((_, value)) = labels.iter().find(|(label, _)| label == first) {
        return Some(*value);
    }
    let mut found = labels
        .iter()
        .filter(|(label, _)| words.contains(label));
    match (found.next(), found.next()) {
        (Some((_, value)), None) => Some(*value),
        _ => None,
    }
}

const REPLY_LABELS: &[(&str, ReplyIntent)] = &[
    ("CONCESSION", ReplyIntent::Concession),
    ("QUESTION", ReplyIntent::Question),
    ("REBUTTAL", ReplyIntent::Rebuttal),
];

const MENTION_LABELS: &[(&str, MentionIntent)] = &[
    ("REVIEW", MentionIntent::ReviewRequest),
    ("QUESTION", MentionIntent::Question),
];

const DESCRIPTION_LABELS: &[(&str, DescriptionVerdict)] = &[
    ("SUFFICIENT", DescriptionVerdict::Sufficient),
    ("INSUFFICIENT", DescriptionVerdict::Insufficient),
];

/// Commands that request a review without asking the model.
const REVIEW_COMMANDS: &[&str] = &["review", "re-review", "rereview", "review again", "please review"];

/// Shorter descriptions are insufficient without asking the model.
const MIN_DESCRIPTION_CHARS: usize = 20;

pub struct IntentClassifier {
    client: Arc<dyn CompletionClient>,
    options: CompletionOptions,
}

impl IntentClassifier {
    pub fn new(client: Arc<dyn CompletionClient>, options: CompletionOptions) -> Self {
        Self { client, options }
    }

    async fn classify<T: Copy>(
        &self,
        what: &str,
        prompt: anyhow::Result<String>,
        labels: &[(&str, T)],
    ) -> Classified<T> {
        let prompt = match prompt {
            Ok(prompt) => prompt,
            Err(err) => return unknown(what, format!("render prompt: {err:#}")),
        };
        match self.client.complete(&prompt, &self.options).await {
            Ok(Some(answer)) => match parse_label(&answer, labels) {
                Some(value) => Classified::Known(value),
                None => unknown(what, format!("unrecognized answer {answer:?}")),
            },
            Ok(None) => unknown(what, "empty answer".to_string()),
            Err(err) => unknown(what, format!("{err:#}")),
        }
    }

    pub async fn reply_intent(&self, finding: &str, reply: &str) -> Classified<ReplyIntent> {
        self.classify(
            "reply intent",
            prompt::classify_reply(finding, reply),
            REPLY_LABELS,
        )
        .await
    }

    /// Classify a mention; `text` is the comment with the mention removed.
    pub async fn mention_intent(&self, text: &str) -> Classified<MentionIntent> {
        let command = text
            .trim()
            .trim_end_matches(['.', '!', '?'])
            .to_lowercase();
        if REVIEW_COMMANDS.contains(&command.as_str()) {
            return Classified::Known(MentionIntent::ReviewRequest);
        }
        self.classify("mention intent", prompt::classify_mention(text), MENTION_LABELS)
            .await
    }

    pub async fn description(&self, title: &str, body: &str) -> Classified<DescriptionVerdict> {
        let prose = question::strip_code_spans(body);
        if prose.trim().chars().count() < MIN_DESCRIPTION_CHARS {
            return Classified::Known(DescriptionVerdict::Insufficient);
        }
        self.classify(
            "description",
            prompt::description_check(title, body),
            DESCRIPTION_LABELS,
        )
        .await
    }
}

fn unknown<T>(what: &str, reason: String) -> Classified<T> {
    warn!(what, reason = %reason, "classification failed; using fallback");
    Classified::Unknown { reason }
}
