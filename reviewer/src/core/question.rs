//! Mention detection and question fingerprinting.
//!
//! Mentions only count in prose: a mention quoted inside a fenced block or an
//! inline code span is an example, not a request.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::block;

static FENCED_RE: LazyLock<Regex> = LazyLock::new(|| {
    // An unterminated fence runs to the end of the body.
    Regex::new(r"(?s)(```|~~~).*?(?:```|~~~|\z)").expect("fenced regex is valid")
});

static INLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]*`").expect("inline regex is valid"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

static FRESH_ANALYSIS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(summari[sz]e|summary|overview|what\s+changed|what's\s+changed|what\s+has\s+changed|walk\s*through|describe\s+(the|this)\s+(pr|pull\s+request|changes?))\b",
    )
    .expect("fresh analysis regex is valid")
});

/// Remove fenced code blocks and inline code spans.
pub fn strip_code_spans(text: &str) -> String {
    let without_fences = FENCED_RE.replace_all(text, " ");
    INLINE_RE.replace_all(&without_fences, " ").into_owned()
}

fn mention_regex(mention: &str) -> Option<Regex> {
    let handle = mention.trim().trim_start_matches('@');
    if handle.is_empty() {
        return None;
    }
    // The mention must not be glued to a word on the left (emails) or continue
    // into a longer handle on the right.
    let pattern = format!(r"(?i)(^|[^\w@./-])@{}($|[^\w-])", regex::escape(handle));
    Regex::new(&pattern).ok()
}

/// Whether `body` mentions the bot outside of code spans.
pub fn mentions_bot(body: &str, mention: &str) -> bool {
    let Some(re) = mention_regex(mention) else {
        return false;
    };
    let prose = block::strip(body);
    re.is_match(&strip_code_spans(&prose))
}

/// Question text with the status block and every bot mention removed.
pub fn strip_mention(body: &str, mention: &str) -> String {
    let prose = block::strip(body);
    let Some(re) = mention_regex(mention) else {
        return prose.trim().to_string();
    };
    // Adjacent mentions share a separator, so one pass can miss the second.
    let mut removed = prose;
    while re.is_match(&removed) {
        removed = re.replace_all(&removed, "${1}${2}").into_owned();
    }
    WHITESPACE_RE.replace_all(removed.trim(), " ").into_owned()
}

/// Normalized form used for hashing: no mention, lowercase, collapsed whitespace.
pub fn normalize_question(body: &str, mention: &str) -> String {
    strip_mention(body, mention).to_lowercase()
}

/// Rolling hash of the normalized question, as 8 hex digits.
///
/// Stable across runs and platforms; used to notice edits to an answered question.
pub fn question_hash(body: &str, mention: &str) -> String {
    let normalized = normalize_question(body, mention);
    let hash = normalized
        .chars()
        .fold(0u32, |acc, c| acc.wrapping_mul(31).wrapping_add(c as u32));
    format!("{hash:08x}")
}

/// Questions asking for a summary of the PR must be answered from a fresh
/// analysis: earlier conversation may describe older commits.
pub fn needs_fresh_analysis(question: &str) -> bool {
    FRESH_ANALYSIS_RE.is_match(question)
}
