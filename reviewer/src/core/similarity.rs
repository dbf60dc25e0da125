//! Duplicate-finding detection by word overlap.

use std::collections::BTreeSet;

use crate::core::types::{CommentId, ReviewThread};

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "both", "but", "by", "can", "could", "did", "do",
    "does", "doing", "down", "during", "each", "few", "for", "from", "further", "had", "has",
    "have", "having", "here", "how", "if", "in", "into", "is", "it", "its", "itself", "just",
    "may", "might", "more", "most", "must", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "out", "over", "own", "same", "should", "so", "some", "such",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "very", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "why", "will", "with", "would", "you", "your",
];

/// A finding the agent wants to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingCandidate {
    pub file: String,
    pub line: u32,
    pub score: u8,
    pub finding: String,
    pub assessment: String,
}

/// Lowercased words of `text` with stop words and single characters removed.
pub fn significant_words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| word.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

/// Share of significant words two texts have in common, relative to the larger set.
///
/// Returns a value in `0.0..=1.0`; texts with no significant words never match.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let left = significant_words(a);
    let right = significant_words(b);
    let larger = left.len().max(right.len());
    if larger == 0 {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    shared as f64 / larger as f64
}

/// Find an existing thread that `candidate` duplicates.
///
/// A thread matches when it is on the same file, within `line_window` lines,
/// and its finding text overlaps by at least `threshold`.
pub fn find_duplicate<'a, I>(
    candidate: &FindingCandidate,
    threads: I,
    line_window: u32,
    threshold: f64,
) -> Option<CommentId>
where
    I: IntoIterator<Item = &'a ReviewThread>,
{
    threads
        .into_iter()
        .filter(|thread| thread.file == candidate.file)
        .filter(|thread| thread.line.abs_diff(candidate.line) <= line_window)
        .find(|thread| word_overlap(&thread.finding, &candidate.finding) >= threshold)
        .map(|thread| thread.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::thread_with_finding;

    fn candidate(file: &str, line: u32, finding: &str) -> FindingCandidate {
        FindingCandidate {
            file: file.to_string(),
            line,
            score: 7,
            finding: finding.to_string(),
            assessment: String::new(),
        }
    }

    #[test]
    fn stop_words_are_ignored() {
        let words = significant_words("The value is not checked before the call");
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        assert_eq!(words, vec!["call", "checked", "value"]);
    }

    #[test]
    fn overlap_at_half_is_duplicate() {
        let existing = thread_with_finding(1, "src/a.rs", 10, "missing null check on user input");
        // significant words: missing null check user input (5) vs
        // null check user input unused extra (6): shared 4 of 6 -> 0.67
        let c = candidate("src/a.rs", 11, "null check for user input unused extra");
        assert_eq!(find_duplicate(&c, [&existing], 3, 0.5), Some(1));
    }

    #[test]
    fn overlap_below_half_is_distinct() {
        let existing = thread_with_finding(1, "src/a.rs", 10, "missing null check on user input");
        // shared: "input" only -> 1 of 5
        let c = candidate("src/a.rs", 10, "sanitize html before rendering input");
        assert_eq!(find_duplicate(&c, [&existing], 3, 0.5), None);
    }

    #[test]
    fn exact_threshold_matches() {
        // {alpha, beta, gamma, delta} vs {alpha, beta, omega, sigma}: 2 of 4
        assert!((word_overlap("alpha beta gamma delta", "alpha beta omega sigma") - 0.5).abs() < f64::EPSILON);
        let existing = thread_with_finding(1, "a.rs", 5, "alpha beta gamma delta");
        let c = candidate("a.rs", 5, "alpha beta omega sigma");
        assert_eq!(find_duplicate(&c, [&existing], 0, 0.5), Some(1));
    }

    #[test]
    fn different_file_or_distant_line_never_matches() {
        let existing = thread_with_finding(1, "src/a.rs", 10, "missing null check on user input");
        let other_file = candidate("src/b.rs", 10, "missing null check on user input");
        let far_line = candidate("src/a.rs", 40, "missing null check on user input");
        assert_eq!(find_duplicate(&other_file, [&existing], 3, 0.5), None);
        assert_eq!(find_duplicate(&far_line, [&existing], 3, 0.5), None);
    }

    #[test]
    fn empty_texts_never_match() {
        assert_eq!(word_overlap("the a an", "of to"), 0.0);
    }
}
