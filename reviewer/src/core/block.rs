//! Status block codec.
//!
//! A status block is a small JSON payload inside a fenced code region tagged
//! [`BLOCK_TAG`]. It is the only persisted state: prose around the block is
//! kept for humans and never interpreted.
//!
//! ```text
//! Thanks, marking this resolved.
//!
//! ```reviewer-status
//! {"type":"finding","file":"src/a.rs","line":10,"score":8,...}
//! ```
//! ```

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{CommentId, PassRecord, ThreadStatus};

/// Info string of the fenced region that carries a status block.
pub const BLOCK_TAG: &str = "reviewer-status";

// The newline before the closing fence is optional.
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```reviewer-status[ \t]*\r?\n(.*?)\r?\n?```").expect("block regex is valid")
});

/// Machine-readable state embedded in a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatusBlock {
    Finding(FindingBlock),
    Question(QuestionBlock),
    QuestionAnswer(QuestionAnswerBlock),
    ManualPrReview(ManualReviewBlock),
    AutoReviewTrigger(AutoReviewTriggerBlock),
    ReviewProgress(ReviewProgressBlock),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingBlock {
    pub file: String,
    pub line: u32,
    /// Zero means "unscored"; such blocks never materialize a thread.
    #[serde(default)]
    pub score: u8,
    pub finding: String,
    #[serde(default)]
    pub assessment: String,
    #[serde(default)]
    pub status: ThreadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_reply_id: Option<CommentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    InProgress,
    Failed,
}

/// Placeholder for an answer that has not been delivered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionBlock {
    pub question_id: CommentId,
    pub status: QuestionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswerBlock {
    pub question_id: CommentId,
    /// Content hash of the question text at answer time.
    pub question_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManualReviewStatus {
    InProgress,
    Completed,
    Failed,
    DismissedByAutoReview,
}

impl ManualReviewStatus {
    /// Terminal requests are never picked up again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ManualReviewStatus::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualReviewBlock {
    pub request_id: CommentId,
    pub status: ManualReviewStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoReviewTriggerBlock {
    pub action: String,
    pub commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewProgressBlock {
    pub commit: String,
    #[serde(default)]
    pub passes: Vec<PassRecord>,
}

/// Decode the first status block in `body`.
///
/// Missing or malformed blocks yield `None`; this never fails.
pub fn extract(body: &str) -> Option<StatusBlock> {
    let caps = BLOCK_RE.captures(body)?;
    let payload = caps.get(1)?.as_str().trim();
    match serde_json::from_str(payload) {
        Ok(block) => Some(block),
        Err(err) => {
            debug!(err = %err, "ignoring malformed status block");
            None
        }
    }
}

/// Render a fenced block for `block`.
///
/// Backticks inside string values are escaped so a payload can never close
/// the fence early.
pub fn serialize(block: &StatusBlock) -> String {
    // Serializing these plain data types cannot fail.
    let json = serde_json::to_string(block).unwrap_or_default();
    let json = json.replace('`', "\\u0060");
    format!("```{BLOCK_TAG}\n{json}\n```")
}

/// Compose a comment body from human prose and a block.
pub fn compose(prose: &str, block: &StatusBlock) -> String {
    let prose = prose.trim_end();
    if prose.is_empty() {
        return serialize(block);
    }
    format!("{prose}\n\n{}", serialize(block))
}

/// Replace the existing block in `body`, or append one when there is none.
///
/// Prose around the block is preserved.
pub fn replace(body: &str, block: &StatusBlock) -> String {
    let Some(found) = BLOCK_RE.find(body) else {
        return compose(body, block);
    };
    let mut out = String::with_capacity(body.len());
    out.push_str(&body[..found.start()]);
    out.push_str(&serialize(block));
    out.push_str(&body[found.end()..]);
    out
}

/// Human prose of a comment with any status block removed.
pub fn strip(body: &str) -> String {
    BLOCK_RE.replace_all(body, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn finding() -> StatusBlock {
        StatusBlock::Finding(FindingBlock {
            file: "src/a.ts".to_string(),
            line: 10,
            score: 8,
            finding: "Unchecked `unwrap` on user input".to_string(),
            assessment: "Will panic on malformed input.".to_string(),
            status: ThreadStatus::Pending,
            evaluated_reply_id: None,
        })
    }

    fn all_blocks() -> Vec<StatusBlock> {
        vec![
            finding(),
            StatusBlock::Question(QuestionBlock {
                question_id: 4,
                status: QuestionStatus::InProgress,
            }),
            StatusBlock::QuestionAnswer(QuestionAnswerBlock {
                question_id: 4,
                question_hash: "1a2b3c4d".to_string(),
            }),
            StatusBlock::ManualPrReview(ManualReviewBlock {
                request_id: 9,
                status: ManualReviewStatus::DismissedByAutoReview,
            }),
            StatusBlock::AutoReviewTrigger(AutoReviewTriggerBlock {
                action: "synchronize".to_string(),
                commit: "abc123".to_string(),
                completed_at: Some(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()),
            }),
            StatusBlock::ReviewProgress(ReviewProgressBlock {
                commit: "abc123".to_string(),
                passes: vec![PassRecord {
                    number: 1,
                    completed: true,
                    has_blocking: false,
                }],
            }),
        ]
    }

    #[test]
    fn decode_encode_decode_is_stable() {
        for block in all_blocks() {
            let body = compose("Some prose", &block);
            let decoded = extract(&body).expect("decode");
            assert_eq!(decoded, block);
            let again = extract(&serialize(&decoded)).expect("decode again");
            assert_eq!(again, decoded);
        }
    }

    #[test]
    fn missing_trailing_newline_still_parses() {
        let body = "```reviewer-status\n{\"type\":\"question\",\"question_id\":3,\"status\":\"FAILED\"}```";
        assert_eq!(
            extract(body),
            Some(StatusBlock::Question(QuestionBlock {
                question_id: 3,
                status: QuestionStatus::Failed,
            }))
        );
    }

    #[test]
    fn malformed_or_missing_blocks_are_none() {
        assert_eq!(extract("no block here"), None);
        assert_eq!(extract("```reviewer-status\n{not json}\n```"), None);
        assert_eq!(
            extract("```reviewer-status\n{\"type\":\"unknown-kind\"}\n```"),
            None
        );
        // A block under a different fence tag is plain prose.
        assert_eq!(
            extract("```json\n{\"type\":\"question\",\"question_id\":3,\"status\":\"FAILED\"}\n```"),
            None
        );
    }

    #[test]
    fn first_block_wins() {
        let first = finding();
        let second = StatusBlock::QuestionAnswer(QuestionAnswerBlock {
            question_id: 1,
            question_hash: "x".to_string(),
        });
        let body = format!("{}\n\n{}", serialize(&first), serialize(&second));
        assert_eq!(extract(&body), Some(first));
    }

    #[test]
    fn backticks_in_values_do_not_close_the_fence() {
        let block = StatusBlock::Finding(FindingBlock {
            finding: "use ```rust fences``` in docs".to_string(),
            ..match finding() {
                StatusBlock::Finding(f) => f,
                _ => unreachable!(),
            }
        });
        assert_eq!(extract(&serialize(&block)), Some(block));
    }

    #[test]
    fn replace_preserves_surrounding_prose() {
        let body = compose("Heads up.", &finding());
        let body = format!("{body}\n\ntrailing note");
        let resolved = StatusBlock::Finding(FindingBlock {
            status: ThreadStatus::Resolved,
            ..match finding() {
                StatusBlock::Finding(f) => f,
                _ => unreachable!(),
            }
        });

        let updated = replace(&body, &resolved);
        assert!(updated.starts_with("Heads up."));
        assert!(updated.ends_with("trailing note"));
        assert_eq!(extract(&updated), Some(resolved.clone()));
        // Replaying the same update is a no-op.
        assert_eq!(replace(&updated, &resolved), updated);
    }

    #[test]
    fn replace_appends_when_body_has_no_block() {
        let updated = replace("plain text", &finding());
        assert!(updated.starts_with("plain text\n\n```reviewer-status"));
        assert_eq!(extract(&updated), Some(finding()));
    }

    #[test]
    fn strip_removes_block_only() {
        let body = compose("Looking into it.", &finding());
        assert_eq!(strip(&body), "Looking into it.");
    }
}
