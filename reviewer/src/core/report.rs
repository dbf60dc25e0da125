//! Parsing of structured agent replies.
//!
//! The agent is asked to answer with a single JSON object. Replies often wrap
//! it in prose or a code fence, so the outermost object is located first and
//! then validated against a JSON Schema before deserializing.

use std::sync::LazyLock;

use jsonschema::Validator;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::similarity::FindingCandidate;
use crate::core::types::{CommentId, ThreadStatus};

const FINDINGS_SCHEMA: &str = include_str!("../schemas/findings_report.schema.json");
const VERDICT_SCHEMA: &str = include_str!("../schemas/dispute_verdict.schema.json");

static FINDINGS_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(FINDINGS_SCHEMA));
static VERDICT_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(VERDICT_SCHEMA));

fn compile(schema: &str) -> Validator {
    let value: Value = serde_json::from_str(schema).expect("bundled schema is valid json");
    jsonschema::validator_for(&value).expect("bundled schema compiles")
}

#[derive(Debug, Deserialize)]
struct FindingsReport {
    findings: Vec<ReportedFinding>,
}

#[derive(Debug, Deserialize)]
struct ReportedFinding {
    file: String,
    line: u32,
    score: u8,
    finding: String,
    #[serde(default)]
    assessment: String,
}

/// Agent decision on a disputed finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The developer is right; the finding no longer applies.
    Accept,
    /// The finding stands.
    Maintain,
    /// Needs a human decision.
    Escalate,
}

impl Verdict {
    pub fn thread_status(self) -> ThreadStatus {
        match self {
            Verdict::Accept => ThreadStatus::Resolved,
            Verdict::Maintain => ThreadStatus::Disputed,
            Verdict::Escalate => ThreadStatus::Escalated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DisputeVerdict {
    pub verdict: Verdict,
    pub reply: String,
}

#[derive(Debug, Deserialize)]
struct FixedReport {
    #[serde(default)]
    fixed: Vec<CommentId>,
}

/// Slice of `text` from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    text.get(start..=end)
}

fn parse_validated<T: DeserializeOwned>(
    text: &str,
    validator: &Validator,
    what: &str,
) -> Result<T, String> {
    let raw = extract_json_object(text).ok_or_else(|| format!("{what}: no json object in reply"))?;
    let value: Value =
        serde_json::from_str(raw).map_err(|err| format!("{what}: invalid json: {err}"))?;
    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(format!("{what}: schema violations: {}", errors.join("; ")));
    }
    serde_json::from_value(value).map_err(|err| format!("{what}: {err}"))
}

/// Parse the findings a review pass reported.
pub fn parse_findings_report(text: &str) -> Result<Vec<FindingCandidate>, String> {
    let report: FindingsReport = parse_validated(text, &FINDINGS_VALIDATOR, "findings report")?;
    Ok(report
        .findings
        .into_iter()
        .map(|f| FindingCandidate {
            file: f.file.trim().trim_start_matches("./").to_string(),
            line: f.line,
            score: f.score,
            finding: f.finding.trim().to_string(),
            assessment: f.assessment.trim().to_string(),
        })
        .collect())
}

/// Parse the agent's verdict on a developer rebuttal.
pub fn parse_dispute_verdict(text: &str) -> Result<DisputeVerdict, String> {
    parse_validated(text, &VERDICT_VALIDATOR, "dispute verdict")
}

/// Parse the thread ids the agent considers fixed, keeping only known ids.
pub fn parse_fixed_threads(text: &str, known: &[CommentId]) -> Result<Vec<CommentId>, String> {
    let raw = extract_json_object(text).ok_or("fix report: no json object in reply")?;
    let report: FixedReport =
        serde_json::from_str(raw).map_err(|err| format!("fix report: invalid json: {err}"))?;
    let mut fixed: Vec<CommentId> = report
        .fixed
        .into_iter()
        .filter(|id| known.contains(id))
        .collect();
    fixed.sort_unstable();
    fixed.dedup();
    Ok(fixed)
}
