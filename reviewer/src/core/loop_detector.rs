//! Sliding-window detection of an agent stuck repeating tool calls.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde_json::Value;

/// Loop detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopDetectorConfig {
    /// Number of recent tool calls kept.
    pub window: usize,
    /// A single signature seen this many times within the window is a loop.
    pub max_repeats: usize,
    /// Number of most recent calls inspected for collapse.
    pub collapse_span: usize,
    /// The most recent `collapse_span` calls using this many distinct
    /// signatures or fewer is a loop.
    pub min_distinct: usize,
    /// Serialized arguments are cut to this many characters in a signature.
    pub args_truncate_chars: usize,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            window: 10,
            max_repeats: 5,
            collapse_span: 8,
            min_distinct: 2,
            args_truncate_chars: 200,
        }
    }
}

/// Why the detector judged the agent stuck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopVerdict {
    Progressing,
    /// One signature repeated `count` times within the window.
    Repeated { signature: String, count: usize },
    /// The most recent calls cycle through only `distinct` signatures.
    Collapsed { distinct: usize, span: usize },
}

impl LoopVerdict {
    pub fn is_loop(&self) -> bool {
        !matches!(self, LoopVerdict::Progressing)
    }
}

/// Stable signature of a tool call: name plus truncated serialized arguments.
pub fn tool_signature(tool: &str, args: &Value, truncate_chars: usize) -> String {
    // serde_json orders object keys, so equal arguments serialize equally.
    let serialized = serde_json::to_string(args).unwrap_or_default();
    let truncated: String = serialized.chars().take(truncate_chars).collect();
    format!("{tool}:{truncated}")
}

#[derive(Debug, Clone)]
pub struct LoopDetector {
    config: LoopDetectorConfig,
    recent: VecDeque<String>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            config,
            recent: VecDeque::with_capacity(config.window),
        }
    }

    /// Forget all recorded calls (a new prompt starts a fresh window).
    pub fn reset(&mut self) {
        self.recent.clear();
    }

    /// Record a tool call and report whether the window now looks like a loop.
    pub fn record(&mut self, tool: &str, args: &Value) -> LoopVerdict {
        let signature = tool_signature(tool, args, self.config.args_truncate_chars);
        self.record_signature(signature)
    }

    pub fn record_signature(&mut self, signature: String) -> LoopVerdict {
        if self.recent.len() == self.config.window {
            self.recent.pop_front();
        }
        self.recent.push_back(signature);
        self.verdict()
    }

    fn verdict(&self) -> LoopVerdict {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for signature in &self.recent {
            *counts.entry(signature.as_str()).or_default() += 1;
        }
        if let Some((signature, count)) = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.config.max_repeats)
            .max_by_key(|(_, count)| *count)
        {
            return LoopVerdict::Repeated {
                signature: signature.to_string(),
                count,
            };
        }

        let span = self.config.collapse_span;
        if span > 0 && self.recent.len() >= span {
            let distinct: BTreeSet<&str> = self
                .recent
                .iter()
                .rev()
                .take(span)
                .map(String::as_str)
                .collect();
            if distinct.len() <= self.config.min_distinct {
                return LoopVerdict::Collapsed {
                    distinct: distinct.len(),
                    span,
                };
            }
        }

        LoopVerdict::Progressing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> LoopDetector {
        LoopDetector::new(LoopDetectorConfig::default())
    }

    #[test]
    fn five_identical_calls_trigger() {
        let mut d = detector();
        let args = json!({"path": "src/lib.rs"});
        for _ in 0..4 {
            assert_eq!(d.record("read", &args), LoopVerdict::Progressing);
        }
        assert_eq!(
            d.record("read", &args),
            LoopVerdict::Repeated {
                signature: "read:{\"path\":\"src/lib.rs\"}".to_string(),
                count: 5,
            }
        );
    }

    #[test]
    fn four_identical_then_distinct_does_not_trigger() {
        let mut d = detector();
        let args = json!({"path": "src/lib.rs"});
        for _ in 0..4 {
            assert!(!d.record("read", &args).is_loop());
        }
        assert!(!d.record("grep", &json!({"pattern": "fn main"})).is_loop());
    }

    #[test]
    fn repeats_outside_the_window_are_forgotten() {
        let mut d = detector();
        let same = json!({"path": "a"});
        for _ in 0..4 {
            d.record("read", &same);
        }
        for i in 0..10 {
            assert!(!d.record("read", &json!({"path": format!("other-{i}")})).is_loop());
        }
        // The earlier four fell out of the window.
        assert!(!d.record("read", &same).is_loop());
    }

    #[test]
    fn alternating_pair_collapses() {
        let mut d = detector();
        let mut last = LoopVerdict::Progressing;
        for i in 0..8 {
            let tool = if i % 2 == 0 { "read" } else { "edit" };
            last = d.record(tool, &json!({"path": "a"}));
        }
        assert_eq!(last, LoopVerdict::Collapsed { distinct: 2, span: 8 });
    }

    #[test]
    fn signature_truncates_arguments() {
        let long = json!({"text": "x".repeat(500)});
        let sig = tool_signature("write", &long, 20);
        assert_eq!(sig.chars().count(), "write:".len() + 20);
    }

    #[test]
    fn reset_clears_history() {
        let mut d = detector();
        let args = json!({});
        for _ in 0..4 {
            d.record("list", &args);
        }
        d.reset();
        assert!(!d.record("list", &args).is_loop());
    }
}
