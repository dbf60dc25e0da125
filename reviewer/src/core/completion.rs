//! Completion inference for one prompt sent to the agent.
//!
//! The agent never says "done". The tracker consumes activity observed on the
//! event stream and decides when the prompt has finished:
//!
//! ```text
//! idle -> busy -> idle-grace -> completed
//!            \-> looping (aborted)
//!            \-> error   (aborted)
//!            \-> timeout (aborted)
//! ```
//!
//! Time is passed in as the elapsed duration since the prompt was sent, which
//! keeps the machine deterministic; the async driver owns the clock.

use std::time::Duration;

use serde_json::Value;

use crate::core::loop_detector::{LoopDetector, LoopDetectorConfig, LoopVerdict};

/// Activity observed for the tracked session.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    /// Session reported it is working.
    Busy,
    /// Session reported it is idle.
    Idle,
    /// Message content streamed or updated.
    Message,
    /// The agent invoked a tool.
    ToolCall { tool: String, args: Value },
    /// Terminal error reported by the agent.
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionConfig {
    /// Quiet period after an idle signal before the prompt counts as finished.
    pub idle_grace: Duration,
    /// Outermost bound for the whole prompt.
    pub timeout: Duration,
    pub loops: LoopDetectorConfig,
}

/// Why a prompt was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Looping(LoopVerdict),
    AgentError { message: String },
    Timeout { elapsed: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Busy,
    /// Idle was reported at `since`; completes once the grace window passes quietly.
    IdleGrace { since: Duration },
    Completed,
    Aborted(AbortReason),
}

/// Decision after feeding the tracker an activity or a clock tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Completed,
    Aborted(AbortReason),
}

#[derive(Debug, Clone)]
pub struct CompletionTracker {
    config: CompletionConfig,
    phase: Phase,
    loops: LoopDetector,
    tool_calls: usize,
}

impl CompletionTracker {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            loops: LoopDetector::new(config.loops),
            tool_calls: 0,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn tool_calls(&self) -> usize {
        self.tool_calls
    }

    /// Feed one activity observed at `now`.
    pub fn observe(&mut self, activity: Activity, now: Duration) -> Step {
        if let Some(step) = self.terminal_step() {
            return step;
        }
        // The overall timeout wins over anything the stream says.
        if now >= self.config.timeout {
            return self.abort(AbortReason::Timeout { elapsed: now });
        }

        match activity {
            Activity::Error { message } => self.abort(AbortReason::AgentError { message }),
            Activity::ToolCall { tool, args } => {
                self.tool_calls += 1;
                let verdict = self.loops.record(&tool, &args);
                if verdict.is_loop() {
                    return self.abort(AbortReason::Looping(verdict));
                }
                self.phase = Phase::Busy;
                Step::Continue
            }
            Activity::Busy | Activity::Message => {
                // Cancels any pending grace window.
                self.phase = Phase::Busy;
                Step::Continue
            }
            Activity::Idle => {
                if !matches!(self.phase, Phase::IdleGrace { .. }) {
                    self.phase = Phase::IdleGrace { since: now };
                }
                Step::Continue
            }
        }
    }

    /// Advance the clock without new activity.
    pub fn tick(&mut self, now: Duration) -> Step {
        if let Some(step) = self.terminal_step() {
            return step;
        }
        if now >= self.config.timeout {
            return self.abort(AbortReason::Timeout { elapsed: now });
        }
        if let Phase::IdleGrace { since } = self.phase
            && now.saturating_sub(since) >= self.config.idle_grace
        {
            self.phase = Phase::Completed;
            return Step::Completed;
        }
        Step::Continue
    }

    /// Next instant at which `tick` may change the outcome.
    pub fn next_deadline(&self) -> Option<Duration> {
        match self.phase {
            Phase::Completed | Phase::Aborted(_) => None,
            Phase::IdleGrace { since } => {
                Some(since.saturating_add(self.config.idle_grace).min(self.config.timeout))
            }
            Phase::Idle | Phase::Busy => Some(self.config.timeout),
        }
    }

    fn terminal_step(&self) -> Option<Step> {
        match &self.phase {
            Phase::Completed => Some(Step::Completed),
            Phase::Aborted(reason) => Some(Step::Aborted(reason.clone())),
            _ => None,
        }
    }

    fn abort(&mut self, reason: AbortReason) -> Step {
        self.phase = Phase::Aborted(reason.clone());
        Step::Aborted(reason)
    }
}
