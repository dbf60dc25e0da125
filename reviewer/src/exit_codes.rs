//! Stable exit codes for reviewer CLI commands.

/// Run succeeded (no gating blocking issues, no failed tasks).
pub const OK: i32 = 0;
/// Invalid configuration, missing event payload, or initialization failure.
pub const INVALID: i32 = 1;
/// An automatic review left blocking issues open; the merge gate must fail.
pub const BLOCKING: i32 = 2;
/// One or more tasks failed; the remaining tasks still ran.
pub const TASK_FAILED: i32 = 3;
