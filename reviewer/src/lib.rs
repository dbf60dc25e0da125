//! Pull-request review agent that keeps all of its state in PR comments.
//!
//! Every invocation re-derives the outstanding work for one pull request by
//! re-reading its comment history, then drives each unit of work through a
//! single long-lived agent session. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (status block codec, similarity,
//!   mention parsing, loop detection, completion state machine). No I/O, fully
//!   testable in isolation.
//! - **[`io`]**: Side-effecting adapters (GitHub comments, LLM completions,
//!   agent server, CI event payload, config). Hidden behind traits so tests
//!   can script them.
//!
//! Orchestration modules ([`state`], [`classifier`], [`detect`], [`session`],
//! [`review`], [`orchestrate`], [`run`]) coordinate core logic with I/O to
//! implement a review run.

pub mod classifier;
pub mod core;
pub mod detect;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod review;
pub mod run;
pub mod session;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
