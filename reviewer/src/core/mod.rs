//! Deterministic, pure logic shared by the reviewer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod block;
pub mod completion;
pub mod loop_detector;
pub mod question;
pub mod report;
pub mod similarity;
pub mod types;
