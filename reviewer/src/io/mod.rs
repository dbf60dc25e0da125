//! I/O adapters for the reviewer.

pub mod agent;
pub mod config;
pub mod event;
pub mod github;
pub mod llm;
pub mod prompt;
