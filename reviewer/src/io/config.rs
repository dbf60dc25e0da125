//! Reviewer configuration stored at `.github/reviewer.toml`.
//!
//! Secrets are never read from this file; see [`Secrets`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::completion::CompletionConfig;
use crate::core::loop_detector::LoopDetectorConfig;

/// Default location relative to the repository root.
pub const DEFAULT_CONFIG_PATH: &str = ".github/reviewer.toml";

/// Upper bound for any configured wait, in seconds (one day).
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

/// Upper bound for `review.session_retries`.
pub const MAX_SESSION_RETRIES: u32 = 10;

/// Reviewer configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values
/// the bot ships with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReviewerConfig {
    /// Login the bot posts as; its comments are the only trusted block source.
    pub bot_login: String,

    /// Handle that addresses the bot in comments (e.g. `@reviewer`).
    pub mention: String,

    pub review: ReviewConfig,
    pub session: SessionConfig,
    pub loop_detection: LoopDetectionConfig,
    pub similarity: SimilarityConfig,
    pub github: GithubConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Maximum review passes per commit.
    pub passes: u32,
    /// Open findings at or above this score block the merge gate.
    pub blocking_score_threshold: u8,
    /// Check the PR description before automatic reviews.
    pub require_description: bool,
    /// Post start/end comments for manually requested reviews.
    pub post_manual_progress_comments: bool,
    /// Additional attempts after a failed review session.
    pub session_retries: u32,
    /// Backoff unit between attempts; attempt `n` waits `n * retry_backoff_secs`.
    pub retry_backoff_secs: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            passes: 3,
            blocking_score_threshold: 8,
            require_description: false,
            post_manual_progress_comments: true,
            session_retries: 2,
            retry_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_grace_secs: u64,
    /// Wall-clock bound for one prompt.
    pub prompt_timeout_secs: u64,
    /// Bound for a request that returns the agent's reply directly.
    pub response_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_grace_secs: 10,
            prompt_timeout_secs: 30 * 60,
            response_timeout_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopDetectionConfig {
    pub window: usize,
    pub max_repeats: usize,
    pub min_distinct: usize,
    pub args_truncate_chars: usize,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        let defaults = LoopDetectorConfig::default();
        Self {
            window: defaults.window,
            max_repeats: defaults.max_repeats,
            min_distinct: defaults.min_distinct,
            args_truncate_chars: defaults.args_truncate_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Word-overlap ratio at or above which a finding is a duplicate.
    pub duplicate_threshold: f64,
    /// Findings within this many lines of each other are compared.
    pub line_window: u32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.5,
            line_window: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: String,
    pub per_page: u32,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: u32,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            per_page: 100,
            request_timeout_ms: 30_000,
            retry_max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 64,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent server started by the workflow before the reviewer runs.
    pub base_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4096".to_string(),
        }
    }
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            bot_login: "github-actions[bot]".to_string(),
            mention: "@reviewer".to_string(),
            review: ReviewConfig::default(),
            session: SessionConfig::default(),
            loop_detection: LoopDetectionConfig::default(),
            similarity: SimilarityConfig::default(),
            github: GithubConfig::default(),
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl ReviewerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bot_login.trim().is_empty() {
            return Err(anyhow!("bot_login must be non-empty"));
        }
        if self.mention.trim().trim_start_matches('@').is_empty() {
            return Err(anyhow!("mention must name a handle"));
        }
        if self.review.passes == 0 {
            return Err(anyhow!("review.passes must be > 0"));
        }
        if !(1..=10).contains(&self.review.blocking_score_threshold) {
            return Err(anyhow!("review.blocking_score_threshold must be within 1..=10"));
        }
        if self.review.session_retries > MAX_SESSION_RETRIES {
            return Err(anyhow!("review.session_retries must be <= {MAX_SESSION_RETRIES}"));
        }
        if self.review.retry_backoff_secs > MAX_WAIT_SECS {
            return Err(anyhow!("review.retry_backoff_secs must be <= {MAX_WAIT_SECS}"));
        }
        check_wait("session.idle_grace_secs", self.session.idle_grace_secs)?;
        check_wait("session.prompt_timeout_secs", self.session.prompt_timeout_secs)?;
        check_wait("session.response_timeout_secs", self.session.response_timeout_secs)?;
        let loops = &self.loop_detection;
        if loops.window == 0 {
            return Err(anyhow!("loop_detection.window must be > 0"));
        }
        if loops.max_repeats < 2 || loops.max_repeats > loops.window {
            return Err(anyhow!(
                "loop_detection.max_repeats must be within 2..=window ({})",
                loops.window
            ));
        }
        let collapse_span = self.loop_detector().collapse_span;
        if loops.min_distinct == 0 || loops.min_distinct >= collapse_span {
            return Err(anyhow!(
                "loop_detection.min_distinct must be within 1..{collapse_span}"
            ));
        }
        if loops.args_truncate_chars == 0 {
            return Err(anyhow!("loop_detection.args_truncate_chars must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.similarity.duplicate_threshold)
            || self.similarity.duplicate_threshold == 0.0
        {
            return Err(anyhow!("similarity.duplicate_threshold must be within (0, 1]"));
        }
        if self.github.per_page == 0 || self.github.per_page > 100 {
            return Err(anyhow!("github.per_page must be within 1..=100"));
        }
        if self.github.request_timeout_ms == 0 || self.github.request_timeout_ms > MAX_WAIT_SECS * 1000 {
            return Err(anyhow!(
                "github.request_timeout_ms must be within 1..={}",
                MAX_WAIT_SECS * 1000
            ));
        }
        if self.github.retry_max_attempts == 0 {
            return Err(anyhow!("github.retry_max_attempts must be > 0"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(anyhow!("llm.model must be non-empty"));
        }
        check_wait("llm.request_timeout_secs", self.llm.request_timeout_secs)?;
        if self.agent.base_url.trim().is_empty() {
            return Err(anyhow!("agent.base_url must be non-empty"));
        }
        Ok(())
    }

    pub fn loop_detector(&self) -> LoopDetectorConfig {
        let loops = &self.loop_detection;
        LoopDetectorConfig {
            window: loops.window,
            max_repeats: loops.max_repeats,
            collapse_span: LoopDetectorConfig::default().collapse_span.min(loops.window),
            min_distinct: loops.min_distinct,
            args_truncate_chars: loops.args_truncate_chars,
        }
    }

    pub fn completion(&self) -> CompletionConfig {
        CompletionConfig {
            idle_grace: Duration::from_secs(self.session.idle_grace_secs),
            timeout: Duration::from_secs(self.session.prompt_timeout_secs),
            loops: self.loop_detector(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ReviewerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ReviewerConfig> {
    if !path.exists() {
        let cfg = ReviewerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ReviewerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ReviewerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Credentials taken from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub github_token: String,
    /// Optional: without a key, intent classification falls back everywhere.
    pub llm_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("github_token", &"<redacted>")
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let github_token = non_empty("GITHUB_TOKEN").context("GITHUB_TOKEN is not set")?;
        Ok(Self {
            github_token,
            llm_api_key: non_empty("LLM_API_KEY"),
        })
    }
}

fn check_wait(name: &str, secs: u64) -> Result<()> {
    if secs == 0 || secs > MAX_WAIT_SECS {
        return Err(anyhow!("{name} must be within 1..={MAX_WAIT_SECS}"));
    }
    Ok(())
}
