//! One review run: resolve the pull request, rebuild state, detect and execute tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::classifier::IntentClassifier;
use crate::core::types::{ExecutionResult, ProcessState, Task, short_sha};
use crate::detect::TaskDetector;
use crate::exit_codes;
use crate::io::agent::{AgentBackend, HttpAgentBackend};
use crate::io::config::{ReviewerConfig, Secrets};
use crate::io::event::RunContext;
use crate::io::github::{CommentStore, GithubClient, RepoRef};
use crate::io::llm::{CompletionClient, CompletionOptions, DisabledCompletion, OpenAiClient};
use crate::io::prompt;
use crate::orchestrate::Orchestrator;
use crate::session::{SessionSettings, SessionSlot};
use crate::state::StateStore;

/// External services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub comments: Arc<dyn CommentStore>,
    pub agent: Arc<dyn AgentBackend>,
    pub completion: Arc<dyn CompletionClient>,
}

impl Collaborators {
    pub fn connect(config: &ReviewerConfig, secrets: &Secrets, repo: RepoRef) -> Result<Self> {
        let comments = GithubClient::new(&config.github, &secrets.github_token, repo)?;
        let completion: Arc<dyn CompletionClient> = match &secrets.llm_api_key {
            Some(key) => Arc::new(OpenAiClient::new(
                &config.llm,
                key,
                Duration::from_secs(config.llm.request_timeout_secs),
            )?),
            None => {
                warn!("LLM_API_KEY is not set; intent classification uses fallbacks");
                Arc::new(DisabledCompletion)
            }
        };
        let agent = HttpAgentBackend::new(&config.agent.base_url)?;
        Ok(Self {
            comments: Arc::new(comments),
            agent: Arc::new(agent),
            completion,
        })
    }
}

/// Pick the pull request to work on.
///
/// An explicit `pr` wins over the CI event. Returns `None` when the event
/// does not concern a pull request.
pub fn resolve_context(repo: Option<&str>, pr: Option<u64>) -> Result<Option<RunContext>> {
    let Some(pr) = pr else {
        return RunContext::from_env();
    };
    let repo = match repo {
        Some(repo) => repo.to_string(),
        None => std::env::var("GITHUB_REPOSITORY")
            .context("--repo is required when GITHUB_REPOSITORY is not set")?,
    };
    Ok(Some(RunContext::manual(RepoRef::parse(&repo)?, pr)))
}

/// What a run detected and, unless it was a dry run, what execution produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub context: RunContext,
    pub head: String,
    pub tasks: Vec<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.result.as_ref().map_or(exit_codes::OK, exit_code)
    }
}

/// Exit status for an executed batch. A blocked merge gate wins over task failures.
pub fn exit_code(result: &ExecutionResult) -> i32 {
    if result.should_fail_gate() {
        exit_codes::BLOCKING
    } else if result.failed_tasks() > 0 {
        exit_codes::TASK_FAILED
    } else {
        exit_codes::OK
    }
}

/// Rebuild the review state of the pull request in `ctx`.
pub async fn load_state(
    config: &ReviewerConfig,
    collaborators: &Collaborators,
    ctx: &RunContext,
) -> Result<ProcessState> {
    let store = StateStore::load(Arc::clone(&collaborators.comments), ctx.pr, &config.bot_login).await?;
    Ok(store.state().clone())
}

/// Detect the pending tasks and, unless `dry_run`, execute them.
///
/// Errors are initialization failures; task failures are reported in the result.
#[instrument(skip_all, fields(repo = %ctx.repo, pr = ctx.pr, trigger = ctx.trigger.action()))]
pub async fn review_pull_request(
    config: &ReviewerConfig,
    collaborators: &Collaborators,
    ctx: &RunContext,
    dry_run: bool,
) -> Result<RunReport> {
    let pr = collaborators
        .comments
        .pull_request(ctx.pr)
        .await
        .with_context(|| format!("fetch pull request #{}", ctx.pr))?;
    let head = pr.head_sha.clone();
    if let Some(event_head) = ctx.head_sha.as_deref()
        && event_head != head
    {
        debug!(event_head = short_sha(event_head), head = short_sha(&head), "head moved since the event");
    }

    let mut store = StateStore::load(Arc::clone(&collaborators.comments), ctx.pr, &config.bot_login).await?;
    let classifier = IntentClassifier::new(
        Arc::clone(&collaborators.completion),
        CompletionOptions::from_config(&config.llm),
    );
    let tasks = TaskDetector::new(config, &classifier, dry_run)
        .detect_all_tasks(&mut store, ctx, &head)
        .await;
    if dry_run || tasks.is_empty() {
        info!(tasks = tasks.len(), dry_run, "nothing to execute");
        return Ok(RunReport {
            context: ctx.clone(),
            head,
            tasks,
            result: (!dry_run).then(ExecutionResult::default),
        });
    }

    let system_prompt = prompt::system(&ctx.repo.to_string(), &pr, &config.mention)?;
    let slot = SessionSlot::new(
        Arc::clone(&collaborators.agent),
        format!("review {}#{}", ctx.repo, ctx.pr),
        system_prompt,
        SessionSettings::from_config(config),
    );
    let result = Orchestrator::new(config, &classifier, slot, pr)
        .execute(&mut store, tasks.clone())
        .await;
    info!(
        failed = result.failed_tasks(),
        blocking = result.has_blocking_issues,
        gate_blocked = result.gate_blocked,
        "run finished"
    );
    Ok(RunReport {
        context: ctx.clone(),
        head,
        tasks,
        result: Some(result),
    })
}
