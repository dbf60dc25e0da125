//! Agent session driving: one prompt at a time, completion inferred from events.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::completion::{AbortReason, CompletionConfig, CompletionTracker, Step};
use crate::core::loop_detector::LoopVerdict;
use crate::io::agent::{AgentBackend, AgentEvent, SessionId};
use crate::io::config::ReviewerConfig;

/// Why a prompt did not complete.
#[derive(Debug)]
pub enum SessionError {
    Looping(LoopVerdict),
    Timeout { elapsed: Duration },
    /// The agent reported an error for this session.
    Agent { message: String },
    StreamClosed,
    /// A request to the agent server failed.
    Backend(anyhow::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Looping(LoopVerdict::Repeated { signature, count }) => {
                write!(f, "agent is looping: {signature} repeated {count} times")
            }
            SessionError::Looping(LoopVerdict::Collapsed { distinct, span }) => write!(
                f,
                "agent is looping: last {span} tool calls cycle through {distinct} signatures"
            ),
            SessionError::Looping(LoopVerdict::Progressing) => write!(f, "agent is looping"),
            SessionError::Timeout { elapsed } => {
                write!(f, "agent did not finish within {}s", elapsed.as_secs())
            }
            SessionError::Agent { message } => write!(f, "agent error: {message}"),
            SessionError::StreamClosed => write!(f, "agent event stream closed"),
            SessionError::Backend(_) => write!(f, "agent request failed"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Backend(err) => Some(&**err),
            _ => None,
        }
    }
}

impl From<AbortReason> for SessionError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::Looping(verdict) => SessionError::Looping(verdict),
            AbortReason::AgentError { message } => SessionError::Agent { message },
            AbortReason::Timeout { elapsed } => SessionError::Timeout { elapsed },
        }
    }
}

/// Timing knobs for sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub completion: CompletionConfig,
    pub response_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &ReviewerConfig) -> Self {
        Self {
            completion: config.completion(),
            response_timeout: Duration::from_secs(config.session.response_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptOutcome {
    pub tool_calls: usize,
    pub elapsed: Duration,
}

/// One agent session with its own event subscription.
pub struct SessionDriver {
    backend: Arc<dyn AgentBackend>,
    events: mpsc::Receiver<AgentEvent>,
    session: SessionId,
    settings: SessionSettings,
}

impl SessionDriver {
    /// Subscribe, create a session and prime it with `system_prompt`.
    ///
    /// The subscription is opened first so no event of the new session is missed.
    #[instrument(skip_all, fields(title))]
    pub async fn start(
        backend: Arc<dyn AgentBackend>,
        title: &str,
        system_prompt: &str,
        settings: SessionSettings,
    ) -> Result<Self> {
        let events = backend
            .subscribe()
            .await
            .context("subscribe to agent events")?;
        let session = backend
            .create_session(title)
            .await
            .context("create agent session")?;
        backend
            .send_system_prompt(&session, system_prompt)
            .await
            .with_context(|| format!("send system prompt to session {session}"))?;
        info!(session = %session, "agent session started");
        Ok(Self {
            backend,
            events,
            session,
            settings,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session
    }

    /// Send `prompt` and wait until the agent is done with it.
    #[instrument(skip_all, fields(session = %self.session))]
    pub async fn run_prompt(&mut self, prompt: &str) -> Result<PromptOutcome, SessionError> {
        let mut stale = 0usize;
        while self.events.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "dropped events from an earlier prompt");
        }

        self.backend
            .send_prompt(&self.session, prompt)
            .await
            .map_err(SessionError::Backend)?;

        let started = Instant::now();
        let mut tracker = CompletionTracker::new(self.settings.completion);
        let mut seen_calls: HashSet<String> = HashSet::new();
        loop {
            let deadline = tracker
                .next_deadline()
                .unwrap_or(self.settings.completion.timeout);
            let wake = started.checked_add(deadline);
            let step = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if !event.belongs_to(&self.session) {
                            continue;
                        }
                        if let AgentEvent::ToolCall { call_id: Some(call_id), .. } = &event
                            && !seen_calls.insert(call_id.clone())
                        {
                            continue;
                        }
                        tracker.observe(event.into_activity(), started.elapsed())
                    }
                    None => return Err(SessionError::StreamClosed),
                },
                () = sleep_until(wake) => tracker.tick(started.elapsed()),
            };
            match step {
                Step::Continue => {}
                Step::Completed => {
                    let outcome = PromptOutcome {
                        tool_calls: tracker.tool_calls(),
                        elapsed: started.elapsed(),
                    };
                    debug!(
                        tool_calls = outcome.tool_calls,
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "prompt completed"
                    );
                    return Ok(outcome);
                }
                Step::Aborted(reason) => {
                    let err = SessionError::from(reason);
                    warn!(err = %err, "prompt aborted");
                    return Err(err);
                }
            }
        }
    }

    /// Send `prompt` and return the agent's final text.
    pub async fn ask(&mut self, prompt: &str) -> Result<String, SessionError> {
        let request = self
            .backend
            .send_prompt_and_get_response(&self.session, prompt);
        match tokio::time::timeout(self.settings.response_timeout, request).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(err)) => Err(SessionError::Backend(err)),
            Err(_) => Err(SessionError::Timeout {
                elapsed: self.settings.response_timeout,
            }),
        }
    }

    pub async fn close(self) -> Result<()> {
        self.backend
            .delete_session(&self.session)
            .await
            .with_context(|| format!("delete session {}", self.session))
    }
}

/// Sleep until `wake`; a deadline past the clock's range never fires.
async fn sleep_until(wake: Option<Instant>) {
    match wake {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// The run's shared session, started on first use.
pub struct SessionSlot {
    backend: Arc<dyn AgentBackend>,
    title: String,
    system_prompt: String,
    settings: SessionSettings,
    driver: Option<SessionDriver>,
}

impl SessionSlot {
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        title: impl Into<String>,
        system_prompt: impl Into<String>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            backend,
            title: title.into(),
            system_prompt: system_prompt.into(),
            settings,
            driver: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.driver.is_some()
    }

    pub async fn driver(&mut self) -> Result<&mut SessionDriver> {
        if self.driver.is_none() {
            let driver = SessionDriver::start(
                Arc::clone(&self.backend),
                &self.title,
                &self.system_prompt,
                self.settings,
            )
            .await?;
            self.driver = Some(driver);
        }
        self.driver.as_mut().context("agent session unavailable")
    }

    /// A throwaway session that shares nothing with the slot's session.
    pub async fn detached(&self, title: &str) -> Result<SessionDriver> {
        SessionDriver::start(
            Arc::clone(&self.backend),
            title,
            &self.system_prompt,
            self.settings,
        )
        .await
    }

    /// Drop the current session; the next [`driver`](Self::driver) call starts a new one.
    pub async fn reset(&mut self) {
        if let Some(driver) = self.driver.take() {
            let session = driver.session_id().to_string();
            if let Err(err) = driver.close().await {
                warn!(session = %session, err = %format!("{err:#}"), "failed to delete agent session");
            }
        }
    }

    pub async fn close(&mut self) {
        self.reset().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loop_detector::LoopDetectorConfig;
    use crate::test_support::{ScriptedAgent, ScriptedEvent, quick_turn};
    use serde_json::json;

    fn settings() -> SessionSettings {
        SessionSettings {
            completion: CompletionConfig {
                idle_grace: Duration::from_secs(2),
                timeout: Duration::from_secs(60),
                loops: LoopDetectorConfig::default(),
            },
            response_timeout: Duration::from_secs(30),
        }
    }

    async fn driver(agent: &ScriptedAgent) -> SessionDriver {
        SessionDriver::start(Arc::new(agent.clone()), "review", "system", settings())
            .await
            .expect("start")
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_completes_after_idle_grace() {
        let agent = ScriptedAgent::new();
        let mut d = driver(&agent).await;
        let outcome = d.run_prompt("review").await.expect("complete");
        assert_eq!(outcome.tool_calls, 1);
        // Idle at 40ms plus the 2s grace window.
        assert!(outcome.elapsed >= Duration::from_millis(2040));
        assert_eq!(
            agent.calls(),
            vec!["subscribe", "create_session", "send_system_prompt", "send_prompt"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn activity_during_grace_keeps_the_prompt_running() {
        let agent = ScriptedAgent::new();
        agent.push_script(vec![
            (ms(10), ScriptedEvent::Busy),
            (ms(10), ScriptedEvent::Idle),
            (Duration::from_secs(1), ScriptedEvent::Message),
            (ms(10), ScriptedEvent::Idle),
        ]);
        let mut d = driver(&agent).await;
        let outcome = d.run_prompt("go").await.expect("complete");
        assert!(outcome.elapsed >= Duration::from_millis(3030));
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_events_are_ignored() {
        let agent = ScriptedAgent::new();
        agent.push_script(vec![
            (ms(10), ScriptedEvent::Busy),
            (
                ms(10),
                ScriptedEvent::Foreign(Box::new(ScriptedEvent::Error("other session".to_string()))),
            ),
            (ms(10), ScriptedEvent::Idle),
        ]);
        let mut d = driver(&agent).await;
        assert!(d.run_prompt("go").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_tool_calls_abort_as_loop() {
        let agent = ScriptedAgent::new();
        let call = ScriptedEvent::tool("read", json!({"path": "src/lib.rs"}));
        agent.push_script(vec![(ms(10), call); 6]);
        let mut d = driver(&agent).await;
        let err = d.run_prompt("go").await.expect_err("loop");
        assert!(
            matches!(err, SessionError::Looping(LoopVerdict::Repeated { count: 5, .. })),
            "{err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_calls_without_ids_still_abort_as_loop() {
        let agent = ScriptedAgent::new();
        let call = ScriptedEvent::unnamed_tool("read", json!({"path": "src/lib.rs"}));
        agent.push_script(vec![(ms(10), call); 6]);
        let mut d = driver(&agent).await;
        let err = d.run_prompt("go").await.expect_err("loop");
        assert!(
            matches!(err, SessionError::Looping(LoopVerdict::Repeated { count: 5, .. })),
            "{err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_does_not_overflow_the_deadline() {
        let agent = ScriptedAgent::new();
        let mut settings = settings();
        settings.completion.timeout = Duration::MAX;
        let mut d = SessionDriver::start(Arc::new(agent.clone()), "review", "system", settings)
            .await
            .expect("start");
        let outcome = d.run_prompt("go").await.expect("complete");
        assert_eq!(outcome.tool_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn agent_error_aborts() {
        let agent = ScriptedAgent::new();
        agent.push_script(vec![
            (ms(10), ScriptedEvent::Busy),
            (ms(10), ScriptedEvent::Error("model overloaded".to_string())),
        ]);
        let mut d = driver(&agent).await;
        let err = d.run_prompt("go").await.expect_err("error");
        assert_eq!(err.to_string(), "agent error: model overloaded");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_agent_times_out() {
        let agent = ScriptedAgent::new();
        agent.push_script(vec![(ms(10), ScriptedEvent::Busy)]);
        let mut d = driver(&agent).await;
        let err = d.run_prompt("go").await.expect_err("timeout");
        assert!(matches!(err, SessionError::Timeout { elapsed } if elapsed >= Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn ask_returns_text_and_wraps_backend_errors() {
        let agent = ScriptedAgent::new();
        agent.push_response("{\"fixed\":[]}");
        let mut d = driver(&agent).await;
        assert_eq!(d.ask("verify").await.expect("text"), "{\"fixed\":[]}");
        let err = d.ask("again").await.expect_err("no response");
        assert!(matches!(err, SessionError::Backend(_)));
        let chained = format!("{:#}", anyhow::Error::new(err));
        assert!(chained.contains("no scripted agent response"), "{chained}");
    }

    #[tokio::test(start_paused = true)]
    async fn slot_starts_lazily_and_reset_starts_fresh() {
        let agent = ScriptedAgent::new();
        agent.push_script(quick_turn());
        let mut slot = SessionSlot::new(Arc::new(agent.clone()), "review", "system", settings());
        assert!(!slot.is_active());
        assert_eq!(agent.sessions_created(), 0);

        let first = slot.driver().await.expect("driver").session_id().to_string();
        slot.driver().await.expect("driver").run_prompt("go").await.expect("prompt");
        assert_eq!(agent.sessions_created(), 1);

        slot.reset().await;
        let second = slot.driver().await.expect("driver").session_id().to_string();
        assert_ne!(first, second);
        slot.close().await;
        assert!(!slot.is_active());
        assert!(agent.calls().contains(&"delete_session".to_string()));
    }
}
