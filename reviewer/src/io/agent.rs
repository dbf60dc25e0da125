//! Agent server client.
//!
//! The agent runs as a separate server process. Prompts go over JSON HTTP;
//! progress comes back as a server-sent-events stream shared by all sessions,
//! so every event carries the session it belongs to.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::completion::Activity;

pub type SessionId = String;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Event observed on the agent stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Session status changed (`busy = false` means idle).
    Status { session_id: SessionId, busy: bool },
    Idle { session_id: SessionId },
    /// Message text was created or streamed.
    MessageUpdated { session_id: SessionId },
    ToolCall {
        session_id: SessionId,
        /// Id of the tool part; a call is reported once per id. Calls
        /// without one are never deduplicated.
        call_id: Option<String>,
        tool: String,
        args: Value,
    },
    /// Agent-side failure. Errors without a session apply to every session.
    Error {
        session_id: Option<SessionId>,
        message: String,
    },
}

impl AgentEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            AgentEvent::Status { session_id, .. }
            | AgentEvent::Idle { session_id }
            | AgentEvent::MessageUpdated { session_id }
            | AgentEvent::ToolCall { session_id, .. } => Some(session_id),
            AgentEvent::Error { session_id, .. } => session_id.as_deref(),
        }
    }

    /// Whether this event concerns `session`.
    pub fn belongs_to(&self, session: &str) -> bool {
        self.session_id().is_none_or(|id| id == session)
    }

    pub fn into_activity(self) -> Activity {
        match self {
            AgentEvent::Status { busy: true, .. } => Activity::Busy,
            AgentEvent::Status { busy: false, .. } | AgentEvent::Idle { .. } => Activity::Idle,
            AgentEvent::MessageUpdated { .. } => Activity::Message,
            AgentEvent::ToolCall { tool, args, .. } => Activity::ToolCall { tool, args },
            AgentEvent::Error { message, .. } => Activity::Error { message },
        }
    }
}

/// Session API of the agent server.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Open the event stream. Events published before this call are not replayed.
    async fn subscribe(&self) -> Result<mpsc::Receiver<AgentEvent>>;
    async fn create_session(&self, title: &str) -> Result<SessionId>;
    /// Add context to the session without starting a turn.
    async fn send_system_prompt(&self, session: &str, prompt: &str) -> Result<()>;
    /// Start a turn and return immediately; completion is inferred from events.
    async fn send_prompt(&self, session: &str, prompt: &str) -> Result<()>;
    /// Run a turn and return the final assistant text.
    async fn send_prompt_and_get_response(&self, session: &str, prompt: &str) -> Result<String>;
    async fn delete_session(&self, session: &str) -> Result<()>;
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Raw bytes are buffered and only complete lines are decoded, so a UTF-8
/// sequence split across chunks survives. Only `data:` fields are kept;
/// multi-line data is joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk and return the payloads of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        events
    }
}

/// Map one stream payload to an event; unknown kinds are dropped.
pub fn parse_event(payload: &str) -> Option<AgentEvent> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let kind = value.get("type")?.as_str()?;
    let props = value.get("properties").cloned().unwrap_or(Value::Null);
    let session = |v: &Value| {
        v.get("sessionID")
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    match kind {
        "session.status" => {
            let status = props.pointer("/status/type")?.as_str()?;
            Some(AgentEvent::Status {
                session_id: session(&props)?,
                busy: status != "idle",
            })
        }
        "session.idle" => Some(AgentEvent::Idle {
            session_id: session(&props)?,
        }),
        "session.error" => {
            let message = props
                .pointer("/error/data/message")
                .or_else(|| props.pointer("/error/message"))
                .and_then(Value::as_str)
                .unwrap_or("agent reported an error")
                .to_string();
            Some(AgentEvent::Error {
                session_id: session(&props),
                message,
            })
        }
        "message.updated" => Some(AgentEvent::MessageUpdated {
            session_id: session(props.get("info")?)?,
        }),
        "message.part.updated" => {
            let part = props.get("part")?;
            let session_id = session(part)?;
            if part.get("type").and_then(Value::as_str) == Some("tool") {
                // Report a call once, when its input is known.
                let state = part.pointer("/state/status").and_then(Value::as_str);
                if state != Some("running") {
                    return Some(AgentEvent::MessageUpdated { session_id });
                }
                return Some(AgentEvent::ToolCall {
                    session_id,
                    call_id: part
                        .get("callID")
                        .or_else(|| part.get("id"))
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string),
                    tool: part.get("tool")?.as_str()?.to_string(),
                    args: part.pointer("/state/input").cloned().unwrap_or(Value::Null),
                });
            }
            Some(AgentEvent::MessageUpdated { session_id })
        }
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct MessagePart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn response_text(response: MessageResponse) -> String {
    response
        .parts
        .into_iter()
        .filter(|part| part.kind == "text")
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn text_parts(prompt: &str) -> Value {
    json!([{ "type": "text", "text": prompt }])
}

/// [`AgentBackend`] talking to an agent server over HTTP.
#[derive(Clone)]
pub struct HttpAgentBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAgentBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        // No overall timeout: the event stream stays open for the whole run.
        let http = reqwest::Client::builder()
            .build()
            .context("create agent http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, operation: &str, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("agent {operation} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("agent {operation} failed with status {}: {body}", status.as_u16());
        }
        Ok(response)
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn subscribe(&self) -> Result<mpsc::Receiver<AgentEvent>> {
        let url = format!("{}/event", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .context("open agent event stream")?;
        let status = response.status();
        if !status.is_success() {
            bail!("agent event stream failed with status {}", status.as_u16());
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut bytes = response.bytes_stream();
        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(err = %err, "agent event stream interrupted");
                        break;
                    }
                };
                for payload in decoder.push(&chunk) {
                    let Some(event) = parse_event(&payload) else {
                        continue;
                    };
                    if tx.send(event).await.is_err() {
                        debug!("agent event receiver dropped");
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn create_session(&self, title: &str) -> Result<SessionId> {
        let response = self
            .post_json("create session", "/session", &json!({ "title": title }))
            .await?;
        let info: SessionInfo = response.json().await.context("decode agent session")?;
        debug!(session = %info.id, "created agent session");
        Ok(info.id)
    }

    async fn send_system_prompt(&self, session: &str, prompt: &str) -> Result<()> {
        self.post_json(
            "send system prompt",
            &format!("/session/{session}/message"),
            &json!({ "noReply": true, "parts": text_parts(prompt) }),
        )
        .await?;
        Ok(())
    }

    async fn send_prompt(&self, session: &str, prompt: &str) -> Result<()> {
        self.post_json(
            "send prompt",
            &format!("/session/{session}/prompt_async"),
            &json!({ "parts": text_parts(prompt) }),
        )
        .await?;
        Ok(())
    }

    async fn send_prompt_and_get_response(&self, session: &str, prompt: &str) -> Result<String> {
        let response = self
            .post_json(
                "send prompt",
                &format!("/session/{session}/message"),
                &json!({ "parts": text_parts(prompt) }),
            )
            .await?;
        let message: MessageResponse = response.json().await.context("decode agent reply")?;
        Ok(response_text(message))
    }

    async fn delete_session(&self, session: &str) -> Result<()> {
        let url = format!("{}/session/{session}", self.base_url);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .context("agent delete session request failed")?;
        if !response.status().is_success() {
            bail!(
                "agent delete session failed with status {}",
                response.status().as_u16()
            );
        }
        Ok(())
    }
}
