//! Best-effort text completion used by the intent classifier.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::io::config::LlmConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionOptions {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            system: None,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Text completion API.
///
/// `Ok(None)` means the model answered with nothing usable.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `chat/completions` client.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("create llm http client")?;
        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            model: config.model.clone(),
        })
    }
}

fn chat_messages(prompt: &str, options: &CompletionOptions) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = options.system.as_deref() {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));
    messages
}

fn first_content(response: ChatCompletionsResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Option<String>> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": options.temperature,
                "max_tokens": options.max_tokens,
                "messages": chat_messages(prompt, options),
            }))
            .send()
            .await
            .context("call chat completions api")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(300).collect();
            bail!("chat completions request failed: HTTP {status} {body}");
        }

        let parsed: ChatCompletionsResponse = response
            .json()
            .await
            .context("decode chat completions response")?;
        Ok(first_content(parsed))
    }
}

/// Client used when no API key is configured; every call yields nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCompletion;

#[async_trait]
impl CompletionClient for DisabledCompletion {
    async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_content_is_none() {
        let parsed: ChatCompletionsResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  \n"}}]}"#).expect("decode");
        assert_eq!(first_content(parsed), None);

        let parsed: ChatCompletionsResponse =
            serde_json::from_str(r#"{"choices":[]}"#).expect("decode");
        assert_eq!(first_content(parsed), None);
    }

    #[test]
    fn content_is_trimmed() {
        let parsed: ChatCompletionsResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":" CONCESSION \n"}}]}"#)
                .expect("decode");
        assert_eq!(first_content(parsed).as_deref(), Some("CONCESSION"));
    }

    #[test]
    fn system_prompt_precedes_user_prompt() {
        let options = CompletionOptions::from_config(&LlmConfig::default()).with_system("classify");
        let messages = chat_messages("hello", &options);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hello");
    }

    #[tokio::test]
    async fn disabled_client_yields_nothing() {
        let options = CompletionOptions::from_config(&LlmConfig::default());
        assert_eq!(
            DisabledCompletion.complete("x", &options).await.expect("complete"),
            None
        );
    }
}
