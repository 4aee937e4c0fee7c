use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::retry::{retry_with_backoff, RetryPolicy};
use super::{CodeBackend, Completion, Message, Role, Usage};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::http_client::build_http_client_with_timeout;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CLAUDE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct ClaudeClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl ClaudeClient {
    pub fn new(
        api_url: String,
        api_key: Option<String>,
        model: String,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model,
            retry,
            client: build_http_client_with_timeout(Some(CLAUDE_TIMEOUT))?,
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Self::new(
            config.claude_api_url.clone(),
            config.claude_api_key.clone(),
            config.claude_model.clone(),
            RetryPolicy::from(&config.retry),
        )
    }

    /// A single request with no retry.
    async fn send_once(
        &self,
        api_key: &str,
        system: &str,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<Completion> {
        let url = format!("{}/messages", self.api_url);

        // Anthropic takes the system prompt out of band; stray system turns are dropped.
        let wire_messages = messages
            .iter()
            .filter_map(|message| match message.role {
                Role::User => Some(WireMessage {
                    role: "user",
                    content: &message.content,
                }),
                Role::Assistant => Some(WireMessage {
                    role: "assistant",
                    content: &message.content,
                }),
                Role::System => None,
            })
            .collect();

        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            system,
            messages: wire_messages,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(AgentError::from_status(status, body));
        }

        let parsed: MessagesResponse = response.json().await?;
        completion_from_response(parsed)
    }
}

fn completion_from_response(parsed: MessagesResponse) -> Result<Completion> {
    let text = parsed
        .content
        .into_iter()
        .filter(|block| block.block_type == "text")
        .find_map(|block| block.text)
        .ok_or(AgentError::EmptyResponse("claude"))?;

    let usage = parsed
        .usage
        .map(|usage| Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        })
        .unwrap_or_default();

    Ok(Completion { text, usage })
}

#[async_trait]
impl CodeBackend for ClaudeClient {
    fn name(&self) -> &str {
        "claude"
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<Completion> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;

        retry_with_backoff(self.retry, "claude", move || {
            self.send_once(api_key, system, messages, max_tokens)
        })
        .await
    }
}
