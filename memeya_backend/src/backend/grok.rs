use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatBackend, Message};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::http_client::build_http_client_with_timeout;

const GROK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct GrokClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl GrokClient {
    pub fn new(api_url: String, api_key: Option<String>, model: String) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model,
            client: build_http_client_with_timeout(Some(GROK_TIMEOUT))?,
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Self::new(
            config.grok_api_url.clone(),
            config.grok_api_key.clone(),
            config.grok_model.clone(),
        )
    }
}

fn content_from_response(completion: ChatCompletionResponse) -> Result<String> {
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(AgentError::EmptyResponse("grok"))
}

#[async_trait]
impl ChatBackend for GrokClient {
    fn name(&self) -> &str {
        "grok"
    }

    async fn chat(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::Config("XAI_API_KEY is not set".to_string()))?;

        let url = format!("{}/chat/completions", self.api_url);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: Some(temperature),
            max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
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

        let completion: ChatCompletionResponse = response.json().await?;
        content_from_response(completion)
    }
}
