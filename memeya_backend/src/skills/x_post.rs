use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Skill, SkillActionDef, SkillResult};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::http_client::build_http_client;

/// X enforces 280 characters for standard accounts.
pub const MAX_POST_CHARS: usize = 280;

#[derive(Debug, Serialize)]
struct CreateTweetRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTweetResponse {
    data: Option<TweetData>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

/// Posts short updates to X (Twitter) via the v2 API with a user-context bearer token.
pub struct XPostSkill {
    api_url: String,
    bearer_token: String,
    client: Client,
}

impl XPostSkill {
    pub fn new(api_url: String, bearer_token: String) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            bearer_token,
            client: build_http_client()?,
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let token = config
            .x_bearer_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| AgentError::Config("X_BEARER_TOKEN is not set".to_string()))?;
        Self::new(config.x_api_url.clone(), token)
    }

    pub async fn post(&self, text: &str) -> Result<String> {
        let url = format!("{}/tweets", self.api_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.bearer_token)
            .json(&CreateTweetRequest { text })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::from_status(status, body));
        }

        let created: CreateTweetResponse = response.json().await?;
        created
            .data
            .map(|data| data.id)
            .ok_or(AgentError::EmptyResponse("x"))
    }
}

/// Validate and normalise post text; `None` when it cannot be posted as-is.
pub fn prepare_post_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_POST_CHARS {
        return None;
    }
    Some(trimmed.to_string())
}

#[async_trait]
impl Skill for XPostSkill {
    fn name(&self) -> &str {
        "x_post"
    }

    fn description(&self) -> &str {
        "Post short public updates to X (Twitter)"
    }

    async fn execute(&self, action: &str, params: &serde_json::Value) -> Result<SkillResult> {
        match action {
            "post" => {
                let Some(text) = params["text"].as_str() else {
                    return Ok(SkillResult::Error {
                        message: "Missing 'text' parameter".to_string(),
                    });
                };
                let Some(text) = prepare_post_text(text) else {
                    return Ok(SkillResult::Error {
                        message: format!("Post must be 1-{} characters", MAX_POST_CHARS),
                    });
                };
                let id = self.post(&text).await?;
                Ok(SkillResult::Success {
                    message: format!("Posted tweet {}", id),
                })
            }
            _ => Ok(SkillResult::Error {
                message: format!("Unknown action: {}", action),
            }),
        }
    }

    fn available_actions(&self) -> Vec<SkillActionDef> {
        vec![SkillActionDef {
            name: "post".to_string(),
            description: "Publish a short post".to_string(),
            params_description: "{\"text\": \"...\"}".to_string(),
        }]
    }
}
