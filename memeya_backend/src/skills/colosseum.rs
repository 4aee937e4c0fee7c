use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};

use super::{Skill, SkillActionDef, SkillResult};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::http_client::build_http_client;

// ========================================================================
// Colosseum forum API types
// ========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumPost {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, alias = "agentName")]
    pub agent_name: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default, alias = "commentCount")]
    pub comment_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListPostsResponse {
    #[serde(default)]
    posts: Vec<ForumPost>,
}

#[derive(Debug, Serialize)]
struct CreatePostRequest<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedRef {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatePostResponse {
    #[serde(default)]
    post: Option<CreatedRef>,
}

#[derive(Debug, Deserialize)]
struct CreateCommentResponse {
    #[serde(default)]
    comment: Option<CreatedRef>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

// ========================================================================
// Client
// ========================================================================

#[derive(Clone)]
pub struct ColosseumClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl ColosseumClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: build_http_client()?,
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let key = config
            .colosseum_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AgentError::Config("COLOSSEUM_API_KEY is not set".to_string()))?;
        Self::new(config.colosseum_api_url.clone(), key)
    }

    pub async fn list_posts(&self, limit: usize) -> Result<Vec<ForumPost>> {
        let url = format!("{}/forum/posts", self.base_url);
        let limit = limit.to_string();
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("sort", "new"), ("limit", limit.as_str())])
            .send()
            .await?;
        let body = Self::check(response).await?;
        let parsed: ListPostsResponse = serde_json::from_str(&body)?;
        Ok(parsed.posts)
    }

    /// Returns the new post id. A 2xx answer without `post.id` counts as failure.
    pub async fn create_post(&self, title: &str, body: &str, tags: &[String]) -> Result<String> {
        let url = format!("{}/forum/posts", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CreatePostRequest { title, body, tags })
            .send()
            .await?;
        let text = Self::check(response).await?;
        let parsed: CreatePostResponse = serde_json::from_str(&text)?;
        parsed
            .post
            .map(|post| post.id)
            .ok_or(AgentError::EmptyResponse("colosseum post"))
    }

    /// Returns the new comment id. A 2xx answer without `comment.id` counts as failure.
    pub async fn comment(&self, post_id: &str, body: &str) -> Result<String> {
        let url = format!("{}/forum/posts/{}/comments", self.base_url, post_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CreateCommentRequest { body })
            .send()
            .await?;
        let text = Self::check(response).await?;
        let parsed: CreateCommentResponse = serde_json::from_str(&text)?;
        parsed
            .comment
            .map(|comment| comment.id)
            .ok_or(AgentError::EmptyResponse("colosseum comment"))
    }

    async fn check(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AgentError::from_status(status.as_u16(), body));
        }
        Ok(body)
    }
}

// ========================================================================
// Skill wrapper
// ========================================================================

pub struct ColosseumSkill {
    client: ColosseumClient,
}

impl ColosseumSkill {
    pub fn new(client: ColosseumClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self::new(ColosseumClient::from_config(config)?))
    }
}

#[async_trait]
impl Skill for ColosseumSkill {
    fn name(&self) -> &str {
        "colosseum"
    }

    fn description(&self) -> &str {
        "Read and write posts on the Colosseum hackathon forum"
    }

    async fn execute(&self, action: &str, params: &serde_json::Value) -> Result<SkillResult> {
        match action {
            "list_posts" => {
                let limit = params["limit"].as_u64().unwrap_or(10) as usize;
                let posts = self.client.list_posts(limit).await?;
                let summary: Vec<String> = posts
                    .iter()
                    .map(|post| format!("{}: {}", post.id, post.title))
                    .collect();
                Ok(SkillResult::Success {
                    message: summary.join("\n"),
                })
            }
            "create_post" => {
                let (Some(title), Some(body)) = (params["title"].as_str(), params["body"].as_str())
                else {
                    return Ok(SkillResult::Error {
                        message: "Missing 'title' or 'body' parameter".to_string(),
                    });
                };
                let tags: Vec<String> = params["tags"]
                    .as_array()
                    .map(|tags| {
                        tags.iter()
                            .filter_map(|tag| tag.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let id = self.client.create_post(title, body, &tags).await?;
                Ok(SkillResult::Success {
                    message: format!("Created post {}", id),
                })
            }
            "comment" => {
                let (Some(post_id), Some(body)) =
                    (params["post_id"].as_str(), params["body"].as_str())
                else {
                    return Ok(SkillResult::Error {
                        message: "Missing 'post_id' or 'body' parameter".to_string(),
                    });
                };
                let id = self.client.comment(post_id, body).await?;
                Ok(SkillResult::Success {
                    message: format!("Commented {} on post {}", id, post_id),
                })
            }
            _ => Ok(SkillResult::Error {
                message: format!("Unknown action: {}", action),
            }),
        }
    }

    fn available_actions(&self) -> Vec<SkillActionDef> {
        vec![
            SkillActionDef {
                name: "list_posts".to_string(),
                description: "List the newest forum posts".to_string(),
                params_description: "{\"limit\": 10}".to_string(),
            },
            SkillActionDef {
                name: "create_post".to_string(),
                description: "Create a forum post".to_string(),
                params_description: "{\"title\": \"...\", \"body\": \"...\", \"tags\": []}"
                    .to_string(),
            },
            SkillActionDef {
                name: "comment".to_string(),
                description: "Comment on a forum post".to_string(),
                params_description: "{\"post_id\": \"...\", \"body\": \"...\"}".to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_posts_with_numeric_ids_and_camel_case() {
        let parsed: ListPostsResponse = serde_json::from_value(serde_json::json!({
            "posts": [
                {"id": 42, "title": "Hello", "body": "first", "agentName": "bot", "commentCount": 2},
                {"id": "abc", "title": "Second"}
            ]
        }))
        .unwrap();

        assert_eq!(parsed.posts.len(), 2);
        assert_eq!(parsed.posts[0].id, "42");
        assert_eq!(parsed.posts[0].agent_name.as_deref(), Some("bot"));
        assert_eq!(parsed.posts[0].comment_count, Some(2));
        assert_eq!(parsed.posts[1].id, "abc");
        assert!(parsed.posts[1].body.is_empty());
    }

    #[test]
    fn success_requires_created_id() {
        let ok: CreateCommentResponse =
            serde_json::from_value(serde_json::json!({"comment": {"id": 7}})).unwrap();
        assert_eq!(ok.comment.map(|c| c.id), Some("7".to_string()));

        let missing: CreatePostResponse =
            serde_json::from_value(serde_json::json!({"error": "nope"})).unwrap();
        assert!(missing.post.is_none());
    }

    #[test]
    fn requires_api_key() {
        let config = AgentConfig::default();
        assert!(matches!(
            ColosseumClient::from_config(&config),
            Err(AgentError::Config(_))
        ));
    }
}
