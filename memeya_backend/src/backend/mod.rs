//! LLM backend adapters.
//!
//! The agent talks to two different providers and deliberately keeps them
//! behind two separate ports:
//! - [`CodeBackend`] (Claude) drives code generation and operator chat. Calls
//!   are wrapped in exponential backoff on 429/529.
//! - [`ChatBackend`] (Grok) drives classification, news, and reflection.
//!   Calls are never retried; callers decide what a failure means.

pub mod claude;
pub mod grok;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Backend used for project work. Implementations own their retry policy.
#[async_trait]
pub trait CodeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// `system` is sent out of band; `messages` holds only user/assistant turns.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<Completion>;
}

/// Backend used for disposable conversation. No retries.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, messages: &[Message], max_tokens: u32, temperature: f32)
        -> Result<String>;
}
