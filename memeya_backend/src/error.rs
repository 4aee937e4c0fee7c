//! Error taxonomy shared by the backend adapters, engines, and persistence layer.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// A required credential or setting is missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// Upstream answered 429 or 529. Retriable on the code path only.
    #[error("upstream rate limited (HTTP {status}): {body}")]
    RateLimited { status: u16, body: String },

    /// Any other non-2xx answer from an upstream API.
    #[error("upstream error (HTTP {status}): {body}")]
    Upstream { status: u16, body: String },

    /// Upstream answered 2xx but the payload had no usable content.
    #[error("empty response from {0}")]
    EmptyResponse(&'static str),

    /// A generated file path resolved outside of the sandbox root.
    #[error("path escapes base directory: {}", path.display())]
    PathEscape { path: PathBuf },

    #[error("unknown skill: {0}")]
    SkillNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Classify a non-success HTTP status into the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        if is_retriable_status(status) {
            AgentError::RateLimited { status, body }
        } else {
            AgentError::Upstream { status, body }
        }
    }

    /// Whether this error is an overload/rate-limit signal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AgentError::RateLimited { .. })
    }
}

/// 429 (rate limited) and 529 (Anthropic "overloaded").
pub fn is_retriable_status(status: u16) -> bool {
    status == 429 || status == 529
}

pub type Result<T> = std::result::Result<T, AgentError>;
