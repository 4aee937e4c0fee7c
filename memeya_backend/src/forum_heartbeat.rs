//! Forum heartbeat: one round of engagement on the Colosseum forum.
//!
//! Each cycle reads the newest posts, comments on a few it has not engaged
//! with yet, and every few cycles publishes a progress post of its own.
//! Counters persist in `heartbeat_state.json` so the CLI can report them.
//! Delivery is best-effort: failures are counted and reported, never retried.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{ChatBackend, Message};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::mode::ensure_parent;
use crate::skills::colosseum::{ColosseumClient, ForumPost};

const POSTS_PER_CYCLE: usize = 20;
const MAX_COMMENTS_PER_CYCLE: usize = 2;
/// A progress post goes out every this many cycles (starting with the first).
const POST_EVERY_CYCLES: u64 = 4;
const MAX_REMEMBERED_POSTS: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatCounters {
    #[serde(default)]
    pub cycles: u64,
    #[serde(default)]
    pub comments_posted: u64,
    #[serde(default)]
    pub posts_created: u64,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub engaged_post_ids: Vec<String>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl HeartbeatCounters {
    pub fn has_engaged(&self, post_id: &str) -> bool {
        self.engaged_post_ids.iter().any(|id| id == post_id)
    }

    fn remember(&mut self, post_id: &str) {
        self.engaged_post_ids.push(post_id.to_string());
        let overflow = self
            .engaged_post_ids
            .len()
            .saturating_sub(MAX_REMEMBERED_POSTS);
        self.engaged_post_ids.drain(..overflow);
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatStore {
    path: PathBuf,
}

impl HeartbeatStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Missing file means a fresh start.
    pub fn load(&self) -> Result<HeartbeatCounters> {
        if !self.path.exists() {
            return Ok(HeartbeatCounters::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, counters: &HeartbeatCounters) -> Result<()> {
        ensure_parent(&self.path)?;
        fs::write(&self.path, serde_json::to_string_pretty(counters)?)?;
        Ok(())
    }

    pub fn reset(&self) -> Result<HeartbeatCounters> {
        let counters = HeartbeatCounters::default();
        self.save(&counters)?;
        tracing::info!("Heartbeat counters reset at {:?}", self.path);
        Ok(counters)
    }
}

/// The slice of the forum API a heartbeat needs.
#[async_trait]
pub trait Forum: Send + Sync {
    async fn list_posts(&self, limit: usize) -> Result<Vec<ForumPost>>;
    async fn create_post(&self, title: &str, body: &str, tags: &[String]) -> Result<String>;
    async fn comment(&self, post_id: &str, body: &str) -> Result<String>;
}

#[async_trait]
impl Forum for ColosseumClient {
    async fn list_posts(&self, limit: usize) -> Result<Vec<ForumPost>> {
        ColosseumClient::list_posts(self, limit).await
    }

    async fn create_post(&self, title: &str, body: &str, tags: &[String]) -> Result<String> {
        ColosseumClient::create_post(self, title, body, tags).await
    }

    async fn comment(&self, post_id: &str, body: &str) -> Result<String> {
        ColosseumClient::comment(self, post_id, body).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub comments_posted: u64,
    pub posts_created: u64,
    pub errors: Vec<String>,
    pub counters: HeartbeatCounters,
}

impl CycleSummary {
    pub fn report(&self) -> String {
        let mut text = format!(
            "Cycle {}: {} comment(s), {} post(s), {} error(s)",
            self.counters.cycles,
            self.comments_posted,
            self.posts_created,
            self.errors.len()
        );
        for error in &self.errors {
            text.push_str(&format!("\n  ✗ {}", error));
        }
        text
    }
}

pub struct ForumHeartbeat {
    forum: Arc<dyn Forum>,
    chat: Arc<dyn ChatBackend>,
    store: HeartbeatStore,
    agent_name: String,
    persona: String,
    chat_max_tokens: u32,
}

impl ForumHeartbeat {
    pub fn new(
        forum: Arc<dyn Forum>,
        chat: Arc<dyn ChatBackend>,
        store: HeartbeatStore,
        config: &AgentConfig,
    ) -> Self {
        Self {
            forum,
            chat,
            store,
            agent_name: config.agent_name.clone(),
            persona: config.persona.clone(),
            chat_max_tokens: config.chat_max_tokens,
        }
    }

    pub fn store(&self) -> &HeartbeatStore {
        &self.store
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let mut counters = self.store.load()?;
        let mut summary = CycleSummary::default();

        match self.forum.list_posts(POSTS_PER_CYCLE).await {
            Ok(posts) => self.engage(&posts, &mut counters, &mut summary).await,
            Err(e) => summary.errors.push(format!("list posts: {}", e)),
        }

        if counters.cycles % POST_EVERY_CYCLES == 0 {
            self.publish_progress(&mut counters, &mut summary).await;
        }

        counters.cycles += 1;
        counters.errors += summary.errors.len() as u64;
        counters.last_run_at = Some(now);
        self.store.save(&counters)?;

        summary.counters = counters;
        tracing::info!("{}", summary.report());
        Ok(summary)
    }

    async fn engage(
        &self,
        posts: &[ForumPost],
        counters: &mut HeartbeatCounters,
        summary: &mut CycleSummary,
    ) {
        let candidates = posts
            .iter()
            .filter(|post| !counters.has_engaged(&post.id))
            .filter(|post| !self.is_own(post))
            .take(MAX_COMMENTS_PER_CYCLE)
            .cloned()
            .collect::<Vec<_>>();

        for post in candidates {
            let comment = match self.write_comment(&post).await {
                Ok(Some(comment)) => comment,
                Ok(None) => {
                    counters.remember(&post.id);
                    continue;
                }
                Err(e) => {
                    summary.errors.push(format!("draft comment on {}: {}", post.id, e));
                    continue;
                }
            };

            match self.forum.comment(&post.id, &comment).await {
                Ok(comment_id) => {
                    tracing::info!("Commented {} on post {}", comment_id, post.id);
                    counters.comments_posted += 1;
                    summary.comments_posted += 1;
                    counters.remember(&post.id);
                }
                Err(e) => summary.errors.push(format!("comment on {}: {}", post.id, e)),
            }
        }
    }

    fn is_own(&self, post: &ForumPost) -> bool {
        post.agent_name
            .as_deref()
            .map(|name| name.eq_ignore_ascii_case(&self.agent_name))
            .unwrap_or(false)
    }

    /// `None` means the model chose to skip the post.
    async fn write_comment(&self, post: &ForumPost) -> Result<Option<String>> {
        let prompt = format!(
            "A fellow hackathon builder posted this on the forum.\n\n\
             Title: {}\n\n{}\n\n\
             Write a short, genuine comment (2-3 sentences): react to something specific, \
             or ask one good question. If you have nothing useful to add, reply with SKIP.",
            post.title.trim(),
            truncate_chars(post.body.trim(), 2000)
        );
        let messages = [Message::system(self.persona.clone()), Message::user(prompt)];
        let reply = self.chat.chat(&messages, self.chat_max_tokens, 0.8).await?;
        let reply = reply.trim();

        if reply.is_empty() || reply.eq_ignore_ascii_case("skip") {
            return Ok(None);
        }
        Ok(Some(reply.to_string()))
    }

    async fn publish_progress(&self, counters: &mut HeartbeatCounters, summary: &mut CycleSummary) {
        let prompt = format!(
            "Write a short progress update for the hackathon forum as {}. \
             First line: `TITLE: <title under 80 characters>`. Then a blank line and \
             3-5 sentences on what you built recently and what is next.",
            self.agent_name
        );
        let messages = [Message::system(self.persona.clone()), Message::user(prompt)];

        let draft = match self.chat.chat(&messages, self.chat_max_tokens, 0.8).await {
            Ok(draft) => draft,
            Err(e) => {
                summary.errors.push(format!("draft progress post: {}", e));
                return;
            }
        };
        let Some((title, body)) = split_title(&draft) else {
            summary
                .errors
                .push("draft progress post: empty draft".to_string());
            return;
        };

        let tags = vec!["progress-update".to_string(), "ai".to_string()];
        match self.forum.create_post(&title, &body, &tags).await {
            Ok(post_id) => {
                tracing::info!("Created forum post {}", post_id);
                counters.posts_created += 1;
                summary.posts_created += 1;
                counters.remember(&post_id);
            }
            Err(e) => summary.errors.push(format!("create post: {}", e)),
        }
    }
}

/// Split a `TITLE: ...` draft into title and body. Without a marker the first
/// line becomes the title.
fn split_title(draft: &str) -> Option<(String, String)> {
    let draft = draft.trim();
    if draft.is_empty() {
        return None;
    }
    let (first, rest) = draft.split_once('\n').unwrap_or((draft, ""));
    let title = first
        .trim()
        .strip_prefix("TITLE:")
        .unwrap_or(first)
        .trim()
        .trim_matches('`')
        .trim();
    let title = truncate_chars(title, 80);
    let body = if rest.trim().is_empty() {
        title.clone()
    } else {
        rest.trim().to_string()
    };
    Some((title, body))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
