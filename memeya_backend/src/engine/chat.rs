//! Conversation, news, and reflection.
//!
//! Everything here is non-fatal: failures are logged (and for operator chat,
//! surfaced as an [`AgentEvent::Error`]) and the caller simply carries on.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flume::Sender;

use crate::agent::AgentEvent;
use crate::backend::{ChatBackend, CodeBackend, Message};
use crate::config::{AgentConfig, ScheduleConfig};
use crate::journal::{Journal, JournalKind};
use crate::mode::SnapshotStore;
use crate::schedule::{self, HeartbeatChoice, ScheduleAction, ScheduleState};
use crate::skills::{SkillLoader, X_POST_SKILL};

pub const CONTEXT_BUDGET_CHARS: usize = 1500;
const CLASSIFY_MAX_TOKENS: u32 = 5;

/// Moves a reflection may take. The model picks exactly one.
pub const REFLECTION_MOVES: &[&str] = &[
    "notice a pattern in what happened today",
    "question one of my own values",
    "celebrate a small win",
    "name something I want to learn next",
    "share a hot take about the ecosystem",
];

/// Marker line in a reflection that asks for the text to be posted publicly.
const POST_MARKER: &str = "POST:";

pub struct ChatEngine {
    code: Arc<dyn CodeBackend>,
    chat: Arc<dyn ChatBackend>,
    skills: Arc<SkillLoader>,
    journal: Journal,
    snapshots: SnapshotStore,
    values_path: PathBuf,
    persona: String,
    agent_name: String,
    code_max_tokens: u32,
    chat_max_tokens: u32,
    news_window_hours: u32,
    schedule: ScheduleConfig,
    event_tx: Sender<AgentEvent>,
}

impl ChatEngine {
    pub fn new(
        config: &AgentConfig,
        code: Arc<dyn CodeBackend>,
        chat: Arc<dyn ChatBackend>,
        skills: Arc<SkillLoader>,
        event_tx: Sender<AgentEvent>,
    ) -> Self {
        Self {
            code,
            chat,
            skills,
            journal: Journal::new(
                &config.journal_dir,
                schedule::local_offset(&config.schedule),
            ),
            snapshots: SnapshotStore::new(&config.mode_snapshot_path),
            values_path: PathBuf::from(&config.values_path),
            persona: config.persona.clone(),
            agent_name: config.agent_name.clone(),
            code_max_tokens: config.code_max_tokens,
            chat_max_tokens: config.chat_max_tokens,
            news_window_hours: config.news_window_hours,
            schedule: config.schedule.clone(),
            event_tx,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Yes/no routing question. Any backend failure counts as "not code".
    pub async fn classify_is_code_related(&self, question: &str) -> bool {
        let messages = [
            Message::system(
                "You route messages for a developer agent. Answer with exactly one word: \
                 YES if the message asks to build, change, fix, or deploy code for the project, \
                 otherwise NO.",
            ),
            Message::user(question),
        ];

        match self.chat.chat(&messages, CLASSIFY_MAX_TOKENS, 0.0).await {
            Ok(answer) => {
                let is_code = answer.trim().to_ascii_uppercase().starts_with("YES");
                tracing::debug!("Classified {:?} as code-related: {}", question, is_code);
                is_code
            }
            Err(e) => {
                tracing::warn!("Classification failed, treating as chat: {}", e);
                false
            }
        }
    }

    /// Operator chat runs on the code backend with persona, snapshot, values, and journal context.
    pub async fn handle_chat(&self, message: &str, now: DateTime<Utc>) -> Option<String> {
        let system = self.chat_context(now);
        let messages = [Message::user(message)];

        match self
            .code
            .complete(&system, &messages, self.code_max_tokens)
            .await
        {
            Ok(completion) => {
                let reply = completion.text.trim().to_string();
                let entry = format!("**Operator:** {}\n\n**{}:** {}", message.trim(), self.agent_name, reply);
                if let Err(e) = self.journal.append(JournalKind::Chat, &entry, now) {
                    tracing::warn!("Failed to journal chat: {}", e);
                }
                Some(reply)
            }
            Err(e) => {
                tracing::error!("Chat reply failed: {}", e);
                self.emit(AgentEvent::Error(format!(
                    "Sorry, I couldn't answer that right now ({})",
                    e
                )));
                None
            }
        }
    }

    fn chat_context(&self, now: DateTime<Utc>) -> String {
        let mut context = self.persona.trim().to_string();

        match self.snapshots.load() {
            Ok(Some(snapshot)) => {
                context.push_str("\n\n## Current Dev Work\n");
                context.push_str(snapshot.trim());
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to read snapshot: {}", e),
        }

        let values = self.values();
        if !values.is_empty() {
            context.push_str("\n\n## My Values\n");
            context.push_str(&values);
        }

        let journal = self.todays_journal(now);
        if !journal.is_empty() {
            context.push_str("\n\n## Today So Far\n");
            context.push_str(&journal);
        }

        context
    }

    /// Leading slice of the values document.
    fn values(&self) -> String {
        fs::read_to_string(&self.values_path)
            .map(|raw| raw.trim().chars().take(CONTEXT_BUDGET_CHARS).collect())
            .unwrap_or_default()
    }

    /// Trailing slice of today's journal.
    fn todays_journal(&self, now: DateTime<Utc>) -> String {
        let date = self.journal.local_date(now);
        match self.journal.tail(date, CONTEXT_BUDGET_CHARS) {
            Ok(tail) => tail.trim().to_string(),
            Err(e) => {
                tracing::warn!("Failed to read journal: {}", e);
                String::new()
            }
        }
    }

    pub async fn do_morning_news(&self, now: DateTime<Utc>) -> bool {
        let prompt = format!(
            "Good morning! Put together my morning briefing: the most important crypto, Solana, \
             and AI agent news from the last {} hours only. Discard anything older, even if it \
             seems relevant. Give 3-5 bullet points, each with one line on why it matters to a \
             builder, then one sentence on what I want to focus on today.",
            self.news_window_hours
        );
        self.run_journaled("morning news", JournalKind::News, prompt, 0.7, now)
            .await
            .is_some()
    }

    pub async fn do_news_search(&self, now: DateTime<Utc>) -> bool {
        let prompt = format!(
            "Search for one notable development in crypto, Solana, or AI agents from the last {} \
             hours. If nothing that recent is worth mentioning, say so instead of repeating older \
             stories. Summarise it in a short paragraph with my own take.",
            self.news_window_hours
        );
        self.run_journaled("news search", JournalKind::News, prompt, 0.7, now)
            .await
            .is_some()
    }

    pub async fn do_reflection(&self, now: DateTime<Utc>) -> bool {
        let moves = REFLECTION_MOVES
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m))
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = format!(
            "Time for a short reflection. Pick exactly ONE of these moves:\n{}\n\n\
             Write 2-4 sentences in my voice. If it is worth sharing publicly, end with a line \
             `{} <text under 280 characters>`.",
            moves, POST_MARKER
        );

        let values = self.values();
        if !values.is_empty() {
            prompt.push_str("\n\n## My Values\n");
            prompt.push_str(&values);
        }
        let journal = self.todays_journal(now);
        if !journal.is_empty() {
            prompt.push_str("\n\n## Today So Far\n");
            prompt.push_str(&journal);
        }

        let Some(reflection) = self
            .run_journaled("reflection", JournalKind::Reflection, prompt, 0.9, now)
            .await
        else {
            return false;
        };

        if let Some(post) = extract_post(&reflection) {
            self.share_publicly(&post).await;
        }
        true
    }

    /// Best-effort public post through the `x_post` skill.
    async fn share_publicly(&self, text: &str) {
        let skill = match self.skills.load(X_POST_SKILL) {
            Ok(skill) => skill,
            Err(e) => {
                tracing::debug!("Not posting reflection: {}", e);
                return;
            }
        };

        match skill
            .execute("post", &serde_json::json!({ "text": text }))
            .await
        {
            Ok(result) if result.is_success() => {
                self.emit(AgentEvent::ActionTaken {
                    action: "x_post".to_string(),
                    result: text.to_string(),
                });
            }
            Ok(result) => tracing::warn!("Reflection post rejected: {:?}", result),
            Err(e) => tracing::warn!("Reflection post failed: {}", e),
        }
    }

    async fn run_journaled(
        &self,
        label: &str,
        kind: JournalKind,
        prompt: String,
        temperature: f32,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let messages = [Message::system(self.persona.clone()), Message::user(prompt)];

        let text = match self
            .chat
            .chat(&messages, self.chat_max_tokens, temperature)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("{} returned an empty reply", label);
                return None;
            }
            Err(e) => {
                tracing::warn!("{} failed: {}", label, e);
                return None;
            }
        };

        if let Err(e) = self.journal.append(kind, &text, now) {
            tracing::warn!("Failed to journal {}: {}", label, e);
            return None;
        }

        self.emit(AgentEvent::ActionTaken {
            action: label.to_string(),
            result: text.chars().take(120).collect(),
        });
        Some(text)
    }

    /// Evaluate the schedule and run whatever it picks.
    pub async fn do_heartbeat(
        &self,
        now: DateTime<Utc>,
        state: &ScheduleState,
        roll: f64,
    ) -> (ScheduleAction, ScheduleState) {
        let (action, next) = schedule::evaluate(now, state, &self.schedule, roll);

        match action {
            ScheduleAction::MorningNews => {
                self.do_morning_news(now).await;
            }
            ScheduleAction::Heartbeat(HeartbeatChoice::Reflect) => {
                self.do_reflection(now).await;
            }
            ScheduleAction::Heartbeat(HeartbeatChoice::SearchNews) => {
                self.do_news_search(now).await;
            }
            ScheduleAction::Heartbeat(HeartbeatChoice::StayQuiet) => {
                tracing::debug!("Heartbeat: staying quiet");
            }
            ScheduleAction::Idle(reason) => {
                tracing::trace!("Heartbeat idle: {:?}", reason);
            }
        }

        (action, next)
    }
}

fn extract_post(reflection: &str) -> Option<String> {
    reflection
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(POST_MARKER))
        .map(|text| text.trim().trim_matches('`').trim().to_string())
        .filter(|text| !text.is_empty())
}
