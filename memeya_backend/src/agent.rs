//! The agent orchestrator.
//!
//! One cooperative loop: drain operator messages, then do one unit of work
//! for the active mode. Dev mode picks the next pending task and drives the
//! [`TaskEngine`]; Chat mode asks the schedule what to do and drives the
//! [`ChatEngine`]. Operator messages that arrive while the loop is waiting
//! are handled immediately.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flume::{Receiver, Sender};
use serde::Serialize;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::time::{sleep, Duration};

use crate::backend::{ChatBackend, CodeBackend};
use crate::commands::{Command, HELP_TEXT};
use crate::config::AgentConfig;
use crate::engine::task::write_code_to_files;
use crate::engine::{ChatEngine, CodeEdit, Generation, TaskContext, TaskEngine};
use crate::journal::JournalKind;
use crate::mode::{Mode, ModeSnapshot, ModeStore, SnapshotStore};
use crate::schedule::{ScheduleAction, ScheduleState};
use crate::shell::{run_shell, SHELL_TIMEOUT};
use crate::skills::{SkillLoader, COLOSSEUM_SKILL};
use crate::tasks::TaskList;

const MAX_LISTED_FILES: usize = 200;
const MAX_NEXT_STEPS: usize = 5;

#[derive(Debug, Clone)]
pub enum AgentEvent {
    ModeChanged(Mode),
    Observation(String),
    ActionTaken {
        action: String,
        result: String,
    },
    CodeWritten {
        task: String,
        files: Vec<String>,
    },
    Error(String),
}

/// Text from the operator, with an optional channel for the reply.
#[derive(Debug)]
pub struct OperatorMessage {
    pub text: String,
    pub reply: Option<oneshot::Sender<String>>,
}

impl OperatorMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reply: None,
        }
    }

    pub fn with_reply(text: impl Into<String>) -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                text: text.into(),
                reply: Some(tx),
            },
            rx,
        )
    }
}

#[derive(Debug, Default)]
struct AgentState {
    mode: Mode,
    schedule: ScheduleState,
    processed_tasks: HashSet<String>,
    current_task: Option<String>,
    last_task: Option<String>,
    last_error: Option<String>,
    last_files: Vec<String>,
    cycles: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub mode: Mode,
    pub sleeping: bool,
    pub cycles: u64,
    pub current_task: Option<String>,
    pub last_task: Option<String>,
    pub last_error: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_morning_news_at: Option<DateTime<Utc>>,
    pub pending_tasks: usize,
    pub conversation_turns: usize,
}

impl AgentStatus {
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Mode: {}", self.mode.label()),
            format!("Sleeping: {}", if self.sleeping { "yes" } else { "no" }),
            format!("Pending tasks: {}", self.pending_tasks),
            format!("Conversation turns: {}", self.conversation_turns),
            format!("Cycles: {}", self.cycles),
        ];
        if let Some(task) = &self.current_task {
            lines.push(format!("Working on: {}", task));
        }
        if let Some(task) = &self.last_task {
            lines.push(format!("Last task: {}", task));
        }
        if let Some(error) = &self.last_error {
            lines.push(format!("Last error: {}", error));
        }
        if let Some(at) = self.last_heartbeat_at {
            lines.push(format!("Last heartbeat: {}", at.to_rfc3339()));
        }
        lines.join("\n")
    }
}

pub struct Agent {
    config: AgentConfig,
    task_engine: Mutex<TaskEngine>,
    chat_engine: ChatEngine,
    skills: Arc<SkillLoader>,
    tasks: TaskList,
    snapshots: SnapshotStore,
    mode_store: ModeStore,
    workspace: PathBuf,
    state: RwLock<AgentState>,
    event_tx: Sender<AgentEvent>,
    inbox: Receiver<OperatorMessage>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        code: Arc<dyn CodeBackend>,
        chat: Arc<dyn ChatBackend>,
        skills: Arc<SkillLoader>,
        event_tx: Sender<AgentEvent>,
        inbox: Receiver<OperatorMessage>,
    ) -> Self {
        let task_engine = TaskEngine::new(
            code.clone(),
            config.persona.clone(),
            &config.knowledge_dir,
            config.code_max_tokens,
            config.conversation_max_turns,
        );
        let chat_engine = ChatEngine::new(&config, code, chat, skills.clone(), event_tx.clone());
        let mode_store = ModeStore::new(&config.mode_state_path);
        let state = AgentState {
            mode: mode_store.load(),
            ..Default::default()
        };

        Self {
            tasks: TaskList::new(&config.pending_tasks_path),
            snapshots: SnapshotStore::new(&config.mode_snapshot_path),
            workspace: PathBuf::from(&config.workspace_dir),
            task_engine: Mutex::new(task_engine),
            chat_engine,
            skills,
            mode_store,
            state: RwLock::new(state),
            event_tx,
            inbox,
            config,
        }
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }

    pub async fn mode(&self) -> Mode {
        self.state.read().await.mode
    }

    pub async fn status(&self) -> AgentStatus {
        let pending_tasks = self.tasks.pending().map(|t| t.len()).unwrap_or(0);
        let conversation_turns = self.task_engine.lock().await.history_len();
        let state = self.state.read().await;
        AgentStatus {
            mode: state.mode,
            sleeping: state.schedule.sleep_today,
            cycles: state.cycles,
            current_task: state.current_task.clone(),
            last_task: state.last_task.clone(),
            last_error: state.last_error.clone(),
            last_heartbeat_at: state.schedule.last_heartbeat_at,
            last_morning_news_at: state.schedule.last_morning_news_at,
            pending_tasks,
            conversation_turns,
        }
    }

    /// Handle one operator message and produce the reply text. Never fails.
    pub async fn handle_message(&self, text: &str, now: DateTime<Utc>) -> String {
        match self.handle_command(Command::parse(text), now).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Command failed: {:#}", e);
                self.emit(AgentEvent::Error(format!("{:#}", e)));
                format!("Error: {:#}", e)
            }
        }
    }

    pub async fn handle_command(&self, command: Command, now: DateTime<Utc>) -> Result<String> {
        tracing::debug!("Operator command: {:?}", command);

        match command {
            Command::AddTask(text) => {
                let task = self.add_task(&text, now)?;
                Ok(format!("📝 Task added: {}", task))
            }
            Command::TaskList => self.tasks.list_tasks().context("Failed to read task list"),
            Command::Sleep => {
                self.state.write().await.schedule.go_to_sleep();
                Ok("😴 Going to sleep for the rest of the day. Send #newday to wake me.".to_string())
            }
            Command::NewDay => {
                self.state.write().await.schedule.new_day();
                Ok("☀️ New day started.".to_string())
            }
            Command::DevMode => self.switch_mode(Mode::Dev, now).await,
            Command::ChatMode => self.switch_mode(Mode::Chat, now).await,
            Command::Clear => {
                self.task_engine.lock().await.clear_history();
                Ok("🧹 Code conversation cleared.".to_string())
            }
            Command::Status => Ok(self.status().await.summary()),
            Command::Chat(text) if text.is_empty() => Ok(HELP_TEXT.to_string()),
            Command::Chat(text) => {
                // Classification completes before anything is dispatched.
                if self.chat_engine.classify_is_code_related(&text).await {
                    let task = self.add_task(&text, now)?;
                    Ok(format!(
                        "🛠️ Sounds like code work, added it to my task list: {}",
                        task
                    ))
                } else {
                    Ok(self
                        .chat_engine
                        .handle_chat(&text, now)
                        .await
                        .unwrap_or_else(|| {
                            "Sorry, I couldn't come up with a reply right now.".to_string()
                        }))
                }
            }
        }
    }

    fn add_task(&self, text: &str, now: DateTime<Utc>) -> Result<String> {
        let today = self.chat_engine.journal().local_date(now);
        let task = self
            .tasks
            .add_task(text, today)
            .context("Failed to add task")?;
        Ok(task.text)
    }

    /// Save the snapshot when leaving Dev mode; load it when entering.
    pub async fn switch_mode(&self, target: Mode, now: DateTime<Utc>) -> Result<String> {
        let current = self.mode().await;
        if current == target {
            return Ok(format!("Already in {} mode.", target.label()));
        }

        if current == Mode::Dev {
            self.save_snapshot(now).await?;
        }

        let mut reply = format!("Switched to {} mode.", target.label());
        if target == Mode::Dev {
            match self.snapshots.load().context("Failed to load snapshot")? {
                Some(raw) => {
                    let snapshot = ModeSnapshot::from_markdown(&raw);
                    if !snapshot.last_task.is_empty() {
                        reply.push_str(&format!(" Resuming after: {}", snapshot.last_task));
                        self.state.write().await.last_task = Some(snapshot.last_task);
                    }
                }
                None => reply.push_str(" No saved snapshot, starting fresh."),
            }
        }

        self.state.write().await.mode = target;
        self.mode_store
            .save(target, now)
            .context("Failed to persist mode")?;
        tracing::info!("{}", reply);
        self.emit(AgentEvent::ModeChanged(target));
        Ok(reply)
    }

    async fn build_snapshot(&self) -> ModeSnapshot {
        let next_steps: Vec<String> = {
            let state = self.state.read().await;
            self.tasks
                .pending()
                .unwrap_or_default()
                .into_iter()
                .filter(|task| !state.processed_tasks.contains(&task.text))
                .map(|task| task.text)
                .take(MAX_NEXT_STEPS)
                .collect()
        };

        let state = self.state.read().await;
        let status = if state.last_error.is_some() {
            "blocked"
        } else if state.current_task.is_some() {
            "in_progress"
        } else {
            "idle"
        };
        let mut notes = String::new();
        if !state.last_files.is_empty() {
            notes.push_str(&format!("Last files written: {}", state.last_files.join(", ")));
        }
        if let Some(error) = &state.last_error {
            if !notes.is_empty() {
                notes.push('\n');
            }
            notes.push_str(&format!("Last error: {}", error));
        }

        ModeSnapshot {
            phase: if next_steps.is_empty() { "waiting for tasks" } else { "building" }.to_string(),
            status: status.to_string(),
            last_task: state
                .current_task
                .clone()
                .or_else(|| state.last_task.clone())
                .unwrap_or_default(),
            next_steps,
            notes,
        }
    }

    async fn save_snapshot(&self, now: DateTime<Utc>) -> Result<()> {
        let snapshot = self.build_snapshot().await;
        self.snapshots
            .save(&snapshot, now)
            .context("Failed to save mode snapshot")
    }

    async fn dispatch(&self, message: OperatorMessage, now: DateTime<Utc>) {
        let reply = self.handle_message(&message.text, now).await;
        match message.reply {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => self.emit(AgentEvent::Observation(reply)),
        }
    }

    async fn drain_inbox(&self, now: DateTime<Utc>) {
        while let Ok(message) = self.inbox.try_recv() {
            self.dispatch(message, now).await;
        }
    }

    /// One cycle: queued commands first, then the active mode's work.
    pub async fn run_cycle(&self, now: DateTime<Utc>, roll: f64) -> Result<()> {
        self.drain_inbox(now).await;
        self.state.write().await.cycles += 1;

        match self.mode().await {
            Mode::Dev => self.run_dev_cycle(now).await,
            Mode::Chat => {
                self.run_chat_cycle(now, roll).await;
                Ok(())
            }
        }
    }

    async fn run_chat_cycle(&self, now: DateTime<Utc>, roll: f64) {
        let schedule = self.state.read().await.schedule.clone();
        let (action, next) = self.chat_engine.do_heartbeat(now, &schedule, roll).await;

        {
            let mut state = self.state.write().await;
            // A #sleep handled mid-heartbeat must win.
            let sleep_today = state.schedule.sleep_today || next.sleep_today;
            state.schedule = ScheduleState {
                sleep_today,
                ..next
            };
        }

        if !matches!(action, ScheduleAction::Idle(_)) {
            self.emit(AgentEvent::Observation(format!("Heartbeat: {:?}", action)));
        }
    }

    async fn run_dev_cycle(&self, now: DateTime<Utc>) -> Result<()> {
        let pending = self.tasks.pending().context("Failed to read pending tasks")?;
        let next = {
            let state = self.state.read().await;
            pending
                .into_iter()
                .find(|task| !state.processed_tasks.contains(&task.text))
        };
        let Some(task) = next else {
            tracing::debug!("Dev mode: no unprocessed tasks");
            return Ok(());
        };

        tracing::info!("Dev mode: working on '{}'", task.text);
        self.emit(AgentEvent::Observation(format!("Working on: {}", task.text)));

        let context = {
            let mut state = self.state.write().await;
            state.current_task = Some(task.text.clone());
            TaskContext {
                current_files: workspace_listing(&self.workspace),
                last_error: state.last_error.clone(),
                ux_feedback: None,
            }
        };

        let generation = {
            let mut engine = self.task_engine.lock().await;
            engine.generate_code(&task.text, &context).await
        };

        let generation = match generation {
            Ok(generation) => generation,
            Err(e) => {
                tracing::error!("Code generation failed for '{}': {}", task.text, e);
                self.state.write().await.last_error = Some(e.to_string());
                self.save_snapshot(now).await?;
                self.state.write().await.current_task = None;
                self.emit(AgentEvent::Error(format!("Code generation failed: {}", e)));
                return Ok(());
            }
        };

        let outcome = self.apply_generation(&generation).await;
        let (files, error) = match outcome {
            Ok(result) => result,
            Err(e) => (Vec::new(), Some(e.to_string())),
        };

        {
            let mut state = self.state.write().await;
            state.processed_tasks.insert(task.text.clone());
            state.current_task = None;
            state.last_task = Some(task.text.clone());
            state.last_error = error.clone();
            state.last_files = files.clone();
        }

        let mut entry = format!("Task: {}\n\nFiles: {}", task.text, display_files(&files));
        if let Some(error) = &error {
            entry.push_str(&format!("\n\nProblem: {}", error));
            self.emit(AgentEvent::Error(error.clone()));
        }
        if let Err(e) = self.chat_engine.journal().append(JournalKind::Dev, &entry, now) {
            tracing::warn!("Failed to journal dev work: {}", e);
        }

        self.emit(AgentEvent::CodeWritten {
            task: task.text.clone(),
            files: files.clone(),
        });
        self.post_devlog(&task.text, &files, error.as_deref()).await;
        Ok(())
    }

    /// Write files, then run shell edits (when allowed). A failing shell edit
    /// gets one `fix_code` round.
    async fn apply_generation(
        &self,
        generation: &Generation,
    ) -> crate::error::Result<(Vec<String>, Option<String>)> {
        let mut files = write_code_to_files(&generation.code_edits, &self.workspace)?;
        let shell_edits: Vec<&CodeEdit> = generation
            .code_edits
            .iter()
            .filter(|edit| edit.is_shell())
            .collect();

        if shell_edits.is_empty() {
            return Ok((files, None));
        }
        if !self.config.allow_shell_edits {
            tracing::info!("Skipping {} shell edit(s) (disabled)", shell_edits.len());
            return Ok((files, None));
        }

        for edit in shell_edits {
            let failure = match run_shell(&edit.content, &self.workspace, SHELL_TIMEOUT).await {
                Ok(outcome) if outcome.success() => continue,
                Ok(outcome) => outcome.report(),
                Err(message) => message,
            };

            tracing::warn!("Shell edit failed, asking for a fix: {}", failure);
            let context = TaskContext {
                current_files: workspace_listing(&self.workspace),
                ..Default::default()
            };
            let fix = {
                let mut engine = self.task_engine.lock().await;
                engine.fix_code(&failure, &context).await
            };
            return match fix {
                Ok(fix) => {
                    files.extend(write_code_to_files(&fix.code_edits, &self.workspace)?);
                    Ok((files, None))
                }
                Err(e) => Ok((files, Some(format!("{}\n(fix attempt failed: {})", failure, e)))),
            };
        }

        Ok((files, None))
    }

    /// Best-effort forum devlog; failures are reported, never raised.
    async fn post_devlog(&self, task: &str, files: &[String], error: Option<&str>) {
        let skill = match self.skills.load(COLOSSEUM_SKILL) {
            Ok(skill) => skill,
            Err(e) => {
                tracing::debug!("Skipping devlog: {}", e);
                return;
            }
        };

        let mut body = format!(
            "{} here with a build update.\n\nTask: {}\nFiles touched: {}",
            self.config.agent_name,
            task,
            display_files(files)
        );
        if let Some(error) = error {
            body.push_str(&format!("\n\nStill fighting this one: {}", error));
        }
        let params = serde_json::json!({
            "title": format!("Devlog: {}", truncate(task, 80)),
            "body": body,
            "tags": ["devlog", "progress-update"],
        });

        match skill.execute("create_post", &params).await {
            Ok(result) if result.is_success() => self.emit(AgentEvent::ActionTaken {
                action: "devlog".to_string(),
                result: task.to_string(),
            }),
            Ok(result) => {
                tracing::warn!("Devlog rejected: {:?}", result);
                self.emit(AgentEvent::Error(format!("Devlog rejected: {:?}", result)));
            }
            Err(e) => {
                tracing::warn!("Devlog post failed: {}", e);
                self.emit(AgentEvent::Error(format!("Devlog post failed: {}", e)));
            }
        }
    }

    pub async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("Agent loop starting in {} mode", self.mode().await.label());
        self.emit(AgentEvent::Observation(format!(
            "{} is waking up",
            self.config.agent_name
        )));

        let poll = Duration::from_secs(self.config.poll_interval_secs.max(1));

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_cycle(Utc::now(), rand::random::<f64>()).await {
                tracing::error!("Agent cycle error: {:#}", e);
                self.emit(AgentEvent::Error(format!("{:#}", e)));
            }

            tokio::select! {
                _ = sleep(poll) => {}
                message = self.inbox.recv_async() => match message {
                    Ok(message) => self.dispatch(message, Utc::now()).await,
                    Err(_) => {
                        tracing::warn!("Operator channel closed");
                        sleep(poll).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        if self.mode().await == Mode::Dev {
            self.save_snapshot(Utc::now()).await?;
        }
        tracing::info!("Agent loop stopped");
        Ok(())
    }
}

fn display_files(files: &[String]) -> String {
    if files.is_empty() {
        "(none)".to_string()
    } else {
        files.join(", ")
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Relative paths of files already in the workspace, for prompt context.
fn workspace_listing(root: &Path) -> Option<String> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files);
    if files.is_empty() {
        return None;
    }
    files.sort();
    Some(
        files
            .iter()
            .map(|file| format!("- {}", file))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if out.len() >= MAX_LISTED_FILES {
            return;
        }
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == "node_modules" || name == "target" {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Completion, Message, Usage};
    use crate::error::{AgentError, Result as AgentResult};
    use crate::skills::{Skill, SkillActionDef, SkillResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ScriptedCode {
        replies: StdMutex<VecDeque<AgentResult<String>>>,
    }

    #[async_trait]
    impl CodeBackend for ScriptedCode {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _s: &str, _m: &[Message], _t: u32) -> AgentResult<Completion> {
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("nothing to add".to_string()));
            next.map(|text| Completion {
                text,
                usage: Usage::default(),
            })
        }
    }

    struct FixedChat(&'static str);

    #[async_trait]
    impl ChatBackend for FixedChat {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn chat(&self, _m: &[Message], _t: u32, _temp: f32) -> AgentResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct RecordingForum {
        posts: Arc<StdMutex<Vec<serde_json::Value>>>,
    }

    #[async_trait]
    impl Skill for RecordingForum {
        fn name(&self) -> &str {
            "colosseum"
        }

        fn description(&self) -> &str {
            "records forum posts"
        }

        async fn execute(&self, _action: &str, params: &serde_json::Value) -> AgentResult<SkillResult> {
            self.posts.lock().unwrap().push(params.clone());
            Ok(SkillResult::Success {
                message: "ok".to_string(),
            })
        }

        fn available_actions(&self) -> Vec<SkillActionDef> {
            Vec::new()
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        agent: Agent,
        outbox: Sender<OperatorMessage>,
        events: Receiver<AgentEvent>,
        forum_posts: Arc<StdMutex<Vec<serde_json::Value>>>,
    }

    fn harness(code_replies: Vec<AgentResult<String>>, chat_reply: &'static str) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let path = |name: &str| root.join(name).to_string_lossy().to_string();
        let config = AgentConfig {
            journal_dir: path("journal"),
            pending_tasks_path: path("pending_tasks.md"),
            mode_snapshot_path: path("mode_snapshot.md"),
            mode_state_path: path("mode.json"),
            values_path: path("values.md"),
            knowledge_dir: path("knowledge"),
            workspace_dir: path("workspace"),
            ..AgentConfig::default()
        };

        let forum_posts = Arc::new(StdMutex::new(Vec::new()));
        let recorded = forum_posts.clone();
        let mut skills = SkillLoader::new(config.clone());
        skills.register(COLOSSEUM_SKILL, move |_| {
            Ok(Arc::new(RecordingForum {
                posts: recorded.clone(),
            }) as Arc<dyn Skill>)
        });

        let (event_tx, events) = flume::unbounded();
        let (outbox, inbox) = flume::unbounded();
        let agent = Agent::new(
            config,
            Arc::new(ScriptedCode {
                replies: StdMutex::new(code_replies.into()),
            }),
            Arc::new(FixedChat(chat_reply)),
            Arc::new(skills),
            event_tx,
            inbox,
        );

        Harness {
            dir,
            agent,
            outbox,
            events,
            forum_posts,
        }
    }

    /// 15:00 local (UTC+8).
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 7, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn addtask_then_tasklist() {
        let h = harness(Vec::new(), "NO");
        let reply = h.agent.handle_message("#addtask buy milk", now()).await;
        assert!(reply.contains("buy milk"));

        let listed = h.agent.handle_message("#tasklist", now()).await;
        assert!(listed.contains("buy milk"));
        assert!(listed.contains("2025-06-02"));
    }

    #[tokio::test]
    async fn free_text_is_routed_by_classification() {
        let h = harness(vec![Ok("gm fren".to_string())], "NO");
        assert_eq!(h.agent.handle_message("gm", now()).await, "gm fren");
        assert_eq!(h.agent.status().await.pending_tasks, 0);

        let h = harness(Vec::new(), "YES");
        let reply = h.agent.handle_message("add a leaderboard page", now()).await;
        assert!(reply.contains("task list"));
        let pending = h.agent.tasks.pending().unwrap();
        assert_eq!(pending[0].text, "add a leaderboard page");
    }

    #[tokio::test]
    async fn mode_switch_saves_and_restores_snapshot() {
        let h = harness(Vec::new(), "NO");
        assert_eq!(h.agent.mode().await, Mode::Chat);

        let reply = h.agent.handle_message("#devmode", now()).await;
        assert!(reply.contains("No saved snapshot"));
        assert!(matches!(h.events.try_recv(), Ok(AgentEvent::ModeChanged(Mode::Dev))));

        h.agent.handle_message("#addtask wire the vote button", now()).await;
        h.agent.state.write().await.last_task = Some("style header".to_string());

        h.agent.handle_message("#chatmode", now()).await;
        let raw = h.agent.snapshots.load().unwrap().unwrap();
        let snapshot = ModeSnapshot::from_markdown(&raw);
        assert_eq!(snapshot.last_task, "style header");
        assert_eq!(snapshot.next_steps, vec!["wire the vote button".to_string()]);

        h.agent.state.write().await.last_task = None;
        let reply = h.agent.handle_message("#devmode", now()).await;
        assert!(reply.contains("Resuming after: style header"));
        assert_eq!(
            h.agent.state.read().await.last_task.as_deref(),
            Some("style header")
        );

        // Persisted across restarts.
        assert_eq!(ModeStore::new(h.dir.path().join("mode.json")).load(), Mode::Dev);
        assert!(h.agent.handle_message("#devmode", now()).await.contains("Already"));
    }

    #[tokio::test]
    async fn dev_cycle_writes_files_once_per_task() {
        let h = harness(
            vec![Ok("```js::src/App.js\nconsole.log(1)\n```\n```bash::SHELL\nnpm i\n```".to_string())],
            "NO",
        );
        h.agent.switch_mode(Mode::Dev, now()).await.unwrap();
        h.agent.handle_message("#addtask log something", now()).await;

        h.agent.run_cycle(now(), 0.0).await.unwrap();
        let written = h.dir.path().join("workspace/src/App.js");
        assert_eq!(fs::read_to_string(&written).unwrap(), "console.log(1)");

        let status = h.agent.status().await;
        assert_eq!(status.last_task.as_deref(), Some("log something"));
        assert_eq!(status.last_error, None);
        assert_eq!(h.forum_posts.lock().unwrap().len(), 1);

        // Shell edits are not executed by default.
        assert!(!h.dir.path().join("workspace/node_modules").exists());

        // Already processed: nothing else happens.
        h.agent.run_cycle(now(), 0.0).await.unwrap();
        assert_eq!(h.forum_posts.lock().unwrap().len(), 1);
        assert_eq!(h.agent.status().await.conversation_turns, 2);
    }

    #[tokio::test]
    async fn dev_cycle_failure_is_recorded_and_loop_continues() {
        let h = harness(
            vec![Err(AgentError::Upstream {
                status: 500,
                body: "boom".to_string(),
            })],
            "NO",
        );
        h.agent.switch_mode(Mode::Dev, now()).await.unwrap();
        h.agent.handle_message("#addtask break things", now()).await;

        h.agent.run_cycle(now(), 0.0).await.unwrap();

        let status = h.agent.status().await;
        assert!(status.last_error.unwrap().contains("boom"));
        assert_eq!(status.current_task, None);
        let snapshot = ModeSnapshot::from_markdown(&h.agent.snapshots.load().unwrap().unwrap());
        assert_eq!(snapshot.status, "blocked");
        assert!(h.forum_posts.lock().unwrap().is_empty());

        // Unprocessed, so the next cycle retries it.
        h.agent.run_cycle(now(), 0.0).await.unwrap();
        assert_eq!(h.agent.status().await.last_task.as_deref(), Some("break things"));
    }

    #[tokio::test]
    async fn escaping_edit_is_reported_not_written() {
        let h = harness(vec![Ok("```js::../evil.js\nx\n```".to_string())], "NO");
        h.agent.switch_mode(Mode::Dev, now()).await.unwrap();
        h.agent.handle_message("#addtask be sneaky", now()).await;

        h.agent.run_cycle(now(), 0.0).await.unwrap();
        assert!(!h.dir.path().join("evil.js").exists());
        let status = h.agent.status().await;
        assert!(status.last_error.unwrap().contains("escapes"));
    }

    #[tokio::test]
    async fn queued_messages_are_answered_before_work() {
        let h = harness(Vec::new(), "NO");
        let (message, reply) = OperatorMessage::with_reply("#sleep");
        h.outbox.send(message).unwrap();

        h.agent.run_cycle(now(), 0.9).await.unwrap();
        assert!(reply.await.unwrap().contains("sleep"));

        let status = h.agent.status().await;
        assert!(status.sleeping);
        // Sleeping: the heartbeat never fired.
        assert_eq!(status.last_heartbeat_at, None);

        h.agent.handle_message("#newday", now()).await;
        h.agent.run_cycle(now(), 0.1).await.unwrap();
        assert_eq!(h.agent.status().await.last_heartbeat_at, Some(now()));
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let h = harness(Vec::new(), "NO");
        let agent = Arc::new(h.agent);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(agent.clone().run_loop(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn workspace_listing_skips_hidden_and_deps() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        fs::write(dir.path().join("src/App.js"), "").unwrap();
        fs::write(dir.path().join("node_modules/x/i.js"), "").unwrap();
        fs::write(dir.path().join(".env"), "").unwrap();

        assert_eq!(workspace_listing(dir.path()).as_deref(), Some("- src/App.js"));
        assert_eq!(workspace_listing(&dir.path().join("missing")), None);
    }
}
