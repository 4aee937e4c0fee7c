use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Fixed offset from UTC used for every wall-clock decision.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// First local hour (inclusive) of the active chat window.
    #[serde(default = "default_active_start_hour")]
    pub active_start_hour: u32,
    /// Last local hour (inclusive) of the active chat window.
    #[serde(default = "default_active_end_hour")]
    pub active_end_hour: u32,
    #[serde(default = "default_morning_news_hour")]
    pub morning_news_hour: u32,
    #[serde(default = "default_morning_news_min_gap_mins")]
    pub morning_news_min_gap_mins: i64,
    #[serde(default = "default_heartbeat_interval_mins")]
    pub heartbeat_interval_mins: i64,
    /// Probability mass given to "stay quiet" when a heartbeat fires.
    #[serde(default = "default_quiet_weight")]
    pub quiet_weight: f64,
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_active_start_hour() -> u32 {
    9
}

fn default_active_end_hour() -> u32 {
    23
}

fn default_morning_news_hour() -> u32 {
    8
}

fn default_morning_news_min_gap_mins() -> i64 {
    50
}

fn default_heartbeat_interval_mins() -> i64 {
    60
}

fn default_quiet_weight() -> f64 {
    0.5
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
            active_start_hour: default_active_start_hour(),
            active_end_hour: default_active_end_hour(),
            morning_news_hour: default_morning_news_hour(),
            morning_news_min_gap_mins: default_morning_news_min_gap_mins(),
            heartbeat_interval_mins: default_heartbeat_interval_mins(),
            quiet_weight: default_quiet_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Identity
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    #[serde(default = "default_persona")]
    pub persona: String,

    // Code backend (Anthropic Messages API)
    #[serde(default = "default_claude_url")]
    pub claude_api_url: String,
    #[serde(default = "default_claude_model")]
    pub claude_model: String,
    #[serde(default)]
    pub claude_api_key: Option<String>,
    #[serde(default = "default_code_max_tokens")]
    pub code_max_tokens: u32,
    #[serde(default)]
    pub retry: RetryConfig,

    // Chat backend (OpenAI-compatible, xAI Grok)
    #[serde(default = "default_grok_url")]
    pub grok_api_url: String,
    #[serde(default = "default_grok_model")]
    pub grok_model: String,
    #[serde(default)]
    pub grok_api_key: Option<String>,
    #[serde(default = "default_chat_max_tokens")]
    pub chat_max_tokens: u32,

    // Behaviour
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_news_window_hours")]
    pub news_window_hours: u32,
    #[serde(default = "default_conversation_max_turns")]
    pub conversation_max_turns: usize,
    #[serde(default)]
    pub allow_shell_edits: bool,

    // State files
    #[serde(default = "default_journal_dir")]
    pub journal_dir: String,
    #[serde(default = "default_pending_tasks_path")]
    pub pending_tasks_path: String,
    #[serde(default = "default_mode_snapshot_path")]
    pub mode_snapshot_path: String,
    #[serde(default = "default_mode_state_path")]
    pub mode_state_path: String,
    #[serde(default = "default_values_path")]
    pub values_path: String,
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: String,
    #[serde(default = "default_heartbeat_state_path")]
    pub heartbeat_state_path: String,
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,

    // Forum (Colosseum)
    #[serde(default = "default_colosseum_url")]
    pub colosseum_api_url: String,
    #[serde(default)]
    pub colosseum_api_key: Option<String>,
    #[serde(default = "default_forum_loop_min_mins")]
    pub forum_loop_min_mins: u64,
    #[serde(default = "default_forum_loop_max_mins")]
    pub forum_loop_max_mins: u64,

    // X / Twitter skill
    #[serde(default = "default_x_api_url")]
    pub x_api_url: String,
    #[serde(default)]
    pub x_bearer_token: Option<String>,

    // Operator channel
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<i64>,

    // Dashboard
    #[serde(default = "default_dashboard_bind")]
    pub dashboard_bind: String,
}

fn default_agent_name() -> String {
    "Memeya".to_string()
}

fn default_persona() -> String {
    "You are Memeya, an autonomous developer agent building a small web project in public. \
     You ship working code in small increments, keep a daily journal, and talk with your \
     community honestly and with a bit of humor."
        .to_string()
}

fn default_claude_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_claude_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_code_max_tokens() -> u32 {
    8192
}

fn default_grok_url() -> String {
    "https://api.x.ai/v1".to_string()
}

fn default_grok_model() -> String {
    "grok-3".to_string()
}

fn default_chat_max_tokens() -> u32 {
    1024
}

fn default_poll_interval() -> u64 {
    60
}

fn default_news_window_hours() -> u32 {
    24
}

fn default_conversation_max_turns() -> usize {
    40
}

const DEFAULT_STATE_DIR: &str = "memeya_state";

fn state_path(name: &str) -> String {
    let base = env::var("MEMEYA_STATE_DIR")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_STATE_DIR.to_string());
    Path::new(&base).join(name).display().to_string()
}

fn default_journal_dir() -> String {
    state_path("journal")
}

fn default_pending_tasks_path() -> String {
    state_path("pending_tasks.md")
}

fn default_mode_snapshot_path() -> String {
    state_path("mode_snapshot.md")
}

fn default_mode_state_path() -> String {
    state_path("mode.json")
}

fn default_values_path() -> String {
    state_path("values.md")
}

fn default_knowledge_dir() -> String {
    state_path("knowledge")
}

fn default_heartbeat_state_path() -> String {
    state_path("heartbeat_state.json")
}

fn default_workspace_dir() -> String {
    state_path("workspace")
}

fn default_colosseum_url() -> String {
    "https://agents.colosseum.com/api".to_string()
}

fn default_forum_loop_min_mins() -> u64 {
    30
}

fn default_forum_loop_max_mins() -> u64 {
    60
}

fn default_x_api_url() -> String {
    "https://api.twitter.com/2".to_string()
}

fn default_dashboard_bind() -> String {
    "127.0.0.1:8788".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            persona: default_persona(),
            claude_api_url: default_claude_url(),
            claude_model: default_claude_model(),
            claude_api_key: None,
            code_max_tokens: default_code_max_tokens(),
            retry: RetryConfig::default(),
            grok_api_url: default_grok_url(),
            grok_model: default_grok_model(),
            grok_api_key: None,
            chat_max_tokens: default_chat_max_tokens(),
            schedule: ScheduleConfig::default(),
            poll_interval_secs: default_poll_interval(),
            news_window_hours: default_news_window_hours(),
            conversation_max_turns: default_conversation_max_turns(),
            allow_shell_edits: false,
            journal_dir: default_journal_dir(),
            pending_tasks_path: default_pending_tasks_path(),
            mode_snapshot_path: default_mode_snapshot_path(),
            mode_state_path: default_mode_state_path(),
            values_path: default_values_path(),
            knowledge_dir: default_knowledge_dir(),
            heartbeat_state_path: default_heartbeat_state_path(),
            workspace_dir: default_workspace_dir(),
            colosseum_api_url: default_colosseum_url(),
            colosseum_api_key: None,
            forum_loop_min_mins: default_forum_loop_min_mins(),
            forum_loop_max_mins: default_forum_loop_max_mins(),
            x_api_url: default_x_api_url(),
            x_bearer_token: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            dashboard_bind: default_dashboard_bind(),
        }
    }
}

impl AgentConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("memeya_config.toml")
    }

    /// Load config from memeya_config.toml (next to executable), then apply env overrides.
    /// Environment variables win over the file.
    pub fn load() -> Self {
        let path = Self::config_path();

        let base = match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<AgentConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::warn!("No config file found, using defaults + env vars");
                Self::default()
            }
        };

        base.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(key) = non_empty_env("ANTHROPIC_API_KEY").or_else(|| non_empty_env("CLAUDE_API_KEY")) {
            self.claude_api_key = Some(key);
        }

        if let Some(model) = non_empty_env("CLAUDE_MODEL") {
            self.claude_model = model;
        }

        if let Some(key) = non_empty_env("XAI_API_KEY").or_else(|| non_empty_env("GROK_API_KEY")) {
            self.grok_api_key = Some(key);
        }

        if let Some(model) = non_empty_env("GROK_MODEL") {
            self.grok_model = model;
        }

        if let Some(interval) = non_empty_env("MEMEYA_POLL_INTERVAL_SECS") {
            if let Ok(seconds) = interval.parse() {
                self.poll_interval_secs = seconds;
            }
        }

        if let Some(interval) = non_empty_env("MEMEYA_HEARTBEAT_INTERVAL_MINS") {
            if let Ok(minutes) = interval.parse() {
                self.schedule.heartbeat_interval_mins = minutes;
            }
        }

        if let Some(enabled) = non_empty_env("MEMEYA_ALLOW_SHELL_EDITS") {
            self.allow_shell_edits = enabled.eq_ignore_ascii_case("1")
                || enabled.eq_ignore_ascii_case("true")
                || enabled.eq_ignore_ascii_case("yes");
        }

        if let Some(dir) = non_empty_env("MEMEYA_WORKSPACE_DIR") {
            self.workspace_dir = dir;
        }

        if let Some(path) = non_empty_env("MEMEYA_HEARTBEAT_STATE") {
            self.heartbeat_state_path = path;
        }

        if let Some(url) = non_empty_env("COLOSSEUM_API_URL") {
            self.colosseum_api_url = url;
        }

        if let Some(key) = non_empty_env("COLOSSEUM_API_KEY") {
            self.colosseum_api_key = Some(key);
        }

        if let Some(token) = non_empty_env("X_BEARER_TOKEN") {
            self.x_bearer_token = Some(token);
        }

        if let Some(token) = non_empty_env("TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = Some(token);
        }

        if let Some(chat_id) = non_empty_env("TELEGRAM_CHAT_ID") {
            self.telegram_chat_id = chat_id.parse().ok();
        }

        if let Some(bind) = non_empty_env("MEMEYA_DASHBOARD_BIND") {
            self.dashboard_bind = bind;
        }

        if let Some(name) = non_empty_env("AGENT_NAME") {
            self.agent_name = name;
        }

        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_schedule() {
        let config = AgentConfig::default();
        assert_eq!(config.schedule.utc_offset_hours, 8);
        assert_eq!(config.schedule.active_start_hour, 9);
        assert_eq!(config.schedule.active_end_hour, 23);
        assert_eq!(config.schedule.morning_news_hour, 8);
        assert_eq!(config.schedule.heartbeat_interval_mins, 60);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 5_000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AgentConfig = toml::from_str(
            "agent_name = \"Tester\"\n[schedule]\nheartbeat_interval_mins = 15\n",
        )
        .unwrap();
        assert_eq!(config.agent_name, "Tester");
        assert_eq!(config.schedule.heartbeat_interval_mins, 15);
        assert_eq!(config.schedule.morning_news_min_gap_mins, 50);
        assert_eq!(config.claude_model, default_claude_model());
    }

    #[test]
    fn heartbeat_state_path_follows_env() {
        std::env::set_var("MEMEYA_HEARTBEAT_STATE", "/tmp/memeya-hb.json");
        let config = AgentConfig::default().with_env_overrides();
        std::env::remove_var("MEMEYA_HEARTBEAT_STATE");
        assert_eq!(config.heartbeat_state_path, "/tmp/memeya-hb.json");
    }
}
