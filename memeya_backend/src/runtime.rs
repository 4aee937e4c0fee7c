use std::sync::Arc;

use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::agent::{Agent, AgentEvent, OperatorMessage};
use crate::backend::claude::ClaudeClient;
use crate::backend::grok::GrokClient;
use crate::backend::{ChatBackend, CodeBackend};
use crate::config::AgentConfig;
use crate::forum_heartbeat::{ForumHeartbeat, HeartbeatStore};
use crate::server::DashboardState;
use crate::skills::{Skill, SkillLoader};

type ExtraSkill = (String, Arc<dyn Fn(&AgentConfig) -> crate::error::Result<Arc<dyn Skill>> + Send + Sync>);

pub struct MemeyaRuntime {
    pub config: AgentConfig,
    pub agent: Arc<Agent>,
    pub skills: Arc<SkillLoader>,
    pub operator_tx: Sender<OperatorMessage>,
    pub shutdown: Arc<watch::Sender<bool>>,
}

pub struct MemeyaRuntimeBuilder {
    config: AgentConfig,
    event_tx: Sender<AgentEvent>,
    code_backend: Option<Arc<dyn CodeBackend>>,
    chat_backend: Option<Arc<dyn ChatBackend>>,
    extra_skills: Vec<ExtraSkill>,
}

impl MemeyaRuntimeBuilder {
    pub fn new(config: AgentConfig, event_tx: Sender<AgentEvent>) -> Self {
        Self {
            config,
            event_tx,
            code_backend: None,
            chat_backend: None,
            extra_skills: Vec::new(),
        }
    }

    pub fn with_code_backend(mut self, backend: Arc<dyn CodeBackend>) -> Self {
        self.code_backend = Some(backend);
        self
    }

    pub fn with_chat_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.chat_backend = Some(backend);
        self
    }

    pub fn with_skill<F>(mut self, key: &str, factory: F) -> Self
    where
        F: Fn(&AgentConfig) -> crate::error::Result<Arc<dyn Skill>> + Send + Sync + 'static,
    {
        self.extra_skills.push((key.to_string(), Arc::new(factory)));
        self
    }

    pub fn build(self) -> Result<MemeyaRuntime> {
        let config = self.config;

        let code_backend: Arc<dyn CodeBackend> = match self.code_backend {
            Some(backend) => backend,
            None => Arc::new(
                ClaudeClient::from_config(&config).context("Failed to build Claude client")?,
            ),
        };
        let chat_backend: Arc<dyn ChatBackend> = match self.chat_backend {
            Some(backend) => backend,
            None => {
                Arc::new(GrokClient::from_config(&config).context("Failed to build Grok client")?)
            }
        };

        if config.claude_api_key.is_none() {
            tracing::warn!("ANTHROPIC_API_KEY is unset; dev work and chat replies will fail");
        }
        if config.grok_api_key.is_none() {
            tracing::warn!("XAI_API_KEY is unset; news and reflection will fail");
        }

        let mut loader = SkillLoader::with_builtins(config.clone());
        for (key, factory) in self.extra_skills {
            loader.register(&key, move |config| factory(config));
        }
        tracing::info!("Registered skills: {:?}", loader.registered_keys());
        let skills = Arc::new(loader);

        let (operator_tx, inbox) = flume::unbounded();
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);

        let agent = Arc::new(Agent::new(
            config.clone(),
            code_backend,
            chat_backend,
            skills.clone(),
            self.event_tx,
            inbox,
        ));

        Ok(MemeyaRuntime {
            config,
            agent,
            skills,
            operator_tx,
            shutdown,
        })
    }
}

impl MemeyaRuntime {
    pub fn bootstrap(config: AgentConfig, event_tx: Sender<AgentEvent>) -> Result<Self> {
        MemeyaRuntimeBuilder::new(config, event_tx).build()
    }

    pub fn spawn_agent_loop(&self) -> JoinHandle<()> {
        let agent = self.agent.clone();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = agent.run_loop(shutdown).await {
                tracing::error!("Agent loop error: {:#}", e);
            }
        })
    }

    pub fn dashboard_state(&self) -> DashboardState {
        DashboardState::from_config(&self.config, self.shutdown.clone())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

pub fn forum_heartbeat(config: &AgentConfig, chat: Arc<dyn ChatBackend>) -> Result<ForumHeartbeat> {
    let forum = crate::skills::colosseum::ColosseumClient::from_config(config)
        .context("Forum heartbeat needs Colosseum credentials")?;
    Ok(ForumHeartbeat::new(
        Arc::new(forum),
        chat,
        HeartbeatStore::new(&config.heartbeat_state_path),
        config,
    ))
}

/// Log agent events, the way the operator would see them.
pub fn spawn_event_logger(event_rx: Receiver<AgentEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            match event {
                AgentEvent::ModeChanged(mode) => tracing::info!("[mode] {}", mode.label()),
                AgentEvent::Observation(text) => tracing::info!("[agent] {}", text),
                AgentEvent::ActionTaken { action, result } => {
                    tracing::info!("[action] {}: {}", action, result)
                }
                AgentEvent::CodeWritten { task, files } => {
                    tracing::info!("[code] {} -> {}", task, files.join(", "))
                }
                AgentEvent::Error(text) => tracing::warn!("[error] {}", text),
            }
        }
    })
}
