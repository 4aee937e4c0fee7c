//! Skills: lazily loaded capability modules looked up by string key.
//!
//! A skill is only constructed the first time something asks for it, and the
//! instance is then cached for the rest of the process. Unknown keys fail
//! with [`AgentError::SkillNotFound`]; a factory failure (e.g. missing
//! credentials) is returned to the caller and nothing is cached, so a later
//! call can succeed once the configuration is fixed.

pub mod colosseum;
pub mod x_post;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};

pub const X_POST_SKILL: &str = "x_post";
pub const COLOSSEUM_SKILL: &str = "colosseum";

/// The result of executing a skill action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillResult {
    /// Action completed successfully
    Success { message: String },
    /// Action was rejected or failed in a way the caller should report
    Error { message: String },
}

impl SkillResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SkillResult::Success { .. })
    }
}

/// Describes an action a skill can perform (used in prompt generation)
#[derive(Debug, Clone)]
pub struct SkillActionDef {
    pub name: String,
    pub description: String,
    pub params_description: String,
}

#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Execute a named action. `params` carries action-specific fields.
    async fn execute(&self, action: &str, params: &serde_json::Value) -> Result<SkillResult>;

    fn available_actions(&self) -> Vec<SkillActionDef>;
}

pub type SkillFactory = Box<dyn Fn(&AgentConfig) -> Result<Arc<dyn Skill>> + Send + Sync>;

pub struct SkillLoader {
    config: AgentConfig,
    factories: HashMap<String, SkillFactory>,
    loaded: Mutex<HashMap<String, Arc<dyn Skill>>>,
}

impl SkillLoader {
    /// An empty registry.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            factories: HashMap::new(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with the built-in skills registered (but not yet loaded).
    pub fn with_builtins(config: AgentConfig) -> Self {
        let mut loader = Self::new(config);
        loader.register(X_POST_SKILL, |config| {
            Ok(Arc::new(x_post::XPostSkill::from_config(config)?) as Arc<dyn Skill>)
        });
        loader.register(COLOSSEUM_SKILL, |config| {
            Ok(Arc::new(colosseum::ColosseumSkill::from_config(config)?) as Arc<dyn Skill>)
        });
        loader
    }

    pub fn register<F>(&mut self, key: &str, factory: F)
    where
        F: Fn(&AgentConfig) -> Result<Arc<dyn Skill>> + Send + Sync + 'static,
    {
        self.factories.insert(key.to_string(), Box::new(factory));
    }

    /// Return the cached instance for `key`, building it on first use.
    pub fn load(&self, key: &str) -> Result<Arc<dyn Skill>> {
        let mut loaded = self
            .loaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(skill) = loaded.get(key) {
            return Ok(skill.clone());
        }

        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| AgentError::SkillNotFound(key.to_string()))?;

        let skill = factory(&self.config)?;
        tracing::info!("Loaded skill '{}' ({})", key, skill.description());
        loaded.insert(key.to_string(), skill.clone());
        Ok(skill)
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.loaded
            .lock()
            .map(|loaded| loaded.contains_key(key))
            .unwrap_or(false)
    }

    pub fn registered_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }
}
