//! JSON-file configuration store.
//!
//! Loaded once at startup; every mutation is written back immediately.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{AgentDescriptor, DebateConfig, ProviderKind};
use crate::error::{CrossfireError, CrossfireResult};

/// Partial update for an agent descriptor. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub provider: Option<ProviderKind>,
    pub color: Option<String>,
    pub system_prompt: Option<String>,
}

/// Persistent owner of the [`DebateConfig`] record.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: DebateConfig,
}

impl ConfigStore {
    /// Load the store from `path`. A missing file yields the defaults.
    pub fn load(path: impl Into<PathBuf>) -> CrossfireResult<Self> {
        let path = path.into();
        let config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| CrossfireError::Config(format!("{}: {}", path.display(), e)))?;
            serde_json::from_str(&raw)
                .map_err(|e| CrossfireError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            debug!(path = %path.display(), "Config file missing, using defaults");
            DebateConfig::default()
        };
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &DebateConfig {
        &self.config
    }

    pub fn agent(&self, id: &str) -> Option<&AgentDescriptor> {
        self.config.agent(id)
    }

    pub fn save(&self) -> CrossfireResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CrossfireError::Config(e.to_string()))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.config)
            .map_err(|e| CrossfireError::Config(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| CrossfireError::Config(format!("{}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), "Config saved");
        Ok(())
    }

    /// Register a new agent under a fresh id.
    pub fn add_agent(
        &mut self,
        name: &str,
        provider: ProviderKind,
        system_prompt: &str,
        color: Option<&str>,
    ) -> CrossfireResult<AgentDescriptor> {
        let agent = AgentDescriptor {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            provider,
            color: color
                .map(str::to_string)
                .unwrap_or_else(|| provider.site().default_color.to_string()),
            system_prompt: system_prompt.to_string(),
        };
        self.config.agents.push(agent.clone());
        self.save()?;
        info!(agent_id = %agent.id, name, %provider, "Agent added");
        Ok(agent)
    }

    pub fn update_agent(&mut self, id: &str, update: AgentUpdate) -> CrossfireResult<()> {
        let agent = self
            .config
            .agents
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| CrossfireError::AgentConfigMissing(id.to_string()))?;

        if let Some(name) = update.name {
            agent.name = name;
        }
        if let Some(provider) = update.provider {
            agent.provider = provider;
        }
        if let Some(color) = update.color {
            agent.color = color;
        }
        if let Some(system_prompt) = update.system_prompt {
            agent.system_prompt = system_prompt;
        }
        self.save()
    }

    /// Remove an agent. Removing an unknown id is a no-op apart from the save.
    pub fn delete_agent(&mut self, id: &str) -> CrossfireResult<()> {
        self.config.agents.retain(|a| a.id != id);
        self.save()
    }

    pub fn set_initial_prompt_template(&mut self, template: &str) -> CrossfireResult<()> {
        self.config.initial_prompt_template = template.to_string();
        self.save()
    }

    pub fn set_final_ranking_prompt_template(&mut self, template: &str) -> CrossfireResult<()> {
        self.config.final_ranking_prompt_template = template.to_string();
        self.save()
    }

    pub fn set_pass_keyword(&mut self, keyword: &str) -> CrossfireResult<()> {
        self.config.pass_keyword = keyword.to_string();
        self.save()
    }
}
