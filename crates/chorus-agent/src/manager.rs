//! Agent lifecycle — ties the directory layer to the store.
//!
//! The directory is the source of truth; the store mirrors metadata so
//! channel lookups and listings stay cheap and transactional.

use serde_json::json;
use tracing::info;

use chorus_core::error::{ChorusError, Result};
use chorus_core::names::validate_agent_name;
use chorus_core::permissions::{get_preset, PermissionProfile};
use chorus_core::store::{AgentRow, Store};
use chorus_core::utils::timestamp;

use crate::directory::{AgentConfig, AgentDirectory};

/// Creates, configures, and destroys agents.
pub struct AgentManager {
    directory: AgentDirectory,
    store: Store,
}

impl AgentManager {
    pub fn new(directory: AgentDirectory, store: Store) -> Self {
        Self { directory, store }
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    /// Create a new agent: validate the name, materialize the directory,
    /// and register the store row.
    pub async fn create_agent(
        &self,
        name: &str,
        channel_id: u64,
        guild_id: u64,
        overrides: serde_json::Map<String, serde_json::Value>,
    ) -> Result<AgentConfig> {
        validate_agent_name(name)?;

        let mut overrides = overrides;
        overrides.insert("channel_id".into(), json!(channel_id));
        self.directory.create(name, overrides).await?;

        let config = self.directory.read_config(name)?;
        self.store
            .register_agent(AgentRow {
                name: name.to_string(),
                channel_id,
                guild_id,
                model: config.model.clone(),
                permissions: config.permissions.clone(),
                created_at: if config.created_at.is_empty() {
                    timestamp()
                } else {
                    config.created_at.clone()
                },
                status: "active".into(),
            })
            .await?;

        info!(agent = name, channel = channel_id, "agent created");
        Ok(config)
    }

    /// Destroy an agent: remove (or archive) the directory and delete the
    /// store row.
    pub async fn destroy_agent(&self, name: &str, keep_files: bool) -> Result<()> {
        self.directory.destroy(name, keep_files)?;
        self.store.remove_agent(name).await?;
        info!(agent = name, archived = keep_files, "agent destroyed");
        Ok(())
    }

    /// Load an agent's configuration. The directory decides existence.
    pub fn get_agent(&self, name: &str) -> Result<AgentConfig> {
        self.directory.read_config(name)
    }

    /// Resolve the agent bound to a channel, if any.
    pub async fn get_agent_by_channel(&self, channel_id: u64) -> Result<Option<AgentConfig>> {
        let Some(row) = self.store.get_agent_by_channel(channel_id).await? else {
            return Ok(None);
        };
        match self.directory.read_config(&row.name) {
            Ok(config) => Ok(Some(config)),
            // Row without a directory: the agent is effectively gone.
            Err(ChorusError::AgentNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sorted names of all agents on disk.
    pub fn list_agents(&self) -> Vec<String> {
        self.directory.list_all()
    }

    /// The compiled permission profile for an agent's configured preset.
    pub fn profile_for(&self, config: &AgentConfig) -> Result<PermissionProfile> {
        get_preset(&config.permissions)
    }

    // ── Post-creation configuration ─────────

    pub fn set_system_prompt(&self, name: &str, prompt: &str) -> Result<()> {
        self.directory
            .update_config_key(name, "system_prompt", json!(prompt))
    }

    pub async fn set_model(&self, name: &str, model: Option<String>) -> Result<()> {
        self.directory
            .update_config_key(name, "model", json!(model))?;
        self.store.set_agent_model(name, model).await
    }

    /// Switch the permission preset. Unknown presets are rejected before
    /// anything is written.
    pub async fn set_permissions(&self, name: &str, preset: &str) -> Result<()> {
        get_preset(preset)?;
        self.directory
            .update_config_key(name, "permissions", json!(preset))?;
        self.store.set_agent_permissions(name, preset).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
