//! Agent directories — the on-disk home of every agent.
//!
//! Layout under `<home>/agents/<name>/`:
//!
//! ```text
//! agent.json    name, channel_id, model, system_prompt, permissions, created_at
//! docs/         free-form markdown; README.md doubles as the description
//! sessions/     one JSON file per saved context snapshot
//! workspace/    git-versioned; the jail root for file tools
//! ```
//!
//! Existence of the directory is the source of truth for an agent; the store
//! mirrors metadata.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use chorus_core::error::{ChorusError, Result};
use chorus_core::utils::{copy_tree, timestamp};

/// System prompt new agents start with.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a general-purpose AI agent. You have access to a workspace directory \
     where you can create, edit, and view files, run commands, and manage a git \
     repository. Use your tools to accomplish tasks. Maintain notes about your \
     workspace in your docs/ directory.";

/// The contents of `agent.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub channel_id: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_permissions")]
    pub permissions: String,
    #[serde(default)]
    pub created_at: String,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_permissions() -> String {
    "standard".to_string()
}

impl AgentConfig {
    /// A fresh config for a new agent.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel_id: 0,
            model: None,
            system_prompt: default_system_prompt(),
            permissions: default_permissions(),
            created_at: timestamp(),
        }
    }
}

// ─────────────────────────────────────────────
// AgentDirectory
// ─────────────────────────────────────────────

/// Manages agent directories under the Chorus home.
pub struct AgentDirectory {
    home: PathBuf,
    /// Optional template tree copied for new agents; absent means the
    /// default skeleton is materialized in place.
    template: Option<PathBuf>,
}

impl AgentDirectory {
    pub fn new(home: impl Into<PathBuf>, template: Option<PathBuf>) -> Self {
        Self {
            home: home.into(),
            template,
        }
    }

    /// Create the home directory structure (idempotent).
    pub fn ensure_home(&self) -> Result<()> {
        std::fs::create_dir_all(self.agents_dir())?;
        std::fs::create_dir_all(self.home.join("db"))?;
        Ok(())
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.home.join("agents")
    }

    /// Path of an existing agent directory, or None.
    pub fn get(&self, name: &str) -> Option<PathBuf> {
        let dir = self.agents_dir().join(name);
        dir.is_dir().then_some(dir)
    }

    /// Sorted names of every agent on disk.
    pub fn list_all(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.agents_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    /// Materialize a new agent directory.
    ///
    /// Copies the template (or builds the default skeleton), creates
    /// `sessions/`, initializes a git repository in `workspace/`, and writes
    /// name, creation time, and overrides into `agent.json`.
    pub async fn create(
        &self,
        name: &str,
        overrides: serde_json::Map<String, serde_json::Value>,
    ) -> Result<PathBuf> {
        let agent_dir = self.agents_dir().join(name);
        if agent_dir.exists() {
            return Err(ChorusError::AgentExists(name.to_string()));
        }

        match &self.template {
            Some(template) => copy_tree(template, &agent_dir)?,
            None => default_skeleton(&agent_dir, name)?,
        }

        std::fs::create_dir_all(agent_dir.join("sessions"))?;
        std::fs::create_dir_all(agent_dir.join("docs"))?;

        let workspace = agent_dir.join("workspace");
        std::fs::create_dir_all(&workspace)?;
        git_init(&workspace).await?;

        // Seed agent.json with identity, timestamp, and overrides.
        let config_path = agent_dir.join("agent.json");
        let mut data = read_json(&config_path).unwrap_or_else(|_| serde_json::json!({}));
        let obj = data
            .as_object_mut()
            .ok_or_else(|| ChorusError::Task("agent.json is not an object".into()))?;
        obj.insert("name".into(), serde_json::json!(name));
        obj.insert("created_at".into(), serde_json::json!(timestamp()));
        for (key, value) in overrides {
            obj.insert(key, value);
        }
        write_json(&config_path, &data)?;

        info!(agent = name, dir = %agent_dir.display(), "created agent directory");
        Ok(agent_dir)
    }

    /// Remove an agent directory, or archive it to `.trash/<name>`.
    pub fn destroy(&self, name: &str, keep_files: bool) -> Result<()> {
        let agent_dir = self
            .get(name)
            .ok_or_else(|| ChorusError::AgentNotFound(name.to_string()))?;

        if keep_files {
            let trash = self.home.join(".trash");
            std::fs::create_dir_all(&trash)?;
            let target = trash.join(name);
            if target.exists() {
                std::fs::remove_dir_all(&target)?;
            }
            std::fs::rename(&agent_dir, &target)?;
            info!(agent = name, "archived agent to trash");
        } else {
            std::fs::remove_dir_all(&agent_dir)?;
            info!(agent = name, "destroyed agent directory");
        }
        Ok(())
    }

    /// Read and parse an agent's `agent.json`.
    pub fn read_config(&self, name: &str) -> Result<AgentConfig> {
        let dir = self
            .get(name)
            .ok_or_else(|| ChorusError::AgentNotFound(name.to_string()))?;
        let data = read_json(&dir.join("agent.json"))?;
        Ok(serde_json::from_value(data)?)
    }

    /// Update one key of an agent's `agent.json`, preserving unknown keys.
    pub fn update_config_key(
        &self,
        name: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let dir = self
            .get(name)
            .ok_or_else(|| ChorusError::AgentNotFound(name.to_string()))?;
        let path = dir.join("agent.json");
        let mut data = read_json(&path)?;
        let obj = data
            .as_object_mut()
            .ok_or_else(|| ChorusError::Task("agent.json is not an object".into()))?;
        obj.insert(key.to_string(), value);
        write_json(&path, &data)
    }

    /// First prose paragraph of the agent's `docs/README.md`, as its
    /// description.
    pub fn description(&self, name: &str) -> Option<String> {
        let readme = self.get(name)?.join("docs").join("README.md");
        let text = std::fs::read_to_string(readme).ok()?;
        let para = extract_first_paragraph(&text);
        (!para.is_empty()).then_some(para)
    }
}

/// Default skeleton when no template tree is configured.
fn default_skeleton(agent_dir: &Path, name: &str) -> Result<()> {
    std::fs::create_dir_all(agent_dir)?;
    let config = AgentConfig::new(name);
    write_json(
        &agent_dir.join("agent.json"),
        &serde_json::to_value(&config)?,
    )?;
    std::fs::create_dir_all(agent_dir.join("docs"))?;
    std::fs::write(
        agent_dir.join("docs").join("README.md"),
        format!("# {name}\n\nA Chorus agent.\n"),
    )?;
    Ok(())
}

async fn git_init(workspace: &Path) -> Result<()> {
    let output = Command::new("git")
        .arg("init")
        .current_dir(workspace)
        .output()
        .await?;
    if !output.status.success() {
        return Err(ChorusError::Task(format!(
            "git init failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json(path: &Path, data: &serde_json::Value) -> Result<()> {
    let mut body = serde_json::to_string_pretty(data)?;
    body.push('\n');
    std::fs::write(path, body)?;
    Ok(())
}

/// First meaningful prose line of a markdown document, capped at 200 chars.
///
/// Skips headings, emphasis-only lines, blockquotes, and blanks.
pub fn extract_first_paragraph(markdown: &str) -> String {
    for line in markdown.lines() {
        let stripped = line.trim();
        if stripped.is_empty()
            || stripped.starts_with('#')
            || stripped.starts_with('*')
            || stripped.starts_with('>')
        {
            continue;
        }
        if stripped.chars().count() > 200 {
            let cut: String = stripped.chars().take(197).collect();
            return format!("{cut}...");
        }
        return stripped.to_string();
    }
    String::new()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> (AgentDirectory, tempfile::TempDir) {
        let home = tempfile::tempdir().unwrap();
        let dir = AgentDirectory::new(home.path(), None);
        dir.ensure_home().unwrap();
        (dir, home)
    }

    #[tokio::test]
    async fn test_create_builds_layout() {
        let (dir, _home) = directory();
        let path = dir.create("scribe", serde_json::Map::new()).await.unwrap();

        assert!(path.join("agent.json").exists());
        assert!(path.join("docs").is_dir());
        assert!(path.join("sessions").is_dir());
        assert!(path.join("workspace").is_dir());
        assert!(path.join("workspace").join(".git").is_dir());
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let (dir, _home) = directory();
        dir.create("scribe", serde_json::Map::new()).await.unwrap();
        let err = dir.create("scribe", serde_json::Map::new()).await.unwrap_err();
        assert!(matches!(err, ChorusError::AgentExists(_)));
    }

    #[tokio::test]
    async fn test_create_applies_overrides() {
        let (dir, _home) = directory();
        let mut overrides = serde_json::Map::new();
        overrides.insert("model".into(), serde_json::json!("gpt-4o"));
        overrides.insert("permissions".into(), serde_json::json!("locked"));
        dir.create("scribe", overrides).await.unwrap();

        let config = dir.read_config("scribe").unwrap();
        assert_eq!(config.name, "scribe");
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.permissions, "locked");
        assert!(!config.created_at.is_empty());
    }

    #[tokio::test]
    async fn test_create_from_template() {
        let home = tempfile::tempdir().unwrap();
        let template = tempfile::tempdir().unwrap();
        let config = AgentConfig::new("template");
        std::fs::write(
            template.path().join("agent.json"),
            serde_json::to_string(&config).unwrap(),
        )
        .unwrap();
        std::fs::create_dir(template.path().join("docs")).unwrap();
        std::fs::write(template.path().join("docs/README.md"), "# T\n\nSeeded agent.\n").unwrap();

        let dir = AgentDirectory::new(home.path(), Some(template.path().to_path_buf()));
        dir.ensure_home().unwrap();
        let path = dir.create("seeded", serde_json::Map::new()).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(path.join("docs/README.md")).unwrap(),
            "# T\n\nSeeded agent.\n"
        );
        let loaded = dir.read_config("seeded").unwrap();
        assert_eq!(loaded.name, "seeded");
    }

    #[tokio::test]
    async fn test_destroy_removes() {
        let (dir, _home) = directory();
        dir.create("gone", serde_json::Map::new()).await.unwrap();
        dir.destroy("gone", false).unwrap();
        assert!(dir.get("gone").is_none());
    }

    #[tokio::test]
    async fn test_destroy_archives_to_trash() {
        let (dir, home) = directory();
        dir.create("kept", serde_json::Map::new()).await.unwrap();
        dir.destroy("kept", true).unwrap();

        assert!(dir.get("kept").is_none());
        assert!(home.path().join(".trash").join("kept").join("agent.json").exists());
    }

    #[tokio::test]
    async fn test_destroy_missing_fails() {
        let (dir, _home) = directory();
        assert!(matches!(
            dir.destroy("nope", false),
            Err(ChorusError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_all_sorted() {
        let (dir, _home) = directory();
        dir.create("zeta", serde_json::Map::new()).await.unwrap();
        dir.create("alpha", serde_json::Map::new()).await.unwrap();
        assert_eq!(dir.list_all(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_update_config_key_preserves_others() {
        let (dir, _home) = directory();
        dir.create("scribe", serde_json::Map::new()).await.unwrap();

        dir.update_config_key("scribe", "system_prompt", serde_json::json!("Be terse."))
            .unwrap();

        let config = dir.read_config("scribe").unwrap();
        assert_eq!(config.system_prompt, "Be terse.");
        assert_eq!(config.name, "scribe");
        assert_eq!(config.permissions, "standard");
    }

    #[tokio::test]
    async fn test_description_from_readme() {
        let (dir, _home) = directory();
        let path = dir.create("writer", serde_json::Map::new()).await.unwrap();
        std::fs::write(
            path.join("docs/README.md"),
            "# Writer\n\n*Status: active*\n\nDrafts release notes for the team.\n",
        )
        .unwrap();

        assert_eq!(
            dir.description("writer").as_deref(),
            Some("Drafts release notes for the team.")
        );
    }

    #[test]
    fn test_extract_first_paragraph() {
        assert_eq!(
            extract_first_paragraph("# Title\n\n> quote\n\nActual text here."),
            "Actual text here."
        );
        assert_eq!(extract_first_paragraph("# Only headings"), "");
        let long = "x".repeat(300);
        assert_eq!(extract_first_paragraph(&long).chars().count(), 200);
    }

    #[test]
    fn test_config_defaults_on_sparse_json() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"name": "minimal"}"#).unwrap();
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(config.permissions, "standard");
        assert_eq!(config.channel_id, 0);
        assert!(config.model.is_none());
    }
}
