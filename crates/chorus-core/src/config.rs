//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;

use tracing::info;

/// Immutable runtime configuration. Construct via [`ChorusConfig::from_env`]
/// or directly in tests.
#[derive(Clone, Debug)]
pub struct ChorusConfig {
    /// Chat platform token (required).
    pub discord_token: String,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Root of all Chorus state (agents, db, trash). Defaults to
    /// `$HOME/.chorus-agents`.
    pub chorus_home: PathBuf,
    /// Guild to sync commands to during development.
    pub dev_guild_id: Option<u64>,
    /// Build identifier, informational only.
    pub git_commit: Option<String>,
}

impl ChorusConfig {
    /// Build config from the process environment.
    ///
    /// Fails when `DISCORD_TOKEN` is missing or empty; everything else is
    /// optional.
    pub fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("DISCORD_TOKEN").unwrap_or_default();
        let token = token.trim().to_string();
        if token.is_empty() {
            anyhow::bail!("DISCORD_TOKEN is required but missing or empty");
        }

        let anthropic_api_key = non_empty_env("ANTHROPIC_API_KEY");
        let openai_api_key = non_empty_env("OPENAI_API_KEY");

        let chorus_home = match non_empty_env("CHORUS_HOME") {
            Some(raw) => crate::utils::expand_home(&raw),
            None => default_home(),
        };

        let dev_guild_id = non_empty_env("DEV_GUILD_ID")
            .map(|raw| raw.parse::<u64>())
            .transpose()
            .map_err(|e| anyhow::anyhow!("DEV_GUILD_ID must be an integer: {e}"))?;

        let git_commit = non_empty_env("GIT_COMMIT");

        let config = Self {
            discord_token: token,
            anthropic_api_key,
            openai_api_key,
            chorus_home,
            dev_guild_id,
            git_commit,
        };
        info!(
            chorus_home = %config.chorus_home.display(),
            dev_guild = ?config.dev_guild_id,
            "config loaded"
        );
        Ok(config)
    }

    /// Test-friendly constructor with a specific home directory.
    pub fn for_home(home: impl Into<PathBuf>) -> Self {
        Self {
            discord_token: "test-token".into(),
            anthropic_api_key: None,
            openai_api_key: None,
            chorus_home: home.into(),
            dev_guild_id: None,
            git_commit: None,
        }
    }

    /// `<home>/agents/`
    pub fn agents_dir(&self) -> PathBuf {
        self.chorus_home.join("agents")
    }

    /// `<home>/db/chorus.db`
    pub fn db_path(&self) -> PathBuf {
        self.chorus_home.join("db").join("chorus.db")
    }

    /// `<home>/.trash/`
    pub fn trash_dir(&self) -> PathBuf {
        self.chorus_home.join(".trash")
    }

    /// `<home>/available_models.json`
    pub fn models_cache_path(&self) -> PathBuf {
        self.chorus_home.join("available_models.json")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_home() -> PathBuf {
    crate::utils::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chorus-agents")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_home_paths() {
        let config = ChorusConfig::for_home("/tmp/chorus-test");
        assert_eq!(config.agents_dir(), PathBuf::from("/tmp/chorus-test/agents"));
        assert_eq!(
            config.db_path(),
            PathBuf::from("/tmp/chorus-test/db/chorus.db")
        );
        assert_eq!(config.trash_dir(), PathBuf::from("/tmp/chorus-test/.trash"));
        assert_eq!(
            config.models_cache_path(),
            PathBuf::from("/tmp/chorus-test/available_models.json")
        );
    }

    #[test]
    fn test_default_home_ends_with_chorus_agents() {
        assert!(default_home().ends_with(".chorus-agents"));
    }
}
