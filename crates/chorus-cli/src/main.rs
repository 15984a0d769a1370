//! `chorus` — manage and talk to Chorus agents from the terminal.

mod repl;
mod status;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chorus_agent::{AgentDirectory, AgentManager};
use chorus_core::config::ChorusConfig;
use chorus_core::store::Store;

#[derive(Parser)]
#[command(name = "chorus", about = "Multi-agent execution platform", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show home, database, and agent status
    Status,

    /// Manage agents
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },

    /// Chat with an agent locally (REPL)
    Chat {
        /// Agent name
        name: String,
    },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// Create a new agent
    Create {
        name: String,
        /// Chat channel id to bind
        #[arg(long, default_value_t = 0)]
        channel: u64,
        /// Guild id
        #[arg(long, default_value_t = 0)]
        guild: u64,
        /// Model override
        #[arg(long)]
        model: Option<String>,
        /// Permission preset: open, standard, or locked
        #[arg(long, default_value = "standard")]
        permissions: String,
    },
    /// List agents
    List,
    /// Destroy an agent
    Destroy {
        name: String,
        /// Archive to .trash/ instead of deleting
        #[arg(long)]
        keep_files: bool,
    },
}

/// Environment config; the chat token is only required by the gateway, so
/// local commands fall back to a tokenless config.
fn load_config() -> ChorusConfig {
    ChorusConfig::from_env().unwrap_or_else(|_| {
        let home = std::env::var("CHORUS_HOME")
            .map(|raw| chorus_core::utils::expand_home(&raw))
            .unwrap_or_else(|_| {
                chorus_core::utils::home_dir()
                    .unwrap_or_else(|| std::path::PathBuf::from("."))
                    .join(".chorus-agents")
            });
        ChorusConfig::for_home(home)
    })
}

fn build_manager(config: &ChorusConfig) -> anyhow::Result<(AgentManager, Store)> {
    let store = Store::open(config.db_path())?;
    let directory = AgentDirectory::new(config.chorus_home.clone(), None);
    directory.ensure_home()?;
    Ok((AgentManager::new(directory, store.clone()), store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config();

    match cli.command {
        Commands::Status => {
            let (manager, store) = build_manager(&config)?;
            status::print_status(&config, &manager, &store).await?;
        }

        Commands::Agent { command } => {
            let (manager, _store) = build_manager(&config)?;
            match command {
                AgentCommands::Create {
                    name,
                    channel,
                    guild,
                    model,
                    permissions,
                } => {
                    let mut overrides = serde_json::Map::new();
                    if let Some(model) = model {
                        overrides.insert("model".into(), serde_json::json!(model));
                    }
                    overrides.insert("permissions".into(), serde_json::json!(permissions));

                    let agent = manager.create_agent(&name, channel, guild, overrides).await?;
                    println!("Created agent '{}' (permissions: {}).", agent.name, agent.permissions);
                }
                AgentCommands::List => {
                    let names = manager.list_agents();
                    if names.is_empty() {
                        println!("No agents yet. Create one with `chorus agent create <name>`.");
                    }
                    for name in names {
                        let detail = manager
                            .get_agent(&name)
                            .map(|a| a.permissions)
                            .unwrap_or_else(|_| "?".into());
                        let description = manager
                            .directory()
                            .description(&name)
                            .unwrap_or_default();
                        println!("{name}  [{detail}]  {description}");
                    }
                }
                AgentCommands::Destroy { name, keep_files } => {
                    manager.destroy_agent(&name, keep_files).await?;
                    if keep_files {
                        println!("Archived agent '{name}' to .trash/.");
                    } else {
                        println!("Destroyed agent '{name}'.");
                    }
                }
            }
        }

        Commands::Chat { name } => {
            repl::run_chat(&config, &name).await?;
        }
    }

    Ok(())
}
