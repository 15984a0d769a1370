//! `chorus status` — one screen of state for the operator.

use colored::Colorize;

use chorus_agent::AgentManager;
use chorus_core::config::ChorusConfig;
use chorus_core::store::Store;
use chorus_providers::discovery::ModelCatalog;

/// Print home, build, database, model cache, and agent summaries.
pub async fn print_status(
    config: &ChorusConfig,
    manager: &AgentManager,
    store: &Store,
) -> anyhow::Result<()> {
    println!("{}", "chorus".bold());
    println!("  home:   {}", config.chorus_home.display());

    let commit = config
        .git_commit
        .clone()
        .unwrap_or_else(|| "unknown".into());
    println!("  build:  {commit}");

    let db_path = config.db_path();
    let db_state = if db_path.exists() {
        "present".green()
    } else {
        "missing".yellow()
    };
    println!("  db:     {} ({})", db_path.display(), db_state);

    let catalog = ModelCatalog::load(&config.models_cache_path());
    let model_count = catalog.all_models().len();
    match &catalog.refreshed_at {
        Some(at) => println!("  models: {model_count} cached (refreshed {at})"),
        None => println!("  models: no cache"),
    }

    let names = manager.list_agents();
    println!("  agents: {}", names.len());
    for name in names {
        let row = store.get_agent(&name).await?;
        match row {
            Some(row) => {
                let model = row.model.unwrap_or_else(|| "default".into());
                println!(
                    "    {}  channel={}  [{}]  {}",
                    name.cyan(),
                    row.channel_id,
                    row.permissions,
                    model
                );
            }
            None => {
                println!("    {}  {}", name.cyan(), "no store row".yellow());
            }
        }
    }

    Ok(())
}
