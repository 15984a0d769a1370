//! Local chat REPL — the full agent stack over an in-process chat port.
//!
//! Agent replies print to stdout; permission asks become y/n prompts. The
//! loop waits for the agent's branches to settle before offering the next
//! prompt, so asks never race the readline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use rustyline::DefaultEditor;

use chorus_agent::{AgentDirectory, AgentManager, AgentRuntime, ThreadStatus};
use chorus_channels::{AskRequest, ChannelError, ChatPort};
use chorus_core::config::ChorusConfig;
use chorus_core::store::Store;
use chorus_providers::{HttpProvider, LlmProvider};

/// Pseudo channel id the REPL binds the agent to for the session.
const REPL_CHANNEL: u64 = 1;
const REPL_USER: u64 = 1;

/// Chat port that prints to the terminal.
struct TerminalPort {
    next_id: AtomicU64,
}

#[async_trait]
impl ChatPort for TerminalPort {
    async fn send(&self, _channel_id: u64, content: &str) -> Result<u64, ChannelError> {
        println!("{} {}", "agent>".green().bold(), content);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn ask(
        &self,
        _channel_id: u64,
        _user_id: u64,
        request: &AskRequest,
    ) -> Result<bool, ChannelError> {
        println!(
            "{} {} wants to run {}",
            "ask>".yellow().bold(),
            request.tool_name,
            request.action_string.yellow()
        );
        print!("allow? [y/N] ");
        use std::io::Write;
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        let read = tokio::task::spawn_blocking(move || {
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| ChannelError::Transport(e.to_string()))?;

        match read {
            Ok(answer) => Ok(answer.trim().eq_ignore_ascii_case("y")),
            Err(e) => Err(ChannelError::Transport(e.to_string())),
        }
    }
}

fn build_provider(config: &ChorusConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if let Some(key) = &config.anthropic_api_key {
        return Ok(Arc::new(HttpProvider::anthropic(
            key.clone(),
            "claude-sonnet-4-20250514",
        )));
    }
    if let Some(key) = &config.openai_api_key {
        return Ok(Arc::new(HttpProvider::openai(key.clone(), "gpt-4o")));
    }
    anyhow::bail!("no API key configured — set ANTHROPIC_API_KEY or OPENAI_API_KEY")
}

/// Wait until no branch of the agent is pending or running.
async fn wait_for_idle(runtime: &Arc<AgentRuntime>, agent: &str) {
    let tm = runtime.thread_manager(agent);
    loop {
        let busy = tm.list_all().iter().any(|t| {
            matches!(t.status(), ThreadStatus::Pending | ThreadStatus::Running)
        });
        if !busy {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Run the interactive chat session.
pub async fn run_chat(config: &ChorusConfig, agent_name: &str) -> anyhow::Result<()> {
    let store = Store::open(config.db_path())?;
    let directory = AgentDirectory::new(config.chorus_home.clone(), None);
    directory.ensure_home()?;
    let manager = AgentManager::new(directory, store.clone());

    // The agent must exist on disk and in the store. An unbound agent gets
    // attached to the REPL's pseudo channel for the session.
    manager.get_agent(agent_name)?;
    let channel_id = match store.get_agent(agent_name).await? {
        Some(row) if row.channel_id != 0 => row.channel_id,
        Some(_) => {
            store.set_agent_channel(agent_name, REPL_CHANNEL).await?;
            REPL_CHANNEL
        }
        None => anyhow::bail!("agent '{agent_name}' has no store row — recreate it"),
    };

    let provider = build_provider(config)?;
    let port = Arc::new(TerminalPort {
        next_id: AtomicU64::new(1),
    });

    let runtime = AgentRuntime::new(
        config.clone(),
        store.clone(),
        manager,
        port,
        provider,
        None,
    );

    println!(
        "{} chatting with {} — {} to quit",
        "chorus".bold(),
        agent_name.cyan().bold(),
        "ctrl-d".dimmed()
    );

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline(&format!("{} ", "you>".blue().bold())) {
            Ok(line) => line,
            Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let handled = runtime
            .on_message(channel_id, REPL_USER, line, None)
            .await?;
        if !handled {
            println!("{}", "channel is not bound to this agent".red());
            continue;
        }
        wait_for_idle(&runtime, agent_name).await;
    }

    println!("bye");
    Ok(())
}
