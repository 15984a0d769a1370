//! Agent runtime — wires messages, threads, tools, and processes together.
//!
//! [`AgentRuntime::on_message`] is the entrypoint the chat layer calls:
//! channel→agent lookup, reply routing into existing branches, interjection
//! classification when the main branch is busy, and branch start with the
//! default runner (context load → tool loop → context persist → rate-limited
//! reply). The runtime is also the [`ProcessEventSink`] process callbacks
//! land on, and the [`BranchSpawner`] behind cross-agent messaging — a
//! target agent always runs under its own permission profile.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use chorus_channels::{AskMediator, ChannelAskMediator, ChatPort, RateLimitedSender};
use chorus_core::config::ChorusConfig;
use chorus_core::error::{ChorusError, Result};
use chorus_core::store::Store;
use chorus_core::types::ChatMessage;
use chorus_process::{ProcessEventSink, ProcessSupervisor};
use chorus_providers::LlmProvider;

use crate::context::ContextManager;
use crate::directory::AgentConfig;
use crate::manager::AgentManager;
use crate::router::{route_interjection, RouteDecision};
use crate::subagent::cheap_provider;
use crate::threads::{ExecutionThread, ThreadManager, ThreadStatus};
use crate::tool_loop::ToolLoop;
use crate::tools::agents::{BranchSpawner, ListAgentsTool, ReadAgentDocsTool, SendAgentMessageTool};
use crate::tools::file_ops::{CreateFileTool, StrReplaceTool, ViewTool};
use crate::tools::git::GitTool;
use crate::tools::shell::BashTool;
use crate::tools::ToolRegistry;

/// Cap applied to foreground shell commands.
const SHELL_MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// What the user sees when a branch hits its iteration cap.
const EXHAUSTED_MESSAGE: &str =
    "I hit my iteration limit before finishing. The work so far is in this thread — \
     reply to continue.";

/// One process-wide runtime hosting every agent.
pub struct AgentRuntime {
    config: ChorusConfig,
    store: Store,
    manager: AgentManager,
    port: Arc<dyn ChatPort>,
    provider: Arc<dyn LlmProvider>,
    /// Cheap classifier for interjection routing and callback building.
    router: Option<(Arc<dyn LlmProvider>, String)>,
    supervisor: OnceLock<ProcessSupervisor>,
    thread_managers: Mutex<HashMap<String, Arc<ThreadManager>>>,
    senders: Mutex<HashMap<u64, Arc<RateLimitedSender>>>,
    max_iterations: Option<usize>,
    self_ref: OnceLock<Weak<AgentRuntime>>,
}

impl AgentRuntime {
    pub fn new(
        config: ChorusConfig,
        store: Store,
        manager: AgentManager,
        port: Arc<dyn ChatPort>,
        provider: Arc<dyn LlmProvider>,
        max_iterations: Option<usize>,
    ) -> Arc<Self> {
        let router = cheap_provider(&config).map(|(p, model)| {
            let provider: Arc<dyn LlmProvider> = Arc::new(p);
            (provider, model)
        });

        let runtime = Arc::new(Self {
            config,
            store,
            manager,
            port,
            provider,
            router,
            supervisor: OnceLock::new(),
            thread_managers: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
            max_iterations,
            self_ref: OnceLock::new(),
        });

        // The supervisor's sink holds the runtime weakly so the
        // runtime → supervisor → runtime loop never leaks.
        let _ = runtime.self_ref.set(Arc::downgrade(&runtime));
        let sink = Arc::new(RuntimeSink(Arc::downgrade(&runtime)));
        let _ = runtime.supervisor.set(ProcessSupervisor::new(sink));
        runtime
    }

    pub fn manager(&self) -> &AgentManager {
        &self.manager
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        self.supervisor.get().expect("supervisor is set in new()")
    }

    /// The per-agent thread manager, created on first use.
    pub fn thread_manager(&self, agent_name: &str) -> Arc<ThreadManager> {
        self.thread_managers
            .lock()
            .expect("thread managers lock")
            .entry(agent_name.to_string())
            .or_insert_with(|| Arc::new(ThreadManager::new(agent_name)))
            .clone()
    }

    /// The per-agent context manager.
    pub fn context_manager(&self, agent_name: &str) -> ContextManager {
        let sessions_dir = self
            .config
            .agents_dir()
            .join(agent_name)
            .join("sessions");
        ContextManager::new(agent_name, self.store.clone(), sessions_dir)
    }

    fn sender_for(&self, channel_id: u64) -> Arc<RateLimitedSender> {
        self.senders
            .lock()
            .expect("senders lock")
            .entry(channel_id)
            .or_insert_with(|| Arc::new(RateLimitedSender::new(self.port.clone(), channel_id)))
            .clone()
    }

    fn arc(&self) -> Result<Arc<Self>> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| ChorusError::Task("runtime is shutting down".into()))
    }

    // ── Inbound messages ────────────────────

    /// Handle one user message. Returns false when no agent owns the
    /// channel (the caller falls back to command handling).
    pub async fn on_message(
        &self,
        channel_id: u64,
        author_id: u64,
        content: &str,
        reference: Option<u64>,
    ) -> Result<bool> {
        let Some(agent) = self.manager.get_agent_by_channel(channel_id).await? else {
            return Ok(false);
        };

        let tm = self.thread_manager(&agent.name);

        // Reply semantics: a reply to a branch's own message goes back to
        // that branch if it's still running.
        if let Some(reference_id) = reference {
            if let Some(thread) = tm.route_message(reference_id) {
                if thread.status() == ThreadStatus::Running {
                    self.context_manager(&agent.name)
                        .persist_message("user", content)
                        .await?;
                    thread.inject(ChatMessage::user(content));
                    info!(agent = %agent.name, thread = thread.id, "reply injected");
                    return Ok(true);
                }
            }
        }

        // Busy main branch: classify follow-up vs unrelated request.
        if let Some(main) = tm.get_main_thread() {
            if main.status() == ThreadStatus::Running {
                let decision = match &self.router {
                    Some((provider, model)) => {
                        route_interjection(
                            content,
                            &main.summary(),
                            &main.metrics().current_step,
                            provider.as_ref(),
                            model,
                        )
                        .await
                    }
                    None => RouteDecision::Inject,
                };

                match decision {
                    RouteDecision::Inject => {
                        self.context_manager(&agent.name)
                            .persist_message("user", content)
                            .await?;
                        main.inject(ChatMessage::user(content));
                        info!(agent = %agent.name, thread = main.id, "interjection injected");
                        return Ok(true);
                    }
                    RouteDecision::NewThread => {
                        self.start_branch(&agent, content.to_string(), Some(author_id), false)?;
                        return Ok(true);
                    }
                }
            }
        }

        self.start_branch(&agent, content.to_string(), Some(author_id), true)?;
        Ok(true)
    }

    /// Create and start a branch with the default runner.
    pub fn start_branch(
        &self,
        agent: &AgentConfig,
        prompt: String,
        user_id: Option<u64>,
        is_main: bool,
    ) -> Result<Arc<ExecutionThread>> {
        let runtime = self.arc()?;
        let tm = self.thread_manager(&agent.name);
        let thread = tm.create_thread(ChatMessage::user(prompt), is_main);
        let agent = agent.clone();

        tm.start_thread(&thread, move |thread| async move {
            AgentRuntime::run_branch(runtime, agent, thread, user_id).await
        });
        Ok(thread)
    }

    /// The default branch runner: context in, tool loop, context out, reply.
    async fn run_branch(
        runtime: Arc<AgentRuntime>,
        agent: AgentConfig,
        thread: Arc<ExecutionThread>,
        user_id: Option<u64>,
    ) -> anyhow::Result<()> {
        let context = runtime.context_manager(&agent.name);
        let initial = thread.messages_snapshot();

        // History first, so the fresh prompt isn't doubled.
        let history = context.get_context().await?;
        for message in &initial {
            if let Some(text) = message.text() {
                context.persist_message(message.role(), text).await?;
            }
        }

        let workspace = runtime
            .config
            .agents_dir()
            .join(&agent.name)
            .join("workspace");
        let system_prompt = format!(
            "{}\n\nYour workspace is at: {}",
            agent.system_prompt,
            workspace.display()
        );

        let mut messages = vec![ChatMessage::system(system_prompt)];
        messages.extend(history.iter().map(|r| r.to_chat_message()));
        messages.extend(initial);
        thread.set_messages(messages);

        let tools = runtime.build_tools(&agent)?;
        let profile = runtime.manager.profile_for(&agent)?;
        let mediator: Arc<dyn AskMediator> = Arc::new(ChannelAskMediator::new(
            runtime.port.clone(),
            runtime.store.clone(),
        ));
        let model = agent
            .model
            .clone()
            .unwrap_or_else(|| runtime.provider.default_model().to_string());

        let tool_loop = ToolLoop::new(
            runtime.provider.clone(),
            tools,
            profile,
            Some(mediator),
            runtime.store.clone(),
            &agent.name,
            agent.channel_id,
            user_id,
            model,
            runtime.max_iterations,
        );

        let outcome = match tool_loop.run(&thread).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Provider-level failure fails the branch after telling the user.
                let sender = runtime.sender_for(agent.channel_id);
                let _ = sender.send("I hit a provider error and had to stop.").await;
                return Err(e.into());
            }
        };

        let content = match (&outcome.content, outcome.exhausted) {
            (Some(content), _) => content.clone(),
            (None, true) => EXHAUSTED_MESSAGE.to_string(),
            (None, false) => "I finished but have nothing to report.".to_string(),
        };

        context.persist_message("assistant", &content).await?;

        let sender = runtime.sender_for(agent.channel_id);
        let message_id = sender
            .send(&content)
            .await
            .map_err(|e| anyhow::anyhow!("failed to deliver reply: {e}"))?;
        thread.record_emitted(message_id);

        info!(
            agent = %agent.name,
            thread = thread.id,
            iterations = outcome.iterations,
            tokens = outcome.usage.total_tokens,
            "branch finished"
        );
        Ok(())
    }

    /// Per-agent tool set, jailed to the agent's workspace.
    fn build_tools(&self, agent: &AgentConfig) -> Result<Arc<ToolRegistry>> {
        let runtime = self.arc()?;
        let agent_dir = self.config.agents_dir().join(&agent.name);
        let workspace = agent_dir.join("workspace");
        let log_root: PathBuf = agent_dir.join("process_logs");

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CreateFileTool::new(workspace.clone())));
        registry.register(Arc::new(StrReplaceTool::new(workspace.clone())));
        registry.register(Arc::new(ViewTool::new(workspace.clone())));
        registry.register(Arc::new(BashTool::new(
            &agent.name,
            workspace.clone(),
            log_root,
            self.supervisor().clone(),
            SHELL_MAX_TIMEOUT,
            self.router.clone(),
        )));
        registry.register(Arc::new(GitTool::new(workspace)));
        registry.register(Arc::new(SendAgentMessageTool::new(
            &agent.name,
            self.config.chorus_home.clone(),
            runtime,
        )));
        registry.register(Arc::new(ListAgentsTool::new(
            &agent.name,
            self.config.chorus_home.clone(),
        )));
        registry.register(Arc::new(ReadAgentDocsTool::new(
            &agent.name,
            self.config.chorus_home.clone(),
        )));
        Ok(Arc::new(registry))
    }
}

// ─────────────────────────────────────────────
// Process callbacks land here
// ─────────────────────────────────────────────

/// Weak-upgrading sink handed to the process supervisor.
struct RuntimeSink(Weak<AgentRuntime>);

#[async_trait]
impl ProcessEventSink for RuntimeSink {
    async fn spawn_branch(&self, agent_name: &str, prompt: &str) -> anyhow::Result<()> {
        let runtime = self
            .0
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("runtime is shutting down"))?;
        runtime.spawn_branch(agent_name, prompt).await
    }

    async fn inject_context(&self, agent_name: &str, message: &str) -> anyhow::Result<()> {
        let runtime = self
            .0
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("runtime is shutting down"))?;
        runtime.inject_context(agent_name, message).await
    }

    async fn notify_channel(&self, agent_name: &str, message: &str) -> anyhow::Result<()> {
        let runtime = self
            .0
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("runtime is shutting down"))?;
        runtime.notify_channel(agent_name, message).await
    }
}

#[async_trait]
impl ProcessEventSink for AgentRuntime {
    async fn spawn_branch(&self, agent_name: &str, prompt: &str) -> anyhow::Result<()> {
        let agent = self.manager.get_agent(agent_name)?;
        self.start_branch(&agent, prompt.to_string(), None, false)?;
        Ok(())
    }

    async fn inject_context(&self, agent_name: &str, message: &str) -> anyhow::Result<()> {
        // Durable first, then visible to the running main branch.
        self.context_manager(agent_name)
            .persist_message("system", message)
            .await?;
        let tm = self.thread_manager(agent_name);
        if let Some(main) = tm.get_main_thread() {
            main.inject(ChatMessage::system(message));
        } else {
            warn!(agent = agent_name, "no main branch; context injected into history only");
        }
        Ok(())
    }

    async fn notify_channel(&self, agent_name: &str, message: &str) -> anyhow::Result<()> {
        let agent = self.manager.get_agent(agent_name)?;
        self.sender_for(agent.channel_id)
            .send(message)
            .await
            .map_err(|e| anyhow::anyhow!("notify failed: {e}"))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Cross-agent sends land here
// ─────────────────────────────────────────────

#[async_trait]
impl BranchSpawner for AgentRuntime {
    async fn spawn_agent_branch(
        &self,
        target_agent: &str,
        message: &str,
        sender_agent: &str,
    ) -> anyhow::Result<()> {
        // The target's own config (and therefore its own permission
        // profile) governs the spawned branch.
        let agent = self.manager.get_agent(target_agent)?;
        let attributed = format!("Message from agent '{sender_agent}': {message}");
        self.start_branch(&agent, attributed, None, false)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
