//! Execution threads — the per-agent scheduler of concurrent work branches.
//!
//! Each branch is a [`tokio::spawn`] task with its own message list, step
//! metrics, and cancellation via task abort (cancellation lands at the next
//! await point). At most one branch is the agent's *main* branch; breaking
//! the main pointer only detaches it, the branch keeps running.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chorus_core::types::ChatMessage;
use chorus_core::utils::truncate_string;

// ─────────────────────────────────────────────
// Status & metrics
// ─────────────────────────────────────────────

/// Branch lifecycle: PENDING → RUNNING → {COMPLETED, FAILED, CANCELLED}.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Pending => "pending",
            ThreadStatus::Running => "running",
            ThreadStatus::Completed => "completed",
            ThreadStatus::Failed => "failed",
            ThreadStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ThreadStatus::Completed | ThreadStatus::Failed | ThreadStatus::Cancelled
        )
    }
}

/// One entry of a branch's step history.
#[derive(Clone, Debug)]
pub struct StepRecord {
    pub step_number: u32,
    pub description: String,
    pub duration_ms: Option<u64>,
}

/// Step history plus running totals for one branch.
#[derive(Clone, Debug, Default)]
pub struct ThreadMetrics {
    pub step_number: u32,
    pub current_step: String,
    pub step_history: Vec<StepRecord>,
    pub elapsed_ms: u64,
}

// ─────────────────────────────────────────────
// ExecutionThread
// ─────────────────────────────────────────────

struct ThreadState {
    status: ThreadStatus,
    messages: Vec<ChatMessage>,
    /// Injected messages picked up at the runner's next iteration boundary.
    pending: Vec<ChatMessage>,
    summary: String,
    emitted_message_ids: HashSet<u64>,
    step_number: u32,
    current_step: String,
    step_history: Vec<StepRecord>,
    current_step_started: Option<Instant>,
    started_at: Option<Instant>,
    finished_elapsed: Option<Duration>,
}

/// One work branch. Shared between the manager, its runner task, and anyone
/// inspecting it; all state sits behind a short-held lock so an aborted
/// runner loses nothing.
pub struct ExecutionThread {
    pub id: u64,
    agent_name: String,
    state: Mutex<ThreadState>,
}

impl ExecutionThread {
    fn new(id: u64, agent_name: String, initial: ChatMessage) -> Self {
        let summary = initial
            .text()
            .map(|t| truncate_string(t, 80))
            .unwrap_or_default();
        Self {
            id,
            agent_name,
            state: Mutex::new(ThreadState {
                status: ThreadStatus::Pending,
                messages: vec![initial],
                pending: Vec::new(),
                summary,
                emitted_message_ids: HashSet::new(),
                step_number: 0,
                current_step: String::new(),
                step_history: Vec::new(),
                current_step_started: None,
                started_at: None,
                finished_elapsed: None,
            }),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn status(&self) -> ThreadStatus {
        self.lock().status
    }

    pub fn summary(&self) -> String {
        self.lock().summary.clone()
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        self.lock().summary = summary.into();
    }

    /// Copy of the branch's message list.
    pub fn messages_snapshot(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    /// Append to the branch's message list (runner side).
    pub fn push_message(&self, message: ChatMessage) {
        self.lock().messages.push(message);
    }

    /// Replace the message list (runner setup: system prompt + history).
    pub fn set_messages(&self, messages: Vec<ChatMessage>) {
        self.lock().messages = messages;
    }

    /// Queue a message for pickup at the next iteration boundary.
    pub fn inject(&self, message: ChatMessage) {
        self.lock().pending.push(message);
    }

    /// Move every injected message into the message list, returning how
    /// many arrived.
    pub fn absorb_pending(&self) -> usize {
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.pending);
        let count = pending.len();
        state.messages.extend(pending);
        count
    }

    /// Record a chat message id this branch emitted (for reply routing).
    pub fn record_emitted(&self, message_id: u64) {
        self.lock().emitted_message_ids.insert(message_id);
    }

    pub fn has_emitted(&self, message_id: u64) -> bool {
        self.lock().emitted_message_ids.contains(&message_id)
    }

    /// Close the current step and open a new one.
    pub fn begin_step(&self, description: impl Into<String>) {
        let mut state = self.lock();
        let now = Instant::now();
        if let Some(started) = state.current_step_started.take() {
            let step_number = state.step_number;
            let description = state.current_step.clone();
            state.step_history.push(StepRecord {
                step_number,
                description,
                duration_ms: Some(now.duration_since(started).as_millis() as u64),
            });
        }
        state.step_number += 1;
        state.current_step = description.into();
        state.current_step_started = Some(now);
    }

    pub fn metrics(&self) -> ThreadMetrics {
        let state = self.lock();
        let elapsed = state
            .finished_elapsed
            .or_else(|| state.started_at.map(|s| s.elapsed()))
            .unwrap_or_default();
        let mut history = state.step_history.clone();
        if state.current_step_started.is_some() {
            history.push(StepRecord {
                step_number: state.step_number,
                description: state.current_step.clone(),
                duration_ms: None,
            });
        }
        ThreadMetrics {
            step_number: state.step_number,
            current_step: state.current_step.clone(),
            step_history: history,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn mark_running(&self) {
        let mut state = self.lock();
        if state.status == ThreadStatus::Pending {
            state.status = ThreadStatus::Running;
            state.started_at = Some(Instant::now());
        }
    }

    /// Transition to a terminal status; terminal states never regress.
    fn finish(&self, status: ThreadStatus) {
        let mut state = self.lock();
        if !state.status.is_terminal() {
            state.status = status;
            state.finished_elapsed = state.started_at.map(|s| s.elapsed());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThreadState> {
        self.state.lock().expect("thread state lock")
    }
}

// ─────────────────────────────────────────────
// ThreadManager
// ─────────────────────────────────────────────

/// Per-agent scheduler of execution threads.
pub struct ThreadManager {
    agent_name: String,
    next_id: AtomicU64,
    threads: Mutex<HashMap<u64, Arc<ExecutionThread>>>,
    handles: Mutex<HashMap<u64, JoinHandle<()>>>,
    main_id: Mutex<Option<u64>>,
}

impl ThreadManager {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            next_id: AtomicU64::new(1),
            threads: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            main_id: Mutex::new(None),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Allocate a new PENDING branch holding the initial message.
    pub fn create_thread(&self, initial: ChatMessage, is_main: bool) -> Arc<ExecutionThread> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let thread = Arc::new(ExecutionThread::new(id, self.agent_name.clone(), initial));
        self.threads
            .lock()
            .expect("threads lock")
            .insert(id, thread.clone());
        if is_main {
            *self.main_id.lock().expect("main lock") = Some(id);
        }
        debug!(agent = %self.agent_name, thread = id, main = is_main, "thread created");
        thread
    }

    /// Schedule `runner` for the branch, transitioning PENDING → RUNNING.
    ///
    /// The runner's `Ok` becomes COMPLETED, its `Err` FAILED; an abort via
    /// [`kill_thread`](Self::kill_thread) leaves CANCELLED in place.
    pub fn start_thread<F, Fut>(&self, thread: &Arc<ExecutionThread>, runner: F)
    where
        F: FnOnce(Arc<ExecutionThread>) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        thread.mark_running();
        let task_thread = thread.clone();
        let future = runner(thread.clone());
        let handle = tokio::spawn(async move {
            match future.await {
                Ok(()) => task_thread.finish(ThreadStatus::Completed),
                Err(e) => {
                    warn!(thread = task_thread.id, error = %e, "thread runner failed");
                    task_thread.finish(ThreadStatus::Failed);
                }
            }
        });
        self.handles
            .lock()
            .expect("handles lock")
            .insert(thread.id, handle);
        info!(agent = %self.agent_name, thread = thread.id, "thread started");
    }

    /// Locate the branch that emitted a given chat message (reply routing).
    pub fn route_message(&self, reference_id: u64) -> Option<Arc<ExecutionThread>> {
        self.threads
            .lock()
            .expect("threads lock")
            .values()
            .find(|t| t.has_emitted(reference_id))
            .cloned()
    }

    /// Append a message to a branch; it becomes visible to the runner no
    /// later than its next iteration boundary.
    pub fn inject(&self, thread_id: u64, message: ChatMessage) -> bool {
        match self.get_thread(thread_id) {
            Some(thread) => {
                thread.inject(message);
                true
            }
            None => false,
        }
    }

    pub fn get_main_thread(&self) -> Option<Arc<ExecutionThread>> {
        let id = (*self.main_id.lock().expect("main lock"))?;
        self.get_thread(id)
    }

    /// Detach the main pointer. The branch itself keeps running.
    pub fn break_main_thread(&self) -> Option<u64> {
        self.main_id.lock().expect("main lock").take()
    }

    /// Cancel one branch. Resolves once the runner task has wound down;
    /// the branch's messages stay readable.
    pub async fn kill_thread(&self, thread_id: u64) -> bool {
        let Some(thread) = self.get_thread(thread_id) else {
            return false;
        };
        let handle = self
            .handles
            .lock()
            .expect("handles lock")
            .remove(&thread_id);

        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        // A branch that already completed keeps its terminal status.
        thread.finish(ThreadStatus::Cancelled);
        info!(agent = %self.agent_name, thread = thread_id, "thread killed");
        true
    }

    /// Cancel every branch concurrently and await them all.
    pub async fn kill_all(&self) -> usize {
        let handles: Vec<(u64, JoinHandle<()>)> = self
            .handles
            .lock()
            .expect("handles lock")
            .drain()
            .collect();

        let mut killed = 0;
        for (_, handle) in &handles {
            handle.abort();
        }
        for (id, handle) in handles {
            let _ = handle.await;
            if let Some(thread) = self.get_thread(id) {
                thread.finish(ThreadStatus::Cancelled);
            }
            killed += 1;
        }
        info!(agent = %self.agent_name, killed, "all threads killed");
        killed
    }

    pub fn get_thread(&self, thread_id: u64) -> Option<Arc<ExecutionThread>> {
        self.threads
            .lock()
            .expect("threads lock")
            .get(&thread_id)
            .cloned()
    }

    /// Every branch, ordered by id.
    pub fn list_all(&self) -> Vec<Arc<ExecutionThread>> {
        let mut threads: Vec<Arc<ExecutionThread>> = self
            .threads
            .lock()
            .expect("threads lock")
            .values()
            .cloned()
            .collect();
        threads.sort_by_key(|t| t.id);
        threads
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
