//! Process supervisor — the tracked-process registry and callback engine.
//!
//! Every spawned child gets an [`OutputMonitor`] whose events feed a
//! per-process dispatch task. The dispatch task evaluates output-match
//! triggers (with per-callback debounce and optional exit-class deferral),
//! exit triggers, and timeout countdowns, then routes fired actions through
//! the [`ProcessEventSink`]. Termination always walks SIGTERM → grace →
//! SIGKILL.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chorus_core::error::ChorusError;
use chorus_core::utils::{timestamp, truncate_string};

use crate::models::{
    CallbackAction, ExitFilter, HookTrigger, ProcessCallback, ProcessStatus, ProcessType,
    TrackedProcess,
};
use crate::monitor::{MonitorEvent, OutputMonitor, RollingTail};

/// Default bound on the rolling tail.
const DEFAULT_TAIL_LIMIT: usize = 100;

/// Default SIGTERM → SIGKILL grace interval.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────
// Event sink — where fired callbacks land
// ─────────────────────────────────────────────

/// Receiver for callback actions the supervisor cannot perform itself.
///
/// Implemented by the agent runtime; failures are logged and swallowed so
/// supervision always continues.
#[async_trait]
pub trait ProcessEventSink: Send + Sync {
    /// Start a new execution thread on `agent_name` with `prompt`.
    async fn spawn_branch(&self, agent_name: &str, prompt: &str) -> anyhow::Result<()>;

    /// Append a system message to the agent's main branch without running it.
    async fn inject_context(&self, agent_name: &str, message: &str) -> anyhow::Result<()>;

    /// Send a notice to the agent's channel.
    async fn notify_channel(&self, agent_name: &str, message: &str) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────
// Spawn request
// ─────────────────────────────────────────────

/// Everything needed to spawn and track one child process.
#[derive(Debug)]
pub struct SpawnRequest {
    pub agent_name: String,
    /// Full command line, run through `sh -c`.
    pub command: String,
    pub working_dir: PathBuf,
    /// Per-process log directories are created under here, keyed by pid.
    pub log_root: PathBuf,
    pub process_type: ProcessType,
    pub callbacks: Vec<ProcessCallback>,
    /// Free-text note shown in listings.
    pub context: Option<String>,
}

// ─────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────

struct CallbackSlot {
    cb: ProcessCallback,
    /// Compiled pattern for output-match triggers.
    regex: Option<regex::Regex>,
    /// Output matched but firing waits for the exit-code class.
    deferred_match: bool,
    debounce: Option<JoinHandle<()>>,
}

struct ProcState {
    status: ProcessStatus,
    exit_code: Option<i32>,
    kill_requested: bool,
    slots: Vec<CallbackSlot>,
    timeout_tasks: Vec<JoinHandle<()>>,
}

struct ProcEntry {
    pid: u32,
    command: String,
    working_directory: PathBuf,
    agent_name: String,
    started_at: String,
    process_type: ProcessType,
    context: Option<String>,
    log_dir: PathBuf,
    tail: RollingTail,
    state: Mutex<ProcState>,
    /// Flips to true exactly once, when the exit is recorded.
    exit_tx: watch::Sender<bool>,
    monitor: OutputMonitor,
}

struct Inner {
    procs: StdMutex<HashMap<u32, Arc<ProcEntry>>>,
    sink: Arc<dyn ProcessEventSink>,
    grace: Duration,
    tail_limit: usize,
}

// ─────────────────────────────────────────────
// ProcessSupervisor
// ─────────────────────────────────────────────

/// Tracks all child processes spawned on behalf of agents.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(sink: Arc<dyn ProcessEventSink>) -> Self {
        Self::with_options(sink, DEFAULT_GRACE, DEFAULT_TAIL_LIMIT)
    }

    pub fn with_options(
        sink: Arc<dyn ProcessEventSink>,
        grace: Duration,
        tail_limit: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                procs: StdMutex::new(HashMap::new()),
                sink,
                grace,
                tail_limit,
            }),
        }
    }

    /// Spawn a command under supervision. Returns the child's pid.
    pub async fn spawn(&self, req: SpawnRequest) -> anyhow::Result<u32> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(&req.command)
            .current_dir(&req.working_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null())
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn command: {e}"))?;

        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("spawned process has no pid"))?;

        let log_dir = req.log_root.join(pid.to_string());
        let tail: RollingTail = Arc::new(StdMutex::new(VecDeque::new()));
        let (events_tx, events_rx) = mpsc::channel(256);

        let monitor = OutputMonitor::spawn(
            pid,
            child,
            log_dir.clone(),
            tail.clone(),
            self.inner.tail_limit,
            events_tx,
        );

        let slots = req
            .callbacks
            .into_iter()
            .filter_map(|cb| {
                let regex = match &cb.trigger {
                    HookTrigger::OnOutputMatch { pattern, .. } => {
                        match regex::Regex::new(pattern) {
                            Ok(re) => Some(re),
                            Err(e) => {
                                warn!(pid, pattern = %pattern, error = %e, "invalid output pattern, dropping callback");
                                return None;
                            }
                        }
                    }
                    _ => None,
                };
                Some(CallbackSlot {
                    cb,
                    regex,
                    deferred_match: false,
                    debounce: None,
                })
            })
            .collect::<Vec<_>>();

        let (exit_tx, _) = watch::channel(false);
        let entry = Arc::new(ProcEntry {
            pid,
            command: req.command,
            working_directory: req.working_dir,
            agent_name: req.agent_name,
            started_at: timestamp(),
            process_type: req.process_type,
            context: req.context,
            log_dir,
            tail,
            state: Mutex::new(ProcState {
                status: ProcessStatus::Running,
                exit_code: None,
                kill_requested: false,
                slots,
                timeout_tasks: Vec::new(),
            }),
            exit_tx,
            monitor,
        });

        self.inner
            .procs
            .lock()
            .expect("process registry lock")
            .insert(pid, entry.clone());

        // Timeout countdowns start at spawn.
        {
            let mut state = entry.state.lock().await;
            let timeouts: Vec<(usize, u64)> = state
                .slots
                .iter()
                .enumerate()
                .filter_map(|(idx, slot)| match slot.cb.trigger {
                    HookTrigger::OnTimeout { timeout_seconds } => Some((idx, timeout_seconds)),
                    _ => None,
                })
                .collect();
            for (idx, secs) in timeouts {
                let inner = self.inner.clone();
                let entry = entry.clone();
                state.timeout_tasks.push(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    Inner::fire(inner, entry, idx).await;
                }));
            }
        }

        // Dispatch loop for monitor events.
        let inner = self.inner.clone();
        let dispatch_entry = entry.clone();
        tokio::spawn(async move {
            let mut events_rx = events_rx;
            while let Some(event) = events_rx.recv().await {
                match event {
                    MonitorEvent::Line { line, .. } => {
                        Inner::handle_line(&inner, &dispatch_entry, &line).await;
                    }
                    MonitorEvent::Exited { exit_code, .. } => {
                        Inner::handle_exit(inner.clone(), dispatch_entry.clone(), exit_code).await;
                        break;
                    }
                }
            }
        });

        info!(pid, agent = %entry.agent_name, "process spawned");
        Ok(pid)
    }

    /// Snapshot of one tracked process.
    pub async fn get_process(&self, pid: u32) -> Option<TrackedProcess> {
        let entry = self.entry(pid)?;
        Some(Self::snapshot(&entry).await)
    }

    /// Snapshots of all tracked processes, optionally filtered by agent,
    /// ordered by start time.
    pub async fn list_processes(&self, agent_name: Option<&str>) -> Vec<TrackedProcess> {
        let entries: Vec<Arc<ProcEntry>> = self
            .inner
            .procs
            .lock()
            .expect("process registry lock")
            .values()
            .filter(|e| agent_name.map_or(true, |a| e.agent_name == a))
            .cloned()
            .collect();

        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshots.push(Self::snapshot(&entry).await);
        }
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.pid.cmp(&b.pid)));
        snapshots
    }

    /// Terminate a running process: SIGTERM, grace interval, then SIGKILL.
    /// Returns false if the pid is unknown or already terminal.
    pub async fn kill_process(&self, pid: u32) -> bool {
        let Some(entry) = self.entry(pid) else {
            return false;
        };
        Inner::terminate(&self.inner, &entry).await
    }

    /// Wait until the process exits, returning its exit code.
    ///
    /// Errors with `Timeout` if the deadline passes first; unknown pids
    /// resolve to `Ok(None)`.
    pub async fn wait_for_exit(
        &self,
        pid: u32,
        timeout: Duration,
    ) -> Result<Option<i32>, ChorusError> {
        let Some(entry) = self.entry(pid) else {
            return Ok(None);
        };
        let mut rx = entry.exit_tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|exited| *exited))
            .await
            .map_err(|_| ChorusError::Timeout(timeout.as_secs()))?
            .map_err(|e| ChorusError::Task(e.to_string()))?;
        let state = entry.state.lock().await;
        Ok(state.exit_code)
    }

    /// Mark RUNNING entries whose monitor has vanished as LOST.
    ///
    /// Run at registry-scan time; reconciliation beyond the status flip is
    /// the caller's concern.
    pub async fn scan_for_lost(&self) -> usize {
        let entries: Vec<Arc<ProcEntry>> = self
            .inner
            .procs
            .lock()
            .expect("process registry lock")
            .values()
            .cloned()
            .collect();

        let mut lost = 0;
        for entry in entries {
            if !entry.monitor.is_finished() {
                continue;
            }
            let mut state = entry.state.lock().await;
            if state.status == ProcessStatus::Running {
                state.status = ProcessStatus::Lost;
                lost += 1;
                warn!(pid = entry.pid, "monitor severed, marking process lost");
            }
        }
        lost
    }

    fn entry(&self, pid: u32) -> Option<Arc<ProcEntry>> {
        self.inner
            .procs
            .lock()
            .expect("process registry lock")
            .get(&pid)
            .cloned()
    }

    async fn snapshot(entry: &ProcEntry) -> TrackedProcess {
        let state = entry.state.lock().await;
        let rolling_tail = entry
            .tail
            .lock()
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();
        TrackedProcess {
            pid: entry.pid,
            command: entry.command.clone(),
            working_directory: entry.working_directory.clone(),
            agent_name: entry.agent_name.clone(),
            started_at: entry.started_at.clone(),
            process_type: entry.process_type,
            status: state.status,
            exit_code: state.exit_code,
            rolling_tail,
            callbacks: state.slots.iter().map(|s| s.cb.clone()).collect(),
            context: entry.context.clone(),
            log_dir: entry.log_dir.clone(),
        }
    }
}

impl Inner {
    /// Evaluate output-match triggers for one line.
    async fn handle_line(inner: &Arc<Inner>, entry: &Arc<ProcEntry>, line: &str) {
        let mut state = entry.state.lock().await;
        if state.status != ProcessStatus::Running {
            return;
        }

        for idx in 0..state.slots.len() {
            let slot = &mut state.slots[idx];
            if slot.cb.exhausted() {
                continue;
            }
            let HookTrigger::OnOutputMatch { exit_filter, .. } = &slot.cb.trigger else {
                continue;
            };
            let exit_filter = *exit_filter;
            let Some(re) = &slot.regex else { continue };
            if !re.is_match(line) {
                continue;
            }

            if exit_filter != ExitFilter::Any {
                // Fire decision waits for the exit-code class.
                slot.deferred_match = true;
                continue;
            }

            // Start or refresh the debounce timer.
            if let Some(handle) = slot.debounce.take() {
                handle.abort();
            }
            let delay = Duration::from_secs_f64(slot.cb.output_delay_seconds.max(0.0));
            let inner = inner.clone();
            let entry = entry.clone();
            slot.debounce = Some(tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Inner::fire(inner, entry, idx).await;
            }));
        }
    }

    /// Record the exit, then fire exit-gated callbacks.
    async fn handle_exit(inner: Arc<Inner>, entry: Arc<ProcEntry>, exit_code: Option<i32>) {
        let fires: Vec<usize> = {
            let mut state = entry.state.lock().await;
            if state.status == ProcessStatus::Running {
                state.status = if state.kill_requested {
                    ProcessStatus::Killed
                } else {
                    ProcessStatus::Exited
                };
                state.exit_code = exit_code;
            }
            for handle in state.timeout_tasks.drain(..) {
                handle.abort();
            }

            let mut fires = Vec::new();
            for (idx, slot) in state.slots.iter().enumerate() {
                if slot.cb.exhausted() {
                    continue;
                }
                match &slot.cb.trigger {
                    HookTrigger::OnExit { exit_filter } => {
                        if exit_filter.matches(exit_code) {
                            fires.push(idx);
                        }
                    }
                    HookTrigger::OnOutputMatch { exit_filter, .. } => {
                        if slot.deferred_match
                            && *exit_filter != ExitFilter::Any
                            && exit_filter.matches(exit_code)
                        {
                            fires.push(idx);
                        }
                    }
                    HookTrigger::OnTimeout { .. } => {}
                }
            }
            fires
        };

        entry.exit_tx.send_replace(true);

        for idx in fires {
            Inner::fire(inner.clone(), entry.clone(), idx).await;
        }
    }

    /// Fire one callback slot: bump the count, then dispatch its action.
    async fn fire(inner: Arc<Inner>, entry: Arc<ProcEntry>, idx: usize) {
        let (action, message) = {
            let mut state = entry.state.lock().await;
            let Some(slot) = state.slots.get_mut(idx) else {
                return;
            };
            if slot.cb.exhausted() {
                return;
            }
            slot.cb.fire_count += 1;
            (slot.cb.action, slot.cb.context_message.clone())
        };

        debug!(
            pid = entry.pid,
            agent = %entry.agent_name,
            action = action.as_str(),
            "callback fired"
        );

        let result = match action {
            CallbackAction::StopProcess => {
                Inner::terminate(&inner, &entry).await;
                Ok(())
            }
            CallbackAction::SpawnBranch => {
                inner.sink.spawn_branch(&entry.agent_name, &message).await
            }
            CallbackAction::InjectContext => {
                inner.sink.inject_context(&entry.agent_name, &message).await
            }
            CallbackAction::NotifyChannel => {
                let notice = format!(
                    "Process {} `{}`: {}",
                    entry.pid,
                    truncate_string(&entry.command, 80),
                    message
                );
                inner.sink.notify_channel(&entry.agent_name, &notice).await
            }
        };

        if let Err(e) = result {
            warn!(pid = entry.pid, action = action.as_str(), error = %e, "callback action failed");
        }
    }

    /// SIGTERM → grace → SIGKILL. Returns false if not running.
    async fn terminate(inner: &Arc<Inner>, entry: &Arc<ProcEntry>) -> bool {
        {
            let mut state = entry.state.lock().await;
            if state.status != ProcessStatus::Running {
                return false;
            }
            state.kill_requested = true;
        }

        info!(pid = entry.pid, "terminating process");
        // SAFETY: plain kill(2) on a pid we spawned and still track.
        unsafe {
            libc::kill(entry.pid as i32, libc::SIGTERM);
        }

        let mut rx = entry.exit_tx.subscribe();
        let exited = tokio::time::timeout(inner.grace, rx.wait_for(|e| *e)).await;
        if exited.is_err() {
            warn!(pid = entry.pid, "grace expired, sending SIGKILL");
            unsafe {
                libc::kill(entry.pid as i32, libc::SIGKILL);
            }
        }
        true
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
