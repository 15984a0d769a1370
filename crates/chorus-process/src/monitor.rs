//! Output monitor — line-by-line reader for a child's stdout/stderr.
//!
//! Each decoded line is written to `stdout.log`/`stderr.log` (flushed),
//! appended to the shared rolling tail (stderr prefixed `err: `), and sent as
//! a [`MonitorEvent::Line`]. When both streams hit EOF the monitor reaps the
//! child and emits [`MonitorEvent::Exited`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Which pipe a line arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Events the monitor reports to the supervisor.
#[derive(Clone, Debug)]
pub enum MonitorEvent {
    Line {
        pid: u32,
        stream: StreamKind,
        line: String,
    },
    Exited {
        pid: u32,
        exit_code: Option<i32>,
    },
}

/// Shared bounded tail of recent output lines.
pub type RollingTail = Arc<Mutex<VecDeque<String>>>;

/// Append to the tail, evicting the oldest line past `limit`.
pub fn push_tail(tail: &RollingTail, limit: usize, line: String) {
    if let Ok(mut guard) = tail.lock() {
        if guard.len() >= limit {
            guard.pop_front();
        }
        guard.push_back(line);
    }
}

// ─────────────────────────────────────────────
// OutputMonitor
// ─────────────────────────────────────────────

/// Drives the reader tasks for one child process.
pub struct OutputMonitor {
    task: JoinHandle<()>,
}

impl OutputMonitor {
    /// Start monitoring `child`. Takes ownership of the child so it can be
    /// reaped; termination signals go to the pid, not through this handle.
    pub fn spawn(
        pid: u32,
        mut child: Child,
        log_dir: PathBuf,
        tail: RollingTail,
        tail_limit: usize,
        events: mpsc::Sender<MonitorEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(pid, error = %e, "failed to create log directory");
            }

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();

            let stdout_task = read_stream(
                pid,
                stdout,
                StreamKind::Stdout,
                log_dir.join("stdout.log"),
                tail.clone(),
                tail_limit,
                events.clone(),
            );
            let stderr_task = read_stream(
                pid,
                stderr,
                StreamKind::Stderr,
                log_dir.join("stderr.log"),
                tail.clone(),
                tail_limit,
                events.clone(),
            );

            tokio::join!(stdout_task, stderr_task);

            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid, error = %e, "wait failed");
                    None
                }
            };

            debug!(pid, exit_code = ?exit_code, "process exited");
            let _ = events.send(MonitorEvent::Exited { pid, exit_code }).await;
        });

        Self { task }
    }

    /// Cancel the reader tasks. Does not kill the child process; an exit
    /// event already emitted stays delivered.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Whether the monitor task has finished (exit reported or aborted).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Read one pipe to EOF: log file + rolling tail + line events.
async fn read_stream<R>(
    pid: u32,
    stream: Option<R>,
    kind: StreamKind,
    log_path: PathBuf,
    tail: RollingTail,
    tail_limit: usize,
    events: mpsc::Sender<MonitorEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };

    let mut log_file = match tokio::fs::File::create(&log_path).await {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(pid, path = %log_path.display(), error = %e, "failed to open log file");
            None
        }
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(f) = log_file.as_mut() {
            let _ = f.write_all(line.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
            let _ = f.flush().await;
        }

        let prefix = match kind {
            StreamKind::Stderr => "err: ",
            StreamKind::Stdout => "",
        };
        push_tail(&tail, tail_limit, format!("{prefix}{line}"));

        let _ = events
            .send(MonitorEvent::Line {
                pid,
                stream: kind,
                line,
            })
            .await;
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
